//! Quadra HTTP Client Module
//!
//! This module provides the HTTP runtime for talking to a Quadra server.
//! The client is organized into logical submodules:
//!
//! - `client`: core transport and server-level services
//! - `handler`: response decoding strategies, one per result shape
//! - `repo`: repository-level operations bound to a backend session
//! - `query`: query parameter assembly
//! - `url_builder`: URL construction utilities

pub mod client;
pub mod handler;
pub mod query;
pub mod repo;
pub mod url_builder;

// Re-export main types and traits
pub use client::{QuadraHttpClient, RequestBody, BACKEND_HEADER};
pub use handler::{
    BooleanHandler, IgnoreHandler, JsonHandler, LongHandler, RdfFormat, RdfHandler,
    ResponseHandler, RowSink, StatementSink, StringHandler, TupleHandler, TupleRow,
};
pub use query::{Binding, Dataset, QueryLanguage, QueryOptions};
pub use repo::{QuadraRepoClient, DEFAULT_SESSION_LIFETIME};
pub use url_builder::UrlBuilder;
