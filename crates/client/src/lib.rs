//! Client runtime for the Quadra graph store.
//!
//! Four layers, bottom up:
//!
//! - [`storedproc`]: the binary wire codec for stored-procedure calls
//! - [`http`]: the transport client (typed response handlers, auth, gzip,
//!   error classification) and the repository/session client on top of it
//! - [`pool`]: connection factory + lifecycle-hooked connection pool
//! - [`term`]/[`spec`]: the minimal term model and repository addressing
//!   the wire protocol needs
//!
//! Query languages, RDF syntaxes beyond the line-oriented wire formats,
//! and the server's storage/inference engine are external collaborators:
//! this crate transports their payloads without understanding them.

pub mod error;
pub mod http;
pub mod pool;
pub mod spec;
pub mod storedproc;
pub mod term;

pub use error::{QuadraError, QuadraResult, ServerErrorKind};
pub use http::{
    Binding, BooleanHandler, Dataset, IgnoreHandler, JsonHandler, LongHandler, QuadraHttpClient,
    QuadraRepoClient, QueryLanguage, QueryOptions, RdfFormat, RdfHandler, ResponseHandler,
    RowSink, StatementSink, StringHandler, TupleHandler, TupleRow,
};
pub use pool::{ConnConfig, ConnFactory, ConnPool, PoolConfig, RepoConnFactory, SessionMode};
pub use spec::RepoSpec;
pub use storedproc::SerialValue;
pub use term::{Statement, Term};
