//! Wire codec for stored-procedure argument/result marshaling.
//!
//! Structured values travel to server-side procedures as a compact
//! length-prefixed byte stream ([`codec`]) wrapped in a 6-bit text armor
//! ([`radix64`]) so they fit in a query parameter. This traffic is entirely
//! separate from the RDF/query protocol.

pub mod codec;
pub mod radix64;
mod value;

pub use codec::{decode_and_deserialize, deserialize, serialize, serialize_and_encode};
pub use value::SerialValue;
