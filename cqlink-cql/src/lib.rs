//! CQL native protocol types for talking to Cassandra-compatible databases:
//! frame envelopes for protocol versions 2 to 5, request and response bodies,
//! and the codecs between CQL values and their wire representation.
//!
//! Mainly intended to be used by the `cqlink` driver, but can also be useful
//! for tooling that needs to read or write CQL frames.

pub mod errors;
pub mod frame;

pub mod deserialize;
pub mod serialize;

pub mod value;

pub use crate::frame::types::Consistency;
