//! Async driver for Apache Cassandra® compatible databases, speaking the CQL
//! native protocol over multiplexed connections.
//!
//! # Overview
//! A [`Connection`] talks to a single node. Many tasks can issue requests
//! over it at once: each request gets a stream id, and responses are matched
//! to requests by that id, in whatever order the node sends them.
//!
//! ```rust,no_run
//! use cqlink::{open_connection, ConnectionConfig};
//! use std::error::Error;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn Error>> {
//!     let addr = "127.0.0.1:9042".parse()?;
//!     let (connection, _broken) = open_connection(addr, ConnectionConfig::default()).await?;
//!
//!     let prepared = connection
//!         .prepare("SELECT name FROM ks.users WHERE id = ?")
//!         .await?;
//!     let result = connection
//!         .execute(&prepared, &[Some(cqlink::value::CqlValue::Int(7))])
//!         .await?;
//!     if let Some(row) = result.first_row() {
//!         let name: String = row.get(0)?;
//!         println!("{name}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Results can also be consumed while they are still arriving, see
//! [`Connection::query_unbuffered`]. Server events registered for through
//! [`ConnectionConfig::event_sender`] can be coalesced by an
//! [`EventDebouncer`](events::EventDebouncer).

/// Frame level types of the CQL protocol.
pub mod frame {
    pub use cqlink_cql::frame::{frame_errors, Compression, ProtocolVersion};

    /// Consistency levels.
    pub mod types {
        pub use cqlink_cql::frame::types::{Consistency, SerialConsistency};
    }

    /// Server events and result metadata.
    pub mod response {
        pub use cqlink_cql::frame::response::event;

        /// Metadata of result columns.
        pub mod result {
            pub use cqlink_cql::frame::response::result::{
                ColumnSpec, ColumnType, PartitionKeyIndex, ResultMetadata, TableSpec,
            };
        }
    }
}

/// Serializing bound values of a request.
pub mod serialize {
    pub use cqlink_cql::serialize::*;
}

/// Deserializing values of result rows.
pub mod deserialize {
    pub use cqlink_cql::deserialize::*;
    pub use cqlink_cql::deserialize::{result::RowSet, row::Row};
}

pub use cqlink_cql::value;

pub mod authentication;
pub mod errors;
pub mod events;
pub mod network;
pub mod observability;
pub mod response;
pub mod statement;

pub(crate) mod utils;

pub use network::{open_connection, Connection, ConnectionConfig, ConnectionState};
pub use response::QueryResult;
pub use statement::{Batch, PreparedStatement, Statement};
