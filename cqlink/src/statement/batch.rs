//! Batches of statements executed atomically.

use std::time::Duration;

pub use cqlink_cql::frame::request::batch::BatchType;

use super::StatementConfig;
use crate::errors::BadKeyspaceName;
use crate::statement::{Consistency, PreparedStatement, SerialConsistency, Statement};

/// CQL batch statement.
///
/// This represents a CQL batch that can be executed on a server.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub(crate) config: StatementConfig,

    /// Statements of the batch, executed in order.
    pub statements: Vec<BatchStatement>,
    batch_type: BatchType,
}

impl Batch {
    /// Creates a new, empty `Batch` of `batch_type` type.
    pub fn new(batch_type: BatchType) -> Self {
        Self {
            batch_type,
            ..Default::default()
        }
    }

    /// Creates a new, empty `Batch` of `batch_type` type with the provided statements.
    pub fn new_with_statements(batch_type: BatchType, statements: Vec<BatchStatement>) -> Self {
        Self {
            batch_type,
            statements,
            ..Default::default()
        }
    }

    /// Appends a new statement to the batch.
    pub fn append_statement(&mut self, statement: impl Into<BatchStatement>) {
        self.statements.push(statement.into());
    }

    /// Gets type of batch.
    pub fn get_type(&self) -> BatchType {
        self.batch_type
    }

    /// Sets the consistency to be used when executing this batch.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.config.consistency = Some(c);
    }

    /// Unsets the consistency overridden on this batch.
    pub fn unset_consistency(&mut self) {
        self.config.consistency = None;
    }

    /// Gets the consistency to be used when executing this batch if it is filled.
    pub fn get_consistency(&self) -> Option<Consistency> {
        self.config.consistency
    }

    /// Sets the serial consistency to be used when executing this batch.
    /// (Ignored unless the batch is an LWT)
    pub fn set_serial_consistency(&mut self, sc: Option<SerialConsistency>) {
        self.config.serial_consistency = Some(sc);
    }

    /// Unsets the serial consistency overridden on this batch.
    pub fn unset_serial_consistency(&mut self) {
        self.config.serial_consistency = None;
    }

    /// Gets the serial consistency to be used when executing this batch.
    pub fn get_serial_consistency(&self) -> Option<SerialConsistency> {
        self.config.serial_consistency.flatten()
    }

    /// Enable or disable CQL Tracing for this batch
    pub fn set_tracing(&mut self, should_trace: bool) {
        self.config.tracing = should_trace;
    }

    /// Gets whether tracing is enabled for this batch
    pub fn get_tracing(&self) -> bool {
        self.config.tracing
    }

    /// Sets the default timestamp for this batch in microseconds.
    pub fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.config.timestamp = timestamp
    }

    /// Gets the default timestamp for this batch in microseconds.
    pub fn get_timestamp(&self) -> Option<i64> {
        self.config.timestamp
    }

    /// Sets the client-side timeout for this batch.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.config.request_timeout = timeout
    }

    /// Gets client timeout associated with this batch.
    pub fn get_request_timeout(&self) -> Option<Duration> {
        self.config.request_timeout
    }

    /// Binds the batch to a keyspace, see [`Statement::set_keyspace`].
    pub fn set_keyspace(
        &mut self,
        keyspace_name: Option<String>,
        case_sensitive: bool,
    ) -> Result<(), BadKeyspaceName> {
        self.config.set_keyspace(keyspace_name, case_sensitive)
    }
}

/// This enum represents a CQL statement, that can be part of batch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum BatchStatement {
    /// An unprepared statement. The connection prepares it before sending
    /// the batch when values are bound to it.
    Query(Statement),
    /// A prepared statement
    PreparedStatement(PreparedStatement),
}

impl BatchStatement {
    pub(crate) fn contents(&self) -> &str {
        match self {
            BatchStatement::Query(statement) => &statement.contents,
            BatchStatement::PreparedStatement(prepared) => prepared.get_statement(),
        }
    }
}

impl From<&str> for BatchStatement {
    fn from(s: &str) -> Self {
        BatchStatement::Query(Statement::from(s))
    }
}

impl From<Statement> for BatchStatement {
    fn from(q: Statement) -> Self {
        BatchStatement::Query(q)
    }
}

impl From<PreparedStatement> for BatchStatement {
    fn from(p: PreparedStatement) -> Self {
        BatchStatement::PreparedStatement(p)
    }
}
