//! Defines the [`PreparedStatement`] type, which represents a statement
//! that has been prepared in advance on the server.

use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use bytes::Bytes;
use cqlink_cql::frame::protocol_version::ProtocolVersion;
use cqlink_cql::frame::response::result::{
    PartitionKeyIndex, PreparedMetadata, ResultMetadata, TableSpec,
};
use cqlink_cql::serialize::SerializedValues;
use cqlink_cql::value::{CqlValue, MaybeUnset};

use super::StatementConfig;
use crate::errors::{BadKeyspaceName, BadQuery, QueryError};
use crate::response::query_result::ColumnSpecs;
use crate::statement::{Consistency, SerialConsistency};

/// Represents a statement prepared on the server.
///
/// To prepare a statement, execute [`Connection::prepare`](crate::network::Connection::prepare).
/// Values bound to it are type checked against the bind markers
/// the server described when preparing.
///
/// # Clone implementation
/// Cloning a prepared statement is a cheap operation. It only
/// requires copying a couple of small fields and some [Arc] pointers.
///
/// # Statement repreparation
/// When schema is updated, the server is supposed to invalidate its
/// prepared statement caches. The connection then gets an `Unprepared` error
/// on execution, prepares the statement again and retries. Repreparation
/// must yield the same id, as the id is a hash of the statement text.
///
/// Bind marker metadata is not updated by repreparation. Protocol v5 servers
/// send new result metadata along rows when it changed, and the statement
/// picks it up for all its clones.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub(crate) config: StatementConfig,

    id: Bytes,
    shared: Arc<PreparedStatementSharedData>,
    page_size: Option<i32>,
    use_cached_result_metadata: bool,
}

#[derive(Debug)]
struct PreparedStatementSharedData {
    metadata: PreparedMetadata,
    result_metadata: StdRwLock<CachedResultMetadata>,
    statement: String,
}

#[derive(Debug, Clone)]
struct CachedResultMetadata {
    // Protocol v5 only.
    id: Option<Bytes>,
    metadata: Arc<ResultMetadata>,
}

impl PreparedStatement {
    pub(crate) fn new(
        id: Bytes,
        metadata: PreparedMetadata,
        result_metadata_id: Option<Bytes>,
        result_metadata: Arc<ResultMetadata>,
        statement: String,
        page_size: Option<i32>,
        config: StatementConfig,
    ) -> Self {
        Self {
            id,
            shared: Arc::new(PreparedStatementSharedData {
                metadata,
                result_metadata: StdRwLock::new(CachedResultMetadata {
                    id: result_metadata_id,
                    metadata: result_metadata,
                }),
                statement,
            }),
            page_size,
            use_cached_result_metadata: false,
            config,
        }
    }

    /// Returns the id of the statement, assigned by the server.
    pub fn get_id(&self) -> &Bytes {
        &self.id
    }

    /// Returns the CQL text of the statement.
    pub fn get_statement(&self) -> &str {
        &self.shared.statement
    }

    /// Sets the page size for this CQL statement.
    ///
    /// Panics if given number is nonpositive.
    pub fn set_page_size(&mut self, page_size: i32) {
        assert!(page_size > 0, "page size must be larger than 0");
        self.page_size = Some(page_size);
    }

    /// Disables paging: the server sends all rows in a single page.
    pub fn disable_paging(&mut self) {
        self.page_size = None;
    }

    /// Returns the page size for this CQL statement, `None` if paging is disabled.
    pub fn get_page_size(&self) -> Option<i32> {
        self.page_size
    }

    /// Returns the table spec of the first bind marker, if there is one.
    pub fn get_table_spec(&self) -> Option<&TableSpec> {
        self.shared
            .metadata
            .col_specs
            .first()
            .map(|spec| spec.table_spec())
    }

    /// Sets the consistency to be used when executing this statement.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.config.consistency = Some(c);
    }

    /// Unsets the consistency overridden on this statement.
    pub fn unset_consistency(&mut self) {
        self.config.consistency = None;
    }

    /// Gets the consistency to be used when executing this query if it is filled.
    /// If this is empty, the default_consistency of the connection will be used.
    pub fn get_consistency(&self) -> Option<Consistency> {
        self.config.consistency
    }

    /// Sets the serial consistency to be used when executing this statement.
    /// (Ignored unless the statement is an LWT)
    pub fn set_serial_consistency(&mut self, sc: Option<SerialConsistency>) {
        self.config.serial_consistency = Some(sc);
    }

    /// Unsets the serial consistency overridden on this statement.
    pub fn unset_serial_consistency(&mut self) {
        self.config.serial_consistency = None;
    }

    /// Gets the serial consistency to be used when executing this statement.
    /// (Ignored unless the statement is an LWT)
    pub fn get_serial_consistency(&self) -> Option<SerialConsistency> {
        self.config.serial_consistency.flatten()
    }

    /// Enable or disable CQL Tracing for this statement
    pub fn set_tracing(&mut self, should_trace: bool) {
        self.config.tracing = should_trace;
    }

    /// Gets whether tracing is enabled for this statement
    pub fn get_tracing(&self) -> bool {
        self.config.tracing
    }

    /// Make use of cached metadata to decode results
    /// of the statement's execution.
    ///
    /// If true, the driver will request the server not to
    /// attach the result metadata in response to the statement execution.
    ///
    /// The driver will cache the result metadata received from the server
    /// after statement preparation and will use it
    /// to deserialize the results of statement execution.
    ///
    /// This option is false by default.
    pub fn set_use_cached_result_metadata(&mut self, use_cached_metadata: bool) {
        self.use_cached_result_metadata = use_cached_metadata;
    }

    /// Gets the information whether the driver uses cached metadata
    /// to decode the results of the statement's execution.
    pub fn get_use_cached_result_metadata(&self) -> bool {
        self.use_cached_result_metadata
    }

    /// Sets the default timestamp for this statement in microseconds.
    pub fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.config.timestamp = timestamp
    }

    /// Gets the default timestamp for this statement in microseconds.
    pub fn get_timestamp(&self) -> Option<i64> {
        self.config.timestamp
    }

    /// Sets the client-side timeout for this statement.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.config.request_timeout = timeout
    }

    /// Gets client timeout associated with this statement.
    pub fn get_request_timeout(&self) -> Option<Duration> {
        self.config.request_timeout
    }

    /// Binds the statement to a keyspace, see [`Statement::set_keyspace`](super::Statement::set_keyspace).
    pub fn set_keyspace(
        &mut self,
        keyspace_name: Option<String>,
        case_sensitive: bool,
    ) -> Result<(), BadKeyspaceName> {
        self.config.set_keyspace(keyspace_name, case_sensitive)
    }

    /// Gets the keyspace the statement is bound to.
    pub fn get_keyspace(&self) -> Option<&str> {
        self.config.keyspace.as_ref().map(|ks| ks.as_str())
    }

    /// Access column specifications of the bind variables of this statement
    pub fn get_variable_col_specs(&self) -> ColumnSpecs<'_> {
        ColumnSpecs::new(&self.shared.metadata.col_specs)
    }

    /// Access info about partition key indexes of the bind variables of this statement
    pub fn get_variable_pk_indexes(&self) -> &[PartitionKeyIndex] {
        &self.shared.metadata.pk_indexes
    }

    /// Metadata of the rows returned by this statement, as last known.
    pub fn get_result_metadata(&self) -> Arc<ResultMetadata> {
        Arc::clone(&self.read_result_metadata().metadata)
    }

    pub(crate) fn get_result_metadata_id(&self) -> Option<Bytes> {
        self.read_result_metadata().id.clone()
    }

    /// Stores result metadata the server announced as changed (protocol v5).
    pub(crate) fn update_result_metadata(&self, id: Bytes, metadata: Arc<ResultMetadata>) {
        let mut cached = self
            .shared
            .result_metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cached.id = Some(id);
        cached.metadata = metadata;
    }

    fn read_result_metadata(&self) -> std::sync::RwLockReadGuard<'_, CachedResultMetadata> {
        self.shared
            .result_metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes `values` for the bind markers of the statement, in order.
    /// `None` is a null value.
    pub fn serialize_values(
        &self,
        values: &[Option<CqlValue>],
        version: ProtocolVersion,
    ) -> Result<SerializedValues, QueryError> {
        self.check_values_count(values.len())?;
        let mut serialized = SerializedValues::new();
        for (value, spec) in values.iter().zip(&self.shared.metadata.col_specs) {
            serialized.add_typed(value.as_ref(), spec.typ(), version)?;
        }
        Ok(serialized)
    }

    /// Like [`PreparedStatement::serialize_values`], but values may be
    /// left unset, which leaves the bound column untouched (protocol v4+).
    pub fn serialize_values_with_unset(
        &self,
        values: &[MaybeUnset<Option<CqlValue>>],
        version: ProtocolVersion,
    ) -> Result<SerializedValues, QueryError> {
        self.check_values_count(values.len())?;
        let mut serialized = SerializedValues::new();
        for (value, spec) in values.iter().zip(&self.shared.metadata.col_specs) {
            match value {
                MaybeUnset::Set(value) => {
                    serialized.add_typed(value.as_ref(), spec.typ(), version)?
                }
                MaybeUnset::Unset => serialized.add_unset(version)?,
            }
        }
        Ok(serialized)
    }

    fn check_values_count(&self, count: usize) -> Result<(), QueryError> {
        let expected = self.shared.metadata.col_count;
        if count != expected {
            return Err(BadQuery::ValuesCountMismatch(count, expected).into());
        }
        Ok(())
    }
}
