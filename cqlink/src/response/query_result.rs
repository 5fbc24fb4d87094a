//! Results of CQL requests and the row sets they carry.

use std::collections::HashMap;
use std::fmt::Debug;

use bytes::Bytes;
use cqlink_cql::deserialize::result::RowSet;
use cqlink_cql::deserialize::row::Row;
use cqlink_cql::frame::response::event::SchemaChangeEvent;
use cqlink_cql::frame::response::result::ColumnSpec;
use thiserror::Error;
use uuid::Uuid;

/// A view over specification of columns returned by the database.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpecs<'slice> {
    specs: &'slice [ColumnSpec],
}

impl<'slice> ColumnSpecs<'slice> {
    /// Creates new [`ColumnSpecs`] wrapper from a slice.
    pub fn new(specs: &'slice [ColumnSpec]) -> Self {
        Self { specs }
    }

    /// Returns a slice of col specs encompassed by this struct.
    pub fn as_slice(&self) -> &'slice [ColumnSpec] {
        self.specs
    }

    /// Returns number of columns.
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns specification of k-th column returned from the database.
    #[inline]
    pub fn get_by_index(&self, k: usize) -> Option<&'slice ColumnSpec> {
        self.specs.get(k)
    }

    /// Returns specification of the column with given name returned from the database.
    #[inline]
    pub fn get_by_name(&self, name: &str) -> Option<(usize, &'slice ColumnSpec)> {
        self.specs
            .iter()
            .enumerate()
            .find(|(_idx, spec)| spec.name() == name)
    }

    /// Returns iterator over specification of columns returned from the database,
    /// ordered by column order in the response.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'slice ColumnSpec> {
        self.specs.iter()
    }
}

/// Result of a single request to the database. It represents any kind of Result frame.
///
/// NOTE: this is a result of a single CQL request. If you use paging for your query,
/// this will contain exactly one page; pass [`QueryResult::paging_state`] along
/// the next request to fetch the following one.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    rows: Option<RowSet>,
    tracing_id: Option<Uuid>,
    warnings: Vec<String>,
    set_keyspace: Option<String>,
    schema_change: Option<SchemaChangeEvent>,
    custom_payload: Option<HashMap<String, Bytes>>,
}

impl QueryResult {
    pub(crate) fn new(tracing_id: Option<Uuid>, warnings: Vec<String>) -> Self {
        Self {
            tracing_id,
            warnings,
            ..Default::default()
        }
    }

    pub(crate) fn with_rows(mut self, rows: RowSet) -> Self {
        self.rows = Some(rows);
        self
    }

    pub(crate) fn with_custom_payload(mut self, payload: Option<HashMap<String, Bytes>>) -> Self {
        self.custom_payload = payload;
        self
    }

    pub(crate) fn with_set_keyspace(mut self, keyspace_name: String) -> Self {
        self.set_keyspace = Some(keyspace_name);
        self
    }

    pub(crate) fn with_schema_change(mut self, event: SchemaChangeEvent) -> Self {
        self.schema_change = Some(event);
        self
    }

    /// Warnings emitted by the database.
    #[inline]
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }

    /// Tracing ID associated with this CQL request.
    #[inline]
    pub fn tracing_id(&self) -> Option<Uuid> {
        self.tracing_id
    }

    /// Returns a bool indicating the current response is of Rows type.
    #[inline]
    pub fn is_rows(&self) -> bool {
        self.rows.is_some()
    }

    /// Returns `Ok` for a request's result that shouldn't contain any rows.\
    /// Will return `Ok` for `INSERT` result, but a `SELECT` result, even an empty one, will cause an error.\
    /// Opposite of [QueryResult::into_rows_result].
    #[inline]
    pub fn result_not_rows(&self) -> Result<(), ResultNotRowsError> {
        match &self.rows {
            Some(_) => Err(ResultNotRowsError),
            None => Ok(()),
        }
    }

    /// The row set, if the response is of Rows kind.
    #[inline]
    pub fn rows(&self) -> Option<&RowSet> {
        self.rows.as_ref()
    }

    /// Transforms itself into the row set.
    ///
    /// If the response is not of Rows kind, the original [`QueryResult`] (self) is
    /// returned back in the error type. See [`IntoRowsResultError`] documentation.
    pub fn into_rows_result(self) -> Result<RowSet, IntoRowsResultError> {
        match self.rows {
            Some(rows) => Ok(rows),
            None => Err(IntoRowsResultError::ResultNotRows(self)),
        }
    }

    /// The first row of a Rows result, `None` for an empty page or a
    /// non-Rows result.
    pub fn first_row(&self) -> Option<&Row> {
        self.rows.as_ref().and_then(RowSet::first_row)
    }

    /// Column specifications of a Rows result.
    pub fn column_specs(&self) -> Option<ColumnSpecs<'_>> {
        self.rows
            .as_ref()
            .map(|rows| ColumnSpecs::new(rows.metadata().col_specs()))
    }

    /// Opaque state to fetch the next page with, `None` on the last page
    /// and for non-Rows results.
    pub fn paging_state(&self) -> Option<&Bytes> {
        self.rows.as_ref().and_then(RowSet::paging_state)
    }

    /// Keyspace the connection switched to, for the result of a `USE`.
    pub fn set_keyspace(&self) -> Option<&str> {
        self.set_keyspace.as_deref()
    }

    /// Schema alteration reported by a DDL statement.
    pub fn schema_change(&self) -> Option<&SchemaChangeEvent> {
        self.schema_change.as_ref()
    }

    /// Custom payload sent by the server along the response.
    pub fn custom_payload(&self) -> Option<&HashMap<String, Bytes>> {
        self.custom_payload.as_ref()
    }
}

/// An error returned by [`QueryResult::into_rows_result`]
///
/// The `ResultNotRows` variant contains original [`QueryResult`],
/// which otherwise would be consumed and lost.
#[derive(Debug, Error, Clone)]
pub enum IntoRowsResultError {
    /// Result is not of Rows kind
    #[error("Result is not of Rows kind")]
    ResultNotRows(QueryResult),
}

/// An error returned by [`QueryResult::result_not_rows`].
///
/// It indicates that response to the request was, unexpectedly, of Rows kind.
#[derive(Debug, Error, Clone)]
#[error("The result is of Rows kind")]
pub struct ResultNotRowsError;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cqlink_cql::frame::protocol_version::ProtocolVersion;
    use cqlink_cql::frame::response::result::{ColumnType, TableSpec};
    use cqlink_cql::frame::types;

    fn rows(texts: &[&str]) -> RowSet {
        let mut buf = Vec::new();
        types::write_int(0x0001, &mut buf);
        types::write_int(1, &mut buf);
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("t", &mut buf).unwrap();
        types::write_string("name", &mut buf).unwrap();
        ColumnType::Text.write_type_spec(&mut buf).unwrap();
        types::write_int(texts.len() as i32, &mut buf);
        for text in texts {
            types::write_bytes(text.as_bytes(), &mut buf).unwrap();
        }
        RowSet::deserialize(buf.into(), ProtocolVersion::V4, None).unwrap()
    }

    #[test]
    fn non_rows_result() {
        let result = QueryResult::new(None, vec!["careful".to_owned()]);
        assert!(!result.is_rows());
        assert!(result.result_not_rows().is_ok());
        assert!(result.first_row().is_none());
        assert!(result.paging_state().is_none());
        assert_eq!(result.warnings().collect::<Vec<_>>(), vec!["careful"]);
        assert_matches!(
            result.into_rows_result(),
            Err(IntoRowsResultError::ResultNotRows(result)) if result.warnings().count() == 1
        );
    }

    #[test]
    fn rows_result() {
        let result = QueryResult::new(None, Vec::new()).with_rows(rows(&["a", "b"]));
        assert!(result.is_rows());
        assert_matches!(result.result_not_rows(), Err(ResultNotRowsError));
        assert_eq!(result.first_row().unwrap().get::<String>(0).unwrap(), "a");

        let specs = result.column_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(
            specs.get_by_name("name").map(|(idx, spec)| (idx, spec.typ().clone())),
            Some((0, ColumnType::Text))
        );
        assert_eq!(
            specs.get_by_index(0).unwrap().table_spec(),
            &TableSpec::new("ks", "t")
        );

        let rows = result.into_rows_result().unwrap();
        assert_eq!(rows.rows_count(), 2);
    }
}
