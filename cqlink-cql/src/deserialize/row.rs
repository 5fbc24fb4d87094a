//! A single row of a result set, decoded lazily.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use super::value::deser_cql_value_opt;
use super::DeserializationError;
use crate::frame::frame_errors::LowLevelDeserializationError;
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::response::cql_to_rust::{FromCqlVal, FromCqlValError, FromRow, FromRowError};
use crate::frame::response::result::{ColumnSpec, ResultMetadata};
use crate::frame::types;
use crate::value::CqlValue;

/// Splits the next row off `buf` into its raw cells, `None` being null.
pub fn split_row<'a>(
    buf: &mut &'a [u8],
    col_count: usize,
) -> Result<Vec<Option<&'a [u8]>>, (usize, LowLevelDeserializationError)> {
    (0..col_count)
        .map(|column_index| types::read_bytes_opt(buf).map_err(|err| (column_index, err)))
        .collect()
}

/// An error returned when a value of a row cannot be accessed.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum RowAccessError {
    #[error("Column index {index} is out of range for a row of {len} columns")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("No column named {0}")]
    NoSuchColumn(String),
    #[error("Column {column}: {err}")]
    Deserialization {
        column: usize,
        err: DeserializationError,
    },
    #[error("Column {column}: {err}")]
    Conversion { column: usize, err: FromCqlValError },
}

/// One row of a result set. Holds the raw cells and decodes them
/// on access.
#[derive(Debug, Clone)]
pub struct Row {
    metadata: Arc<ResultMetadata>,
    cells: Vec<Option<Bytes>>,
    version: ProtocolVersion,
}

impl Row {
    pub fn new(
        metadata: Arc<ResultMetadata>,
        cells: Vec<Option<Bytes>>,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            metadata,
            cells,
            version,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        self.metadata.col_specs()
    }

    /// Index of the first column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.metadata.column_index(name)
    }

    /// Raw bytes of a cell. The outer `Option` is `None` for an index out
    /// of range, the inner one for a null.
    pub fn raw(&self, index: usize) -> Option<Option<&[u8]>> {
        self.cells.get(index).map(|cell| cell.as_deref())
    }

    /// Decodes the value at `index`, `None` being null.
    pub fn value(&self, index: usize) -> Result<Option<CqlValue>, RowAccessError> {
        let cell = self.raw(index).ok_or(RowAccessError::IndexOutOfRange {
            index,
            len: self.cells.len(),
        })?;
        let spec = self
            .metadata
            .col_specs()
            .get(index)
            .ok_or(RowAccessError::IndexOutOfRange {
                index,
                len: self.metadata.col_count(),
            })?;
        deser_cql_value_opt(spec.typ(), cell, self.version)
            .map_err(|err| RowAccessError::Deserialization { column: index, err })
    }

    pub fn value_by_name(&self, name: &str) -> Result<Option<CqlValue>, RowAccessError> {
        self.value(self.index_of(name)?)
    }

    /// Decodes the value at `index` and converts it to `T`.
    ///
    /// ```
    /// # use cqlink_cql::deserialize::row::{Row, RowAccessError};
    /// # fn f(row: &Row) -> Result<(), RowAccessError> {
    /// let id: i32 = row.get(0)?;
    /// let name: Option<String> = row.get_by_name("name")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn get<T: FromCqlVal<Option<CqlValue>>>(&self, index: usize) -> Result<T, RowAccessError> {
        T::from_cql(self.value(index)?)
            .map_err(|err| RowAccessError::Conversion { column: index, err })
    }

    pub fn get_by_name<T: FromCqlVal<Option<CqlValue>>>(
        &self,
        name: &str,
    ) -> Result<T, RowAccessError> {
        self.get(self.index_of(name)?)
    }

    /// Decodes every cell.
    pub fn values(&self) -> Result<Vec<Option<CqlValue>>, RowAccessError> {
        (0..self.cells.len()).map(|i| self.value(i)).collect()
    }

    /// Converts the whole row, e.g. into a tuple.
    pub fn into_typed<R: FromRow>(self) -> Result<R, FromRowError> {
        R::from_row(self)
    }

    fn index_of(&self, name: &str) -> Result<usize, RowAccessError> {
        self.metadata
            .column_index(name)
            .ok_or_else(|| RowAccessError::NoSuchColumn(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::response::result::{ColumnType, TableSpec};
    use assert_matches::assert_matches;

    fn row() -> Row {
        let table = TableSpec::new("ks", "t");
        let metadata = Arc::new(ResultMetadata::new(vec![
            ColumnSpec::new("id", ColumnType::Int, table.clone()),
            ColumnSpec::new("name", ColumnType::Text, table.clone()),
            ColumnSpec::new("id", ColumnType::BigInt, table),
        ]));
        Row::new(
            metadata,
            vec![
                Some(Bytes::from_static(&[0, 0, 0, 9])),
                None,
                Some(Bytes::from_static(&[0, 0, 1])),
            ],
            ProtocolVersion::V4,
        )
    }

    #[test]
    fn access_by_index_and_name() {
        let row = row();
        assert_eq!(row.get::<i32>(0).unwrap(), 9);
        assert_eq!(row.get_by_name::<i32>("id").unwrap(), 9);
        assert_eq!(row.get_by_name::<Option<String>>("name").unwrap(), None);
        assert_eq!(row.raw(1), Some(None));
        assert_eq!(row.raw(3), None);
    }

    #[test]
    fn access_errors() {
        let row = row();
        assert_matches!(
            row.value(5),
            Err(RowAccessError::IndexOutOfRange { index: 5, len: 3 })
        );
        assert_matches!(
            row.value_by_name("missing"),
            Err(RowAccessError::NoSuchColumn(name)) if name == "missing"
        );
        assert_matches!(
            row.get::<String>(1),
            Err(RowAccessError::Conversion {
                column: 1,
                err: FromCqlValError::ValIsNull
            })
        );
        assert_matches!(
            row.get::<i64>(0),
            Err(RowAccessError::Conversion {
                column: 0,
                err: FromCqlValError::BadCqlType
            })
        );
        // Only the accessed cell is decoded, the malformed one fails on access.
        assert_matches!(
            row.value(2),
            Err(RowAccessError::Deserialization { column: 2, .. })
        );
    }

    #[test]
    fn split_row_reports_failing_column() {
        let mut buf = Vec::new();
        types::write_bytes(&[1], &mut buf).unwrap();
        types::write_int(-1, &mut buf);
        types::write_int(10, &mut buf);
        buf.push(0);

        let mut slice = &buf[..2 * 4 + 1];
        let cells = split_row(&mut slice, 2).unwrap();
        assert_eq!(cells, vec![Some(&[1u8][..]), None]);

        let mut slice = &buf[..];
        assert_matches!(
            split_row(&mut slice, 3),
            Err((
                2,
                LowLevelDeserializationError::TooFewBytesReceived {
                    expected: 10,
                    received: 1
                }
            ))
        );
    }
}
