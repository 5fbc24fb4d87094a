//! Buffered RESULT:Rows bodies.

use std::sync::Arc;

use bytes::Bytes;

use super::row::{split_row, Row};
use crate::frame::frame_errors::RowsParseError;
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::response::result::{
    deser_result_metadata, ParsedResultMetadata, ResultMetadata,
};
use crate::frame::types;

/// Picks the metadata rows are decoded with: the one sent along the rows,
/// or the cached one if the server skipped it.
pub fn resolve_metadata(
    parsed: ParsedResultMetadata,
    cached_metadata: Option<&Arc<ResultMetadata>>,
) -> Result<Arc<ResultMetadata>, RowsParseError> {
    match (parsed.metadata, cached_metadata) {
        (Some(metadata), _) => Ok(Arc::new(metadata)),
        (None, Some(cached)) => Ok(Arc::clone(cached)),
        (None, None) => Err(RowsParseError::MissingMetadata),
    }
}

/// Reads the row count that follows the metadata.
pub fn read_rows_count(buf: &mut &[u8]) -> Result<usize, RowsParseError> {
    types::read_int_length(buf).map_err(RowsParseError::RowsCountParseError)
}

/// A fully received page of rows.
///
/// The body is split into cells when parsed, so that a malformed body is
/// reported right away; the cells share the body's buffer and are decoded
/// only when accessed through a [`Row`].
#[derive(Debug, Clone)]
pub struct RowSet {
    metadata: Arc<ResultMetadata>,
    paging_state: Option<Bytes>,
    new_metadata_id: Option<Bytes>,
    rows: Vec<Row>,
}

impl RowSet {
    /// Parses a RESULT:Rows body, starting after the result kind.
    pub fn deserialize(
        body: Bytes,
        version: ProtocolVersion,
        cached_metadata: Option<&Arc<ResultMetadata>>,
    ) -> Result<Self, RowsParseError> {
        let buf = &mut &*body;
        let parsed = deser_result_metadata(buf, version)?;
        let paging_state = parsed.paging_state.clone();
        let new_metadata_id = parsed.new_metadata_id.clone();
        let metadata = resolve_metadata(parsed, cached_metadata)?;

        let rows_count = read_rows_count(buf)?;
        let col_count = metadata.col_count();
        // Each cell takes at least 4 bytes.
        let mut rows = Vec::with_capacity(rows_count.min(buf.len() / 4 + 1));
        for row_index in 0..rows_count {
            let cells = split_row(buf, col_count).map_err(|(column_index, err)| {
                RowsParseError::CellParseError {
                    row_index,
                    column_index,
                    err,
                }
            })?;
            let cells = cells
                .into_iter()
                .map(|cell| cell.map(|c| body.slice_ref(c)))
                .collect();
            rows.push(Row::new(Arc::clone(&metadata), cells, version));
        }

        if !buf.is_empty() {
            return Err(RowsParseError::TrailingBytes(buf.len()));
        }

        Ok(Self {
            metadata,
            paging_state,
            new_metadata_id,
            rows,
        })
    }

    pub fn metadata(&self) -> &Arc<ResultMetadata> {
        &self.metadata
    }

    /// Opaque state to pass with the next request to fetch the next page,
    /// `None` on the last page.
    pub fn paging_state(&self) -> Option<&Bytes> {
        self.paging_state.as_ref()
    }

    pub fn new_metadata_id(&self) -> Option<&Bytes> {
        self.new_metadata_id.as_ref()
    }

    pub fn rows_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// The first row, if any.
    pub fn first_row(&self) -> Option<&Row> {
        self.rows.first()
    }
}

impl IntoIterator for RowSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frame_errors::LowLevelDeserializationError;
    use crate::frame::response::result::ColumnType;
    use assert_matches::assert_matches;

    /// One row of `ks.t`: `abc` in text column `col0`, `42` in int column `col1`.
    fn one_row_body() -> Vec<u8> {
        let mut buf = Vec::new();
        types::write_int(0x0001, &mut buf); // global table spec
        types::write_int(2, &mut buf);
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("t", &mut buf).unwrap();
        types::write_string("col0", &mut buf).unwrap();
        ColumnType::Text.write_type_spec(&mut buf).unwrap();
        types::write_string("col1", &mut buf).unwrap();
        ColumnType::Int.write_type_spec(&mut buf).unwrap();
        types::write_int(1, &mut buf);
        types::write_bytes(b"abc", &mut buf).unwrap();
        types::write_bytes(&42i32.to_be_bytes(), &mut buf).unwrap();
        buf
    }

    #[test]
    fn single_row_by_index_and_name() {
        let rows = RowSet::deserialize(one_row_body().into(), ProtocolVersion::V4, None).unwrap();
        assert_eq!(rows.rows_count(), 1);
        assert_eq!(rows.paging_state(), None);

        let row = rows.first_row().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "abc");
        assert_eq!(row.get::<i32>(1).unwrap(), 42);
        assert_eq!(row.get_by_name::<i32>("col1").unwrap(), 42);
        assert_eq!(row.get_by_name::<String>("col0").unwrap(), "abc");
    }

    #[test]
    fn truncated_row() {
        let mut body = one_row_body();
        body.truncate(body.len() - 2);
        assert_matches!(
            RowSet::deserialize(body.into(), ProtocolVersion::V4, None),
            Err(RowsParseError::CellParseError {
                row_index: 0,
                column_index: 1,
                err: LowLevelDeserializationError::TooFewBytesReceived { .. }
            })
        );
    }

    #[test]
    fn trailing_bytes() {
        let mut body = one_row_body();
        body.push(0);
        assert_matches!(
            RowSet::deserialize(body.into(), ProtocolVersion::V4, None),
            Err(RowsParseError::TrailingBytes(1))
        );
    }

    #[test]
    fn cells_share_the_body() {
        let body = Bytes::from(one_row_body());
        let rows = RowSet::deserialize(body.clone(), ProtocolVersion::V4, None).unwrap();
        let cell = rows.rows()[0].raw(0).unwrap().unwrap();
        let body_range = body.as_ptr_range();
        assert!(body_range.contains(&cell.as_ptr()));
    }
}
