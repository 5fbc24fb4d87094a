//! Row sets read off the socket one row at a time.
//!
//! A RESULT:Rows body of an unbuffered request is handed over by the router
//! as soon as its header arrives. Rows are split off the body as its chunks
//! come in, so a page never has to be held in memory as a whole. The router
//! does not read the next frame before the whole body went through, and it
//! discards the rest of the body once the [`UnbufferedRowSet`] is dropped.

use std::ops::Range;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use cqlink_cql::deserialize::result::{read_rows_count, resolve_metadata};
use cqlink_cql::deserialize::row::{split_row, Row};
use cqlink_cql::frame::frame_errors::{
    CqlResponseParseError, CqlResultParseError, FrameBodyExtensionsParseError,
    LowLevelDeserializationError, RowsParseError,
};
use cqlink_cql::frame::protocol_version::ProtocolVersion;
use cqlink_cql::frame::response::result::{deser_result_metadata, ResultMetadata};
use cqlink_cql::frame::response::{Response, ResponseOpcode};
use cqlink_cql::frame::{self, types, FLAG_COMPRESSION};
use futures::Stream;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use super::{QueryResponse, QueryResult};
use crate::errors::QueryError;
use crate::network::router::truncated_body_error;

const RESULT_KIND_ROWS: i32 = 0x0002;

/// Result of an unbuffered request.
#[derive(Debug)]
pub enum UnbufferedResult {
    /// Rows, to be pulled with [`UnbufferedRowSet::next_row`].
    Rows(UnbufferedRowSet),
    /// Any other result, received in full.
    Other(QueryResult),
}

impl UnbufferedResult {
    /// The row set, if the result is of Rows kind.
    pub fn into_rows(self) -> Option<UnbufferedRowSet> {
        match self {
            UnbufferedResult::Rows(rows) => Some(rows),
            UnbufferedResult::Other(_) => None,
        }
    }
}

/// A body arriving in chunks from the router.
#[derive(Debug)]
pub(crate) struct StreamedBody {
    // Received and not yet consumed.
    buf: BytesMut,
    received: usize,
    length: usize,
    chunks: mpsc::Receiver<Bytes>,
}

impl StreamedBody {
    pub(crate) fn new(length: usize, chunks: mpsc::Receiver<Bytes>) -> Self {
        Self {
            buf: BytesMut::new(),
            received: 0,
            length,
            chunks,
        }
    }

    fn is_complete(&self) -> bool {
        self.received >= self.length
    }

    // Bytes not consumed yet, received or not.
    fn remaining(&self) -> usize {
        self.buf.len() + self.length.saturating_sub(self.received)
    }

    async fn fetch_more(&mut self) -> Result<(), QueryError> {
        match self.chunks.recv().await {
            Some(chunk) => {
                self.received += chunk.len();
                self.buf.extend_from_slice(&chunk);
                Ok(())
            }
            None => Err(truncated_body_error(
                self.length.saturating_sub(self.received),
                self.length,
            )),
        }
    }

    /// Runs `parse` over the received bytes. A failure is final only once
    /// the whole body is there; until then it means more bytes are needed.
    /// On success, the consumed bytes are split off and returned.
    async fn parse<T, E>(
        &mut self,
        mut parse: impl FnMut(&mut &[u8]) -> Result<T, E>,
    ) -> Result<Result<(Bytes, T), E>, QueryError> {
        loop {
            let mut buf = &self.buf[..];
            match parse(&mut buf) {
                Ok(parsed) => {
                    let consumed = self.buf.len() - buf.len();
                    return Ok(Ok((self.buf.split_to(consumed).freeze(), parsed)));
                }
                Err(err) if self.is_complete() => return Ok(Err(err)),
                Err(_) => self.fetch_more().await?,
            }
        }
    }

    async fn into_rest(mut self) -> Result<Bytes, QueryError> {
        while !self.is_complete() {
            self.fetch_more().await?;
        }
        Ok(self.buf.freeze())
    }
}

fn result_parse_error(err: impl Into<CqlResultParseError>) -> QueryError {
    CqlResponseParseError::CqlResultParseError(err.into()).into()
}

/// Reads a streamed RESULT body up to its first row.
pub(crate) async fn read_unbuffered(
    flags: u8,
    mut body: StreamedBody,
    version: ProtocolVersion,
    cached_metadata: Option<&Arc<ResultMetadata>>,
) -> Result<UnbufferedResult, QueryError> {
    // The router never streams compressed bodies.
    let flags = flags & !FLAG_COMPRESSION;
    let (_, (tracing_id, warnings, custom_payload)) = body
        .parse(|buf| {
            let extensions =
                frame::parse_response_body_extensions(flags, None, Bytes::copy_from_slice(buf))?;
            let consumed = buf.len() - extensions.body.len();
            buf.advance(consumed);
            Ok::<_, FrameBodyExtensionsParseError>((
                extensions.trace_id,
                extensions.warnings,
                extensions.custom_payload,
            ))
        })
        .await??;

    let (_, kind) = body
        .parse(types::read_int)
        .await?
        .map_err(|err| result_parse_error(CqlResultParseError::ResultIdParseError(err.into())))?;

    if kind != RESULT_KIND_ROWS {
        // Not worth streaming, parse it the buffered way.
        let rest = body.into_rest().await?;
        let mut whole = BytesMut::with_capacity(4 + rest.len());
        types::write_int(kind, &mut whole);
        whole.extend_from_slice(&rest);
        let response = QueryResponse {
            response: Response::deserialize(
                version,
                ResponseOpcode::Result,
                whole.freeze(),
                cached_metadata,
            )?,
            tracing_id,
            warnings,
            custom_payload,
        };
        return Ok(UnbufferedResult::Other(response.into_query_result()?));
    }

    let (_, parsed) = body
        .parse(|buf| deser_result_metadata(buf, version))
        .await?
        .map_err(|err| result_parse_error(RowsParseError::from(err)))?;
    let paging_state = parsed.paging_state.clone();
    let new_metadata_id = parsed.new_metadata_id.clone();
    let metadata = resolve_metadata(parsed, cached_metadata).map_err(result_parse_error)?;

    let (_, rows_count) = body
        .parse(read_rows_count)
        .await?
        .map_err(result_parse_error)?;
    trace!(rows_count, "Streaming rows");

    Ok(UnbufferedResult::Rows(UnbufferedRowSet {
        body,
        metadata,
        paging_state,
        new_metadata_id,
        rows_count,
        rows_read: 0,
        version,
        tracing_id,
        warnings,
        done: false,
    }))
}

// `split_row`, with cells as ranges relative to the start of the row.
fn split_row_ranges(
    buf: &mut &[u8],
    col_count: usize,
) -> Result<Vec<Option<Range<usize>>>, (usize, LowLevelDeserializationError)> {
    let start = buf.as_ptr() as usize;
    let cells = split_row(buf, col_count)?;
    Ok(cells
        .into_iter()
        .map(|cell| {
            cell.map(|cell| {
                let offset = cell.as_ptr() as usize - start;
                offset..offset + cell.len()
            })
        })
        .collect())
}

/// A page of rows decoded as it is read off the connection.
///
/// The connection keeps reading other responses only after the whole page
/// went through. Consume it promptly, or drop it to discard the rest.
#[derive(Debug)]
pub struct UnbufferedRowSet {
    body: StreamedBody,
    metadata: Arc<ResultMetadata>,
    paging_state: Option<Bytes>,
    new_metadata_id: Option<Bytes>,
    rows_count: usize,
    rows_read: usize,
    version: ProtocolVersion,
    tracing_id: Option<Uuid>,
    warnings: Vec<String>,
    // Set after the last row or the first error.
    done: bool,
}

impl UnbufferedRowSet {
    /// Metadata of the columns.
    pub fn metadata(&self) -> &Arc<ResultMetadata> {
        &self.metadata
    }

    /// Opaque state to fetch the next page with, `None` on the last page.
    pub fn paging_state(&self) -> Option<&Bytes> {
        self.paging_state.as_ref()
    }

    pub(crate) fn new_metadata_id(&self) -> Option<&Bytes> {
        self.new_metadata_id.as_ref()
    }

    /// Number of rows announced by the server.
    pub fn rows_count(&self) -> usize {
        self.rows_count
    }

    /// Number of rows not read yet.
    pub fn rows_remaining(&self) -> usize {
        self.rows_count - self.rows_read
    }

    /// Tracing ID associated with this CQL request.
    pub fn tracing_id(&self) -> Option<Uuid> {
        self.tracing_id
    }

    /// Warnings emitted by the database.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }

    /// Reads the next row, waiting for its bytes if needed.
    ///
    /// Returns `None` after the last row, and after an error.
    pub async fn next_row(&mut self) -> Option<Result<Row, QueryError>> {
        if self.done {
            return None;
        }
        if self.rows_read == self.rows_count {
            self.done = true;
            let trailing = self.body.remaining();
            if trailing > 0 {
                return Some(Err(result_parse_error(RowsParseError::TrailingBytes(
                    trailing,
                ))));
            }
            return None;
        }

        let row_index = self.rows_read;
        let col_count = self.metadata.col_count();
        let parsed = match self
            .body
            .parse(|buf| split_row_ranges(buf, col_count))
            .await
        {
            Ok(parsed) => parsed,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };

        match parsed {
            Ok((row_bytes, ranges)) => {
                self.rows_read += 1;
                let cells = ranges
                    .into_iter()
                    .map(|range| range.map(|range| row_bytes.slice(range)))
                    .collect();
                Some(Ok(Row::new(
                    Arc::clone(&self.metadata),
                    cells,
                    self.version,
                )))
            }
            Err((column_index, err)) => {
                self.done = true;
                Some(Err(result_parse_error(RowsParseError::CellParseError {
                    row_index,
                    column_index,
                    err,
                })))
            }
        }
    }

    /// Reads all remaining rows.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>, QueryError> {
        let mut rows = Vec::with_capacity(self.rows_remaining().min(1024));
        while let Some(row) = self.next_row().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Turns the row set into a [`Stream`] of rows.
    pub fn into_stream(self) -> impl Stream<Item = Result<Row, QueryError>> + Send {
        futures::stream::unfold(self, |mut rows| async move {
            rows.next_row().await.map(|row| (row, rows))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{rows_body, text_columns, void_body};
    use assert_matches::assert_matches;
    use cqlink_cql::frame::FLAG_WARNING;
    use futures::StreamExt;

    // Feeds `body` in chunks of `chunk_size` bytes, as the router would.
    fn streamed(body: Vec<u8>, chunk_size: usize) -> StreamedBody {
        let (sender, receiver) = mpsc::channel(1);
        let length = body.len();
        tokio::spawn(async move {
            for chunk in body.chunks(chunk_size) {
                if sender.send(Bytes::copy_from_slice(chunk)).await.is_err() {
                    break;
                }
            }
        });
        StreamedBody::new(length, receiver)
    }

    fn three_rows() -> Vec<u8> {
        rows_body(
            &text_columns(&["col1", "col2"]),
            &[
                vec![Some(b"a".to_vec()), None],
                vec![Some(b"bb".to_vec()), Some(b"x".to_vec())],
                vec![Some(Vec::new()), Some(b"yyy".to_vec())],
            ],
            None,
        )
    }

    #[tokio::test]
    async fn rows_split_across_chunks() {
        for chunk_size in [1, 3, 7, 1024] {
            let result = read_unbuffered(0, streamed(three_rows(), chunk_size), ProtocolVersion::V4, None)
                .await
                .unwrap();
            let mut rows = result.into_rows().unwrap();
            assert_eq!(rows.rows_count(), 3);
            assert_eq!(rows.metadata().col_count(), 2);

            let first = rows.next_row().await.unwrap().unwrap();
            assert_eq!(first.get::<String>(0).unwrap(), "a");
            assert_eq!(first.get::<Option<String>>(1).unwrap(), None);
            assert_eq!(rows.rows_remaining(), 2);

            let rest = rows.collect_rows().await.unwrap();
            assert_eq!(rest.len(), 2);
            assert_eq!(rest[0].get_by_name::<String>("col2").unwrap(), "x");
            assert_eq!(rest[1].get::<String>(0).unwrap(), "");
        }
    }

    #[tokio::test]
    async fn rows_as_stream() {
        let result = read_unbuffered(0, streamed(three_rows(), 5), ProtocolVersion::V4, None)
            .await
            .unwrap();
        let rows: Vec<_> = result.into_rows().unwrap().into_stream().collect().await;
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn warnings_precede_the_rows() {
        let mut body = Vec::new();
        types::write_string_list(&["careful".to_owned()], &mut body).unwrap();
        body.extend(three_rows());

        let result = read_unbuffered(FLAG_WARNING, streamed(body, 4), ProtocolVersion::V4, None)
            .await
            .unwrap();
        let rows = result.into_rows().unwrap();
        assert_eq!(rows.warnings().collect::<Vec<_>>(), vec!["careful"]);
        assert_eq!(rows.collect_rows().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn non_rows_result_is_buffered() {
        let result = read_unbuffered(0, streamed(void_body(), 2), ProtocolVersion::V4, None)
            .await
            .unwrap();
        assert_matches!(result, UnbufferedResult::Other(result) if !result.is_rows());
    }

    #[tokio::test]
    async fn truncated_body_breaks_the_row_set() {
        let mut body = three_rows();
        let length = body.len();
        body.truncate(length - 2);
        let (sender, receiver) = mpsc::channel(1);
        sender.send(Bytes::from(body)).await.unwrap();
        drop(sender);

        let result = read_unbuffered(0, StreamedBody::new(length, receiver), ProtocolVersion::V4, None)
            .await
            .unwrap();
        let mut rows = result.into_rows().unwrap();
        assert!(rows.next_row().await.unwrap().is_ok());
        assert!(rows.next_row().await.unwrap().is_ok());
        assert_matches!(
            rows.next_row().await,
            Some(Err(QueryError::BrokenConnection(_)))
        );
        assert!(rows.next_row().await.is_none());
    }

    #[tokio::test]
    async fn trailing_bytes_are_reported() {
        let mut body = three_rows();
        body.push(0);
        let result = read_unbuffered(0, streamed(body, 64), ProtocolVersion::V4, None)
            .await
            .unwrap();
        let mut rows = result.into_rows().unwrap();
        for _ in 0..3 {
            rows.next_row().await.unwrap().unwrap();
        }
        assert_matches!(
            rows.next_row().await,
            Some(Err(QueryError::CqlResponseParseError(
                CqlResponseParseError::CqlResultParseError(CqlResultParseError::RowsParseError(
                    RowsParseError::TrailingBytes(1)
                ))
            )))
        );
        assert!(rows.next_row().await.is_none());
    }
}
