use std::collections::HashMap;
use std::time::Duration;

use cqlink_cql::frame::protocol_version::ProtocolVersion;
use cqlink_cql::frame::request::{Request, RequestOpcode};
use cqlink_cql::frame::response::result::ColumnType;
use cqlink_cql::frame::response::ResponseOpcode;
use cqlink_cql::frame::{self, types, Compression, FrameParams, FLAG_COMPRESSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

pub(crate) fn text_columns(names: &[&str]) -> Vec<(String, ColumnType)> {
    names
        .iter()
        .map(|name| (name.to_string(), ColumnType::Text))
        .collect()
}

// Result metadata of columns of `ks.t`.
fn write_result_metadata(
    columns: &[(String, ColumnType)],
    paging_state: Option<&[u8]>,
    buf: &mut Vec<u8>,
) {
    let mut flags = 0x0001;
    if paging_state.is_some() {
        flags |= 0x0002;
    }
    types::write_int(flags, buf);
    types::write_int(columns.len() as i32, buf);
    if let Some(paging_state) = paging_state {
        types::write_bytes(paging_state, buf).unwrap();
    }
    types::write_string("ks", buf).unwrap();
    types::write_string("t", buf).unwrap();
    for (name, typ) in columns {
        types::write_string(name, buf).unwrap();
        typ.write_type_spec(buf).unwrap();
    }
}

fn write_rows(rows: &[Vec<Option<Vec<u8>>>], buf: &mut Vec<u8>) {
    types::write_int(rows.len() as i32, buf);
    for row in rows {
        for cell in row {
            types::write_bytes_opt(cell.as_deref(), buf).unwrap();
        }
    }
}

/// RESULT:Rows body.
pub(crate) fn rows_body(
    columns: &[(String, ColumnType)],
    rows: &[Vec<Option<Vec<u8>>>],
    paging_state: Option<&[u8]>,
) -> Vec<u8> {
    let mut buf = Vec::new();
    types::write_int(0x0002, &mut buf);
    write_result_metadata(columns, paging_state, &mut buf);
    write_rows(rows, &mut buf);
    buf
}

/// RESULT:Rows body sent with the `no_metadata` flag.
pub(crate) fn rows_body_without_metadata(
    col_count: usize,
    rows: &[Vec<Option<Vec<u8>>>],
) -> Vec<u8> {
    let mut buf = Vec::new();
    types::write_int(0x0002, &mut buf);
    types::write_int(0x0004, &mut buf);
    types::write_int(col_count as i32, &mut buf);
    write_rows(rows, &mut buf);
    buf
}

pub(crate) fn void_body() -> Vec<u8> {
    let mut buf = Vec::new();
    types::write_int(0x0001, &mut buf);
    buf
}

pub(crate) fn set_keyspace_body(keyspace: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    types::write_int(0x0003, &mut buf);
    types::write_string(keyspace, &mut buf).unwrap();
    buf
}

/// RESULT:Prepared body with bind markers and result columns of `ks.t`.
pub(crate) fn prepared_body(
    id: &[u8],
    bind_markers: &[(String, ColumnType)],
    result_columns: &[(String, ColumnType)],
    version: ProtocolVersion,
) -> Vec<u8> {
    let mut buf = Vec::new();
    types::write_int(0x0004, &mut buf);
    types::write_short_bytes(id, &mut buf).unwrap();
    if version.has_result_metadata_id() {
        types::write_short_bytes(b"meta-1", &mut buf).unwrap();
    }

    types::write_int(0x0001, &mut buf);
    types::write_int(bind_markers.len() as i32, &mut buf);
    if version.has_pk_indexes() {
        types::write_int(0, &mut buf);
    }
    types::write_string("ks", &mut buf).unwrap();
    types::write_string("t", &mut buf).unwrap();
    for (name, typ) in bind_markers {
        types::write_string(name, &mut buf).unwrap();
        typ.write_type_spec(&mut buf).unwrap();
    }

    write_result_metadata(result_columns, None, &mut buf);
    buf
}

/// ERROR body; `extra` holds the code specific fields.
pub(crate) fn error_body(code: i32, reason: &str, extra: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    types::write_int(code, &mut buf);
    types::write_string(reason, &mut buf).unwrap();
    buf.extend_from_slice(extra);
    buf
}

pub(crate) fn unprepared_body(id: &[u8]) -> Vec<u8> {
    let mut extra = Vec::new();
    types::write_short_bytes(id, &mut extra).unwrap();
    error_body(0x2500, "Unprepared", &extra)
}

pub(crate) fn supported_body(compression: &[&str]) -> Vec<u8> {
    let mut options = HashMap::new();
    options.insert(
        "COMPRESSION".to_owned(),
        compression.iter().map(|c| c.to_string()).collect(),
    );
    options.insert("CQL_VERSION".to_owned(), vec!["3.0.0".to_owned()]);
    let mut buf = Vec::new();
    types::write_string_multimap(&options, &mut buf).unwrap();
    buf
}

/// SCHEMA_CHANGE event body in the v3+ layout. Changes a table if
/// `table` is given, the keyspace otherwise.
pub(crate) fn schema_change_event_body(keyspace: &str, table: Option<&str>) -> Vec<u8> {
    let mut buf = Vec::new();
    types::write_string("SCHEMA_CHANGE", &mut buf).unwrap();
    types::write_string("CREATED", &mut buf).unwrap();
    match table {
        Some(table) => {
            types::write_string("TABLE", &mut buf).unwrap();
            types::write_string(keyspace, &mut buf).unwrap();
            types::write_string(table, &mut buf).unwrap();
        }
        None => {
            types::write_string("KEYSPACE", &mut buf).unwrap();
            types::write_string(keyspace, &mut buf).unwrap();
        }
    }
    buf
}

/// The server end of an in-memory connection.
pub(crate) struct MockNode {
    stream: DuplexStream,
    version: ProtocolVersion,
    compression: Option<Compression>,
}

impl MockNode {
    /// Returns the node and the client end of the connection.
    pub(crate) fn new(version: ProtocolVersion) -> (MockNode, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (
            MockNode {
                stream: server,
                version,
                compression: None,
            },
            client,
        )
    }

    pub(crate) async fn recv(&mut self) -> (FrameParams, Request<'static>) {
        let (params, opcode, body) = frame::read_request_frame(&mut self.stream)
            .await
            .unwrap();
        assert_eq!(params.version, self.version);
        let body = match params.flags & FLAG_COMPRESSION != 0 {
            true => frame::decompress(&body, self.compression.unwrap()).unwrap(),
            false => body.to_vec(),
        };
        let request = Request::deserialize(&mut &body[..], opcode, params.version).unwrap();
        (params, request)
    }

    /// Receives a request of the given kind and returns its stream id.
    pub(crate) async fn expect(&mut self, opcode: RequestOpcode) -> (i16, Request<'static>) {
        let (params, request) = self.recv().await;
        let received = match &request {
            Request::Startup(_) => RequestOpcode::Startup,
            Request::AuthResponse(_) => RequestOpcode::AuthResponse,
            Request::Options(_) => RequestOpcode::Options,
            Request::Query(_) => RequestOpcode::Query,
            Request::Prepare(_) => RequestOpcode::Prepare,
            Request::Execute(_) => RequestOpcode::Execute,
            Request::Batch(_) => RequestOpcode::Batch,
            Request::Register(_) => RequestOpcode::Register,
        };
        assert_eq!(received, opcode, "unexpected request {:?}", request);
        (params.stream, request)
    }

    /// Asserts that the client sends nothing for `wait`.
    pub(crate) async fn expect_silence(&mut self, wait: Duration) {
        let mut byte = [0u8; 1];
        let read = tokio::time::timeout(wait, self.stream.read(&mut byte)).await;
        assert!(read.is_err(), "unexpected bytes from the client: {:?}", read);
    }

    /// Compresses the bodies of further responses, and decompresses requests.
    pub(crate) fn use_compression(&mut self, compression: Compression) {
        self.compression = Some(compression);
    }

    pub(crate) async fn respond(&mut self, stream: i16, opcode: ResponseOpcode, body: &[u8]) {
        match self.compression {
            Some(compression) => {
                let mut compressed = Vec::new();
                frame::compress_append(body, compression, &mut compressed).unwrap();
                self.respond_with_flags(stream, FLAG_COMPRESSION, opcode, &compressed)
                    .await
            }
            None => self.respond_with_flags(stream, 0, opcode, body).await,
        }
    }

    pub(crate) async fn respond_with_flags(
        &mut self,
        stream: i16,
        flags: u8,
        opcode: ResponseOpcode,
        body: &[u8],
    ) {
        let mut out = Vec::new();
        frame::write_response_frame(
            FrameParams {
                version: self.version,
                flags,
                stream,
            },
            opcode,
            body,
            &mut out,
        )
        .unwrap();
        self.stream.write_all(&out).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub(crate) async fn push_event(&mut self, body: &[u8]) {
        self.respond(-1, ResponseOpcode::Event, body).await
    }

    /// Answers OPTIONS and STARTUP, without compression.
    pub(crate) async fn handshake(&mut self) {
        let (stream, _) = self.expect(RequestOpcode::Options).await;
        self.respond(stream, ResponseOpcode::Supported, &supported_body(&[]))
            .await;
        let (stream, _) = self.expect(RequestOpcode::Startup).await;
        self.respond(stream, ResponseOpcode::Ready, &[]).await;
    }

    /// Answers a `USE` with SetKeyspace.
    pub(crate) async fn answer_use(&mut self, keyspace: &str) {
        let (stream, request) = self.expect(RequestOpcode::Query).await;
        match request {
            Request::Query(query) => assert!(query.contents.starts_with("USE ")),
            _ => unreachable!(),
        }
        self.respond(stream, ResponseOpcode::Result, &set_keyspace_body(keyspace))
            .await;
    }

    /// Closes the server end.
    pub(crate) fn close(self) {
        drop(self.stream);
    }
}
