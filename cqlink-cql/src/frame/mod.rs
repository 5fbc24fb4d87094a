//! The frame envelope: header layout per protocol version, compression,
//! and the body extensions carried in front of the actual message.

pub mod frame_errors;
pub mod protocol_version;
pub mod request;
pub mod response;
pub mod server_event_type;
pub mod types;

use crate::frame::frame_errors::{
    CqlRequestSerializationError, FrameBodyExtensionsParseError, FrameHeaderParseError,
};
use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use std::fmt::Display;
use std::{collections::HashMap, sync::Arc};

pub use protocol_version::ProtocolVersion;
use request::{RequestOpcode, SerializableRequest};
use response::ResponseOpcode;

/// Size of the largest header, used for stack buffers.
const MAX_HEADER_SIZE: usize = 9;

/// Largest frame body accepted from the wire (256 MiB).
pub const MAX_FRAME_BODY_SIZE: usize = 256 * 1024 * 1024;

/// Set on every frame sent by the server.
const RESPONSE_DIRECTION_BIT: u8 = 0x80;

// Frame flags
pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;
pub const FLAG_BETA: u8 = 0x10;

/// Authenticators commonly announced by servers in AUTHENTICATE responses.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Authenticator {
    AllowAllAuthenticator,
    PasswordAuthenticator,
    CassandraPasswordAuthenticator,
    CassandraAllowAllAuthenticator,
    Other(String),
}

impl From<&str> for Authenticator {
    fn from(class_name: &str) -> Self {
        match class_name {
            "AllowAllAuthenticator" => Authenticator::AllowAllAuthenticator,
            "PasswordAuthenticator" => Authenticator::PasswordAuthenticator,
            "org.apache.cassandra.auth.PasswordAuthenticator" => {
                Authenticator::CassandraPasswordAuthenticator
            }
            "org.apache.cassandra.auth.AllowAllAuthenticator" => {
                Authenticator::CassandraAllowAllAuthenticator
            }
            other => Authenticator::Other(other.to_owned()),
        }
    }
}

/// The wire protocol compression algorithm.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Compression {
    /// LZ4 compression algorithm.
    Lz4,
    /// Snappy compression algorithm.
    Snappy,
}

impl Compression {
    /// Name of the algorithm in STARTUP options and SUPPORTED responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Lz4 => "lz4",
            Compression::Snappy => "snappy",
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request serialized together with its header. The stream id is
/// filled in by the connection right before the frame is written.
pub struct SerializedRequest {
    data: Vec<u8>,
    version: ProtocolVersion,
}

impl SerializedRequest {
    pub fn make<R: SerializableRequest>(
        req: &R,
        version: ProtocolVersion,
        compression: Option<Compression>,
        tracing: bool,
    ) -> Result<SerializedRequest, CqlRequestSerializationError> {
        let header_size = version.header_size();
        let mut flags = 0;
        let mut data = vec![0; header_size];

        if let Some(compression) = compression {
            flags |= FLAG_COMPRESSION;
            let body = req.to_bytes(version)?;
            compress_append(&body, compression, &mut data)?;
        } else {
            req.serialize(version, &mut data)?;
        }

        if tracing {
            flags |= FLAG_TRACING;
        }
        // v5 bodies travel in the legacy envelope, which servers accept
        // only for beta versions.
        if version == ProtocolVersion::V5 {
            flags |= FLAG_BETA;
        }

        data[0] = version as u8;
        data[1] = flags;
        // Stream id is left zeroed, see `set_stream`.
        data[header_size - 5] = R::OPCODE as u8;

        let req_size: u32 = (data.len() - header_size)
            .try_into()
            .map_err(|_| CqlRequestSerializationError::RequestTooLarge(data.len()))?;
        data[header_size - 4..header_size].copy_from_slice(&req_size.to_be_bytes());

        Ok(Self { data, version })
    }

    /// Writes the stream id in the width used by the request's protocol version.
    pub fn set_stream(&mut self, stream: i16) {
        match self.version.stream_id_width() {
            1 => self.data[2] = stream as i8 as u8,
            _ => self.data[2..4].copy_from_slice(&stream.to_be_bytes()),
        }
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }
}

// Parts of the frame header which are not determined by the request/response type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameParams {
    pub version: ProtocolVersion,
    pub flags: u8,
    pub stream: i16,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V4,
            flags: 0x00,
            stream: 0,
        }
    }
}

/// Header of a frame read from the wire, before its body is consumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub params: FrameParams,
    pub opcode: u8,
    pub length: usize,
}

fn decode_header(
    version: ProtocolVersion,
    flags: u8,
    mut rest: &[u8],
) -> Result<FrameHeader, FrameHeaderParseError> {
    let stream = match version.stream_id_width() {
        1 => rest.get_i8() as i16,
        _ => rest.get_i16(),
    };
    let opcode = rest.get_u8();
    let length = rest.get_u32() as usize;
    if length > MAX_FRAME_BODY_SIZE {
        return Err(FrameHeaderParseError::FrameTooLarge(length));
    }

    Ok(FrameHeader {
        params: FrameParams {
            version,
            flags,
            stream,
        },
        opcode,
        length,
    })
}

/// Reads the header of a frame sent by the server on a connection
/// which negotiated `expected_version`.
pub async fn read_response_header(
    reader: &mut (impl AsyncRead + Unpin),
    expected_version: ProtocolVersion,
) -> Result<(FrameHeader, ResponseOpcode), FrameHeaderParseError> {
    let header_size = expected_version.header_size();
    let mut raw_header = [0u8; MAX_HEADER_SIZE];
    reader
        .read_exact(&mut raw_header[..header_size])
        .await
        .map_err(FrameHeaderParseError::HeaderIoError)?;

    let version = raw_header[0];
    if version & RESPONSE_DIRECTION_BIT != RESPONSE_DIRECTION_BIT {
        return Err(FrameHeaderParseError::FrameFromClient);
    }
    if version & 0x7F != expected_version as u8 {
        return Err(FrameHeaderParseError::VersionMismatch {
            expected: expected_version,
            received: version & 0x7F,
        });
    }

    let header = decode_header(expected_version, raw_header[1], &raw_header[2..header_size])?;
    let opcode = ResponseOpcode::try_from(header.opcode)
        .map_err(|_| FrameHeaderParseError::InvalidOpcode(header.opcode))?;

    Ok((header, opcode))
}

/// Reads exactly `length` bytes of a frame body.
pub async fn read_frame_body(
    reader: &mut (impl AsyncRead + Unpin),
    length: usize,
) -> Result<Bytes, FrameHeaderParseError> {
    let mut raw_body = Vec::with_capacity(length).limit(length);
    while raw_body.has_remaining_mut() {
        let n = reader
            .read_buf(&mut raw_body)
            .await
            .map_err(FrameHeaderParseError::BodyChunkIoError)?;
        if n == 0 {
            // EOF, too early
            return Err(FrameHeaderParseError::ConnectionClosed(
                raw_body.remaining_mut(),
                length,
            ));
        }
    }

    Ok(raw_body.into_inner().into())
}

/// Reads a whole frame sent by the server.
pub async fn read_response_frame(
    reader: &mut (impl AsyncRead + Unpin),
    expected_version: ProtocolVersion,
) -> Result<(FrameParams, ResponseOpcode, Bytes), FrameHeaderParseError> {
    let (header, opcode) = read_response_header(reader, expected_version).await?;
    let body = read_frame_body(reader, header.length).await?;
    Ok((header.params, opcode, body))
}

/// Reads a whole frame sent by a client. The protocol version is taken
/// from the frame itself, which lets servers and proxies serve any version.
pub async fn read_request_frame(
    reader: &mut (impl AsyncRead + Unpin),
) -> Result<(FrameParams, RequestOpcode, Bytes), FrameHeaderParseError> {
    let mut raw_header = [0u8; MAX_HEADER_SIZE];
    reader
        .read_exact(&mut raw_header[..2])
        .await
        .map_err(FrameHeaderParseError::HeaderIoError)?;

    let version = raw_header[0];
    if version & RESPONSE_DIRECTION_BIT != 0 {
        return Err(FrameHeaderParseError::FrameFromServer);
    }
    let version = ProtocolVersion::try_from(version)
        .map_err(|_| FrameHeaderParseError::VersionNotSupported(version))?;

    let header_size = version.header_size();
    reader
        .read_exact(&mut raw_header[2..header_size])
        .await
        .map_err(FrameHeaderParseError::HeaderIoError)?;

    let header = decode_header(version, raw_header[1], &raw_header[2..header_size])?;
    let opcode = RequestOpcode::try_from(header.opcode)
        .map_err(|_| FrameHeaderParseError::InvalidOpcode(header.opcode))?;
    let body = read_frame_body(reader, header.length).await?;

    Ok((header.params, opcode, body))
}

/// Serializes a frame as sent by the server: header with the direction
/// bit set, followed by `body`. Meant for servers, proxies and test doubles.
pub fn write_response_frame(
    params: FrameParams,
    opcode: ResponseOpcode,
    body: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), CqlRequestSerializationError> {
    out.put_u8(params.version as u8 | RESPONSE_DIRECTION_BIT);
    out.put_u8(params.flags);
    match params.version.stream_id_width() {
        1 => out.put_i8(params.stream as i8),
        _ => out.put_i16(params.stream),
    }
    out.put_u8(opcode as u8);
    let length: u32 = body
        .len()
        .try_into()
        .map_err(|_| CqlRequestSerializationError::RequestTooLarge(body.len()))?;
    out.put_u32(length);
    out.extend_from_slice(body);
    Ok(())
}

pub struct ResponseBodyWithExtensions {
    pub trace_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub body: Bytes,
    pub custom_payload: Option<HashMap<String, Bytes>>,
}

pub fn parse_response_body_extensions(
    flags: u8,
    compression: Option<Compression>,
    mut body: Bytes,
) -> Result<ResponseBodyWithExtensions, FrameBodyExtensionsParseError> {
    if flags & FLAG_COMPRESSION != 0 {
        if let Some(compression) = compression {
            body = decompress(&body, compression)?.into();
        } else {
            return Err(FrameBodyExtensionsParseError::NoCompressionNegotiated);
        }
    }

    let trace_id = if flags & FLAG_TRACING != 0 {
        let buf = &mut &*body;
        let trace_id =
            types::read_uuid(buf).map_err(FrameBodyExtensionsParseError::TraceIdParse)?;
        body.advance(16);
        Some(trace_id)
    } else {
        None
    };

    let warnings = if flags & FLAG_WARNING != 0 {
        let body_len = body.len();
        let buf = &mut &*body;
        let warnings = types::read_string_list(buf)
            .map_err(FrameBodyExtensionsParseError::WarningsListParse)?;
        let buf_len = buf.len();
        body.advance(body_len - buf_len);
        warnings
    } else {
        Vec::new()
    };

    let custom_payload = if flags & FLAG_CUSTOM_PAYLOAD != 0 {
        let body_len = body.len();
        let buf = &mut &*body;
        let payload_map = types::read_bytes_map(buf)
            .map_err(FrameBodyExtensionsParseError::CustomPayloadMapParse)?;
        let buf_len = buf.len();
        body.advance(body_len - buf_len);
        Some(payload_map)
    } else {
        None
    };

    Ok(ResponseBodyWithExtensions {
        trace_id,
        warnings,
        body,
        custom_payload,
    })
}

pub fn compress_append(
    uncomp_body: &[u8],
    compression: Compression,
    out: &mut Vec<u8>,
) -> Result<(), CqlRequestSerializationError> {
    match compression {
        Compression::Lz4 => {
            let uncomp_len: u32 = uncomp_body
                .len()
                .try_into()
                .map_err(|_| CqlRequestSerializationError::RequestTooLarge(uncomp_body.len()))?;
            let tmp = lz4_flex::compress(uncomp_body);
            out.reserve_exact(std::mem::size_of::<u32>() + tmp.len());
            out.put_u32(uncomp_len);
            out.extend_from_slice(&tmp[..]);
            Ok(())
        }
        Compression::Snappy => {
            let old_size = out.len();
            out.resize(old_size + snap::raw::max_compress_len(uncomp_body.len()), 0);
            let compressed_size = snap::raw::Encoder::new()
                .compress(uncomp_body, &mut out[old_size..])
                .map_err(|err| CqlRequestSerializationError::SnapCompressError(Arc::new(err)))?;
            out.truncate(old_size + compressed_size);
            Ok(())
        }
    }
}

pub fn decompress(
    mut comp_body: &[u8],
    compression: Compression,
) -> Result<Vec<u8>, FrameBodyExtensionsParseError> {
    match compression {
        Compression::Lz4 => {
            if comp_body.len() < std::mem::size_of::<u32>() {
                return Err(FrameBodyExtensionsParseError::Lz4MissingLength);
            }
            let uncomp_len = comp_body.get_u32() as usize;
            let uncomp_body = lz4_flex::decompress(comp_body, uncomp_len)
                .map_err(|err| FrameBodyExtensionsParseError::Lz4DecompressError(Arc::new(err)))?;
            Ok(uncomp_body)
        }
        Compression::Snappy => snap::raw::Decoder::new()
            .decompress_vec(comp_body)
            .map_err(|err| FrameBodyExtensionsParseError::SnapDecompressError(Arc::new(err))),
    }
}

/// An error type for parsing an enum value from a primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No discrimant in enum `{enum_name}` matches the value `{primitive:?}`")]
pub struct TryFromPrimitiveError<T: Copy + std::fmt::Debug> {
    enum_name: &'static str,
    primitive: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::request::options::Options;
    use crate::frame::request::query::{Query, QueryParameters};
    use assert_matches::assert_matches;

    #[test]
    fn test_lz4_compress() {
        let mut out = Vec::from(&b"Hello"[..]);
        let uncomp_body = b", World!";
        let expect = vec![
            72, 101, 108, 108, 111, 0, 0, 0, 8, 128, 44, 32, 87, 111, 114, 108, 100, 33,
        ];

        compress_append(uncomp_body, Compression::Lz4, &mut out).unwrap();
        assert_eq!(expect, out);
    }

    #[test]
    fn test_compression_roundtrip() {
        let uncomp_body = "SELECT * FROM ks.t WHERE p = ?".repeat(50);
        for compression in [Compression::Lz4, Compression::Snappy] {
            let mut comp_body = Vec::new();
            compress_append(uncomp_body.as_bytes(), compression, &mut comp_body).unwrap();
            assert!(comp_body.len() < uncomp_body.len());
            let result = decompress(&comp_body[..], compression).unwrap();
            assert_eq!(uncomp_body.as_bytes(), result);
        }
    }

    #[test]
    fn stream_id_width_follows_version() {
        let mut v4 = SerializedRequest::make(&Options, ProtocolVersion::V4, None, false).unwrap();
        v4.set_stream(0x0102);
        assert_eq!(v4.get_data(), &[0x04, 0x00, 0x01, 0x02, 0x05, 0, 0, 0, 0]);

        let mut v2 = SerializedRequest::make(&Options, ProtocolVersion::V2, None, true).unwrap();
        v2.set_stream(0x7F);
        assert_eq!(v2.get_data(), &[0x02, FLAG_TRACING, 0x7F, 0x05, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn request_frame_roundtrip_through_reader() {
        let query = Query {
            contents: "SELECT now() FROM system.local".into(),
            parameters: QueryParameters::default(),
        };
        for version in [ProtocolVersion::V2, ProtocolVersion::V4, ProtocolVersion::V5] {
            let mut req = SerializedRequest::make(&query, version, None, false).unwrap();
            req.set_stream(17);
            let mut data = req.get_data();
            let (params, opcode, body) = read_request_frame(&mut data).await.unwrap();
            assert_eq!(params.version, version);
            assert_eq!(params.stream, 17);
            assert_eq!(opcode, RequestOpcode::Query);
            assert_eq!(body, query.to_bytes(version).unwrap());
        }
    }

    #[tokio::test]
    async fn response_frame_roundtrip_and_validation() {
        let params = FrameParams {
            version: ProtocolVersion::V2,
            flags: 0,
            stream: -1,
        };
        let mut out = Vec::new();
        write_response_frame(params, ResponseOpcode::Ready, &[], &mut out).unwrap();
        assert_eq!(out.len(), 8);

        let (read_params, opcode, body) =
            read_response_frame(&mut &out[..], ProtocolVersion::V2).await.unwrap();
        assert_eq!(read_params, params);
        assert_eq!(opcode, ResponseOpcode::Ready);
        assert!(body.is_empty());

        // The same bytes read by a v4 connection must be rejected.
        assert_matches!(
            read_response_frame(&mut &out[..], ProtocolVersion::V4).await,
            Err(FrameHeaderParseError::HeaderIoError(_))
                | Err(FrameHeaderParseError::VersionMismatch { .. })
        );
    }

    #[tokio::test]
    async fn truncated_body_is_reported() {
        let params = FrameParams::default();
        let mut out = Vec::new();
        write_response_frame(params, ResponseOpcode::Result, &[0, 0, 0, 1], &mut out).unwrap();
        out.truncate(out.len() - 2);

        assert_matches!(
            read_response_frame(&mut &out[..], ProtocolVersion::V4).await,
            Err(FrameHeaderParseError::ConnectionClosed(2, 4))
        );
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut header = vec![0x84, 0, 0, 1, ResponseOpcode::Result as u8];
        header.extend_from_slice(&((MAX_FRAME_BODY_SIZE + 1) as u32).to_be_bytes());
        assert_matches!(
            read_response_header(&mut &header[..], ProtocolVersion::V4).await,
            Err(FrameHeaderParseError::FrameTooLarge(_))
        );
    }

    #[tokio::test]
    async fn frame_from_client_is_rejected() {
        let header = [0x04, 0, 0, 1, ResponseOpcode::Ready as u8, 0, 0, 0, 0];
        assert_matches!(
            read_response_header(&mut &header[..], ProtocolVersion::V4).await,
            Err(FrameHeaderParseError::FrameFromClient)
        );
    }

    #[test]
    fn body_extensions_are_stripped_in_order() {
        let trace_id = Uuid::from_u128(0x1234);
        let mut body = Vec::new();
        types::write_uuid(&trace_id, &mut body);
        types::write_string_list(&["careful".to_owned()], &mut body).unwrap();
        let mut payload = HashMap::new();
        payload.insert("k".to_owned(), Bytes::from_static(b"v"));
        types::write_bytes_map(&payload, &mut body).unwrap();
        body.extend_from_slice(&[0, 0, 0, 1]);

        let parsed = parse_response_body_extensions(
            FLAG_TRACING | FLAG_WARNING | FLAG_CUSTOM_PAYLOAD,
            None,
            body.into(),
        )
        .unwrap();
        assert_eq!(parsed.trace_id, Some(trace_id));
        assert_eq!(parsed.warnings, vec!["careful".to_owned()]);
        assert_eq!(parsed.custom_payload, Some(payload));
        assert_eq!(&parsed.body[..], &[0, 0, 0, 1]);
    }

    #[test]
    fn compressed_body_without_negotiation_fails() {
        assert_matches!(
            parse_response_body_extensions(FLAG_COMPRESSION, None, Bytes::new()).map(|_| ()),
            Err(FrameBodyExtensionsParseError::NoCompressionNegotiated)
        );
    }
}
