//! Native protocol versions and the parts of the wire format that depend on them.

use super::TryFromPrimitiveError;

/// Version of the native protocol spoken on a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Legacy protocol with 1-byte stream ids and short collection lengths.
    V2 = 0x02,
    V3 = 0x03,
    #[default]
    V4 = 0x04,
    /// Body layouts of v5 (result metadata ids, int flags, failure reason maps).
    V5 = 0x05,
}

impl ProtocolVersion {
    /// Size of the frame header.
    pub const fn header_size(self) -> usize {
        match self {
            ProtocolVersion::V2 => 8,
            _ => 9,
        }
    }

    /// Number of bytes taken by the stream id in the frame header.
    pub const fn stream_id_width(self) -> usize {
        match self {
            ProtocolVersion::V2 => 1,
            _ => 2,
        }
    }

    /// Number of non-negative stream ids, i.e. the upper bound
    /// on concurrently in-flight requests on one connection.
    pub const fn max_stream_ids(self) -> usize {
        match self {
            ProtocolVersion::V2 => i8::MAX as usize + 1,
            _ => i16::MAX as usize + 1,
        }
    }

    /// Collections are encoded with `[short]` lengths before v3.
    pub const fn uses_short_collection_lengths(self) -> bool {
        matches!(self, ProtocolVersion::V2)
    }

    /// Tuples and user defined types exist since v3.
    pub const fn supports_udt_and_tuple(self) -> bool {
        !matches!(self, ProtocolVersion::V2)
    }

    /// Prepared metadata carries partition key indexes since v4.
    pub const fn has_pk_indexes(self) -> bool {
        matches!(self, ProtocolVersion::V4 | ProtocolVersion::V5)
    }

    /// Query, batch and prepare flags are `[int]` in v5 and `[byte]` before.
    pub const fn has_int_flags(self) -> bool {
        matches!(self, ProtocolVersion::V5)
    }

    /// v5 prepared statements carry a result metadata id.
    pub const fn has_result_metadata_id(self) -> bool {
        matches!(self, ProtocolVersion::V5)
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x02 => Ok(Self::V2),
            0x03 => Ok(Self::V3),
            0x04 => Ok(Self::V4),
            0x05 => Ok(Self::V5),
            _ => Err(TryFromPrimitiveError {
                enum_name: "ProtocolVersion",
                primitive: value,
            }),
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", *self as u8)
    }
}
