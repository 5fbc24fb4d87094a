//! CQL protocol-level representation of a `RESULT` response: type
//! descriptors, result and prepared metadata, and the result kinds.

use std::collections::HashMap;
use std::result::Result as StdResult;
use std::sync::Arc;

use bytes::Bytes;

use crate::deserialize::result::RowSet;
use crate::frame::frame_errors::{
    ColumnSpecParseErrorKind, CqlResultParseError, CqlTypeParseError,
    LowLevelDeserializationError, PreparedMetadataParseError, PreparedParseError,
    ResultMetadataParseError,
};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::response::event::SchemaChangeEvent;
use crate::frame::types;

// Result metadata flags
const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const FLAG_NO_METADATA: i32 = 0x0004;
const FLAG_METADATA_CHANGED: i32 = 0x0008;

const DURATION_CUSTOM_TYPE: &str = "org.apache.cassandra.db.marshal.DurationType";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetKeyspace {
    pub keyspace_name: String,
}

#[derive(Debug, Clone)]
pub struct Prepared {
    pub id: Bytes,
    /// Present in protocol v5 only.
    pub result_metadata_id: Option<Bytes>,
    pub prepared_metadata: PreparedMetadata,
    pub result_metadata: Arc<ResultMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub event: SchemaChangeEvent,
}

/// Keyspace and table a column belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSpec {
    ks_name: String,
    table_name: String,
}

impl TableSpec {
    pub fn new(ks_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            ks_name: ks_name.into(),
            table_name: table_name.into(),
        }
    }

    pub fn ks_name(&self) -> &str {
        &self.ks_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

/// Type of a column or a bind marker, possibly nested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// A server-side type identified only by its class name.
    Custom(String),
    Ascii,
    Boolean,
    Blob,
    Counter,
    Date,
    Decimal,
    Double,
    Duration,
    Float,
    Int,
    BigInt,
    Text,
    Timestamp,
    Inet,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    UserDefinedType {
        type_name: String,
        keyspace: String,
        field_types: Vec<(String, ColumnType)>,
    },
    SmallInt,
    TinyInt,
    Time,
    Timeuuid,
    Tuple(Vec<ColumnType>),
    Uuid,
    Varint,
}

impl ColumnType {
    /// Types whose zero-length value is a regular value rather than "empty".
    pub(crate) fn supports_empty_as_regular_value(&self) -> bool {
        matches!(self, ColumnType::Ascii | ColumnType::Blob | ColumnType::Text)
    }

    fn type_id(&self) -> u16 {
        match self {
            ColumnType::Custom(_) => 0x0000,
            ColumnType::Ascii => 0x0001,
            ColumnType::BigInt => 0x0002,
            ColumnType::Blob => 0x0003,
            ColumnType::Boolean => 0x0004,
            ColumnType::Counter => 0x0005,
            ColumnType::Decimal => 0x0006,
            ColumnType::Double => 0x0007,
            ColumnType::Float => 0x0008,
            ColumnType::Int => 0x0009,
            ColumnType::Timestamp => 0x000B,
            ColumnType::Uuid => 0x000C,
            ColumnType::Text => 0x000D,
            ColumnType::Varint => 0x000E,
            ColumnType::Timeuuid => 0x000F,
            ColumnType::Inet => 0x0010,
            ColumnType::Date => 0x0011,
            ColumnType::Time => 0x0012,
            ColumnType::SmallInt => 0x0013,
            ColumnType::TinyInt => 0x0014,
            ColumnType::Duration => 0x0015,
            ColumnType::List(_) => 0x0020,
            ColumnType::Map(_, _) => 0x0021,
            ColumnType::Set(_) => 0x0022,
            ColumnType::UserDefinedType { .. } => 0x0030,
            ColumnType::Tuple(_) => 0x0031,
        }
    }

    /// Writes the `[option]` type descriptor, the inverse of [`deser_type`].
    /// Used by servers and test doubles.
    pub fn write_type_spec(&self, buf: &mut Vec<u8>) -> StdResult<(), std::num::TryFromIntError> {
        types::write_short(self.type_id(), buf);
        match self {
            ColumnType::Custom(name) => types::write_string(name, buf)?,
            ColumnType::List(elem) | ColumnType::Set(elem) => elem.write_type_spec(buf)?,
            ColumnType::Map(key, value) => {
                key.write_type_spec(buf)?;
                value.write_type_spec(buf)?;
            }
            ColumnType::UserDefinedType {
                type_name,
                keyspace,
                field_types,
            } => {
                types::write_string(keyspace, buf)?;
                types::write_string(type_name, buf)?;
                types::write_short_length(field_types.len(), buf)?;
                for (name, typ) in field_types {
                    types::write_string(name, buf)?;
                    typ.write_type_spec(buf)?;
                }
            }
            ColumnType::Tuple(elems) => {
                types::write_short_length(elems.len(), buf)?;
                for typ in elems {
                    typ.write_type_spec(buf)?;
                }
            }
            _ => (),
        }
        Ok(())
    }
}

/// Metadata of a single column of a result, or of a single bind marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub(crate) table_spec: TableSpec,
    pub(crate) name: String,
    pub(crate) typ: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, typ: ColumnType, table_spec: TableSpec) -> Self {
        Self {
            table_spec,
            name: name.into(),
            typ,
        }
    }

    pub fn table_spec(&self) -> &TableSpec {
        &self.table_spec
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn typ(&self) -> &ColumnType {
        &self.typ
    }
}

/// Column specs of a result set, with a lookup of columns by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    col_count: usize,
    col_specs: Vec<ColumnSpec>,
    name_index: HashMap<String, usize>,
}

impl ResultMetadata {
    pub fn new(col_specs: Vec<ColumnSpec>) -> Self {
        let mut name_index = HashMap::with_capacity(col_specs.len());
        for (idx, spec) in col_specs.iter().enumerate() {
            // Duplicate names resolve to their first occurrence.
            name_index.entry(spec.name.clone()).or_insert(idx);
        }
        Self {
            col_count: col_specs.len(),
            col_specs,
            name_index,
        }
    }

    pub fn mock_empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn col_count(&self) -> usize {
        self.col_count
    }

    #[inline]
    pub fn col_specs(&self) -> &[ColumnSpec] {
        &self.col_specs
    }

    /// Index of the first column with the given name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }
}

/// Result metadata as sent in a single response, together with the
/// per-response parts that do not belong in a cached [`ResultMetadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResultMetadata {
    /// `None` when the server skipped the metadata (`no_metadata` flag).
    pub metadata: Option<ResultMetadata>,
    /// Column count announced by the server, also when metadata is skipped.
    pub col_count: usize,
    pub paging_state: Option<Bytes>,
    /// New result metadata id, sent by v5 servers when the metadata changed.
    pub new_metadata_id: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionKeyIndex {
    /// index in the serialized values
    pub index: u16,
    /// sequence number in partition key
    pub sequence: u16,
}

/// Bind markers of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMetadata {
    pub flags: i32,
    pub col_count: usize,
    /// pk_indexes are sorted by `index` and can be reordered in partition key order
    /// using `sequence` field. Empty before protocol v4.
    pub pk_indexes: Vec<PartitionKeyIndex>,
    pub col_specs: Vec<ColumnSpec>,
}

#[derive(Debug)]
pub enum Result {
    Void,
    Rows(RowSet),
    SetKeyspace(SetKeyspace),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

/// Reads an `[option]` type descriptor.
pub fn deser_type(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> StdResult<ColumnType, CqlTypeParseError> {
    use ColumnType::*;
    let id =
        types::read_short(buf).map_err(|err| CqlTypeParseError::TypeIdParseError(err.into()))?;
    let read_name = |buf: &mut &[u8], mk_err: fn(LowLevelDeserializationError) -> CqlTypeParseError| {
        types::read_string(buf).map(str::to_owned).map_err(mk_err)
    };

    Ok(match id {
        0x0000 => {
            let type_str =
                types::read_string(buf).map_err(CqlTypeParseError::CustomTypeNameParseError)?;
            match type_str {
                DURATION_CUSTOM_TYPE => Duration,
                _ => Custom(type_str.to_owned()),
            }
        }
        0x0001 => Ascii,
        0x0002 => BigInt,
        0x0003 => Blob,
        0x0004 => Boolean,
        0x0005 => Counter,
        0x0006 => Decimal,
        0x0007 => Double,
        0x0008 => Float,
        0x0009 => Int,
        // varchar is an alias of text
        0x000A | 0x000D => Text,
        0x000B => Timestamp,
        0x000C => Uuid,
        0x000E => Varint,
        0x000F => Timeuuid,
        0x0010 => Inet,
        0x0011 => Date,
        0x0012 => Time,
        0x0013 => SmallInt,
        0x0014 => TinyInt,
        0x0015 => Duration,
        0x0020 => List(Box::new(deser_type(buf, version)?)),
        0x0021 => Map(
            Box::new(deser_type(buf, version)?),
            Box::new(deser_type(buf, version)?),
        ),
        0x0022 => Set(Box::new(deser_type(buf, version)?)),
        0x0030 | 0x0031 if !version.supports_udt_and_tuple() => {
            return Err(CqlTypeParseError::TypeNotSupportedInVersion {
                type_id: id,
                version,
            });
        }
        0x0030 => {
            let keyspace = read_name(buf, CqlTypeParseError::UdtNameParseError)?;
            let type_name = read_name(buf, CqlTypeParseError::UdtNameParseError)?;
            let fields_size: usize = types::read_short(buf)
                .map_err(|err| CqlTypeParseError::UdtFieldsCountParseError(err.into()))?
                .into();

            let mut field_types = Vec::with_capacity(fields_size);
            for _ in 0..fields_size {
                let field_name = read_name(buf, CqlTypeParseError::UdtFieldNameParseError)?;
                let field_type = deser_type(buf, version)?;
                field_types.push((field_name, field_type));
            }

            UserDefinedType {
                type_name,
                keyspace,
                field_types,
            }
        }
        0x0031 => {
            let len: usize = types::read_short(buf)
                .map_err(|err| CqlTypeParseError::TupleLengthParseError(err.into()))?
                .into();
            let mut types = Vec::with_capacity(len);
            for _ in 0..len {
                types.push(deser_type(buf, version)?);
            }
            Tuple(types)
        }
        id => {
            return Err(CqlTypeParseError::TypeNotImplemented(id));
        }
    })
}

fn deser_table_spec(buf: &mut &[u8]) -> StdResult<TableSpec, LowLevelDeserializationError> {
    let ks_name = types::read_string(buf)?;
    let table_name = types::read_string(buf)?;
    Ok(TableSpec::new(ks_name, table_name))
}

/// Reads column specs, shared by result and prepared metadata. On error,
/// returns the index of the failing column.
fn deser_col_specs(
    buf: &mut &[u8],
    version: ProtocolVersion,
    global_table_spec: Option<TableSpec>,
    col_count: usize,
) -> StdResult<Vec<ColumnSpec>, (usize, ColumnSpecParseErrorKind)> {
    let mut col_specs = Vec::with_capacity(col_count);
    for col_idx in 0..col_count {
        let table_spec = match global_table_spec {
            Some(ref spec) => spec.clone(),
            None => deser_table_spec(buf)
                .map_err(|err| (col_idx, ColumnSpecParseErrorKind::TableSpecParseError(err)))?,
        };
        let name = types::read_string(buf)
            .map_err(|err| (col_idx, ColumnSpecParseErrorKind::ColumnNameParseError(err)))?
            .to_owned();
        let typ = deser_type(buf, version).map_err(|err| (col_idx, err.into()))?;
        col_specs.push(ColumnSpec::new(name, typ, table_spec));
    }
    Ok(col_specs)
}

/// Reads the metadata preceding rows in a RESULT:Rows body, or following the
/// bind markers in a RESULT:Prepared body.
pub fn deser_result_metadata(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> StdResult<ParsedResultMetadata, ResultMetadataParseError> {
    let flags = types::read_int(buf)
        .map_err(|err| ResultMetadataParseError::FlagsParseError(err.into()))?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;
    let has_more_pages = flags & FLAG_HAS_MORE_PAGES != 0;
    let no_metadata = flags & FLAG_NO_METADATA != 0;
    let metadata_changed = flags & FLAG_METADATA_CHANGED != 0;

    let col_count =
        types::read_int_length(buf).map_err(ResultMetadataParseError::ColumnCountParseError)?;

    let paging_state = has_more_pages
        .then(|| {
            types::read_bytes(buf)
                .map(Bytes::copy_from_slice)
                .map_err(ResultMetadataParseError::PagingStateParseError)
        })
        .transpose()?;

    let new_metadata_id = (metadata_changed && version.has_result_metadata_id())
        .then(|| {
            types::read_short_bytes(buf)
                .map(Bytes::copy_from_slice)
                .map_err(ResultMetadataParseError::NewMetadataIdParseError)
        })
        .transpose()?;

    let metadata = if no_metadata {
        None
    } else {
        let global_table_spec = global_tables_spec
            .then(|| deser_table_spec(buf))
            .transpose()
            .map_err(ResultMetadataParseError::GlobalTableSpecParseError)?;

        let col_specs = deser_col_specs(buf, version, global_table_spec, col_count).map_err(
            |(column_index, kind)| ResultMetadataParseError::ColumnSpecParseError {
                column_index,
                kind,
            },
        )?;
        Some(ResultMetadata::new(col_specs))
    };

    Ok(ParsedResultMetadata {
        metadata,
        col_count,
        paging_state,
        new_metadata_id,
    })
}

fn deser_prepared_metadata(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> StdResult<PreparedMetadata, PreparedMetadataParseError> {
    let flags = types::read_int(buf)
        .map_err(|err| PreparedMetadataParseError::FlagsParseError(err.into()))?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;

    let col_count =
        types::read_int_length(buf).map_err(PreparedMetadataParseError::ColumnCountParseError)?;

    let mut pk_indexes = Vec::new();
    if version.has_pk_indexes() {
        let pk_count =
            types::read_int_length(buf).map_err(PreparedMetadataParseError::PkCountParseError)?;
        pk_indexes.reserve(pk_count);
        for sequence in 0..pk_count {
            let index = types::read_short(buf)
                .map_err(|err| PreparedMetadataParseError::PkIndexParseError(err.into()))?;
            if index as usize >= col_count {
                return Err(PreparedMetadataParseError::PkIndexOutOfBounds { index, col_count });
            }
            pk_indexes.push(PartitionKeyIndex {
                index,
                sequence: sequence as u16,
            });
        }
        pk_indexes.sort_unstable_by_key(|pki| pki.index);
    }

    let global_table_spec = global_tables_spec
        .then(|| deser_table_spec(buf))
        .transpose()
        .map_err(PreparedMetadataParseError::GlobalTableSpecParseError)?;

    let col_specs = deser_col_specs(buf, version, global_table_spec, col_count).map_err(
        |(column_index, kind)| PreparedMetadataParseError::ColumnSpecParseError {
            column_index,
            kind,
        },
    )?;

    Ok(PreparedMetadata {
        flags,
        col_count,
        pk_indexes,
        col_specs,
    })
}

fn deser_prepared(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> StdResult<Prepared, PreparedParseError> {
    let id = Bytes::copy_from_slice(
        types::read_short_bytes(buf).map_err(PreparedParseError::IdParseError)?,
    );
    let result_metadata_id = version
        .has_result_metadata_id()
        .then(|| {
            types::read_short_bytes(buf)
                .map(Bytes::copy_from_slice)
                .map_err(PreparedParseError::ResultMetadataIdParseError)
        })
        .transpose()?;
    let prepared_metadata = deser_prepared_metadata(buf, version)?;
    let result_metadata = deser_result_metadata(buf, version)?
        .metadata
        .unwrap_or_default();

    Ok(Prepared {
        id,
        result_metadata_id,
        prepared_metadata,
        result_metadata: Arc::new(result_metadata),
    })
}

/// Deserializes the body of a RESULT response.
///
/// `cached_metadata` is used for rows sent without metadata, which happens
/// when the request asked the server to skip it.
pub fn deserialize(
    body: Bytes,
    version: ProtocolVersion,
    cached_metadata: Option<&Arc<ResultMetadata>>,
) -> StdResult<Result, CqlResultParseError> {
    let buf = &mut &*body;
    use self::Result::*;
    Ok(
        match types::read_int(buf)
            .map_err(|err| CqlResultParseError::ResultIdParseError(err.into()))?
        {
            0x0001 => Void,
            0x0002 => Rows(RowSet::deserialize(
                body.slice_ref(buf),
                version,
                cached_metadata,
            )?),
            0x0003 => SetKeyspace(self::SetKeyspace {
                keyspace_name: types::read_string(buf)
                    .map_err(CqlResultParseError::SetKeyspaceParseError)?
                    .to_owned(),
            }),
            0x0004 => Prepared(deser_prepared(buf, version)?),
            0x0005 => SchemaChange(self::SchemaChange {
                event: SchemaChangeEvent::deserialize(buf, version)?,
            }),
            id => return Err(CqlResultParseError::UnknownResultId(id)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frame_errors::RowsParseError;
    use assert_matches::assert_matches;

    fn write_col_spec(ks: &str, table: &str, name: &str, typ: &ColumnType, buf: &mut Vec<u8>) {
        types::write_string(ks, buf).unwrap();
        types::write_string(table, buf).unwrap();
        types::write_string(name, buf).unwrap();
        typ.write_type_spec(buf).unwrap();
    }

    #[test]
    fn nested_types() {
        let typ = ColumnType::Map(
            Box::new(ColumnType::Text),
            Box::new(ColumnType::List(Box::new(ColumnType::Tuple(vec![
                ColumnType::Int,
                ColumnType::UserDefinedType {
                    type_name: "address".to_owned(),
                    keyspace: "ks".to_owned(),
                    field_types: vec![
                        ("street".to_owned(), ColumnType::Text),
                        ("zip".to_owned(), ColumnType::Int),
                    ],
                },
            ])))),
        );
        let mut buf = Vec::new();
        typ.write_type_spec(&mut buf).unwrap();
        buf.extend_from_slice(b"rest");

        let mut slice = &buf[..];
        assert_eq!(deser_type(&mut slice, ProtocolVersion::V4).unwrap(), typ);
        assert_eq!(slice, b"rest");
    }

    #[test]
    fn varchar_and_duration_aliases() {
        let mut buf = Vec::new();
        types::write_short(0x000A, &mut buf);
        assert_eq!(
            deser_type(&mut &buf[..], ProtocolVersion::V4).unwrap(),
            ColumnType::Text
        );

        let mut buf = Vec::new();
        types::write_short(0x0000, &mut buf);
        types::write_string(DURATION_CUSTOM_TYPE, &mut buf).unwrap();
        assert_eq!(
            deser_type(&mut &buf[..], ProtocolVersion::V4).unwrap(),
            ColumnType::Duration
        );
    }

    #[test]
    fn tuple_and_udt_need_v3() {
        let mut buf = Vec::new();
        ColumnType::Tuple(vec![ColumnType::Int])
            .write_type_spec(&mut buf)
            .unwrap();
        assert_matches!(
            deser_type(&mut &buf[..], ProtocolVersion::V2),
            Err(CqlTypeParseError::TypeNotSupportedInVersion {
                type_id: 0x0031,
                version: ProtocolVersion::V2
            })
        );
        assert!(deser_type(&mut &buf[..], ProtocolVersion::V3).is_ok());
    }

    #[test]
    fn unknown_type_code() {
        let mut buf = Vec::new();
        types::write_short(0x00AB, &mut buf);
        assert_matches!(
            deser_type(&mut &buf[..], ProtocolVersion::V4),
            Err(CqlTypeParseError::TypeNotImplemented(0x00AB))
        );
    }

    #[test]
    fn metadata_with_paging_state_and_duplicate_names() {
        let mut buf = Vec::new();
        types::write_int(FLAG_GLOBAL_TABLES_SPEC | FLAG_HAS_MORE_PAGES, &mut buf);
        types::write_int(3, &mut buf);
        types::write_bytes(&[7, 7], &mut buf).unwrap();
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("t", &mut buf).unwrap();
        for (name, typ) in [("a", ColumnType::Int), ("b", ColumnType::Text), ("a", ColumnType::Blob)] {
            types::write_string(name, &mut buf).unwrap();
            typ.write_type_spec(&mut buf).unwrap();
        }

        let parsed = deser_result_metadata(&mut &buf[..], ProtocolVersion::V4).unwrap();
        assert_eq!(parsed.paging_state.as_deref(), Some(&[7u8, 7][..]));
        assert_eq!(parsed.new_metadata_id, None);
        let metadata = parsed.metadata.unwrap();
        assert_eq!(metadata.col_count(), 3);
        assert_eq!(metadata.column_index("a"), Some(0));
        assert_eq!(metadata.column_index("b"), Some(1));
        assert_eq!(metadata.column_index("c"), None);
        assert_eq!(metadata.col_specs()[2].typ(), &ColumnType::Blob);
        assert_eq!(metadata.col_specs()[1].table_spec(), &TableSpec::new("ks", "t"));
    }

    #[test]
    fn v5_metadata_changed_carries_new_id() {
        let mut buf = Vec::new();
        types::write_int(FLAG_METADATA_CHANGED, &mut buf);
        types::write_int(1, &mut buf);
        types::write_short_bytes(&[0xAA], &mut buf).unwrap();
        write_col_spec("ks", "t", "x", &ColumnType::BigInt, &mut buf);

        let parsed = deser_result_metadata(&mut &buf[..], ProtocolVersion::V5).unwrap();
        assert_eq!(parsed.new_metadata_id.as_deref(), Some(&[0xAA][..]));
        assert_eq!(parsed.metadata.unwrap().col_specs()[0].name(), "x");
    }

    #[test]
    fn malformed_column_spec_reports_index() {
        let mut buf = Vec::new();
        types::write_int(0, &mut buf);
        types::write_int(2, &mut buf);
        write_col_spec("ks", "t", "x", &ColumnType::Int, &mut buf);
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("t", &mut buf).unwrap();
        types::write_string("y", &mut buf).unwrap();
        types::write_short(0x00FF, &mut buf);

        assert_matches!(
            deser_result_metadata(&mut &buf[..], ProtocolVersion::V4),
            Err(ResultMetadataParseError::ColumnSpecParseError {
                column_index: 1,
                kind: ColumnSpecParseErrorKind::ColumnTypeParseError(
                    CqlTypeParseError::TypeNotImplemented(0x00FF)
                )
            })
        );
    }

    fn prepared_body(version: ProtocolVersion, pk_index: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        types::write_int(0x0004, &mut buf);
        types::write_short_bytes(b"stmt-id", &mut buf).unwrap();
        if version.has_result_metadata_id() {
            types::write_short_bytes(b"meta-id", &mut buf).unwrap();
        }
        // bind markers
        types::write_int(FLAG_GLOBAL_TABLES_SPEC, &mut buf);
        types::write_int(2, &mut buf);
        if version.has_pk_indexes() {
            types::write_int(1, &mut buf);
            types::write_short(pk_index, &mut buf);
        }
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("t", &mut buf).unwrap();
        for (name, typ) in [("k", ColumnType::Int), ("v", ColumnType::Text)] {
            types::write_string(name, &mut buf).unwrap();
            typ.write_type_spec(&mut buf).unwrap();
        }
        // result metadata
        types::write_int(FLAG_NO_METADATA, &mut buf);
        types::write_int(0, &mut buf);
        buf
    }

    #[test]
    fn prepared_across_versions() {
        for version in [ProtocolVersion::V3, ProtocolVersion::V4, ProtocolVersion::V5] {
            let body = Bytes::from(prepared_body(version, 0));
            let Result::Prepared(prepared) = deserialize(body, version, None).unwrap() else {
                panic!("expected a prepared result");
            };
            assert_eq!(prepared.id, Bytes::from_static(b"stmt-id"));
            assert_eq!(
                prepared.result_metadata_id.is_some(),
                version == ProtocolVersion::V5
            );
            assert_eq!(prepared.prepared_metadata.col_specs.len(), 2);
            assert_eq!(
                prepared.prepared_metadata.pk_indexes.len(),
                usize::from(version.has_pk_indexes())
            );
            assert_eq!(prepared.result_metadata.col_count(), 0);
        }
    }

    #[test]
    fn pk_index_out_of_bounds() {
        let body = Bytes::from(prepared_body(ProtocolVersion::V4, 2));
        assert_matches!(
            deserialize(body, ProtocolVersion::V4, None),
            Err(CqlResultParseError::PreparedParseError(
                PreparedParseError::PreparedMetadataParseError(
                    PreparedMetadataParseError::PkIndexOutOfBounds {
                        index: 2,
                        col_count: 2
                    }
                )
            ))
        );
    }

    #[test]
    fn rows_without_metadata_need_cache() {
        let mut buf = Vec::new();
        types::write_int(0x0002, &mut buf);
        types::write_int(FLAG_NO_METADATA, &mut buf);
        types::write_int(1, &mut buf);
        types::write_int(1, &mut buf);
        types::write_bytes(&42i32.to_be_bytes(), &mut buf).unwrap();
        let body = Bytes::from(buf);

        assert_matches!(
            deserialize(body.clone(), ProtocolVersion::V4, None),
            Err(CqlResultParseError::RowsParseError(
                RowsParseError::MissingMetadata
            ))
        );

        let cached = Arc::new(ResultMetadata::new(vec![ColumnSpec::new(
            "n",
            ColumnType::Int,
            TableSpec::new("ks", "t"),
        )]));
        let Result::Rows(rows) = deserialize(body, ProtocolVersion::V4, Some(&cached)).unwrap()
        else {
            panic!("expected rows");
        };
        assert_eq!(rows.rows_count(), 1);
        assert_eq!(rows.rows()[0].get_by_name::<i32>("n").unwrap(), 42);
    }

    #[test]
    fn set_keyspace_and_void() {
        let mut buf = Vec::new();
        types::write_int(0x0003, &mut buf);
        types::write_string("my_ks", &mut buf).unwrap();
        assert_matches!(
            deserialize(buf.into(), ProtocolVersion::V4, None),
            Ok(Result::SetKeyspace(SetKeyspace { keyspace_name })) if keyspace_name == "my_ks"
        );

        let mut buf = Vec::new();
        types::write_int(0x0001, &mut buf);
        assert_matches!(
            deserialize(buf.into(), ProtocolVersion::V4, None),
            Ok(Result::Void)
        );

        let mut buf = Vec::new();
        types::write_int(0x0042, &mut buf);
        assert_matches!(
            deserialize(buf.into(), ProtocolVersion::V4, None),
            Err(CqlResultParseError::UnknownResultId(0x42))
        );
    }
}
