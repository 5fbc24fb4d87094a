//! Encoding of a single [`CqlValue`] checked against its column type.

use std::net::IpAddr;

use super::{SerializationError, SerializationErrorKind};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::response::result::ColumnType;
use crate::frame::types;
use crate::value::{
    Counter, CqlDate, CqlDuration, CqlTime, CqlTimestamp, CqlValue,
};

const MAX_TIME_NANOS: i64 = 86_399_999_999_999;

/// Writes the contents of `value` as a value of type `typ`, without the
/// cell's own length prefix.
///
/// [`CqlValue::Empty`] is written as zero bytes for every type. Collections
/// use `[short]` counts and element lengths in protocol v2, `[int]` ones
/// since v3.
pub fn serialize_cql_value(
    value: &CqlValue,
    typ: &ColumnType,
    version: ProtocolVersion,
    buf: &mut Vec<u8>,
) -> Result<(), SerializationError> {
    use ColumnType as T;

    let err = |kind: SerializationErrorKind| SerializationError::new(typ, kind);

    match (typ, value) {
        (_, CqlValue::Empty) => {}
        (T::Custom(name), _) => {
            return Err(err(SerializationErrorKind::CustomTypeNotSupported(
                name.clone(),
            )))
        }
        (T::Ascii, CqlValue::Ascii(s) | CqlValue::Text(s)) => {
            if !s.is_ascii() {
                return Err(err(SerializationErrorKind::NonAsciiString));
            }
            buf.extend_from_slice(s.as_bytes());
        }
        (T::Text, CqlValue::Text(s) | CqlValue::Ascii(s)) => buf.extend_from_slice(s.as_bytes()),
        (T::Blob, CqlValue::Blob(b)) => buf.extend_from_slice(b),
        (T::Boolean, CqlValue::Boolean(b)) => buf.push(u8::from(*b)),
        (T::TinyInt, CqlValue::TinyInt(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (T::SmallInt, CqlValue::SmallInt(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (T::Int, CqlValue::Int(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (T::BigInt, CqlValue::BigInt(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (T::Counter, CqlValue::Counter(Counter(v))) => buf.extend_from_slice(&v.to_be_bytes()),
        (T::Float, CqlValue::Float(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (T::Double, CqlValue::Double(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (T::Date, CqlValue::Date(CqlDate(v))) => buf.extend_from_slice(&v.to_be_bytes()),
        (T::Timestamp, CqlValue::Timestamp(CqlTimestamp(v))) => {
            buf.extend_from_slice(&v.to_be_bytes())
        }
        (T::Time, CqlValue::Time(CqlTime(v))) => {
            if !(0..=MAX_TIME_NANOS).contains(v) {
                return Err(err(SerializationErrorKind::ValueOverflow));
            }
            buf.extend_from_slice(&v.to_be_bytes());
        }
        (T::Uuid, CqlValue::Uuid(u)) => buf.extend_from_slice(u.as_bytes()),
        (T::Timeuuid, CqlValue::Timeuuid(u)) => buf.extend_from_slice(u.as_bytes()),
        (T::Inet, CqlValue::Inet(IpAddr::V4(addr))) => buf.extend_from_slice(&addr.octets()),
        (T::Inet, CqlValue::Inet(IpAddr::V6(addr))) => buf.extend_from_slice(&addr.octets()),
        (T::Varint, CqlValue::Varint(v)) => buf.extend_from_slice(v.as_signed_bytes_be_slice()),
        (T::Decimal, CqlValue::Decimal(d)) => {
            let (bytes, scale) = d.as_signed_be_bytes_slice_and_exponent();
            types::write_int(scale, buf);
            buf.extend_from_slice(bytes);
        }
        (
            T::Duration,
            CqlValue::Duration(CqlDuration {
                months,
                days,
                nanoseconds,
            }),
        ) => {
            types::vint_encode(i64::from(*months), buf);
            types::vint_encode(i64::from(*days), buf);
            types::vint_encode(*nanoseconds, buf);
        }
        (T::List(elem_type) | T::Set(elem_type), CqlValue::List(elems) | CqlValue::Set(elems)) => {
            write_collection_count(typ, elems.len(), version, buf)?;
            for elem in elems {
                write_element(typ, elem, elem_type, version, buf)?;
            }
        }
        (T::Map(key_type, value_type), CqlValue::Map(pairs)) => {
            write_collection_count(typ, pairs.len(), version, buf)?;
            for (key, value) in pairs {
                write_element(typ, key, key_type, version, buf)?;
                write_element(typ, value, value_type, version, buf)?;
            }
        }
        (T::Tuple(elem_types), CqlValue::Tuple(elems)) => {
            require_v3(typ, version)?;
            if elems.len() != elem_types.len() {
                return Err(err(SerializationErrorKind::TupleArityMismatch {
                    expected: elem_types.len(),
                    actual: elems.len(),
                }));
            }
            for (elem, elem_type) in elems.iter().zip(elem_types) {
                write_field(typ, elem.as_ref(), elem_type, version, buf)?;
            }
        }
        (
            T::UserDefinedType {
                type_name,
                keyspace,
                field_types,
            },
            CqlValue::UserDefinedType {
                keyspace: value_keyspace,
                type_name: value_type_name,
                fields,
            },
        ) => {
            require_v3(typ, version)?;
            if keyspace != value_keyspace || type_name != value_type_name {
                return Err(err(SerializationErrorKind::UdtNameMismatch {
                    keyspace: value_keyspace.clone(),
                    type_name: value_type_name.clone(),
                }));
            }
            if let Some((unknown, _)) = fields
                .iter()
                .find(|(name, _)| !field_types.iter().any(|(known, _)| known == name))
            {
                return Err(err(SerializationErrorKind::UdtNoSuchField(
                    unknown.clone(),
                )));
            }
            // Fields are written in the order of the type, absent ones as null.
            for (field_name, field_type) in field_types {
                let field = fields
                    .iter()
                    .find(|(name, _)| name == field_name)
                    .and_then(|(_, value)| value.as_ref());
                write_field(typ, field, field_type, version, buf)?;
            }
        }
        _ => {
            return Err(err(SerializationErrorKind::MismatchedType {
                value: value_kind(value),
            }))
        }
    }

    Ok(())
}

/// The type a value is serialized as when no column type is known, as for
/// the values of an unprepared QUERY.
pub(crate) fn natural_type(value: &CqlValue) -> ColumnType {
    let elem_type = |elems: &[CqlValue]| Box::new(elems.first().map_or(ColumnType::Blob, natural_type));
    match value {
        CqlValue::Ascii(_) => ColumnType::Ascii,
        CqlValue::Boolean(_) => ColumnType::Boolean,
        CqlValue::Blob(_) | CqlValue::Empty => ColumnType::Blob,
        CqlValue::Counter(_) => ColumnType::Counter,
        CqlValue::Decimal(_) => ColumnType::Decimal,
        CqlValue::Date(_) => ColumnType::Date,
        CqlValue::Double(_) => ColumnType::Double,
        CqlValue::Duration(_) => ColumnType::Duration,
        CqlValue::Float(_) => ColumnType::Float,
        CqlValue::Int(_) => ColumnType::Int,
        CqlValue::BigInt(_) => ColumnType::BigInt,
        CqlValue::Text(_) => ColumnType::Text,
        CqlValue::Timestamp(_) => ColumnType::Timestamp,
        CqlValue::Inet(_) => ColumnType::Inet,
        CqlValue::List(elems) => ColumnType::List(elem_type(elems)),
        CqlValue::Set(elems) => ColumnType::Set(elem_type(elems)),
        CqlValue::Map(pairs) => match pairs.first() {
            Some((key, value)) => {
                ColumnType::Map(Box::new(natural_type(key)), Box::new(natural_type(value)))
            }
            None => ColumnType::Map(Box::new(ColumnType::Blob), Box::new(ColumnType::Blob)),
        },
        CqlValue::UserDefinedType {
            keyspace,
            type_name,
            fields,
        } => ColumnType::UserDefinedType {
            type_name: type_name.clone(),
            keyspace: keyspace.clone(),
            field_types: fields
                .iter()
                .map(|(name, value)| {
                    let typ = value.as_ref().map_or(ColumnType::Blob, natural_type);
                    (name.clone(), typ)
                })
                .collect(),
        },
        CqlValue::SmallInt(_) => ColumnType::SmallInt,
        CqlValue::TinyInt(_) => ColumnType::TinyInt,
        CqlValue::Time(_) => ColumnType::Time,
        CqlValue::Timeuuid(_) => ColumnType::Timeuuid,
        CqlValue::Tuple(elems) => ColumnType::Tuple(
            elems
                .iter()
                .map(|elem| elem.as_ref().map_or(ColumnType::Blob, natural_type))
                .collect(),
        ),
        CqlValue::Uuid(_) => ColumnType::Uuid,
        CqlValue::Varint(_) => ColumnType::Varint,
    }
}

fn value_kind(value: &CqlValue) -> &'static str {
    match value {
        CqlValue::Ascii(_) => "ascii",
        CqlValue::Boolean(_) => "boolean",
        CqlValue::Blob(_) => "blob",
        CqlValue::Counter(_) => "counter",
        CqlValue::Decimal(_) => "decimal",
        CqlValue::Date(_) => "date",
        CqlValue::Double(_) => "double",
        CqlValue::Duration(_) => "duration",
        CqlValue::Empty => "empty",
        CqlValue::Float(_) => "float",
        CqlValue::Int(_) => "int",
        CqlValue::BigInt(_) => "bigint",
        CqlValue::Text(_) => "text",
        CqlValue::Timestamp(_) => "timestamp",
        CqlValue::Inet(_) => "inet",
        CqlValue::List(_) => "list",
        CqlValue::Map(_) => "map",
        CqlValue::Set(_) => "set",
        CqlValue::UserDefinedType { .. } => "udt",
        CqlValue::SmallInt(_) => "smallint",
        CqlValue::TinyInt(_) => "tinyint",
        CqlValue::Time(_) => "time",
        CqlValue::Timeuuid(_) => "timeuuid",
        CqlValue::Tuple(_) => "tuple",
        CqlValue::Uuid(_) => "uuid",
        CqlValue::Varint(_) => "varint",
    }
}

fn require_v3(typ: &ColumnType, version: ProtocolVersion) -> Result<(), SerializationError> {
    if version.supports_udt_and_tuple() {
        Ok(())
    } else {
        Err(SerializationError::new(
            typ,
            SerializationErrorKind::UnsupportedInVersion(version),
        ))
    }
}

fn write_collection_count(
    typ: &ColumnType,
    count: usize,
    version: ProtocolVersion,
    buf: &mut Vec<u8>,
) -> Result<(), SerializationError> {
    let res = if version.uses_short_collection_lengths() {
        types::write_short_length(count, buf)
    } else {
        types::write_int_length(count, buf)
    };
    res.map_err(|_| SerializationError::new(typ, SerializationErrorKind::ValueTooLarge(count)))
}

/// Writes a collection element, length-prefixed as the version requires.
fn write_element(
    collection_type: &ColumnType,
    elem: &CqlValue,
    elem_type: &ColumnType,
    version: ProtocolVersion,
    buf: &mut Vec<u8>,
) -> Result<(), SerializationError> {
    let short = version.uses_short_collection_lengths();
    write_length_prefixed(collection_type, short, buf, |buf| {
        serialize_cql_value(elem, elem_type, version, buf)
    })
}

/// Writes a tuple element or UDT field, always as `[bytes]`.
fn write_field(
    parent_type: &ColumnType,
    field: Option<&CqlValue>,
    field_type: &ColumnType,
    version: ProtocolVersion,
    buf: &mut Vec<u8>,
) -> Result<(), SerializationError> {
    match field {
        Some(value) => write_length_prefixed(parent_type, false, buf, |buf| {
            serialize_cql_value(value, field_type, version, buf)
        }),
        None => {
            types::write_int(-1, buf);
            Ok(())
        }
    }
}

/// Reserves room for the length, writes the contents and backfills the
/// length once it is known.
pub(crate) fn write_length_prefixed(
    typ: &ColumnType,
    short: bool,
    buf: &mut Vec<u8>,
    contents: impl FnOnce(&mut Vec<u8>) -> Result<(), SerializationError>,
) -> Result<(), SerializationError> {
    let len_pos = buf.len();
    let len_size = if short { 2 } else { 4 };
    buf.resize(len_pos + len_size, 0);
    contents(buf)?;

    let written = buf.len() - len_pos - len_size;
    let too_large =
        || SerializationError::new(typ, SerializationErrorKind::ValueTooLarge(written));
    if short {
        let len = u16::try_from(written).map_err(|_| too_large())?;
        buf[len_pos..len_pos + 2].copy_from_slice(&len.to_be_bytes());
    } else {
        let len = i32::try_from(written).map_err(|_| too_large())?;
        buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    }
    Ok(())
}
