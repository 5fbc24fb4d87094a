//! Decoding of a single cell into a [`CqlValue`].

use std::net::IpAddr;

use super::{DeserializationError, DeserializationErrorKind};
use crate::frame::frame_errors::LowLevelDeserializationError;
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::response::result::ColumnType;
use crate::frame::types;
use crate::value::{
    CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlTimeuuid, CqlValue,
    CqlVarint,
};

const MAX_TIME_NANOS: i64 = 86_399_999_999_999;

/// Decodes the bytes of a non-null cell as a value of type `typ`.
///
/// A zero-length cell of a type other than ascii, blob or text decodes to
/// [`CqlValue::Empty`]. Collections use `[short]` counts and lengths in
/// protocol v2 and `[int]` ones since v3.
pub fn deser_cql_value(
    typ: &ColumnType,
    buf: &[u8],
    version: ProtocolVersion,
) -> Result<CqlValue, DeserializationError> {
    use ColumnType::*;

    if buf.is_empty() && !typ.supports_empty_as_regular_value() {
        return Ok(CqlValue::Empty);
    }

    let err = |kind: DeserializationErrorKind| DeserializationError::new(typ, kind);

    Ok(match typ {
        Custom(type_str) => {
            return Err(err(DeserializationErrorKind::CustomTypeNotSupported(
                type_str.clone(),
            )))
        }
        Ascii => {
            if !buf.is_ascii() {
                return Err(err(DeserializationErrorKind::ExpectedAscii));
            }
            CqlValue::Ascii(std::str::from_utf8(buf).map_err(|e| err(e.into()))?.to_owned())
        }
        Text => CqlValue::Text(std::str::from_utf8(buf).map_err(|e| err(e.into()))?.to_owned()),
        Blob => CqlValue::Blob(buf.to_vec()),
        Boolean => CqlValue::Boolean(exact::<1>(typ, buf)?[0] != 0),
        TinyInt => CqlValue::TinyInt(i8::from_be_bytes(*exact(typ, buf)?)),
        SmallInt => CqlValue::SmallInt(i16::from_be_bytes(*exact(typ, buf)?)),
        Int => CqlValue::Int(i32::from_be_bytes(*exact(typ, buf)?)),
        BigInt => CqlValue::BigInt(i64::from_be_bytes(*exact(typ, buf)?)),
        Counter => CqlValue::Counter(crate::value::Counter(i64::from_be_bytes(*exact(
            typ, buf,
        )?))),
        Float => CqlValue::Float(f32::from_be_bytes(*exact(typ, buf)?)),
        Double => CqlValue::Double(f64::from_be_bytes(*exact(typ, buf)?)),
        Date => CqlValue::Date(CqlDate(u32::from_be_bytes(*exact(typ, buf)?))),
        Timestamp => CqlValue::Timestamp(CqlTimestamp(i64::from_be_bytes(*exact(typ, buf)?))),
        Time => {
            let nanoseconds = i64::from_be_bytes(*exact(typ, buf)?);
            if !(0..=MAX_TIME_NANOS).contains(&nanoseconds) {
                return Err(err(DeserializationErrorKind::ValueOverflow));
            }
            CqlValue::Time(CqlTime(nanoseconds))
        }
        Uuid => CqlValue::Uuid(uuid::Uuid::from_bytes(*exact(typ, buf)?)),
        Timeuuid => CqlValue::Timeuuid(CqlTimeuuid::from_bytes(*exact(typ, buf)?)),
        Inet => CqlValue::Inet(match buf.len() {
            4 => IpAddr::from(*exact::<4>(typ, buf)?),
            16 => IpAddr::from(*exact::<16>(typ, buf)?),
            got => return Err(err(DeserializationErrorKind::BadInetLength { got })),
        }),
        Varint => CqlValue::Varint(CqlVarint::from_signed_bytes_be_slice(buf)),
        Decimal => {
            let mut val = buf;
            let scale = types::read_int(&mut val).map_err(|e| err(raw(e)))?;
            CqlValue::Decimal(CqlDecimal::from_signed_be_bytes_slice_and_exponent(
                val, scale,
            ))
        }
        Duration => {
            let mut val = buf;
            let mut next = || -> Result<i64, DeserializationError> {
                types::vint_decode(&mut val).map_err(|e| err(raw(e)))
            };
            let months = i32::try_from(next()?)
                .map_err(|_| err(DeserializationErrorKind::ValueOverflow))?;
            let days = i32::try_from(next()?)
                .map_err(|_| err(DeserializationErrorKind::ValueOverflow))?;
            let nanoseconds = next()?;
            CqlValue::Duration(CqlDuration {
                months,
                days,
                nanoseconds,
            })
        }
        List(elem_type) => CqlValue::List(deser_elements(typ, elem_type, buf, version)?),
        Set(elem_type) => CqlValue::Set(deser_elements(typ, elem_type, buf, version)?),
        Map(key_type, value_type) => {
            let mut val = buf;
            let count = read_collection_count(&mut val, version).map_err(|e| err(e.into()))?;
            let mut pairs = Vec::with_capacity(count.min(val.len()));
            for _ in 0..count {
                let key = read_element(typ, key_type, &mut val, version)?;
                let value = read_element(typ, value_type, &mut val, version)?;
                pairs.push((key, value));
            }
            ensure_consumed(typ, val)?;
            CqlValue::Map(pairs)
        }
        Tuple(elem_types) => {
            let mut val = buf;
            let mut elems = Vec::with_capacity(elem_types.len());
            for elem_type in elem_types {
                // A tuple may be shorter than its type when it was written
                // before elements were added to the type.
                if val.is_empty() {
                    elems.push(None);
                    continue;
                }
                elems.push(read_field(typ, elem_type, &mut val, version)?);
            }
            ensure_consumed(typ, val)?;
            CqlValue::Tuple(elems)
        }
        UserDefinedType {
            type_name,
            keyspace,
            field_types,
        } => {
            let mut val = buf;
            let mut fields = Vec::with_capacity(field_types.len());
            for (field_name, field_type) in field_types {
                // Fields added to the type after the value was written are absent.
                let field = if val.is_empty() {
                    None
                } else {
                    read_field(typ, field_type, &mut val, version)?
                };
                fields.push((field_name.clone(), field));
            }
            ensure_consumed(typ, val)?;
            CqlValue::UserDefinedType {
                keyspace: keyspace.clone(),
                type_name: type_name.clone(),
                fields,
            }
        }
    })
}

/// Decodes a nullable cell.
pub fn deser_cql_value_opt(
    typ: &ColumnType,
    buf: Option<&[u8]>,
    version: ProtocolVersion,
) -> Result<Option<CqlValue>, DeserializationError> {
    buf.map(|buf| deser_cql_value(typ, buf, version)).transpose()
}

fn raw(err: std::io::Error) -> DeserializationErrorKind {
    LowLevelDeserializationError::from(err).into()
}

fn exact<'a, const N: usize>(
    typ: &ColumnType,
    buf: &'a [u8],
) -> Result<&'a [u8; N], DeserializationError> {
    buf.try_into().map_err(|_| {
        DeserializationError::new(
            typ,
            DeserializationErrorKind::ByteLengthMismatch {
                expected: N,
                got: buf.len(),
            },
        )
    })
}

fn ensure_consumed(typ: &ColumnType, rest: &[u8]) -> Result<(), DeserializationError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(DeserializationError::new(
            typ,
            DeserializationErrorKind::TrailingBytes(rest.len()),
        ))
    }
}

fn read_collection_count(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> Result<usize, LowLevelDeserializationError> {
    if version.uses_short_collection_lengths() {
        Ok(types::read_short_length(buf)?)
    } else {
        types::read_int_length(buf)
    }
}

/// Reads the raw bytes of a collection element. `None` stands for null,
/// which only `[int]` lengths can express.
fn read_element_bytes<'a>(
    buf: &mut &'a [u8],
    version: ProtocolVersion,
) -> Result<Option<&'a [u8]>, LowLevelDeserializationError> {
    if version.uses_short_collection_lengths() {
        types::read_short_bytes(buf).map(Some)
    } else {
        types::read_bytes_opt(buf)
    }
}

fn read_element(
    collection_type: &ColumnType,
    elem_type: &ColumnType,
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> Result<CqlValue, DeserializationError> {
    let bytes = read_element_bytes(buf, version)
        .map_err(|e| DeserializationError::new(collection_type, e.into()))?
        .ok_or_else(|| {
            DeserializationError::new(
                collection_type,
                DeserializationErrorKind::NullCollectionElement,
            )
        })?;
    deser_cql_value(elem_type, bytes, version)
}

/// Tuple elements and UDT fields are `[bytes]` regardless of the version.
fn read_field(
    composite_type: &ColumnType,
    field_type: &ColumnType,
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> Result<Option<CqlValue>, DeserializationError> {
    let bytes = types::read_bytes_opt(buf)
        .map_err(|e| DeserializationError::new(composite_type, e.into()))?;
    deser_cql_value_opt(field_type, bytes, version)
}

fn deser_elements(
    typ: &ColumnType,
    elem_type: &ColumnType,
    buf: &[u8],
    version: ProtocolVersion,
) -> Result<Vec<CqlValue>, DeserializationError> {
    let mut val = buf;
    let count = read_collection_count(&mut val, version)
        .map_err(|e| DeserializationError::new(typ, e.into()))?;
    // The count comes from the wire, do not trust it for preallocation.
    let mut elems = Vec::with_capacity(count.min(val.len()));
    for _ in 0..count {
        elems.push(read_element(typ, elem_type, &mut val, version)?);
    }
    ensure_consumed(typ, val)?;
    Ok(elems)
}
