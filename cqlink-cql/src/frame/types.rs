//! CQL binary protocol in-wire types.
//!
//! Every reader consumes bytes from the front of `&mut &[u8]`, leaving the
//! slice positioned right after the parsed value.

use super::frame_errors::LowLevelDeserializationError;
use super::TryFromPrimitiveError;
use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    #[default]
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    LocalOne = 0x000A,

    // Serial levels are valid for reads too, they make them go through Paxos.
    Serial = 0x0008,
    LocalSerial = 0x0009,
}

impl TryFrom<u16> for Consistency {
    type Error = TryFromPrimitiveError<u16>;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let consistency = match value {
            0x0000 => Consistency::Any,
            0x0001 => Consistency::One,
            0x0002 => Consistency::Two,
            0x0003 => Consistency::Three,
            0x0004 => Consistency::Quorum,
            0x0005 => Consistency::All,
            0x0006 => Consistency::LocalQuorum,
            0x0007 => Consistency::EachQuorum,
            0x0008 => Consistency::Serial,
            0x0009 => Consistency::LocalSerial,
            0x000A => Consistency::LocalOne,
            _ => {
                return Err(TryFromPrimitiveError {
                    enum_name: "Consistency",
                    primitive: value,
                })
            }
        };
        Ok(consistency)
    }
}

impl Consistency {
    pub fn is_serial(&self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }
}

impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Consistency of the Paxos phase of conditional statements.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[repr(u16)]
pub enum SerialConsistency {
    Serial = 0x0008,
    LocalSerial = 0x0009,
}

#[derive(Debug, Error)]
#[error("Expected Consistency Serial or LocalSerial, got: {0}")]
pub struct NonSerialConsistencyError(Consistency);

impl TryFrom<Consistency> for SerialConsistency {
    type Error = NonSerialConsistencyError;

    fn try_from(c: Consistency) -> Result<Self, Self::Error> {
        match c {
            Consistency::Serial => Ok(SerialConsistency::Serial),
            Consistency::LocalSerial => Ok(SerialConsistency::LocalSerial),
            other => Err(NonSerialConsistencyError(other)),
        }
    }
}

impl std::fmt::Display for SerialConsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A `[value]`: bytes, null or "not set".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RawValue<'a> {
    Null,
    Unset,
    Value(&'a [u8]),
}

impl<'a> RawValue<'a> {
    #[inline]
    pub fn as_value(&self) -> Option<&'a [u8]> {
        match self {
            RawValue::Value(v) => Some(v),
            RawValue::Null | RawValue::Unset => None,
        }
    }
}

pub(crate) fn read_raw_bytes<'a>(
    count: usize,
    buf: &mut &'a [u8],
) -> Result<&'a [u8], LowLevelDeserializationError> {
    if buf.len() < count {
        return Err(LowLevelDeserializationError::TooFewBytesReceived {
            expected: count,
            received: buf.len(),
        });
    }
    let (ret, rest) = buf.split_at(count);
    *buf = rest;
    Ok(ret)
}

pub fn read_byte(buf: &mut &[u8]) -> Result<u8, std::io::Error> {
    buf.read_u8()
}

pub fn read_int(buf: &mut &[u8]) -> Result<i32, std::io::Error> {
    buf.read_i32::<BigEndian>()
}

pub fn write_int(v: i32, buf: &mut impl BufMut) {
    buf.put_i32(v);
}

pub fn read_int_length(buf: &mut &[u8]) -> Result<usize, LowLevelDeserializationError> {
    let v = read_int(buf)?;
    let v: usize = v.try_into()?;
    Ok(v)
}

pub(crate) fn write_int_length(
    v: usize,
    buf: &mut impl BufMut,
) -> Result<(), std::num::TryFromIntError> {
    let v: i32 = v.try_into()?;
    write_int(v, buf);
    Ok(())
}

pub fn read_long(buf: &mut &[u8]) -> Result<i64, std::io::Error> {
    buf.read_i64::<BigEndian>()
}

pub fn write_long(v: i64, buf: &mut impl BufMut) {
    buf.put_i64(v);
}

pub fn read_short(buf: &mut &[u8]) -> Result<u16, std::io::Error> {
    buf.read_u16::<BigEndian>()
}

pub fn write_short(v: u16, buf: &mut impl BufMut) {
    buf.put_u16(v);
}

pub(crate) fn read_short_length(buf: &mut &[u8]) -> Result<usize, std::io::Error> {
    read_short(buf).map(usize::from)
}

pub(crate) fn write_short_length(
    v: usize,
    buf: &mut impl BufMut,
) -> Result<(), std::num::TryFromIntError> {
    let v: u16 = v.try_into()?;
    write_short(v, buf);
    Ok(())
}

// `[bytes]`: a negative length stands for null.
pub fn read_bytes_opt<'a>(
    buf: &mut &'a [u8],
) -> Result<Option<&'a [u8]>, LowLevelDeserializationError> {
    let len = read_int(buf)?;
    if len < 0 {
        return Ok(None);
    }
    read_raw_bytes(len as usize, buf).map(Some)
}

/// Same as [read_bytes_opt], but a null is rejected.
pub fn read_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], LowLevelDeserializationError> {
    let len = read_int_length(buf)?;
    read_raw_bytes(len, buf)
}

pub fn read_value<'a>(buf: &mut &'a [u8]) -> Result<RawValue<'a>, LowLevelDeserializationError> {
    let len = read_int(buf)?;
    match len {
        -2 => Ok(RawValue::Unset),
        -1 => Ok(RawValue::Null),
        len if len >= 0 => read_raw_bytes(len as usize, buf).map(RawValue::Value),
        len => Err(LowLevelDeserializationError::InvalidValueLength(len)),
    }
}

pub fn write_value(v: RawValue<'_>, buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
    match v {
        RawValue::Null => write_int(-1, buf),
        RawValue::Unset => write_int(-2, buf),
        RawValue::Value(bytes) => write_bytes(bytes, buf)?,
    }
    Ok(())
}

pub fn read_short_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], LowLevelDeserializationError> {
    let len = read_short_length(buf)?;
    read_raw_bytes(len, buf)
}

pub fn write_bytes(v: &[u8], buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
    write_int_length(v.len(), buf)?;
    buf.put_slice(v);
    Ok(())
}

pub fn write_bytes_opt(
    v: Option<impl AsRef<[u8]>>,
    buf: &mut impl BufMut,
) -> Result<(), std::num::TryFromIntError> {
    match v {
        Some(bytes) => write_bytes(bytes.as_ref(), buf)?,
        None => write_int(-1, buf),
    }
    Ok(())
}

pub fn write_short_bytes(v: &[u8], buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
    write_short_length(v.len(), buf)?;
    buf.put_slice(v);
    Ok(())
}

pub fn read_bytes_map(
    buf: &mut &[u8],
) -> Result<HashMap<String, Bytes>, LowLevelDeserializationError> {
    let len = read_short_length(buf)?;
    let mut v = HashMap::with_capacity(len);
    for _ in 0..len {
        let key = read_string(buf)?.to_owned();
        let val = Bytes::copy_from_slice(read_bytes(buf)?);
        v.insert(key, val);
    }
    Ok(v)
}

pub fn write_bytes_map<B>(
    v: &HashMap<String, B>,
    buf: &mut impl BufMut,
) -> Result<(), std::num::TryFromIntError>
where
    B: AsRef<[u8]>,
{
    write_short_length(v.len(), buf)?;
    for (key, val) in v.iter() {
        write_string(key, buf)?;
        write_bytes(val.as_ref(), buf)?;
    }
    Ok(())
}

pub fn read_string<'a>(buf: &mut &'a [u8]) -> Result<&'a str, LowLevelDeserializationError> {
    let len = read_short_length(buf)?;
    let raw = read_raw_bytes(len, buf)?;
    Ok(str::from_utf8(raw)?)
}

pub fn write_string(v: &str, buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
    write_short_length(v.len(), buf)?;
    buf.put_slice(v.as_bytes());
    Ok(())
}

pub fn read_long_string<'a>(buf: &mut &'a [u8]) -> Result<&'a str, LowLevelDeserializationError> {
    let len = read_int_length(buf)?;
    let raw = read_raw_bytes(len, buf)?;
    Ok(str::from_utf8(raw)?)
}

pub fn write_long_string(v: &str, buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
    write_int_length(v.len(), buf)?;
    buf.put_slice(v.as_bytes());
    Ok(())
}

pub fn read_string_map(
    buf: &mut &[u8],
) -> Result<HashMap<String, String>, LowLevelDeserializationError> {
    let len = read_short_length(buf)?;
    let mut v = HashMap::with_capacity(len);
    for _ in 0..len {
        let key = read_string(buf)?.to_owned();
        let val = read_string(buf)?.to_owned();
        v.insert(key, val);
    }
    Ok(v)
}

pub fn write_string_map(
    v: &HashMap<impl AsRef<str>, impl AsRef<str>>,
    buf: &mut impl BufMut,
) -> Result<(), std::num::TryFromIntError> {
    write_short_length(v.len(), buf)?;
    for (key, val) in v.iter() {
        write_string(key.as_ref(), buf)?;
        write_string(val.as_ref(), buf)?;
    }
    Ok(())
}

pub fn read_string_list(buf: &mut &[u8]) -> Result<Vec<String>, LowLevelDeserializationError> {
    let len = read_short_length(buf)?;
    (0..len)
        .map(|_| read_string(buf).map(str::to_owned))
        .collect()
}

pub fn write_string_list(
    v: &[impl AsRef<str>],
    buf: &mut impl BufMut,
) -> Result<(), std::num::TryFromIntError> {
    write_short_length(v.len(), buf)?;
    for s in v.iter() {
        write_string(s.as_ref(), buf)?;
    }
    Ok(())
}

pub fn read_string_multimap(
    buf: &mut &[u8],
) -> Result<HashMap<String, Vec<String>>, LowLevelDeserializationError> {
    let len = read_short_length(buf)?;
    let mut v = HashMap::with_capacity(len);
    for _ in 0..len {
        let key = read_string(buf)?.to_owned();
        let val = read_string_list(buf)?;
        v.insert(key, val);
    }
    Ok(v)
}

pub fn write_string_multimap(
    v: &HashMap<String, Vec<String>>,
    buf: &mut impl BufMut,
) -> Result<(), std::num::TryFromIntError> {
    write_short_length(v.len(), buf)?;
    for (key, val) in v.iter() {
        write_string(key, buf)?;
        write_string_list(val, buf)?;
    }
    Ok(())
}

pub fn read_uuid(buf: &mut &[u8]) -> Result<Uuid, LowLevelDeserializationError> {
    let raw = read_raw_bytes(16, buf)?;
    let raw_array: [u8; 16] = raw.try_into()?;
    Ok(Uuid::from_bytes(raw_array))
}

pub fn write_uuid(uuid: &Uuid, buf: &mut impl BufMut) {
    buf.put_slice(&uuid.as_bytes()[..]);
}

pub fn read_consistency(buf: &mut &[u8]) -> Result<Consistency, LowLevelDeserializationError> {
    let raw = read_short(buf)?;
    Consistency::try_from(raw).map_err(LowLevelDeserializationError::UnknownConsistency)
}

pub fn write_consistency(c: Consistency, buf: &mut impl BufMut) {
    write_short(c as u16, buf);
}

pub fn write_serial_consistency(c: SerialConsistency, buf: &mut impl BufMut) {
    write_short(c as u16, buf);
}

/// `[inetaddr]`: a length byte followed by 4 or 16 address bytes.
pub fn read_inetaddr(buf: &mut &[u8]) -> Result<IpAddr, LowLevelDeserializationError> {
    let len = buf.read_u8()?;
    let ip_addr = match len {
        4 => {
            let octets: [u8; 4] = read_raw_bytes(4, buf)?.try_into()?;
            IpAddr::from(octets)
        }
        16 => {
            let octets: [u8; 16] = read_raw_bytes(16, buf)?.try_into()?;
            IpAddr::from(octets)
        }
        v => return Err(LowLevelDeserializationError::InvalidInetLength(v)),
    };
    Ok(ip_addr)
}

pub fn write_inetaddr(addr: IpAddr, buf: &mut impl BufMut) {
    match addr {
        IpAddr::V4(v4) => {
            buf.put_u8(4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(16);
            buf.put_slice(&v6.octets());
        }
    }
}

/// `[inet]`: an `[inetaddr]` followed by an `[int]` port.
pub fn read_inet(buf: &mut &[u8]) -> Result<SocketAddr, LowLevelDeserializationError> {
    let ip_addr = read_inetaddr(buf)?;
    let port = read_int(buf)?;
    Ok(SocketAddr::new(ip_addr, port as u16))
}

pub fn write_inet(addr: SocketAddr, buf: &mut impl BufMut) {
    write_inetaddr(addr.ip(), buf);
    write_int(addr.port() as i32, buf)
}

fn zig_zag_encode(v: i64) -> u64 {
    ((v >> 63) ^ (v << 1)) as u64
}

fn zig_zag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

// The number of leading set bits of the first byte tells
// how many extra bytes follow it.
pub(crate) fn unsigned_vint_encode(v: u64, buf: &mut Vec<u8>) {
    let mut v = v;
    let mut number_of_bytes = (639 - 9 * v.leading_zeros()) >> 6;
    if number_of_bytes <= 1 {
        return buf.put_u8(v as u8);
    }

    if number_of_bytes != 9 {
        let extra_bytes = number_of_bytes - 1;
        let length_bits = !(0xff >> extra_bytes);
        v |= (length_bits as u64) << (8 * extra_bytes);
    } else {
        buf.put_u8(0xff);
        number_of_bytes -= 1;
    }
    buf.put_uint(v, number_of_bytes as usize)
}

pub(crate) fn unsigned_vint_decode(buf: &mut &[u8]) -> Result<u64, std::io::Error> {
    let first_byte = buf.read_u8()?;
    let extra_bytes = first_byte.leading_ones() as usize;

    let mut v = if extra_bytes != 8 {
        let first_byte_bits = first_byte & (0xffu8 >> extra_bytes);
        (first_byte_bits as u64) << (8 * extra_bytes)
    } else {
        0
    };

    if extra_bytes != 0 {
        v += buf.read_uint::<BigEndian>(extra_bytes)?;
    }

    Ok(v)
}

pub(crate) fn vint_encode(v: i64, buf: &mut Vec<u8>) {
    unsigned_vint_encode(zig_zag_encode(v), buf)
}

pub(crate) fn vint_decode(buf: &mut &[u8]) -> Result<i64, std::io::Error> {
    unsigned_vint_decode(buf).map(zig_zag_decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn type_int() {
        for val in [i32::MIN, -1, 0, 1, i32::MAX] {
            let mut buf = Vec::new();
            write_int(val, &mut buf);
            assert_eq!(buf.len(), 4);
            assert_eq!(read_int(&mut &buf[..]).unwrap(), val);
        }
    }

    #[test]
    fn type_long() {
        for val in [i64::MIN, -1, 0, 1, i64::MAX] {
            let mut buf = Vec::new();
            write_long(val, &mut buf);
            assert_eq!(read_long(&mut &buf[..]).unwrap(), val);
        }
    }

    #[test]
    fn type_short_is_big_endian() {
        let mut buf = Vec::new();
        write_short(0x0102, &mut buf);
        assert_eq!(buf, vec![0x01, 0x02]);
        assert_eq!(read_short(&mut &buf[..]).unwrap(), 0x0102);
    }

    #[test]
    fn bytes_opt_null_is_not_empty() {
        let mut buf = Vec::new();
        write_bytes_opt(None::<&[u8]>, &mut buf).unwrap();
        write_bytes_opt(Some(&[][..]), &mut buf).unwrap();

        let mut slice = &buf[..];
        assert_eq!(read_bytes_opt(&mut slice).unwrap(), None);
        assert_eq!(read_bytes_opt(&mut slice).unwrap(), Some(&[][..]));
        assert!(slice.is_empty());
    }

    #[test]
    fn value_null_unset_and_bytes() {
        let mut buf = Vec::new();
        write_value(RawValue::Null, &mut buf).unwrap();
        write_value(RawValue::Unset, &mut buf).unwrap();
        write_value(RawValue::Value(&[7, 8]), &mut buf).unwrap();
        write_int(-3, &mut buf);

        let mut slice = &buf[..];
        assert_eq!(read_value(&mut slice).unwrap(), RawValue::Null);
        assert_eq!(read_value(&mut slice).unwrap(), RawValue::Unset);
        assert_eq!(read_value(&mut slice).unwrap(), RawValue::Value(&[7, 8]));
        assert!(matches!(
            read_value(&mut slice),
            Err(LowLevelDeserializationError::InvalidValueLength(-3))
        ));
    }

    #[test]
    fn truncated_bytes_report_sizes() {
        let mut buf = Vec::new();
        write_int(10, &mut buf);
        buf.extend_from_slice(&[1, 2, 3]);
        match read_bytes(&mut &buf[..]) {
            Err(LowLevelDeserializationError::TooFewBytesReceived { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn type_string_and_long_string() {
        for val in ["", "hello, world!", "zażółć"] {
            let mut buf = Vec::new();
            write_string(val, &mut buf).unwrap();
            write_long_string(val, &mut buf).unwrap();
            let mut slice = &buf[..];
            assert_eq!(read_string(&mut slice).unwrap(), val);
            assert_eq!(read_long_string(&mut slice).unwrap(), val);
        }
    }

    #[test]
    fn invalid_utf8_string() {
        let buf = [0x00, 0x02, 0xc3, 0x28];
        assert!(matches!(
            read_string(&mut &buf[..]),
            Err(LowLevelDeserializationError::UTF8DeserializationError(_))
        ));
    }

    #[test]
    fn type_string_maps_and_lists() {
        let mut map = HashMap::new();
        map.insert(String::from("CQL_VERSION"), String::from("3.0.0"));
        map.insert(String::from("COMPRESSION"), String::from("lz4"));
        let list = vec!["TOPOLOGY_CHANGE".to_owned(), "SCHEMA_CHANGE".to_owned()];
        let mut multimap = HashMap::new();
        multimap.insert(
            String::from("COMPRESSION"),
            vec![String::from("lz4"), String::from("snappy")],
        );
        multimap.insert(String::from("empty"), vec![]);

        let mut buf = Vec::new();
        write_string_map(&map, &mut buf).unwrap();
        write_string_list(&list, &mut buf).unwrap();
        write_string_multimap(&multimap, &mut buf).unwrap();

        let mut slice = &buf[..];
        assert_eq!(read_string_map(&mut slice).unwrap(), map);
        assert_eq!(read_string_list(&mut slice).unwrap(), list);
        assert_eq!(read_string_multimap(&mut slice).unwrap(), multimap);
        assert!(slice.is_empty());
    }

    #[test]
    fn type_bytes_map() {
        let mut val = HashMap::new();
        val.insert("".to_owned(), Bytes::new());
        val.insert("EXTENSION1".to_owned(), Bytes::from_static(&[1, 2, 3]));
        let mut buf = Vec::new();
        write_bytes_map(&val, &mut buf).unwrap();
        assert_eq!(read_bytes_map(&mut &*buf).unwrap(), val);
    }

    #[test]
    fn type_uuid() {
        let u = Uuid::parse_str("f3b4958c-52a1-11e7-802a-010203040506").unwrap();
        let mut buf = Vec::new();
        write_uuid(&u, &mut buf);
        assert_eq!(read_uuid(&mut &*buf).unwrap(), u);
        assert!(read_uuid(&mut &buf[..15]).is_err());
    }

    #[test]
    fn type_consistency() {
        let mut buf = Vec::new();
        write_consistency(Consistency::Quorum, &mut buf);
        assert_eq!(read_consistency(&mut &*buf).unwrap(), Consistency::Quorum);

        buf.clear();
        buf.put_u16(0x1234);
        let err = read_consistency(&mut &*buf).unwrap_err();
        assert!(err.to_string().contains(&format!("{}", 0x1234)));
    }

    #[test]
    fn type_inet() {
        let iv4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1234);
        let iv6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1)), 2345);
        for addr in [iv4, iv6] {
            let mut buf = Vec::new();
            write_inet(addr, &mut buf);
            assert_eq!(read_inet(&mut &*buf).unwrap(), addr);
        }

        let bad = [5u8, 1, 2, 3, 4, 5];
        assert!(matches!(
            read_inetaddr(&mut &bad[..]),
            Err(LowLevelDeserializationError::InvalidInetLength(5))
        ));

        // A length byte announcing more octets than available must not panic.
        let short = [16u8, 1, 2];
        assert!(read_inetaddr(&mut &short[..]).is_err());
    }

    #[test]
    fn zig_zag() {
        for (decoded, encoded) in [(0, 0), (-1, 1), (1, 2), (-2, 3), (2, 4), (i64::MIN, u64::MAX)] {
            assert_eq!(zig_zag_encode(decoded), encoded);
            assert_eq!(zig_zag_decode(encoded), decoded);
        }
    }

    #[test]
    fn unsigned_vint_boundaries() {
        let cases: [(u64, &[u8]); 8] = [
            (0, &[0]),
            (127, &[127]),
            (128, &[128, 128]),
            (1 << 14, &[192, 64, 0]),
            ((1 << 21) - 1, &[223, 255, 255]),
            (1 << 28, &[240, 16, 0, 0, 0]),
            (1 << 56, &[255, 1, 0, 0, 0, 0, 0, 0, 0]),
            (u64::MAX, &[255, 255, 255, 255, 255, 255, 255, 255, 255]),
        ];

        for (v, encoded) in cases {
            let mut buf = Vec::new();
            unsigned_vint_encode(v, &mut buf);
            assert_eq!(buf, encoded);
            assert_eq!(unsigned_vint_decode(&mut buf.as_slice()).unwrap(), v);
        }
    }

    #[test]
    fn vint_signed() {
        let mut buf: Vec<u8> = Vec::with_capacity(16);
        for i in 0..63 {
            for n in [(1i64 << i) - 1, 1 - (1 << i), -(1 << i), -1 - (1 << i)] {
                vint_encode(n, &mut buf);
                assert_eq!(vint_decode(&mut buf.as_slice()).unwrap(), n);
                buf.clear();
            }
        }
        for n in [i64::MAX, i64::MIN] {
            vint_encode(n, &mut buf);
            assert_eq!(vint_decode(&mut buf.as_slice()).unwrap(), n);
            buf.clear();
        }
    }
}
