//! Owned representation of CQL values and the native helper types that back
//! them (`timeuuid`, `varint`, `decimal`, `date`, `time`, `timestamp`,
//! `duration`).

use std::net::IpAddr;

use thiserror::Error;
use uuid::Uuid;

/// A value could not be represented in the requested Rust type without loss.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[error("Value is too large to fit in the CQL type")]
pub struct ValueOverflow;

/// Represents an counter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Counter(pub i64);

/// Enum providing a way to represent a value that might be unset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MaybeUnset<V> {
    #[default]
    Unset,
    Set(V),
}

/// Represents timeuuid (uuid V1) value.
///
/// Ordering follows the database: the embedded timestamp is compared first,
/// then the remaining bytes with a signed comparison.
#[derive(Debug, Clone, Copy, Eq)]
pub struct CqlTimeuuid(Uuid);

impl CqlTimeuuid {
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn from_slice(b: &[u8]) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::from_slice(b)?))
    }

    /// Timestamp bits, with the version nibble masked off.
    fn msb(&self) -> u64 {
        // time_low - time_mid - time_hi_and_version
        let bytes = self.0.as_bytes();
        u64::from_be_bytes([
            bytes[6] & 0x0f,
            bytes[7],
            bytes[4],
            bytes[5],
            bytes[0],
            bytes[1],
            bytes[2],
            bytes[3],
        ])
    }

    fn lsb_signed(&self) -> u64 {
        let bytes = self.0.as_bytes();
        let lsb = u64::from_be_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        lsb ^ 0x8080808080808080
    }
}

impl std::str::FromStr for CqlTimeuuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

impl std::fmt::Display for CqlTimeuuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CqlTimeuuid> for Uuid {
    fn from(value: CqlTimeuuid) -> Self {
        value.0
    }
}

impl From<Uuid> for CqlTimeuuid {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Ord for CqlTimeuuid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.msb()
            .cmp(&other.msb())
            .then_with(|| self.lsb_signed().cmp(&other.lsb_signed()))
    }
}

impl PartialOrd for CqlTimeuuid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CqlTimeuuid {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl std::hash::Hash for CqlTimeuuid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.lsb_signed().hash(state);
        self.msb().hash(state);
    }
}

/// Native CQL `varint` representation: two's-complement big-endian bytes.
///
/// The bytes are kept as received. Equality ignores redundant leading sign
/// bytes, so `[0x00, 0x01]` equals `[0x01]`.
#[derive(Clone, Eq, Debug)]
pub struct CqlVarint(Vec<u8>);

impl CqlVarint {
    pub fn from_signed_bytes_be(digits: Vec<u8>) -> Self {
        Self(digits)
    }

    pub fn from_signed_bytes_be_slice(digits: &[u8]) -> Self {
        Self(digits.to_vec())
    }

    pub fn as_signed_bytes_be_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_signed_bytes_be(self) -> Vec<u8> {
        self.0
    }

    fn as_normalized_slice(&self) -> &[u8] {
        let digits = &self.0[..];
        if digits.is_empty() {
            return &[0];
        }
        let Some(non_zero_position) = digits.iter().position(|b| *b != 0) else {
            return &[0];
        };
        if non_zero_position > 0 {
            // Keep one zero if the first significant byte has its sign bit set.
            let zeros_to_remove = if digits[non_zero_position] > 0x7f {
                non_zero_position - 1
            } else {
                non_zero_position
            };
            return &digits[zeros_to_remove..];
        }
        digits
    }
}

impl PartialEq for CqlVarint {
    fn eq(&self, other: &Self) -> bool {
        self.as_normalized_slice() == other.as_normalized_slice()
    }
}

impl std::hash::Hash for CqlVarint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_normalized_slice().hash(state)
    }
}

impl From<num_bigint_04::BigInt> for CqlVarint {
    fn from(value: num_bigint_04::BigInt) -> Self {
        Self(value.to_signed_bytes_be())
    }
}

impl From<CqlVarint> for num_bigint_04::BigInt {
    fn from(val: CqlVarint) -> Self {
        num_bigint_04::BigInt::from_signed_bytes_be(&val.0)
    }
}

impl TryFrom<CqlVarint> for i64 {
    type Error = ValueOverflow;

    fn try_from(value: CqlVarint) -> Result<Self, Self::Error> {
        let bytes = value.as_normalized_slice();
        if bytes.len() > 8 {
            return Err(ValueOverflow);
        }
        let fill = if bytes[0] & 0x80 != 0 { 0xff } else { 0x00 };
        let mut buf = [fill; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }
}

/// Native CQL `decimal` representation: an unscaled [`CqlVarint`] and a
/// 32-bit scale.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CqlDecimal {
    int_val: CqlVarint,
    scale: i32,
}

impl CqlDecimal {
    pub fn from_signed_be_bytes_and_exponent(bytes: Vec<u8>, scale: i32) -> Self {
        Self {
            int_val: CqlVarint::from_signed_bytes_be(bytes),
            scale,
        }
    }

    pub fn from_signed_be_bytes_slice_and_exponent(bytes: &[u8], scale: i32) -> Self {
        Self::from_signed_be_bytes_and_exponent(bytes.to_vec(), scale)
    }

    pub fn as_signed_be_bytes_slice_and_exponent(&self) -> (&[u8], i32) {
        (self.int_val.as_signed_bytes_be_slice(), self.scale)
    }
}

impl From<CqlDecimal> for bigdecimal_04::BigDecimal {
    fn from(value: CqlDecimal) -> Self {
        Self::from((
            bigdecimal_04::num_bigint::BigInt::from_signed_bytes_be(
                value.int_val.as_signed_bytes_be_slice(),
            ),
            value.scale as i64,
        ))
    }
}

impl TryFrom<bigdecimal_04::BigDecimal> for CqlDecimal {
    type Error = ValueOverflow;

    fn try_from(value: bigdecimal_04::BigDecimal) -> Result<Self, Self::Error> {
        let (bigint, scale) = value.into_bigint_and_exponent();
        Ok(Self::from_signed_be_bytes_and_exponent(
            bigint.to_signed_bytes_be(),
            scale.try_into().map_err(|_| ValueOverflow)?,
        ))
    }
}

/// Days since -5877641-06-23, i.e. 2^31 days before the unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CqlDate(pub u32);

/// Signed milliseconds since the unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CqlTimestamp(pub i64);

/// Nanoseconds since midnight.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CqlTime(pub i64);

const MAX_CQL_TIME_NANOS: i64 = 86_399_999_999_999;

fn unix_epoch_date() -> chrono_04::NaiveDate {
    chrono_04::DateTime::UNIX_EPOCH.date_naive()
}

impl From<chrono_04::NaiveDate> for CqlDate {
    fn from(value: chrono_04::NaiveDate) -> Self {
        // NaiveDate spans roughly +-2^18 years, well inside the u32 day range.
        let days = ((1i64 << 31) + value.signed_duration_since(unix_epoch_date()).num_days()) as u32;
        Self(days)
    }
}

impl TryFrom<CqlDate> for chrono_04::NaiveDate {
    type Error = ValueOverflow;

    fn try_from(value: CqlDate) -> Result<Self, Self::Error> {
        let days_since_unix_epoch = value.0 as i64 - (1 << 31);
        let duration = chrono_04::TimeDelta::try_days(days_since_unix_epoch).ok_or(ValueOverflow)?;
        unix_epoch_date()
            .checked_add_signed(duration)
            .ok_or(ValueOverflow)
    }
}

impl From<chrono_04::DateTime<chrono_04::Utc>> for CqlTimestamp {
    fn from(value: chrono_04::DateTime<chrono_04::Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl TryFrom<CqlTimestamp> for chrono_04::DateTime<chrono_04::Utc> {
    type Error = ValueOverflow;

    fn try_from(value: CqlTimestamp) -> Result<Self, Self::Error> {
        chrono_04::DateTime::from_timestamp_millis(value.0).ok_or(ValueOverflow)
    }
}

impl TryFrom<chrono_04::NaiveTime> for CqlTime {
    type Error = ValueOverflow;

    fn try_from(value: chrono_04::NaiveTime) -> Result<Self, Self::Error> {
        let nanos = value
            .signed_duration_since(chrono_04::NaiveTime::MIN)
            .num_nanoseconds()
            .ok_or(ValueOverflow)?;

        // Leap seconds do not fit in a CQL time.
        if nanos <= MAX_CQL_TIME_NANOS {
            Ok(Self(nanos))
        } else {
            Err(ValueOverflow)
        }
    }
}

impl TryFrom<CqlTime> for chrono_04::NaiveTime {
    type Error = ValueOverflow;

    fn try_from(value: CqlTime) -> Result<Self, Self::Error> {
        if !(0..=MAX_CQL_TIME_NANOS).contains(&value.0) {
            return Err(ValueOverflow);
        }
        let secs = (value.0 / 1_000_000_000) as u32;
        let nanos = (value.0 % 1_000_000_000) as u32;
        chrono_04::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).ok_or(ValueOverflow)
    }
}

/// Represents a CQL Duration value
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct CqlDuration {
    pub months: i32,
    pub days: i32,
    pub nanoseconds: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CqlValue {
    Ascii(String),
    Boolean(bool),
    Blob(Vec<u8>),
    Counter(Counter),
    Decimal(CqlDecimal),
    Date(CqlDate),
    Double(f64),
    Duration(CqlDuration),
    /// Zero-length cell of a non-string type.
    Empty,
    Float(f32),
    Int(i32),
    BigInt(i64),
    Text(String),
    Timestamp(CqlTimestamp),
    Inet(IpAddr),
    List(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Set(Vec<CqlValue>),
    UserDefinedType {
        keyspace: String,
        type_name: String,
        /// Fields in the order of the type definition.
        fields: Vec<(String, Option<CqlValue>)>,
    },
    SmallInt(i16),
    TinyInt(i8),
    Time(CqlTime),
    Timeuuid(CqlTimeuuid),
    Tuple(Vec<Option<CqlValue>>),
    Uuid(Uuid),
    Varint(CqlVarint),
}

impl CqlValue {
    pub fn as_ascii(&self) -> Option<&String> {
        match self {
            Self::Ascii(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&String> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            Self::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_smallint(&self) -> Option<i16> {
        match self {
            Self::SmallInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_tinyint(&self) -> Option<i8> {
        match self {
            Self::TinyInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_timeuuid(&self) -> Option<CqlTimeuuid> {
        match self {
            Self::Timeuuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Vec<u8>> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_inet(&self) -> Option<IpAddr> {
        match self {
            Self::Inet(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_cql_date(&self) -> Option<CqlDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_cql_timestamp(&self) -> Option<CqlTimestamp> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_cql_time(&self) -> Option<CqlTime> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_cql_duration(&self) -> Option<CqlDuration> {
        match self {
            Self::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<Counter> {
        match self {
            Self::Counter(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<CqlValue>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Vec<CqlValue>> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Vec<(CqlValue, CqlValue)>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Ascii(s) | Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_blob(self) -> Option<Vec<u8>> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Elements of a list or a set.
    pub fn into_vec(self) -> Option<Vec<CqlValue>> {
        match self {
            Self::List(v) | Self::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_pair_vec(self) -> Option<Vec<(CqlValue, CqlValue)>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn varint_equality_ignores_sign_extension() {
        assert_eq!(
            CqlVarint::from_signed_bytes_be(vec![0x00, 0x01]),
            CqlVarint::from_signed_bytes_be(vec![0x01])
        );
        assert_eq!(
            CqlVarint::from_signed_bytes_be(vec![0x00, 0x80]),
            CqlVarint::from_signed_bytes_be(vec![0x00, 0x00, 0x80])
        );
        assert_ne!(
            CqlVarint::from_signed_bytes_be(vec![0x80]),
            CqlVarint::from_signed_bytes_be(vec![0x00, 0x80])
        );
        assert_eq!(
            CqlVarint::from_signed_bytes_be(vec![]),
            CqlVarint::from_signed_bytes_be(vec![0x00, 0x00])
        );
    }

    #[test]
    fn varint_to_i64_reports_overflow() {
        let small = CqlVarint::from_signed_bytes_be(vec![0xff, 0x85]);
        assert_eq!(i64::try_from(small), Ok(-123));

        let max = CqlVarint::from(num_bigint_04::BigInt::from(i64::MAX));
        assert_eq!(i64::try_from(max), Ok(i64::MAX));

        let too_big = CqlVarint::from(num_bigint_04::BigInt::from(i64::MAX) + 1);
        assert_eq!(i64::try_from(too_big), Err(ValueOverflow));
    }

    #[test]
    fn decimal_bigdecimal_conversion() {
        let decimal = bigdecimal_04::BigDecimal::from_str("-1234.5678").unwrap();
        let cql = CqlDecimal::try_from(decimal.clone()).unwrap();
        assert_eq!(cql.as_signed_be_bytes_slice_and_exponent().1, 4);
        assert_eq!(bigdecimal_04::BigDecimal::from(cql), decimal);
    }

    #[test]
    fn date_conversions() {
        let epoch = unix_epoch_date();
        assert_eq!(CqlDate::from(epoch), CqlDate(1 << 31));
        assert_eq!(
            chrono_04::NaiveDate::try_from(CqlDate((1 << 31) + 1)),
            chrono_04::NaiveDate::from_ymd_opt(1970, 1, 2).ok_or(ValueOverflow)
        );
        // Outside of chrono's representable range.
        assert_eq!(
            chrono_04::NaiveDate::try_from(CqlDate(0)),
            Err(ValueOverflow)
        );
    }

    #[test]
    fn time_conversions() {
        let noon = chrono_04::NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let cql = CqlTime::try_from(noon).unwrap();
        assert_eq!(cql, CqlTime(12 * 3600 * 1_000_000_000));
        assert_eq!(chrono_04::NaiveTime::try_from(cql), Ok(noon));
        assert_eq!(chrono_04::NaiveTime::try_from(CqlTime(-1)), Err(ValueOverflow));
        assert_eq!(
            chrono_04::NaiveTime::try_from(CqlTime(MAX_CQL_TIME_NANOS + 1)),
            Err(ValueOverflow)
        );

        let leap = chrono_04::NaiveTime::from_hms_nano_opt(23, 59, 59, 1_500_000_000).unwrap();
        assert_eq!(CqlTime::try_from(leap), Err(ValueOverflow));
    }

    #[test]
    fn timestamp_conversions() {
        let ts = CqlTimestamp(1_700_000_000_123);
        let dt: chrono_04::DateTime<chrono_04::Utc> = ts.try_into().unwrap();
        assert_eq!(CqlTimestamp::from(dt), ts);
        assert_eq!(
            chrono_04::DateTime::<chrono_04::Utc>::try_from(CqlTimestamp(i64::MAX)),
            Err(ValueOverflow)
        );
    }

    #[test]
    fn timeuuid_ordering_uses_timestamp_first() {
        // Same node bits, timestamps differ only in time_hi.
        let earlier = CqlTimeuuid::from_str("ffffffff-ffff-1000-8000-000000000000").unwrap();
        let later = CqlTimeuuid::from_str("00000000-0000-1001-8000-000000000000").unwrap();
        assert!(earlier < later);

        // Signed comparison of the clock sequence / node part.
        let low = CqlTimeuuid::from_str("00000000-0000-1000-8000-000000000000").unwrap();
        let high = CqlTimeuuid::from_str("00000000-0000-1000-7f00-000000000000").unwrap();
        assert!(low < high);
    }
}
