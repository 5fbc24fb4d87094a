//! Conversions of decoded [`CqlValue`]s and [`Row`]s into Rust types.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::net::IpAddr;

use thiserror::Error;
use uuid::Uuid;

use crate::deserialize::row::{Row, RowAccessError};
use crate::value::{
    Counter, CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlTimeuuid, CqlValue,
    CqlVarint, ValueOverflow,
};

#[derive(Error, Debug, Clone)]
pub enum FromRowError {
    #[error("{err} in the column with index {column}")]
    BadCqlVal { err: FromCqlValError, column: usize },
    #[error("Wrong row size: expected {expected}, actual {actual}")]
    WrongRowSize { expected: usize, actual: usize },
    #[error(transparent)]
    Access(#[from] RowAccessError),
}

/// This trait defines a way to convert CqlValue or Option<CqlValue> into some rust type
// We can't use From trait because impl From<Option<CqlValue>> for String {...}
// is forbidden since neither From nor String are defined in this crate
pub trait FromCqlVal<T>: Sized {
    fn from_cql(cql_val: T) -> Result<Self, FromCqlValError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FromCqlValError {
    #[error("Bad CQL type")]
    BadCqlType,
    #[error("Value is null")]
    ValIsNull,
    #[error(transparent)]
    ValueOverflow(#[from] ValueOverflow),
}

/// This trait defines a way to convert CQL Row into some rust type
pub trait FromRow: Sized {
    fn from_row(row: Row) -> Result<Self, FromRowError>;
}

impl FromCqlVal<CqlValue> for CqlValue {
    fn from_cql(cql_val: CqlValue) -> Result<CqlValue, FromCqlValError> {
        Ok(cql_val)
    }
}

// A null is an error for every type that has from_cql<CqlValue>...
impl<T: FromCqlVal<CqlValue>> FromCqlVal<Option<CqlValue>> for T {
    fn from_cql(cql_val_opt: Option<CqlValue>) -> Result<Self, FromCqlValError> {
        T::from_cql(cql_val_opt.ok_or(FromCqlValError::ValIsNull)?)
    }
}

// ...except for Option<T>, where both null and empty map to None.
impl<T: FromCqlVal<CqlValue>> FromCqlVal<Option<CqlValue>> for Option<T> {
    fn from_cql(cql_val_opt: Option<CqlValue>) -> Result<Self, FromCqlValError> {
        match cql_val_opt {
            Some(CqlValue::Empty) | None => Ok(None),
            Some(cql_val) => Ok(Some(T::from_cql(cql_val)?)),
        }
    }
}

/// Implements FromCqlVal for a type, given a method of CqlValue returning `Option<T>`.
/// A `None` becomes [`FromCqlValError::BadCqlType`].
macro_rules! impl_from_cql_value_from_method {
    ($T:ty, $convert_func:ident) => {
        impl FromCqlVal<CqlValue> for $T {
            fn from_cql(cql_val: CqlValue) -> Result<$T, FromCqlValError> {
                cql_val
                    .$convert_func()
                    .ok_or(FromCqlValError::BadCqlType)
            }
        }
    };
}

impl_from_cql_value_from_method!(i32, as_int);
impl_from_cql_value_from_method!(i64, as_bigint);
impl_from_cql_value_from_method!(Counter, as_counter);
impl_from_cql_value_from_method!(i16, as_smallint);
impl_from_cql_value_from_method!(i8, as_tinyint);
impl_from_cql_value_from_method!(f32, as_float);
impl_from_cql_value_from_method!(f64, as_double);
impl_from_cql_value_from_method!(bool, as_boolean);
impl_from_cql_value_from_method!(String, into_string);
impl_from_cql_value_from_method!(Vec<u8>, into_blob);
impl_from_cql_value_from_method!(IpAddr, as_inet);
impl_from_cql_value_from_method!(Uuid, as_uuid);
impl_from_cql_value_from_method!(CqlTimeuuid, as_timeuuid);
impl_from_cql_value_from_method!(CqlDate, as_cql_date);
impl_from_cql_value_from_method!(CqlTime, as_cql_time);
impl_from_cql_value_from_method!(CqlTimestamp, as_cql_timestamp);
impl_from_cql_value_from_method!(CqlDuration, as_cql_duration);

impl FromCqlVal<CqlValue> for CqlVarint {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        match cql_val {
            CqlValue::Varint(v) => Ok(v),
            _ => Err(FromCqlValError::BadCqlType),
        }
    }
}

impl FromCqlVal<CqlValue> for CqlDecimal {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        match cql_val {
            CqlValue::Decimal(d) => Ok(d),
            _ => Err(FromCqlValError::BadCqlType),
        }
    }
}

impl FromCqlVal<CqlValue> for num_bigint_04::BigInt {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        CqlVarint::from_cql(cql_val).map(Into::into)
    }
}

impl FromCqlVal<CqlValue> for bigdecimal_04::BigDecimal {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        CqlDecimal::from_cql(cql_val).map(Into::into)
    }
}

impl FromCqlVal<CqlValue> for chrono_04::NaiveDate {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        Ok(CqlDate::from_cql(cql_val)?.try_into()?)
    }
}

impl FromCqlVal<CqlValue> for chrono_04::NaiveTime {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        Ok(CqlTime::from_cql(cql_val)?.try_into()?)
    }
}

impl FromCqlVal<CqlValue> for chrono_04::DateTime<chrono_04::Utc> {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        Ok(CqlTimestamp::from_cql(cql_val)?.try_into()?)
    }
}

impl<T: FromCqlVal<CqlValue>> FromCqlVal<CqlValue> for Vec<T> {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        cql_val
            .into_vec()
            .ok_or(FromCqlValError::BadCqlType)?
            .into_iter()
            .map(T::from_cql)
            .collect()
    }
}

impl<T: FromCqlVal<CqlValue> + Eq + Hash> FromCqlVal<CqlValue> for HashSet<T> {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        cql_val
            .into_vec()
            .ok_or(FromCqlValError::BadCqlType)?
            .into_iter()
            .map(T::from_cql)
            .collect()
    }
}

impl<T: FromCqlVal<CqlValue> + Ord> FromCqlVal<CqlValue> for BTreeSet<T> {
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        cql_val
            .into_vec()
            .ok_or(FromCqlValError::BadCqlType)?
            .into_iter()
            .map(T::from_cql)
            .collect()
    }
}

impl<K: FromCqlVal<CqlValue> + Eq + Hash, V: FromCqlVal<CqlValue>> FromCqlVal<CqlValue>
    for HashMap<K, V>
{
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        cql_val
            .into_pair_vec()
            .ok_or(FromCqlValError::BadCqlType)?
            .into_iter()
            .map(|(k, v)| Ok::<_, FromCqlValError>((K::from_cql(k)?, V::from_cql(v)?)))
            .collect()
    }
}

impl<K: FromCqlVal<CqlValue> + Ord, V: FromCqlVal<CqlValue>> FromCqlVal<CqlValue>
    for BTreeMap<K, V>
{
    fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
        cql_val
            .into_pair_vec()
            .ok_or(FromCqlValError::BadCqlType)?
            .into_iter()
            .map(|(k, v)| Ok::<_, FromCqlValError>((K::from_cql(k)?, V::from_cql(v)?)))
            .collect()
    }
}

macro_rules! count_idents {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count_idents!($($tail)*) };
}

// FromRow for tuples of types that have FromCqlVal
macro_rules! impl_tuple_from_row {
    ( $($Ti:ident),+ ) => {
        impl<$($Ti),+> FromRow for ($($Ti,)+)
        where
            $($Ti: FromCqlVal<Option<CqlValue>>),+
        {
            fn from_row(row: Row) -> Result<Self, FromRowError> {
                let expected = count_idents!($($Ti)+);
                if expected != row.len() {
                    return Err(FromRowError::WrongRowSize {
                        expected,
                        actual: row.len(),
                    });
                }
                let mut cells = (0..expected).map(|column| (column, row.value(column)));
                Ok((
                    $(
                        {
                            let (column, value) = cells.next().ok_or(FromRowError::WrongRowSize {
                                expected,
                                actual: row.len(),
                            })?;
                            $Ti::from_cql(value?)
                                .map_err(|err| FromRowError::BadCqlVal { err, column })?
                        },
                    )+
                ))
            }
        }
    }
}

impl_tuple_from_row!(T1);
impl_tuple_from_row!(T1, T2);
impl_tuple_from_row!(T1, T2, T3);
impl_tuple_from_row!(T1, T2, T3, T4);
impl_tuple_from_row!(T1, T2, T3, T4, T5);
impl_tuple_from_row!(T1, T2, T3, T4, T5, T6);
impl_tuple_from_row!(T1, T2, T3, T4, T5, T6, T7);
impl_tuple_from_row!(T1, T2, T3, T4, T5, T6, T7, T8);

macro_rules! impl_tuple_from_cql {
    ( $($Ti:ident),+ ) => {
        impl<$($Ti),+> FromCqlVal<CqlValue> for ($($Ti,)+)
        where
            $($Ti: FromCqlVal<Option<CqlValue>>),+
        {
            fn from_cql(cql_val: CqlValue) -> Result<Self, FromCqlValError> {
                let CqlValue::Tuple(fields) = cql_val else {
                    return Err(FromCqlValError::BadCqlType);
                };
                let mut fields = fields.into_iter();
                Ok((
                    $(
                        $Ti::from_cql(fields.next().ok_or(FromCqlValError::BadCqlType)?)?,
                    )+
                ))
            }
        }
    }
}

impl_tuple_from_cql!(T1);
impl_tuple_from_cql!(T1, T2);
impl_tuple_from_cql!(T1, T2, T3);
impl_tuple_from_cql!(T1, T2, T3, T4);
impl_tuple_from_cql!(T1, T2, T3, T4, T5);
impl_tuple_from_cql!(T1, T2, T3, T4, T5, T6);
