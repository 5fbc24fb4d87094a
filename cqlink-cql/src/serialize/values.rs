//! The `[value]` list sent along a statement.

use bytes::BufMut;

use super::value::{natural_type, serialize_cql_value, write_length_prefixed};
use super::SerializationError;
use crate::frame::frame_errors::LowLevelDeserializationError;
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::response::result::ColumnType;
use crate::frame::types::{self, RawValue};
use crate::value::CqlValue;

/// Values bound to a statement, serialized into the format they take in
/// the request frame.
///
/// Values are appended one by one; a value that fails to serialize leaves
/// the list as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SerializedValues {
    serialized_values: Vec<u8>,
    element_count: u16,
}

impl SerializedValues {
    /// Constructs a new, empty `SerializedValues`.
    pub const fn new() -> Self {
        SerializedValues {
            serialized_values: Vec::new(),
            element_count: 0,
        }
    }

    /// A const empty instance, useful for taking references
    pub const EMPTY: &'static SerializedValues = &SerializedValues::new();

    /// Serializes a value for a column of type `typ`, `None` being null.
    pub fn add_typed(
        &mut self,
        value: Option<&CqlValue>,
        typ: &ColumnType,
        version: ProtocolVersion,
    ) -> Result<(), SerializationError> {
        self.ensure_room()?;
        let len_before_serialize = self.serialized_values.len();
        let res = match value {
            Some(value) => write_length_prefixed(typ, false, &mut self.serialized_values, |buf| {
                serialize_cql_value(value, typ, version, buf)
            }),
            None => {
                types::write_int(-1, &mut self.serialized_values);
                Ok(())
            }
        };
        match res {
            Ok(()) => {
                self.element_count += 1;
                Ok(())
            }
            Err(e) => {
                self.serialized_values.truncate(len_before_serialize);
                Err(e)
            }
        }
    }

    /// Serializes a value with the type it naturally maps to, for statements
    /// whose column types are unknown.
    pub fn add_untyped(
        &mut self,
        value: Option<&CqlValue>,
        version: ProtocolVersion,
    ) -> Result<(), SerializationError> {
        match value {
            Some(value) => self.add_typed(Some(value), &natural_type(value), version),
            None => self.add_typed(None, &ColumnType::Blob, version),
        }
    }

    /// Appends an unset value, which leaves the bound column untouched.
    pub fn add_unset(&mut self, version: ProtocolVersion) -> Result<(), SerializationError> {
        if version < ProtocolVersion::V4 {
            return Err(SerializationError::UnsetNotSupported(version));
        }
        self.ensure_room()?;
        types::write_int(-2, &mut self.serialized_values);
        self.element_count += 1;
        Ok(())
    }

    /// Returns `true` if no value was added.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }

    /// Returns an iterator over the values serialized into the object so far.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = RawValue<'_>> {
        SerializedValuesIterator {
            serialized_values: &self.serialized_values,
        }
    }

    /// Returns the number of values written so far.
    #[inline]
    pub fn element_count(&self) -> u16 {
        self.element_count
    }

    /// Returns the total serialized size of the values written so far.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.serialized_values.len()
    }

    pub(crate) fn write_to_request(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.element_count);
        buf.put(self.serialized_values.as_slice())
    }

    /// Reads a value list from a request frame, as done by the mock node
    /// used in tests.
    pub(crate) fn new_from_frame(buf: &mut &[u8]) -> Result<Self, LowLevelDeserializationError> {
        let values_num = types::read_short(buf)?;
        let values_beg = *buf;
        for _ in 0..values_num {
            let _serialized = types::read_value(buf)?;
        }

        let values_len_in_buf = values_beg.len() - buf.len();
        let values_in_frame = &values_beg[0..values_len_in_buf];
        Ok(SerializedValues {
            serialized_values: values_in_frame.to_vec(),
            element_count: values_num,
        })
    }

    fn ensure_room(&self) -> Result<(), SerializationError> {
        if self.element_count == u16::MAX {
            Err(SerializationError::TooManyValues)
        } else {
            Ok(())
        }
    }
}

impl Default for SerializedValues {
    fn default() -> Self {
        Self::new()
    }
}

/// An iterator over raw values in some [`SerializedValues`].
#[derive(Clone, Copy)]
pub struct SerializedValuesIterator<'a> {
    serialized_values: &'a [u8],
}

impl<'a> Iterator for SerializedValuesIterator<'a> {
    type Item = RawValue<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.serialized_values.is_empty() {
            return None;
        }

        // Values are only ever appended whole, so this cannot fail.
        types::read_value(&mut self.serialized_values).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::SerializationErrorKind;
    use assert_matches::assert_matches;

    #[test]
    fn null_unset_and_values() {
        let mut values = SerializedValues::new();
        values
            .add_typed(Some(&CqlValue::Int(7)), &ColumnType::Int, ProtocolVersion::V4)
            .unwrap();
        values
            .add_typed(None, &ColumnType::Text, ProtocolVersion::V4)
            .unwrap();
        values.add_unset(ProtocolVersion::V4).unwrap();

        assert_eq!(values.element_count(), 3);
        assert_eq!(
            values.iter().collect::<Vec<_>>(),
            vec![
                RawValue::Value(&[0, 0, 0, 7]),
                RawValue::Null,
                RawValue::Unset
            ]
        );

        let mut frame = Vec::new();
        values.write_to_request(&mut frame);
        assert_eq!(&frame[..2], &[0, 3]);
        assert_eq!(
            SerializedValues::new_from_frame(&mut &frame[..]).unwrap(),
            values
        );
    }

    #[test]
    fn failed_value_leaves_list_untouched() {
        let mut values = SerializedValues::new();
        values
            .add_untyped(Some(&CqlValue::Text("a".into())), ProtocolVersion::V4)
            .unwrap();
        let before = values.clone();

        let bad_list = CqlValue::List(vec![CqlValue::Int(1), CqlValue::Text("x".into())]);
        assert_matches!(
            values.add_typed(
                Some(&bad_list),
                &ColumnType::List(Box::new(ColumnType::Int)),
                ProtocolVersion::V4
            ),
            Err(SerializationError::Value {
                kind: SerializationErrorKind::MismatchedType { value: "text" },
                ..
            })
        );
        assert_eq!(values, before);
    }

    #[test]
    fn unset_needs_v4() {
        assert_matches!(
            SerializedValues::new().add_unset(ProtocolVersion::V3),
            Err(SerializationError::UnsetNotSupported(ProtocolVersion::V3))
        );
    }
}
