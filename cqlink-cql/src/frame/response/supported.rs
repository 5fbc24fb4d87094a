//! CQL protocol-level representation of a `SUPPORTED` response.

use crate::frame::frame_errors::LowLevelDeserializationError;
use crate::frame::types;
use std::collections::HashMap;

/// The CQL protocol-level representation of an `SUPPORTED` response,
/// used to present the server's supported options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supported {
    /// A map of option names to their supported values.
    pub options: HashMap<String, Vec<String>>,
}

impl Supported {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, LowLevelDeserializationError> {
        let options = types::read_string_multimap(buf)?;
        Ok(Supported { options })
    }

    /// Whether the server offers `value` for the option `key`.
    pub fn offers(&self, key: &str, value: &str) -> bool {
        self.options
            .get(key)
            .is_some_and(|values| values.iter().any(|v| v == value))
    }
}
