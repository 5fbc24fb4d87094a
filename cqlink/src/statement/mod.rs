//! Statements executed on a connection: unprepared, prepared and batches.

use std::time::Duration;

use crate::errors::BadKeyspaceName;
use crate::network::VerifiedKeyspaceName;

pub mod batch;
pub mod prepared;
pub mod unprepared;

pub use batch::{Batch, BatchStatement, BatchType};
pub use cqlink_cql::frame::types::{Consistency, SerialConsistency};
pub use prepared::PreparedStatement;
pub use unprepared::Statement;

#[derive(Debug, Clone, Default)]
pub(crate) struct StatementConfig {
    pub(crate) consistency: Option<Consistency>,
    pub(crate) serial_consistency: Option<Option<SerialConsistency>>,

    pub(crate) tracing: bool,
    pub(crate) timestamp: Option<i64>,
    pub(crate) request_timeout: Option<Duration>,

    // The connection switches to it before sending the statement.
    pub(crate) keyspace: Option<VerifiedKeyspaceName>,
}

impl StatementConfig {
    /// Determines the consistency of a query
    #[must_use]
    pub(crate) fn determine_consistency(&self, default_consistency: Consistency) -> Consistency {
        self.consistency.unwrap_or(default_consistency)
    }

    #[must_use]
    pub(crate) fn determine_serial_consistency(
        &self,
        default_serial_consistency: Option<SerialConsistency>,
    ) -> Option<SerialConsistency> {
        self.serial_consistency
            .unwrap_or(default_serial_consistency)
    }

    /// The statement timeout, or the connection default if unset.
    #[must_use]
    pub(crate) fn determine_request_timeout(
        &self,
        default_timeout: Option<Duration>,
    ) -> Option<Duration> {
        self.request_timeout.or(default_timeout)
    }

    pub(crate) fn set_keyspace(
        &mut self,
        keyspace_name: Option<String>,
        case_sensitive: bool,
    ) -> Result<(), BadKeyspaceName> {
        self.keyspace = keyspace_name
            .map(|name| VerifiedKeyspaceName::new(name, case_sensitive))
            .transpose()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_settings_override_connection_defaults() {
        let mut config = StatementConfig::default();
        assert_eq!(config.determine_consistency(Consistency::Quorum), Consistency::Quorum);
        assert_eq!(
            config.determine_serial_consistency(Some(SerialConsistency::LocalSerial)),
            Some(SerialConsistency::LocalSerial)
        );
        assert_eq!(
            config.determine_request_timeout(Some(Duration::from_secs(1))),
            Some(Duration::from_secs(1))
        );

        config.consistency = Some(Consistency::One);
        config.serial_consistency = Some(None);
        config.request_timeout = Some(Duration::from_millis(10));
        assert_eq!(config.determine_consistency(Consistency::Quorum), Consistency::One);
        assert_eq!(
            config.determine_serial_consistency(Some(SerialConsistency::LocalSerial)),
            None
        );
        assert_eq!(
            config.determine_request_timeout(Some(Duration::from_secs(1))),
            Some(Duration::from_millis(10))
        );
    }

    #[test]
    fn keyspace_is_validated() {
        let mut config = StatementConfig::default();
        assert!(config.set_keyspace(Some("bad-name".to_owned()), false).is_err());
        assert!(config.keyspace.is_none());
        config.set_keyspace(Some("ks".to_owned()), false).unwrap();
        assert_eq!(config.keyspace.as_ref().unwrap().as_str(), "ks");
        config.set_keyspace(None, false).unwrap();
        assert!(config.keyspace.is_none());
    }
}
