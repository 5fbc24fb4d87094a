//! The keyspace a connection is bound to, and the gate serializing switches of it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::errors::{BadKeyspaceName, QueryError};

/// This type can only hold a valid keyspace name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VerifiedKeyspaceName {
    name: Arc<String>,
    is_case_sensitive: bool,
}

impl VerifiedKeyspaceName {
    /// Validates `keyspace_name`. A case sensitive name is quoted in `USE`.
    pub fn new(keyspace_name: String, case_sensitive: bool) -> Result<Self, BadKeyspaceName> {
        Self::verify_keyspace_name_is_valid(&keyspace_name)?;

        Ok(VerifiedKeyspaceName {
            name: Arc::new(keyspace_name),
            is_case_sensitive: case_sensitive,
        })
    }

    /// The name as given.
    pub fn as_str(&self) -> &str {
        self.name.as_str()
    }

    /// Whether the name was given as case sensitive.
    pub fn is_case_sensitive(&self) -> bool {
        self.is_case_sensitive
    }

    /// Whether both names refer to the same keyspace: case insensitive names
    /// are folded to lowercase by the server.
    pub fn refers_to_same_keyspace(&self, other: &VerifiedKeyspaceName) -> bool {
        match (self.is_case_sensitive, other.is_case_sensitive) {
            (false, false) => self.as_str().eq_ignore_ascii_case(other.as_str()),
            (true, true) => self.as_str() == other.as_str(),
            (true, false) => self.as_str() == other.as_str().to_ascii_lowercase(),
            (false, true) => self.as_str().to_ascii_lowercase() == other.as_str(),
        }
    }

    pub(crate) fn use_statement(&self) -> String {
        // Bound values are not accepted in USE.
        match self.is_case_sensitive {
            true => format!("USE \"{}\"", self.as_str()),
            false => format!("USE {}", self.as_str()),
        }
    }

    // Up to 48 alphanumeric characters or underscores. Servers also accept an
    // underscore as the first character, so we do too.
    fn verify_keyspace_name_is_valid(keyspace_name: &str) -> Result<(), BadKeyspaceName> {
        if keyspace_name.is_empty() {
            return Err(BadKeyspaceName::Empty);
        }

        // Only ascii allowed, so it's equal to .len()
        let keyspace_name_len: usize = keyspace_name.chars().count();
        if keyspace_name_len > 48 {
            return Err(BadKeyspaceName::TooLong(
                keyspace_name.to_string(),
                keyspace_name_len,
            ));
        }

        if let Some(character) = keyspace_name
            .chars()
            .find(|c| !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_'))
        {
            return Err(BadKeyspaceName::IllegalCharacter(
                keyspace_name.to_string(),
                character,
            ));
        }

        Ok(())
    }
}

/// Read-write gate over the current keyspace of a connection.
///
/// Every request holds a read guard for as long as it is in flight, so
/// requests bound to the same keyspace, and requests naming none, run
/// concurrently. Switching
/// takes the write side: it waits for the requests in flight, runs `USE`, and
/// downgrades to a read guard for the request that triggered it.
pub(crate) struct KeyspaceGate {
    current: RwLock<Option<VerifiedKeyspaceName>>,
}

pub(crate) type KeyspaceGuard<'a> = RwLockReadGuard<'a, Option<VerifiedKeyspaceName>>;

impl KeyspaceGate {
    pub(crate) fn new() -> Self {
        KeyspaceGate {
            current: RwLock::new(None),
        }
    }

    pub(crate) async fn current(&self) -> Option<VerifiedKeyspaceName> {
        self.current.read().await.clone()
    }

    /// Holds the connection in whatever keyspace it is bound to, for requests
    /// that name none. A switch waits until the guard is dropped.
    pub(crate) async fn hold(&self) -> KeyspaceGuard<'_> {
        self.current.read().await
    }

    /// Waits until the connection is bound to `keyspace`, running `switch` if
    /// it is not, and holds it there until the guard is dropped.
    pub(crate) async fn enter<F, Fut>(
        &self,
        keyspace: &VerifiedKeyspaceName,
        switch: F,
    ) -> Result<KeyspaceGuard<'_>, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), QueryError>>,
    {
        let read = self.current.read().await;
        if Self::is_bound_to(&read, keyspace) {
            return Ok(read);
        }
        drop(read);

        let mut write = self.current.write().await;
        // Someone else may have switched while we waited.
        if !Self::is_bound_to(&write, keyspace) {
            debug!(
                from = write.as_ref().map(VerifiedKeyspaceName::as_str),
                to = keyspace.as_str(),
                "Switching keyspace"
            );
            switch().await?;
            *write = Some(keyspace.clone());
        }
        Ok(write.downgrade())
    }

    /// Switches unconditionally, e.g. on an explicit `use_keyspace`.
    pub(crate) async fn switch<F, Fut>(
        &self,
        keyspace: &VerifiedKeyspaceName,
        switch: F,
    ) -> Result<(), QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), QueryError>>,
    {
        let mut write = self.current.write().await;
        switch().await?;
        *write = Some(keyspace.clone());
        Ok(())
    }

    fn is_bound_to(current: &Option<VerifiedKeyspaceName>, keyspace: &VerifiedKeyspaceName) -> bool {
        current
            .as_ref()
            .is_some_and(|current| current.refers_to_same_keyspace(keyspace))
    }
}
