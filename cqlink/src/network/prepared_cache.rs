//! Statements prepared on one connection, keyed by their CQL text and the
//! keyspace they were prepared in.

use std::future::Future;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::trace;

use super::VerifiedKeyspaceName;
use crate::errors::QueryError;
use crate::statement::PreparedStatement;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PreparedKey {
    keyspace: Option<String>,
    statement: String,
}

impl PreparedKey {
    fn new(keyspace: Option<&VerifiedKeyspaceName>, statement: &str) -> Self {
        // Case insensitive names are folded the way the server folds them.
        let keyspace = keyspace.map(|ks| match ks.is_case_sensitive() {
            true => ks.as_str().to_owned(),
            false => ks.as_str().to_ascii_lowercase(),
        });
        PreparedKey {
            keyspace,
            statement: statement.to_owned(),
        }
    }
}

pub(crate) struct PreparedCache {
    statements: DashMap<PreparedKey, PreparedStatement>,
    // Held while a PREPARE is in flight, so each statement is prepared once.
    preparing: Mutex<()>,
}

impl PreparedCache {
    pub(crate) fn new() -> Self {
        PreparedCache {
            statements: DashMap::new(),
            preparing: Mutex::new(()),
        }
    }

    pub(crate) fn get(
        &self,
        keyspace: Option<&VerifiedKeyspaceName>,
        statement: &str,
    ) -> Option<PreparedStatement> {
        self.statements
            .get(&PreparedKey::new(keyspace, statement))
            .map(|prepared| prepared.clone())
    }

    pub(crate) fn insert(
        &self,
        keyspace: Option<&VerifiedKeyspaceName>,
        prepared: PreparedStatement,
    ) {
        let key = PreparedKey::new(keyspace, prepared.get_statement());
        self.statements.insert(key, prepared);
    }

    /// Returns the cached statement, or runs `prepare` and caches its result.
    /// Concurrent callers wait for the preparation in flight instead of
    /// preparing the statement again.
    pub(crate) async fn get_or_prepare<F, Fut>(
        &self,
        keyspace: Option<&VerifiedKeyspaceName>,
        statement: &str,
        prepare: F,
    ) -> Result<PreparedStatement, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PreparedStatement, QueryError>>,
    {
        if let Some(prepared) = self.get(keyspace, statement) {
            return Ok(prepared);
        }

        let _preparing = self.preparing.lock().await;
        if let Some(prepared) = self.get(keyspace, statement) {
            return Ok(prepared);
        }
        trace!(statement, "Preparing statement on connection");
        let prepared = prepare().await?;
        self.insert(keyspace, prepared.clone());
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;
    use cqlink_cql::frame::response::result::{PreparedMetadata, ResultMetadata};

    fn prepared(statement: &str) -> PreparedStatement {
        PreparedStatement::new(
            Bytes::from_static(b"id"),
            PreparedMetadata {
                flags: 0,
                col_count: 0,
                pk_indexes: Vec::new(),
                col_specs: Vec::new(),
            },
            None,
            Arc::new(ResultMetadata::mock_empty()),
            statement.to_owned(),
            None,
            Default::default(),
        )
    }

    fn ks(name: &str, case_sensitive: bool) -> VerifiedKeyspaceName {
        VerifiedKeyspaceName::new(name.to_owned(), case_sensitive).unwrap()
    }

    #[test]
    fn keyed_by_keyspace_and_text() {
        let cache = PreparedCache::new();
        cache.insert(Some(&ks("Ks", false)), prepared("SELECT * FROM t"));

        assert!(cache.get(Some(&ks("ks", false)), "SELECT * FROM t").is_some());
        assert!(cache.get(Some(&ks("ks", true)), "SELECT * FROM t").is_some());
        assert!(cache.get(Some(&ks("Ks", true)), "SELECT * FROM t").is_none());
        assert!(cache.get(None, "SELECT * FROM t").is_none());
        assert!(cache.get(Some(&ks("ks", false)), "SELECT a FROM t").is_none());
    }

    #[tokio::test]
    async fn concurrent_callers_prepare_once() {
        let cache = PreparedCache::new();
        let preparations = AtomicUsize::new(0);
        let counter = &preparations;
        let prepare = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(prepared("SELECT * FROM t"))
        };

        let (a, b) = tokio::join!(
            cache.get_or_prepare(None, "SELECT * FROM t", prepare),
            cache.get_or_prepare(None, "SELECT * FROM t", prepare),
        );
        assert_eq!(a.unwrap().get_id(), b.unwrap().get_id());
        assert_eq!(preparations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reprepared_statement_replaces_the_cached_one() {
        let cache = PreparedCache::new();
        let mut first = prepared("SELECT * FROM t");
        first.set_page_size(10);
        cache.insert(Some(&ks("ks", false)), first);
        cache.insert(Some(&ks("ks", false)), prepared("SELECT * FROM t"));

        let cached = cache.get(Some(&ks("ks", false)), "SELECT * FROM t").unwrap();
        assert_ne!(cached.get_page_size(), Some(10));
        assert_eq!(cache.statements.len(), 1);
    }

    #[tokio::test]
    async fn failed_preparation_is_not_cached() {
        let cache = PreparedCache::new();
        let res = cache
            .get_or_prepare(None, "SELECT * FROM t", || async {
                Err(QueryError::UnableToAllocStreamId)
            })
            .await;
        assert!(res.is_err());
        assert!(cache.get(None, "SELECT * FROM t").is_none());
    }
}
