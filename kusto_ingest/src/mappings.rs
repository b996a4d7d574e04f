//! A time-bounded cache of the ingestion mappings defined on the server
//!
//! Used to reject a reference to a mapping that does not exist before any data is sent. The
//! cache is refreshed wholesale: it is either fresh, and trusted even on a miss, or it is
//! rebuilt from the server on the next lookup.
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use iox_time::{Time, TimeProvider};
use kusto_client::{Client, MappingEntry};
use observability_deps::tracing::debug;
use tokio::sync::Mutex;

use crate::{
    deadline::bounded,
    error::{Error, ErrorKind, Op, Result},
};

/// How long a refreshed list of mappings is trusted
pub const MAPPING_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Lists the ingestion mappings defined on a database
#[async_trait]
pub trait MappingSource: Debug + Send + Sync + 'static {
    async fn list_mappings(&self, database: &str) -> Result<Vec<MappingEntry>>;
}

#[async_trait]
impl MappingSource for Client {
    async fn list_mappings(&self, database: &str) -> Result<Vec<MappingEntry>> {
        self.show_ingestion_mappings(database)
            .await
            .map_err(|e| Error::from_client(Op::MappingLookup, e))
    }
}

#[derive(Debug, Default)]
struct CacheState {
    mappings: HashMap<String, MappingEntry>,
    refreshed_at: Option<Time>,
}

impl CacheState {
    fn is_fresh(&self, now: Time) -> bool {
        let Some(refreshed_at) = self.refreshed_at else {
            return false;
        };
        // a refresh stamped after `now` is as fresh as it gets
        now.checked_duration_since(refreshed_at)
            .is_none_or(|age| age < MAPPING_CACHE_TTL)
    }
}

#[derive(Debug)]
pub struct MappingCache {
    database: String,
    source: Arc<dyn MappingSource>,
    time_provider: Arc<dyn TimeProvider>,
    request_timeout: Option<Duration>,
    /// Held for the whole lookup, including a refresh from the server
    state: Mutex<CacheState>,
}

impl MappingCache {
    pub fn new(
        database: impl Into<String>,
        source: Arc<dyn MappingSource>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            database: database.into(),
            source,
            time_provider,
            request_timeout: None,
            state: Default::default(),
        }
    }

    /// Bound the refresh query by `timeout`
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Succeed if `reference` names a mapping defined on the server
    ///
    /// An empty reference is always known. A fresh cache answers without asking the server; a
    /// stale one is refreshed first.
    pub async fn ensure_known(&self, reference: &str) -> Result<()> {
        if reference.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        if !state.is_fresh(self.time_provider.now()) {
            let mappings = bounded(
                self.request_timeout,
                Op::MappingLookup,
                self.source.list_mappings(&self.database),
            )
            .await?;
            debug!(
                database = %self.database,
                n_mappings = mappings.len(),
                "refreshed ingestion mapping cache"
            );
            state.mappings = mappings
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect();
            state.refreshed_at = Some(self.time_provider.now());
        }

        if state.mappings.contains_key(reference) {
            Ok(())
        } else {
            debug!(database = %self.database, reference, "ingestion mapping not found");
            Err(Error::new(
                Op::MappingLookup,
                ErrorKind::MappingNotFound(reference.to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use iox_time::{MockProvider, Time, TimeProvider};
    use kusto_client::{Client, MappingEntry};
    use mockito::{Matcher, Server};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::{MAPPING_CACHE_TTL, MappingCache, MappingSource};
    use crate::error::{ErrorKind, Op, Result};

    #[derive(Debug, Default)]
    struct FakeSource {
        mappings: Mutex<Vec<MappingEntry>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn with(names: &[&str]) -> Arc<Self> {
            let source = Self::default();
            source.set(names);
            Arc::new(source)
        }

        fn set(&self, names: &[&str]) {
            *self.mappings.lock() = names
                .iter()
                .map(|name| MappingEntry::new(*name, "Json"))
                .collect();
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MappingSource for FakeSource {
        async fn list_mappings(&self, database: &str) -> Result<Vec<MappingEntry>> {
            assert_eq!(database, "db");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.mappings.lock().clone())
        }
    }

    fn cache(source: &Arc<FakeSource>) -> (MappingCache, Arc<MockProvider>) {
        let time = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
        let source: Arc<dyn MappingSource> = Arc::<FakeSource>::clone(source);
        let time_provider: Arc<dyn TimeProvider> = Arc::<MockProvider>::clone(&time);
        let cache = MappingCache::new("db", source, time_provider);
        (cache, time)
    }

    #[tokio::test]
    async fn empty_reference_never_queries() {
        let source = FakeSource::with(&[]);
        let (cache, _) = cache(&source);
        cache.ensure_known("").await.unwrap();
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn fresh_cache_is_trusted() {
        let source = FakeSource::with(&["a"]);
        let (cache, time) = cache(&source);

        cache.ensure_known("a").await.unwrap();
        assert_eq!(source.calls(), 1);

        // added on the server, but the cache is still fresh
        source.set(&["a", "b"]);
        time.inc(MAPPING_CACHE_TTL - Duration::from_secs(1));
        cache.ensure_known("a").await.unwrap();
        let err = cache.ensure_known("b").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MappingNotFound(r) if r == "b"));
        assert_eq!(err.op(), Op::MappingLookup);
        assert!(!err.is_retryable());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn expiry_triggers_exactly_one_refresh() {
        let source = FakeSource::with(&["a"]);
        let (cache, time) = cache(&source);

        cache.ensure_known("a").await.unwrap();
        cache.ensure_known("missing").await.unwrap_err();
        assert_eq!(source.calls(), 1);

        source.set(&["a", "b"]);
        time.inc(MAPPING_CACHE_TTL);
        cache.ensure_known("b").await.unwrap();
        cache.ensure_known("a").await.unwrap();
        cache.ensure_known("missing").await.unwrap_err();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn stale_miss_refreshes_then_fails() {
        let source = FakeSource::with(&[]);
        let (cache, _) = cache(&source);
        let err = cache.ensure_known("myRef").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MappingNotFound(_)));
        assert_eq!(source.calls(), 1);
        // the refresh counts even though it came up empty
        cache.ensure_known("myRef").await.unwrap_err();
        assert_eq!(source.calls(), 1);
    }

    #[derive(Debug)]
    struct HangingSource;

    #[async_trait]
    impl MappingSource for HangingSource {
        async fn list_mappings(&self, _database: &str) -> Result<Vec<MappingEntry>> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn refresh_is_bounded_by_timeout() {
        let cache = MappingCache::new(
            "db",
            Arc::new(HangingSource),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
        )
        .with_request_timeout(Some(Duration::from_millis(10)));
        let err = cache.ensure_known("a").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_lists_mappings() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/rest/mgmt")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "db": "db",
                "csl": ".show ingestion mappings",
            })))
            .with_status(200)
            .with_body(
                r#"{"Tables": [{
                    "TableName": "Table_0",
                    "Columns": [
                        {"ColumnName": "Name", "DataType": "String"},
                        {"ColumnName": "Kind", "DataType": "String"},
                        {"ColumnName": "Mapping", "DataType": "String"}
                    ],
                    "Rows": [["events_json", "Json", "[]"]]
                }]}"#,
            )
            .create_async()
            .await;

        let client = Client::new(server.url()).unwrap();
        let mappings = client.list_mappings("db").await.unwrap();
        mock.assert_async().await;
        assert_eq!(mappings, vec![MappingEntry::new("events_json", "Json")]);
    }

    #[tokio::test]
    async fn client_error_keeps_retryability() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/rest/mgmt")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let client = Client::new(server.url()).unwrap();
        let err = client.list_mappings("db").await.unwrap_err();
        mock.assert_async().await;
        assert_eq!(err.op(), Op::MappingLookup);
        assert!(matches!(err.kind(), ErrorKind::Remote(_)));
        assert!(err.is_retryable());
    }
}
