//! Identifier lookup cache
//!
//! Barcode records change rarely, so hits are cached for a long time while
//! misses expire quickly (new products appear in lookup databases often).
//! Errors are never cached.

use super::{IdentifierLookup, IdentifierLookupResult, SourceError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Default lifetime of a positive lookup
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default lifetime of a not-found lookup
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(10 * 60);

struct CacheEntry {
    result: IdentifierLookupResult,
    stored_at: Instant,
}

/// TTL cache wrapped around any `IdentifierLookup`
pub struct CachedIdentifierLookup {
    inner: Arc<dyn IdentifierLookup>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl CachedIdentifierLookup {
    pub fn new(inner: Arc<dyn IdentifierLookup>) -> Self {
        Self::with_ttls(inner, DEFAULT_POSITIVE_TTL, DEFAULT_NEGATIVE_TTL)
    }

    pub fn with_ttls(
        inner: Arc<dyn IdentifierLookup>,
        positive_ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
            positive_ttl,
            negative_ttl,
        }
    }

    fn ttl_for(&self, result: &IdentifierLookupResult) -> Duration {
        if result.found {
            self.positive_ttl
        } else {
            self.negative_ttl
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.stored_at.elapsed() < self.ttl_for(&entry.result)
    }

    /// Number of cached entries
    ///
    /// Expired entries are dropped on the next read of their code or the
    /// next insert, so this may briefly include some.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl IdentifierLookup for CachedIdentifierLookup {
    async fn lookup(&self, code: &str) -> Result<IdentifierLookupResult, SourceError> {
        let key = code.trim().to_string();

        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&key) {
                if self.is_fresh(entry) {
                    debug!(code = %key, found = entry.result.found, "Identifier lookup cache hit");
                    return Ok(entry.result.clone());
                }
                entries.remove(&key);
            }
        }

        let result = self.inner.lookup(&key).await?;

        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry));
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "Expired identifier lookups evicted");
        }
        entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLookup {
        calls: AtomicUsize,
        found: bool,
    }

    #[async_trait]
    impl IdentifierLookup for CountingLookup {
        async fn lookup(&self, _code: &str) -> Result<IdentifierLookupResult, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.found {
                Ok(IdentifierLookupResult {
                    found: true,
                    brand: Some("Acme".to_string()),
                    ..Default::default()
                })
            } else {
                Ok(IdentifierLookupResult::not_found())
            }
        }
    }

    #[tokio::test]
    async fn test_positive_result_is_cached() {
        let inner = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
            found: true,
        });
        let cache = CachedIdentifierLookup::new(inner.clone());

        let first = cache.lookup("012345678905").await.unwrap();
        let second = cache.lookup(" 012345678905 ").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_negative_result_expires() {
        let inner = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
            found: false,
        });
        let cache =
            CachedIdentifierLookup::with_ttls(inner.clone(), DEFAULT_POSITIVE_TTL, Duration::ZERO);

        cache.lookup("000").await.unwrap();
        cache.lookup("000").await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted() {
        let inner = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
            found: true,
        });
        let cache = CachedIdentifierLookup::with_ttls(inner.clone(), Duration::ZERO, Duration::ZERO);

        for i in 0..100 {
            cache.lookup(&format!("{:012}", i)).await.unwrap();
        }

        // Each insert sweeps everything already expired
        assert_eq!(cache.len().await, 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 100);
    }
}
