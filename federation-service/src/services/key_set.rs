//! Process-wide cache of the provider's JSON Web Key Set.
//!
//! Readers always get a snapshot (`Arc<JwkSet>`); a refresh replaces the
//! snapshot atomically. While one task refreshes, others keep reading the
//! previous set. A failed refresh keeps serving the previous set if there is
//! one.
//!
//! Fetch attempts, successful or not, are spaced at least
//! [`KeySetCache::MIN_REFRESH_INTERVAL`] apart, so neither unknown key ids
//! nor an unreachable provider turn every request into a provider call.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::{Mutex, RwLock};

use super::FederationError;

/// Where key sets come from. Implemented by the provider client.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch_key_set(&self) -> Result<JwkSet, FederationError>;
}

/// Wall clock, injectable for tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;

    fn now_seconds(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }

    fn now_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.now_millis()).unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Clone)]
struct KeySetCacheEntry {
    keys: Arc<JwkSet>,
    fetched_at_millis: i64,
}

const NEVER_ATTEMPTED: i64 = i64::MIN;

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

pub struct KeySetCache {
    source: Arc<dyn KeySetSource>,
    clock: Arc<dyn Clock>,
    ttl_millis: i64,
    min_refresh_interval_millis: i64,
    current: RwLock<Option<KeySetCacheEntry>>,
    /// Start of the most recent fetch, whatever its outcome.
    last_attempt_millis: AtomicI64,
    refresh_gate: Mutex<()>,
}

impl KeySetCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
    pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new(source: Arc<dyn KeySetSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl_millis: duration_millis(ttl),
            min_refresh_interval_millis: duration_millis(Self::MIN_REFRESH_INTERVAL),
            current: RwLock::new(None),
            last_attempt_millis: AtomicI64::new(NEVER_ATTEMPTED),
            refresh_gate: Mutex::new(()),
        }
    }

    async fn snapshot(&self) -> Option<KeySetCacheEntry> {
        self.current.read().await.clone()
    }

    fn is_fresh(&self, entry: &KeySetCacheEntry) -> bool {
        self.clock.now_millis() - entry.fetched_at_millis < self.ttl_millis
    }

    fn attempted_recently(&self) -> bool {
        let last = self.last_attempt_millis.load(Ordering::Acquire);
        last != NEVER_ATTEMPTED
            && self.clock.now_millis().saturating_sub(last) < self.min_refresh_interval_millis
    }

    /// Current verification keys, fetching them when the cache is empty or
    /// older than the TTL.
    pub async fn get_verification_keys(&self) -> Result<Arc<JwkSet>, FederationError> {
        let cached = self.snapshot().await;
        if let Some(entry) = cached.as_ref().filter(|e| self.is_fresh(e)) {
            return Ok(entry.keys.clone());
        }

        let _gate = match self.refresh_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => match cached {
                // Someone else is refreshing: stale read instead of waiting.
                Some(entry) => return Ok(entry.keys),
                None => self.refresh_gate.lock().await,
            },
        };

        // Another task may have finished a refresh while we waited.
        let cached = self.snapshot().await;
        if let Some(entry) = cached.as_ref().filter(|e| self.is_fresh(e)) {
            return Ok(entry.keys.clone());
        }

        self.refresh_unless_recent(cached).await
    }

    /// Fetch a new key set regardless of age. Used when a token names a key
    /// id the cached set does not know. Within the minimum refresh interval
    /// of the previous attempt the cached set is returned unchanged.
    pub async fn force_refresh(&self) -> Result<Arc<JwkSet>, FederationError> {
        let _gate = self.refresh_gate.lock().await;
        let cached = self.snapshot().await;
        self.refresh_unless_recent(cached).await
    }

    async fn refresh_unless_recent(
        &self,
        cached: Option<KeySetCacheEntry>,
    ) -> Result<Arc<JwkSet>, FederationError> {
        if !self.attempted_recently() {
            return self.refresh(cached).await;
        }

        tracing::debug!("Key set fetched recently, not refreshing");
        match cached {
            Some(entry) => Ok(entry.keys),
            None => Err(FederationError::RemoteUnavailable(
                "verification keys unavailable, retry pending".to_string(),
            )),
        }
    }

    async fn refresh(
        &self,
        previous: Option<KeySetCacheEntry>,
    ) -> Result<Arc<JwkSet>, FederationError> {
        self.last_attempt_millis
            .store(self.clock.now_millis(), Ordering::Release);

        match self.source.fetch_key_set().await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                tracing::debug!(key_count = keys.keys.len(), "Verification key set refreshed");
                *self.current.write().await = Some(KeySetCacheEntry {
                    keys: keys.clone(),
                    fetched_at_millis: self.clock.now_millis(),
                });
                Ok(keys)
            }
            Err(e) => match previous {
                Some(entry) => {
                    tracing::warn!(error = %e, "Key set refresh failed, serving cached keys");
                    Ok(entry.keys)
                }
                None => {
                    tracing::warn!(error = %e, "Key set unavailable");
                    Err(FederationError::RemoteUnavailable(format!(
                        "verification keys unavailable: {}",
                        e
                    )))
                }
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{GatedKeySource, ManualClock, StaticKeySource};
    use super::*;

    fn key_set() -> JwkSet {
        serde_json::from_value(serde_json::json!({
            "keys": [{ "kty": "RSA", "kid": "k1", "use": "sig", "alg": "RS256", "n": "sXch", "e": "AQAB" }]
        }))
        .unwrap()
    }

    fn cache(source: Arc<StaticKeySource>, clock: Arc<ManualClock>) -> KeySetCache {
        KeySetCache::new(source, clock, KeySetCache::DEFAULT_TTL)
    }

    #[tokio::test]
    async fn test_first_call_fetches_then_serves_from_cache() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        let clock = Arc::new(ManualClock::at_seconds(1_000));
        let cache = cache(source.clone(), clock.clone());

        cache.get_verification_keys().await.unwrap();
        clock.advance_seconds(3_599);
        let keys = cache.get_verification_keys().await.unwrap();

        assert_eq!(keys.keys.len(), 1);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_refetches_after_ttl() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        let clock = Arc::new(ManualClock::at_seconds(1_000));
        let cache = cache(source.clone(), clock.clone());

        cache.get_verification_keys().await.unwrap();
        clock.advance_seconds(3_600);
        cache.get_verification_keys().await.unwrap();

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_keys() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        let clock = Arc::new(ManualClock::at_seconds(1_000));
        let cache = cache(source.clone(), clock.clone());

        cache.get_verification_keys().await.unwrap();
        source.set_failing(true);
        clock.advance_seconds(7_200);

        let keys = cache.get_verification_keys().await.unwrap();
        assert_eq!(keys.find("k1").map(|k| k.common.key_id.clone()), Some(Some("k1".to_string())));
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_without_cached_keys() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        source.set_failing(true);
        let cache = cache(source, Arc::new(ManualClock::at_seconds(1_000)));

        let result = cache.get_verification_keys().await;
        assert!(matches!(result, Err(FederationError::RemoteUnavailable(_))));
    }

    #[tokio::test]
    async fn test_force_refresh_ignores_ttl() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        let clock = Arc::new(ManualClock::at_seconds(1_000));
        let cache = cache(source.clone(), clock.clone());

        cache.get_verification_keys().await.unwrap();
        clock.advance_seconds(60);
        cache.force_refresh().await.unwrap();

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_is_throttled() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        let clock = Arc::new(ManualClock::at_seconds(1_000));
        let cache = cache(source.clone(), clock.clone());

        cache.get_verification_keys().await.unwrap();
        for _ in 0..20 {
            let keys = cache.force_refresh().await.unwrap();
            assert!(keys.find("k1").is_some());
        }
        assert_eq!(source.fetches(), 1);

        clock.advance_seconds(59);
        cache.force_refresh().await.unwrap();
        assert_eq!(source.fetches(), 1);

        clock.advance_seconds(1);
        cache.force_refresh().await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_backs_off() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        let clock = Arc::new(ManualClock::at_seconds(1_000));
        let cache = cache(source.clone(), clock.clone());

        cache.get_verification_keys().await.unwrap();
        source.set_failing(true);
        clock.advance_seconds(3_600);

        for _ in 0..10 {
            assert!(cache.get_verification_keys().await.is_ok());
        }
        assert_eq!(source.fetches(), 2);

        clock.advance_seconds(60);
        source.set_failing(false);
        cache.get_verification_keys().await.unwrap();
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_retried_once_per_interval() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        source.set_failing(true);
        let clock = Arc::new(ManualClock::at_seconds(1_000));
        let cache = cache(source.clone(), clock.clone());

        for _ in 0..5 {
            assert!(matches!(
                cache.get_verification_keys().await,
                Err(FederationError::RemoteUnavailable(_))
            ));
        }
        assert_eq!(source.fetches(), 1);

        clock.advance_seconds(60);
        source.set_failing(false);
        assert!(cache.get_verification_keys().await.is_ok());
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_readers_get_stale_keys_while_refresh_in_flight() {
        let source = Arc::new(GatedKeySource::new(key_set()));
        let clock = Arc::new(ManualClock::at_seconds(1_000));
        let cache = Arc::new(KeySetCache::new(
            source.clone(),
            clock.clone(),
            KeySetCache::DEFAULT_TTL,
        ));
        cache.get_verification_keys().await.unwrap();
        clock.advance_seconds(3_600);

        let refresher = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_verification_keys().await })
        };
        source.started.notified().await;

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_verification_keys().await })
            })
            .collect();
        let results = tokio::time::timeout(
            Duration::from_secs(5),
            futures::future::join_all(readers),
        )
        .await
        .expect("readers waited for the refresh");
        for result in results {
            let keys = result.unwrap().unwrap();
            assert!(keys.find("k1").is_some());
        }
        assert_eq!(source.fetches(), 2);

        source.release.notify_one();
        refresher.await.unwrap().unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_cache() {
        let source = Arc::new(StaticKeySource::new(key_set()));
        let cache = Arc::new(cache(
            source.clone(),
            Arc::new(ManualClock::at_seconds(1_000)),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_verification_keys().await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        // Readers that found the gate busy with nothing cached waited for it,
        // then saw the fresh entry.
        assert_eq!(source.fetches(), 1);
    }
}
