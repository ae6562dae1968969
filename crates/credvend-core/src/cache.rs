//! Credential cache and refresher
//!
//! One slot per [`CacheKey`]. A slot holds the current credential and, while
//! a mint is running, a shared handle to it. Every caller that finds the
//! slot stale joins that handle instead of starting its own mint, so a key
//! is never minted twice concurrently.
//!
//! Mints run on their own tokio task which writes the slot when it
//! finishes. A waiter going away (timeout, disconnect) never cancels the
//! mint other waiters depend on.

use crate::observer::{NoopObserver, VendingObserver};
use credvend_common::config::CacheConfig;
use credvend_common::{
    Credential, CredentialType, MintFailureKind, Result, StorageScope, VendError,
    current_time_ms,
};
use credvend_provider::{CredentialProvider, MintContext};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Identity of a cached credential
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub metalake: String,
    /// `type:dotted.name` of the object
    pub object_key: String,
    pub credential_type: CredentialType,
    /// Fingerprint of the storage configuration the provider was built from;
    /// rotated keys or changed properties never hit an older entry
    pub storage_fingerprint: String,
    /// Fingerprint of the scope the credential was minted for
    pub scope_fingerprint: String,
}

impl CacheKey {
    pub fn new(
        metalake: impl Into<String>,
        object_key: impl Into<String>,
        credential_type: CredentialType,
        storage_fingerprint: impl Into<String>,
        scope: &StorageScope,
    ) -> Self {
        Self {
            metalake: metalake.into(),
            object_key: object_key.into(),
            credential_type,
            storage_fingerprint: storage_fingerprint.into(),
            scope_fingerprint: scope.fingerprint(),
        }
    }
}

/// A minted credential and when it was minted
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub credential: Credential,
    pub minted_at_ms: u64,
}

impl CacheEntry {
    /// Usable without refresh: never expires, or expires after
    /// `now + skew`. The skew is capped at half the credential's lifetime so
    /// short-lived credentials are still reused.
    fn is_fresh(&self, now_ms: u64, refresh_skew_ms: u64) -> bool {
        if self.credential.never_expires() {
            return true;
        }
        let expire = self.credential.expire_time_in_ms();
        let lifetime = expire.saturating_sub(self.minted_at_ms);
        let skew = refresh_skew_ms.min(lifetime / 2);
        now_ms.saturating_add(skew) < expire
    }
}

type MintFuture = Shared<BoxFuture<'static, Result<CacheEntry>>>;

#[derive(Default)]
struct SlotState {
    current: Option<CacheEntry>,
    in_flight: Option<MintFuture>,
}

struct Slot {
    state: Mutex<SlotState>,
    /// Logical clock value of the last access, for LRU eviction
    last_access: AtomicU64,
}

impl Slot {
    fn new(clock: u64) -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            last_access: AtomicU64::new(clock),
        }
    }

    fn touch(&self, clock: u64) {
        self.last_access.store(clock, Ordering::Relaxed);
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Callers that joined a mint already in flight
    pub coalesced: AtomicU64,
    pub mints: AtomicU64,
    pub mint_failures: AtomicU64,
    pub stale_served: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    #[must_use]
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            mints: self.mints.load(Ordering::Relaxed),
            mint_failures: self.mint_failures.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub mints: u64,
    pub mint_failures: u64,
    pub stale_served: u64,
    pub evictions: u64,
}

impl CacheStatsSnapshot {
    /// Calculate hit ratio (0.0 to 1.0)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses + self.coalesced;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Fetch-or-mint cache of credentials
pub struct CredentialCache {
    slots: DashMap<CacheKey, Arc<Slot>>,
    refresh_skew_ms: u64,
    max_entries: usize,
    clock: AtomicU64,
    stats: Arc<CacheStats>,
    observer: Arc<dyn VendingObserver>,
}

impl CredentialCache {
    /// Create a cache from its configuration
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            slots: DashMap::new(),
            refresh_skew_ms: config.refresh_skew_ms,
            max_entries: config.max_entries.max(1),
            clock: AtomicU64::new(0),
            stats: Arc::new(CacheStats::default()),
            observer: Arc::new(NoopObserver),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn VendingObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub const fn refresh_skew_ms(&self) -> u64 {
        self.refresh_skew_ms
    }

    /// Number of slots (cached or minting)
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Return the cached credential for `key`, minting it with `provider`
    /// when absent or within the refresh skew of its expiry.
    ///
    /// When a refresh fails and the previous credential has not expired yet,
    /// the previous credential is served. Otherwise the failure surfaces as
    /// [`VendError::CredentialUnavailable`]. The returned credential is never
    /// expired.
    pub async fn get_or_mint(
        &self,
        key: CacheKey,
        provider: Arc<dyn CredentialProvider>,
        scope: StorageScope,
        context: MintContext,
    ) -> Result<Credential> {
        let credential_type = key.credential_type.clone();
        let slot = self.slot(key);
        let now = current_time_ms();

        let (mint, stale) = {
            let mut state = slot.state.lock();
            if let Some(entry) = &state.current
                && entry.is_fresh(now, self.refresh_skew_ms)
            {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.observer.cache_hit(&credential_type);
                tracing::debug!(credential_type = %credential_type, "credential cache hit");
                return Ok(entry.credential.clone());
            }

            let stale = state
                .current
                .as_ref()
                .filter(|e| !e.credential.is_expired_at(now))
                .cloned();

            let mint = if let Some(in_flight) = &state.in_flight {
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                self.observer.mint_coalesced(&credential_type);
                in_flight.clone()
            } else {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.observer.cache_miss(&credential_type);
                let mint = self.spawn_mint(slot.clone(), provider, scope, context);
                state.in_flight = Some(mint.clone());
                mint
            };
            (mint, stale)
        };
        self.evict_if_needed();

        match mint.await {
            Ok(entry) => {
                if entry.credential.is_expired_at(current_time_ms()) {
                    return Err(VendError::CredentialUnavailable {
                        credential_type: credential_type.to_string(),
                        reason: MintFailureKind::InvalidResponse,
                    });
                }
                Ok(entry.credential)
            }
            Err(err) => {
                let now = current_time_ms();
                if let Some(stale) = stale.filter(|e| !e.credential.is_expired_at(now)) {
                    let remaining_ms = stale.credential.expire_time_in_ms().saturating_sub(now);
                    self.stats.stale_served.fetch_add(1, Ordering::Relaxed);
                    self.observer.stale_served(&credential_type, remaining_ms);
                    return Ok(stale.credential);
                }
                Err(match err {
                    VendError::ProviderMint {
                        credential_type,
                        kind,
                    } => VendError::CredentialUnavailable {
                        credential_type,
                        reason: kind,
                    },
                    other => other,
                })
            }
        }
    }

    /// Drop every entry of one object; returns the number dropped
    pub fn invalidate_object(&self, metalake: &str, object_key: &str) -> usize {
        self.remove_where(|k| k.metalake == metalake && k.object_key == object_key)
    }

    /// Drop every entry of a metalake; returns the number dropped
    pub fn invalidate_metalake(&self, metalake: &str) -> usize {
        self.remove_where(|k| k.metalake == metalake)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Drop entries holding an expired credential (or none at all) with no
    /// mint in flight; returns the number dropped
    pub fn purge_expired(&self) -> usize {
        let now = current_time_ms();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            let Some(state) = slot.state.try_lock() else {
                return true;
            };
            state.in_flight.is_some()
                || state
                    .current
                    .as_ref()
                    .is_some_and(|e| !e.credential.is_expired_at(now))
        });
        let purged = before.saturating_sub(self.slots.len());
        if purged > 0 {
            tracing::debug!(purged, "purged expired credentials");
        }
        purged
    }

    fn remove_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let before = self.slots.len();
        self.slots.retain(|key, _| !predicate(key));
        before.saturating_sub(self.slots.len())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn slot(&self, key: CacheKey) -> Arc<Slot> {
        let clock = self.tick();
        let slot = self
            .slots
            .entry(key)
            .or_insert_with(|| Arc::new(Slot::new(clock)))
            .clone();
        slot.touch(clock);
        slot
    }

    fn spawn_mint(
        &self,
        slot: Arc<Slot>,
        provider: Arc<dyn CredentialProvider>,
        scope: StorageScope,
        context: MintContext,
    ) -> MintFuture {
        let stats = self.stats.clone();
        let observer = self.observer.clone();

        let handle = tokio::spawn(async move {
            let credential_type = provider.credential_type().clone();
            let started = Instant::now();
            let result = match provider.mint(&scope, &context).await {
                Ok(credential) if credential.is_expired_at(current_time_ms()) => {
                    tracing::warn!(
                        credential_type = %credential_type,
                        expire_time_in_ms = credential.expire_time_in_ms(),
                        "provider returned an expired credential"
                    );
                    Err(VendError::ProviderMint {
                        credential_type: credential_type.to_string(),
                        kind: MintFailureKind::InvalidResponse,
                    })
                }
                Ok(credential) => Ok(CacheEntry {
                    credential,
                    minted_at_ms: current_time_ms(),
                }),
                Err(e) => {
                    tracing::warn!(credential_type = %credential_type, error = %e, "provider mint failed");
                    Err(e.into_vend_error(&credential_type))
                }
            };

            let mut state = slot.state.lock();
            state.in_flight = None;
            match &result {
                Ok(entry) => {
                    stats.mints.fetch_add(1, Ordering::Relaxed);
                    observer.mint_completed(&credential_type, started.elapsed());
                    tracing::debug!(
                        credential_type = %credential_type,
                        expire_time_in_ms = entry.credential.expire_time_in_ms(),
                        "minted credential"
                    );
                    state.current = Some(entry.clone());
                }
                Err(e) => {
                    stats.mint_failures.fetch_add(1, Ordering::Relaxed);
                    let kind = match e {
                        VendError::ProviderMint { kind, .. } => *kind,
                        _ => MintFailureKind::Internal,
                    };
                    observer.mint_failed(&credential_type, kind);
                }
            }
            result
        });

        async move {
            handle
                .await
                .map_err(|e| VendError::internal(format!("credential mint task failed: {e}")))?
        }
        .boxed()
        .shared()
    }

    /// Evict least recently used slots beyond `max_entries`. Slots with a
    /// mint in flight are never evicted.
    fn evict_if_needed(&self) {
        let mut evicted = 0;
        while self.slots.len() > self.max_entries {
            let Some(victim) = self.find_lru_entry() else {
                break;
            };
            if self.slots.remove(&victim).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            self.observer.evicted(evicted);
        }
    }

    fn find_lru_entry(&self) -> Option<CacheKey> {
        self.slots
            .iter()
            .filter(|e| {
                e.value()
                    .state
                    .try_lock()
                    .is_some_and(|s| s.in_flight.is_none())
            })
            .min_by_key(|e| e.value().last_access.load(Ordering::Relaxed))
            .map(|e| e.key().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use credvend_common::Permission;
    use credvend_provider::ProviderError;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Provider minting credentials valid for `lifetime_ms`, counting calls
    struct CountingProvider {
        credential_type: CredentialType,
        lifetime_ms: u64,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(lifetime_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                credential_type: CredentialType::new("s3-token"),
                lifetime_ms,
                delay: Duration::from_millis(20),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        fn credential_type(&self) -> &CredentialType {
            &self.credential_type
        }

        fn default_expiry_ms(&self) -> u64 {
            self.lifetime_ms
        }

        async fn mint(
            &self,
            _scope: &StorageScope,
            _context: &MintContext,
        ) -> std::result::Result<Credential, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let expire = if self.lifetime_ms == 0 {
                0
            } else {
                current_time_ms() + self.lifetime_ms
            };
            Ok(Credential::new(
                self.credential_type.clone(),
                expire,
                BTreeMap::from([("n".to_string(), n.to_string())]),
            ))
        }
    }

    struct FailingProvider(CredentialType);

    #[async_trait]
    impl CredentialProvider for FailingProvider {
        fn credential_type(&self) -> &CredentialType {
            &self.0
        }

        fn default_expiry_ms(&self) -> u64 {
            3_600_000
        }

        async fn mint(
            &self,
            _scope: &StorageScope,
            _context: &MintContext,
        ) -> std::result::Result<Credential, ProviderError> {
            Err(ProviderError::Timeout)
        }
    }

    fn cache(refresh_skew_ms: u64) -> CredentialCache {
        CredentialCache::new(&CacheConfig {
            refresh_skew_ms,
            ..CacheConfig::default()
        })
    }

    fn scope() -> StorageScope {
        StorageScope::new(["s3://b/t"], Permission::Read)
    }

    fn key(object: &str) -> CacheKey {
        CacheKey::new("demo", object, CredentialType::new("s3-token"), "storage", &scope())
    }

    fn ctx() -> MintContext {
        MintContext::new("alice")
    }

    #[tokio::test]
    async fn test_hit_after_mint() {
        let cache = cache(0);
        let provider = CountingProvider::new(60_000);
        let a = cache
            .get_or_mint(key("table:c.s.t"), provider.clone(), scope(), ctx())
            .await
            .unwrap();
        let b = cache
            .get_or_mint(key("table:c.s.t"), provider.clone(), scope(), ctx())
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.calls(), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.mints, 1);
    }

    #[tokio::test]
    async fn test_skew_capped_for_short_lifetimes() {
        // Lifetime 10s, skew capped at 5s: the entry is fresh right after minting
        let cache = cache(60_000);
        let provider = CountingProvider::new(10_000);
        cache
            .get_or_mint(key("table:c.s.t"), provider.clone(), scope(), ctx())
            .await
            .unwrap();
        cache
            .get_or_mint(key("table:c.s.t"), provider.clone(), scope(), ctx())
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn test_entry_freshness() {
        let entry = CacheEntry {
            credential: Credential::new(CredentialType::new("s3-token"), 10_000, BTreeMap::new()),
            minted_at_ms: 0,
        };
        assert!(entry.is_fresh(4_999, 5_000));
        assert!(!entry.is_fresh(5_000, 5_000));
        assert!(entry.is_fresh(9_999, 0));
        assert!(!entry.is_fresh(10_000, 0));

        let never = CacheEntry {
            credential: Credential::new(CredentialType::new("s3-secret-key"), 0, BTreeMap::new()),
            minted_at_ms: 0,
        };
        assert!(never.is_fresh(u64::MAX, u64::MAX));
    }

    #[tokio::test]
    async fn test_failure_without_stale_is_unavailable() {
        let cache = cache(0);
        let provider = Arc::new(FailingProvider(CredentialType::new("s3-token")));
        let err = cache
            .get_or_mint(key("table:c.s.t"), provider, scope(), ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VendError::CredentialUnavailable {
                reason: MintFailureKind::Timeout,
                ..
            }
        ));
        assert_eq!(err.http_status_code(), 503);
        assert_eq!(cache.stats().mint_failures, 1);
    }

    #[tokio::test]
    async fn test_stale_but_valid_served_on_failure() {
        let cache = cache(60_000);
        let previous = Credential::new(
            CredentialType::new("s3-token"),
            current_time_ms() + 30_000,
            BTreeMap::new(),
        );
        // Minted long ago, so the full skew applies and a refresh is due
        cache.slot(key("table:c.s.t")).state.lock().current = Some(CacheEntry {
            credential: previous.clone(),
            minted_at_ms: 0,
        });

        let failing = Arc::new(FailingProvider(CredentialType::new("s3-token")));
        let served = cache
            .get_or_mint(key("table:c.s.t"), failing, scope(), ctx())
            .await
            .unwrap();
        assert_eq!(served, previous);
        let stats = cache.stats();
        assert_eq!(stats.stale_served, 1);
        assert_eq!(stats.mint_failures, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let cache = cache(0);
        let provider = CountingProvider::new(60_000);
        for object in ["table:c.s.a", "table:c.s.b"] {
            cache
                .get_or_mint(key(object), provider.clone(), scope(), ctx())
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.invalidate_object("demo", "table:c.s.a"), 1);
        assert_eq!(cache.invalidate_object("demo", "table:c.s.a"), 0);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.invalidate_metalake("demo"), 1);
        assert!(cache.is_empty());

        let failing = Arc::new(FailingProvider(CredentialType::new("s3-token")));
        let _ = cache
            .get_or_mint(key("table:c.s.a"), failing, scope(), ctx())
            .await;
        // The failed slot holds nothing and is purged
        assert_eq!(cache.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = CredentialCache::new(&CacheConfig {
            refresh_skew_ms: 0,
            max_entries: 2,
            ..CacheConfig::default()
        });
        let provider = CountingProvider::new(0);
        for object in ["table:c.s.a", "table:c.s.b"] {
            cache
                .get_or_mint(key(object), provider.clone(), scope(), ctx())
                .await
                .unwrap();
        }
        // Touch "a" so "b" is the least recently used
        cache
            .get_or_mint(key("table:c.s.a"), provider.clone(), scope(), ctx())
            .await
            .unwrap();
        cache
            .get_or_mint(key("table:c.s.c"), provider.clone(), scope(), ctx())
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.invalidate_object("demo", "table:c.s.b"), 0);
        assert_eq!(cache.invalidate_object("demo", "table:c.s.a"), 1);
    }

    #[test]
    fn test_hit_ratio() {
        let snapshot = CacheStatsSnapshot {
            hits: 3,
            misses: 1,
            ..CacheStatsSnapshot::default()
        };
        assert!((snapshot.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert!(CacheStatsSnapshot::default().hit_ratio().abs() < f64::EPSILON);
    }
}
