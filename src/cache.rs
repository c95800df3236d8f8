//! Fingerprint-keyed capture result cache.
//!
//! Entries expire after a TTL (checked lazily on lookup) and, when a capacity
//! is configured, the least recently used entry is evicted first. The
//! in-flight map guarantees at most one computation per fingerprint: the
//! first caller to [`CaptureCache::reserve`] gets a [`ComputationClaim`],
//! everyone else gets a [`PendingResult`] subscribed to the claimer's outcome.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::capture::CaptureResult;
use crate::config;
use crate::error::CacheError;

/// Cache sizing and lifetime.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// `0` means unbounded
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let settings = &config::get().cache;
        Self {
            ttl: settings.ttl,
            capacity: settings.capacity,
        }
    }
}

impl CacheConfig {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub result: CaptureResult,
    pub created_at: Instant,
    /// `None` when the TTL reaches past what `Instant` can represent.
    pub expires_at: Option<Instant>,
    pub hits: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub joined_in_flight: u64,
    pub entries: usize,
    pub in_flight: usize,
    /// Hits served by entries currently in the cache
    pub total_accesses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    expired: u64,
    evictions: u64,
    invalidations: u64,
    joined_in_flight: u64,
}

type InFlight = Arc<Mutex<HashMap<String, watch::Receiver<Option<CaptureResult>>>>>;

/// Shared result store. Construct one and hand it to every `Capturer` that
/// should share results; tests build isolated instances.
#[derive(Debug)]
pub struct CaptureCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    in_flight: InFlight,
    default_ttl: Duration,
    counters: Mutex<Counters>,
}

impl Default for CaptureCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CaptureCache {
    pub fn new(config: CacheConfig) -> Self {
        let entries = match NonZeroUsize::new(config.capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Mutex::new(entries),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            default_ttl: config.ttl,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fresh result for `fingerprint`, or `None`. Expired entries are removed.
    pub fn get(&self, fingerprint: &str) -> Option<CaptureResult> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut counters = self.counters.lock();

        let expired = match entries.get_mut(fingerprint) {
            None => {
                counters.misses += 1;
                return None;
            }
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.hits += 1;
                counters.hits += 1;
                return Some(entry.result.clone());
            }
        };

        if expired {
            entries.pop(fingerprint);
            counters.expired += 1;
            counters.misses += 1;
            debug!(fingerprint, "cache entry expired");
        }
        None
    }

    /// Store a result. `ttl` overrides the cache default.
    pub fn put(&self, fingerprint: &str, result: CaptureResult, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            result,
            created_at: now,
            expires_at: now.checked_add(ttl),
            hits: 0,
        };

        let evicted = self.entries.lock().push(fingerprint.to_string(), entry);
        if let Some((key, _)) = evicted {
            if key != fingerprint {
                self.counters.lock().evictions += 1;
                debug!(evicted = %key, "cache at capacity, evicted least recently used entry");
            }
        }
    }

    pub fn invalidate(&self, fingerprint: &str) -> bool {
        let removed = self.entries.lock().pop(fingerprint).is_some();
        if removed {
            self.counters.lock().invalidations += 1;
        }
        removed
    }

    /// Drop an entry that turned out to be unusable; the caller treats it as a miss.
    pub fn discard(&self, fingerprint: &str, reason: &CacheError) {
        warn!(fingerprint, error = %reason, "discarding unusable cache entry");
        if self.invalidate(fingerprint) {
            let mut counters = self.counters.lock();
            counters.hits = counters.hits.saturating_sub(1);
            counters.misses += 1;
        }
    }

    /// Claim the computation for `fingerprint`, or join the one already running.
    pub fn reserve(&self, fingerprint: &str) -> Reservation {
        let mut in_flight = self.in_flight.lock();
        if let Some(rx) = in_flight.get(fingerprint) {
            self.counters.lock().joined_in_flight += 1;
            return Reservation::InFlight(PendingResult { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(fingerprint.to_string(), rx);
        Reservation::Claimed(ComputationClaim {
            fingerprint: fingerprint.to_string(),
            tx: Some(tx),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, fingerprint: &str) -> bool {
        self.in_flight.lock().contains_key(fingerprint)
    }

    /// Remove entries created more than `max_age` ago, expired or not.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        self.remove_where(|entry| now.duration_since(entry.created_at) > max_age)
    }

    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self.remove_where(|entry| entry.is_expired(now));
        self.counters.lock().expired += removed as u64;
        removed
    }

    fn remove_where(&self, doomed: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| doomed(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let (entry_count, total_accesses) = {
            let entries = self.entries.lock();
            (entries.len(), entries.iter().map(|(_, e)| e.hits).sum::<u64>())
        };
        let in_flight = self.in_flight.lock().len();
        let c = self.counters.lock();
        CacheStats {
            hits: c.hits,
            misses: c.misses,
            expired: c.expired,
            evictions: c.evictions,
            invalidations: c.invalidations,
            joined_in_flight: c.joined_in_flight,
            entries: entry_count,
            in_flight,
            total_accesses,
        }
    }
}

/// Outcome of [`CaptureCache::reserve`].
#[derive(Debug)]
pub enum Reservation {
    /// The caller owns the computation and must complete (or drop) the claim.
    Claimed(ComputationClaim),
    /// Another caller is computing; wait for its result.
    InFlight(PendingResult),
}

/// Exclusive right to compute a fingerprint.
///
/// Dropping the claim without completing it (for example because the owning
/// capture was cancelled) releases the fingerprint; waiters then see a closed
/// channel and retry.
#[derive(Debug)]
pub struct ComputationClaim {
    fingerprint: String,
    tx: Option<watch::Sender<Option<CaptureResult>>>,
    in_flight: InFlight,
}

impl ComputationClaim {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Publish the result to every waiter and release the fingerprint.
    pub fn complete(mut self, result: CaptureResult) {
        self.in_flight.lock().remove(&self.fingerprint);
        if let Some(tx) = self.tx.take() {
            // No receivers left is fine: nobody was waiting.
            let _ = tx.send(Some(result));
        }
    }
}

impl Drop for ComputationClaim {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.in_flight.lock().remove(&self.fingerprint);
            debug!(fingerprint = %self.fingerprint, "computation abandoned");
        }
    }
}

/// Subscription to another caller's in-flight computation.
#[derive(Debug)]
pub struct PendingResult {
    rx: watch::Receiver<Option<CaptureResult>>,
}

impl PendingResult {
    /// The shared result, or `None` if the computation was abandoned.
    pub async fn wait(mut self) -> Option<CaptureResult> {
        loop {
            if let Some(result) = self.rx.borrow_and_update().clone() {
                return Some(result);
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureRequest;
    use crate::driver::AppSource;

    fn result(fp: &str) -> CaptureResult {
        let mut r = CaptureResult::pending(&CaptureRequest::new(AppSource::new("demo")), fp);
        r.success = true;
        r
    }

    fn cache(ttl: Duration, capacity: usize) -> CaptureCache {
        CaptureCache::new(CacheConfig::new(ttl, capacity))
    }

    #[tokio::test]
    async fn get_returns_stored_result_until_expiry() {
        let cache = cache(Duration::from_millis(50), 0);
        cache.put("fp", result("fp"), None);
        assert_eq!(cache.get("fp").map(|r| r.fingerprint), Some("fp".to_string()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("fp").is_none(), "expired entries are misses");
        assert!(cache.is_empty(), "expired entries are evicted on lookup");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn per_entry_ttl_overrides_default() {
        let cache = cache(Duration::from_secs(3600), 0);
        cache.put("short", result("short"), Some(Duration::ZERO));
        assert!(cache.get("short").is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = cache(Duration::from_secs(60), 2);
        cache.put("a", result("a"), None);
        cache.put("b", result("b"), None);
        assert!(cache.get("a").is_some());
        cache.put("c", result("c"), None);

        assert!(cache.get("b").is_none(), "b was least recently used");
        assert!(cache.get("a").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let cache = cache(Duration::from_secs(60), 1);
        cache.put("a", result("a"), None);
        cache.put("a", result("a"), None);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test]
    async fn second_reservation_joins_the_first() {
        let cache = cache(Duration::from_secs(60), 0);
        let Reservation::Claimed(claim) = cache.reserve("fp") else {
            panic!("first reservation should claim");
        };
        let Reservation::InFlight(pending) = cache.reserve("fp") else {
            panic!("second reservation should join");
        };
        assert!(cache.is_in_flight("fp"));

        let waiter = tokio::spawn(pending.wait());
        claim.complete(result("fp"));
        let shared = waiter.await.unwrap().expect("waiter receives the result");
        assert_eq!(shared.fingerprint, "fp");
        assert!(!cache.is_in_flight("fp"));
        assert_eq!(cache.stats().joined_in_flight, 1);
    }

    #[tokio::test]
    async fn abandoned_claim_releases_waiters() {
        let cache = cache(Duration::from_secs(60), 0);
        let Reservation::Claimed(claim) = cache.reserve("fp") else {
            panic!("expected claim");
        };
        let Reservation::InFlight(pending) = cache.reserve("fp") else {
            panic!("expected join");
        };
        drop(claim);
        assert!(pending.wait().await.is_none());
        assert!(matches!(cache.reserve("fp"), Reservation::Claimed(_)));
    }

    #[test]
    fn cleanup_removes_old_entries() {
        let cache = cache(Duration::from_secs(60), 0);
        cache.put("a", result("a"), None);
        assert_eq!(cache.cleanup_older_than(Duration::from_secs(3600)), 0);
        cache.put("b", result("b"), Some(Duration::ZERO));
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.cleanup_older_than(Duration::ZERO), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn unbounded_ttl_never_expires() {
        let cache = cache(Duration::MAX, 0);
        cache.put("a", result("a"), None);
        cache.put("b", result("b"), Some(Duration::MAX));
        assert_eq!(cache.cleanup_expired(), 0);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn discard_turns_a_hit_into_a_miss() {
        let cache = cache(Duration::from_secs(60), 0);
        cache.put("a", result("a"), None);
        assert!(cache.get("a").is_some());
        cache.discard("a", &CacheError::ArtifactMissing("a.svg".into()));
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.invalidations, 1);
        assert!(cache.get("a").is_none());
    }
}
