//! Positive verdict cache
//!
//! Remembers `Authorization` header values that were recently allowed so
//! repeat requests skip the directory. Headers are stored as SHA-256
//! fingerprints, never in the clear. Denials are not cached.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Longest lifetime an entry can have, larger TTLs are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

struct CacheInner {
    ttl: Duration,
    entries: RwLock<HashMap<String, Instant>>,
}

impl CacheInner {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }
}

/// TTL cache of allowed header values, safe to share between tasks
#[derive(Clone)]
pub struct VerdictCache {
    inner: Arc<CacheInner>,
}

impl VerdictCache {
    /// Create a cache whose entries live for `ttl`.
    ///
    /// When called inside a tokio runtime a background task purges expired
    /// entries; it stops once the last handle to the cache is dropped.
    /// TTLs above [`MAX_TTL`] are clamped.
    pub fn new(ttl: Duration) -> Self {
        if ttl > MAX_TTL {
            warn!("Cache TTL of {:?} clamped to {:?}", ttl, MAX_TTL);
        }
        let ttl = ttl.min(MAX_TTL);
        let inner = Arc::new(CacheInner {
            ttl,
            entries: RwLock::new(HashMap::new()),
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let every = ttl.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL);
            handle.spawn(sweep(Arc::downgrade(&inner), every));
        }

        Self { inner }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// `true` if `raw` was stored less than one TTL ago
    pub fn lookup(&self, raw: &str) -> bool {
        let key = fingerprint(raw);
        let entries = self.inner.entries.read();
        entries
            .get(&key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// Remember `raw` as allowed for one TTL
    pub fn store(&self, raw: &str) {
        let now = Instant::now();
        let Some(expires_at) = now.checked_add(self.inner.ttl) else {
            warn!("Verdict expiry overflows the clock, not caching");
            return;
        };
        self.inner.entries.write().insert(fingerprint(raw), expires_at);
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn sweep(cache: Weak<CacheInner>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let Some(cache) = cache.upgrade() else {
            debug!("Verdict cache dropped, stopping sweeper");
            return;
        };
        let purged = cache.purge_expired();
        if purged > 0 {
            trace!("Purged {} expired verdict(s)", purged);
        }
    }
}

fn fingerprint(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}
