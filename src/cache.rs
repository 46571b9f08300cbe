use regex::Regex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;

/// Key/value cache with per-entry expiry, shared by handle rather than as a global.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V: Clone + Send> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        let secs = std::env::var("CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(300);
        Self::new(Duration::from_secs(secs))
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.entries.lock().await;
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.ttl).await;
    }

    pub async fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.into(), entry);
    }

    /// Drops every key matching `pattern` (a regular expression) and returns
    /// how many were removed.
    pub async fn invalidate(&self, pattern: &str) -> Result<usize, regex::Error> {
        let matcher = Regex::new(pattern)?;
        let mut guard = self.entries.lock().await;
        let before = guard.len();
        guard.retain(|key, _| !matcher.is_match(key));
        let removed = before - guard.len();
        debug!(target = "mintmark.cache", pattern, removed, "cache_invalidated");
        Ok(removed)
    }

    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.entries.lock().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.expires_at > now);
        before - guard.len()
    }

    #[allow(dead_code)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
