use crate::clock::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Read-mostly cache whose entries go stale after a fixed TTL.
///
/// Time comes from the injected [`Clock`], so expiry can be tested without
/// sleeping. Stale reads within the TTL are acceptable to every caller.
pub struct TtlCache<K, V> {
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<K, (V, DateTime<Utc>)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(_, fetched_at)| now < *fetched_at + self.ttl)
            .map(|(value, _)| value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        self.entries.write().await.insert(key, (value, now));
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    /// Returns the cached value or loads, stores and returns a fresh one.
    /// Load errors are passed through and nothing is cached.
    pub async fn get_or_try_load<E, F, Fut>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key).await {
            return Ok(hit);
        }
        let value = load().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }
}
