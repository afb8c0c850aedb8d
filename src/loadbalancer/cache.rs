use std::{collections::HashMap, time::Duration};

use tokio::{sync::RwLock, time::Instant};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Id-keyed cache whose entries expire after a fixed TTL.
///
/// Readers get a clone of the entry; writers replace an entry as a whole.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (V, Instant)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &str) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .filter(|(_, stored)| stored.elapsed() < self.ttl)
            .map(|(value, _)| value.clone())
    }

    pub async fn insert(&self, id: impl Into<String>, value: V) {
        self.entries
            .write()
            .await
            .insert(id.into(), (value, Instant::now()));
    }

    pub async fn invalidate(&self, id: &str) {
        self.entries.write().await.remove(id);
    }

    /// Entries that have not expired.
    pub async fn values(&self) -> Vec<V> {
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, stored)| stored.elapsed() < self.ttl)
            .map(|(value, _)| value.clone())
            .collect()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
