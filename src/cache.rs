//! Cache & invalidation (component D).
//!
//! A small in-process TTL + LRU cache sitting in front of read-heavy
//! lookups (customer balances, product stock, invoice summaries). Callers
//! key entries by a `"<kind>:<id>"`-style string so invalidation can target
//! either a single key or every key under a kind prefix after a write.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    last_used: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

pub struct Cache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    max_size: usize,
    default_ttl: Duration,
}

impl<V: Clone> Cache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size,
            default_ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let expired = matches!(entries.get(key), Some(e) if e.is_expired());
        if expired {
            entries.remove(key);
            return None;
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.last_used = Instant::now();
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub async fn put(&self, key: String, value: V) {
        self.put_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn put_with_ttl(&self, key: String, value: V, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            self.evict_lru(&mut entries);
        }
        let now = Instant::now();
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                ttl,
                last_used: now,
            },
        );
    }

    fn evict_lru(&self, entries: &mut HashMap<String, Entry<V>>) {
        if let Some(oldest_key) = entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest_key);
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    pub async fn invalidate_by_prefix(&self, prefix: &str) {
        let mut entries = self.entries.lock().await;
        entries.retain(|k, _| !k.starts_with(prefix));
    }

    pub async fn invalidate_all(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
