//! 滚动缓存：固定槽位的 FIFO 环形缓冲 + 惰性过期。
//!
//! 满了以后按插入顺序覆盖最旧的槽位，读得再频繁也不会延长条目寿命。
//! 过期条目不主动清理，查找时忽略，等环转一圈被覆盖。

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(provider: &str, url: &str) -> Self {
        Self {
            provider: provider.to_string(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    key: CacheKey,
    inserted_at: u64,
    payload: V,
}

#[derive(Debug)]
struct Ring<V> {
    entries: Vec<CacheEntry<V>>,
    cursor: usize,
}

#[derive(Debug)]
pub struct RollingCache<V> {
    ring: Mutex<Ring<V>>,
    capacity: usize,
    ttl_secs: u64,
}

impl<V: Clone> RollingCache<V> {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                entries: Vec::with_capacity(capacity),
                cursor: 0,
            }),
            capacity,
            ttl_secs,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn lookup(&self, provider: &str, url: &str) -> Option<V> {
        self.lookup_at(provider, url, unix_now())
    }

    pub fn insert(&self, provider: &str, url: &str, payload: V) {
        self.insert_at(provider, url, payload, unix_now());
    }

    /// 以给定时间点查找；命中要求键一致且 `now - inserted_at < ttl`。
    pub fn lookup_at(&self, provider: &str, url: &str, now: u64) -> Option<V> {
        let ring = self.lock();
        ring.entries
            .iter()
            .find(|e| {
                e.key.provider == provider
                    && e.key.url == url
                    && now.saturating_sub(e.inserted_at) < self.ttl_secs
            })
            .map(|e| e.payload.clone())
    }

    pub fn insert_at(&self, provider: &str, url: &str, payload: V, now: u64) {
        let entry = CacheEntry {
            key: CacheKey::new(provider, url),
            inserted_at: now,
            payload,
        };
        let mut ring = self.lock();
        if ring.entries.len() < self.capacity {
            ring.entries.push(entry);
        } else {
            let slot = ring.cursor;
            ring.entries[slot] = entry;
            ring.cursor = (slot + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Ring<V>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
