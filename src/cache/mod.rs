// 容器查询缓存
// 按单个键缓存容器返回的数据，淘汰策略可插拔：无界、LRU 容量上限、TTL 过期

mod decorator;

pub use decorator::{CacheStats, CachedContainer, CachingProcessor};

use crate::container::Fetched;
use crate::key::Key;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 缓存中的一个键
#[derive(Debug, Clone, PartialEq)]
pub enum CacheSlot {
    Present(Fetched),
    /// 已确认容器中没有该键的数据
    Absent,
}

/// 缓存项
#[derive(Debug, Clone)]
struct CacheEntry {
    slot: CacheSlot,
    inserted_at: Instant,
}

impl CacheEntry {
    fn new(slot: CacheSlot) -> Self {
        Self {
            slot,
            inserted_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.inserted_at.elapsed() > ttl)
    }
}

/// 键级缓存
pub trait KeyCache: Send + Sync {
    fn get(&self, key: &Key) -> Option<CacheSlot>;
    fn put(&self, key: Key, slot: CacheSlot);
    fn invalidate(&self, key: &Key);
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 无容量上限的缓存，可选 TTL
#[derive(Default)]
pub struct UnboundedCache {
    entries: DashMap<Key, CacheEntry>,
    ttl: Option<Duration>,
}

impl UnboundedCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

impl KeyCache for UnboundedCache {
    fn get(&self, key: &Key) -> Option<CacheSlot> {
        let expired = {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(self.ttl) {
                return Some(entry.slot.clone());
            }
            true
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn put(&self, key: Key, slot: CacheSlot) {
        self.entries.insert(key, CacheEntry::new(slot));
    }

    fn invalidate(&self, key: &Key) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 有容量上限的 LRU 缓存，可选 TTL
#[cfg(feature = "lru-cache")]
pub struct LruKeyCache {
    entries: parking_lot::Mutex<lru::LruCache<Key, CacheEntry>>,
    ttl: Option<Duration>,
}

#[cfg(feature = "lru-cache")]
impl LruKeyCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity).unwrap_or(std::num::NonZeroUsize::MIN);
        Self {
            entries: parking_lot::Mutex::new(lru::LruCache::new(capacity)),
            ttl,
        }
    }
}

#[cfg(feature = "lru-cache")]
impl KeyCache for LruKeyCache {
    fn get(&self, key: &Key) -> Option<CacheSlot> {
        let mut entries = self.entries.lock();
        let expired = {
            let entry = entries.get(key)?;
            if !entry.is_expired(self.ttl) {
                return Some(entry.slot.clone());
            }
            true
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn put(&self, key: Key, slot: CacheSlot) {
        if let Some((evicted, _)) = self.entries.lock().push(key.clone(), CacheEntry::new(slot)) {
            if evicted != key {
                log::debug!("LRU 缓存淘汰键: {}", evicted);
            }
        }
    }

    fn invalidate(&self, key: &Key) {
        self.entries.lock().pop(key);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// 缓存策略
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    /// 容量上限；None 表示无界
    pub capacity: Option<usize>,
    /// 过期时间；None 表示不过期
    pub ttl: Option<Duration>,
    /// 是否缓存"容器中不存在"的键
    pub cache_absent_keys: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            capacity: None,
            ttl: None,
            cache_absent_keys: true,
        }
    }
}

impl CachePolicy {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn build(&self) -> Arc<dyn KeyCache> {
        match self.capacity {
            #[cfg(feature = "lru-cache")]
            Some(capacity) => Arc::new(LruKeyCache::new(capacity, self.ttl)),
            #[cfg(not(feature = "lru-cache"))]
            Some(_) => {
                log::warn!("未启用 lru-cache 功能，容量上限被忽略");
                Arc::new(UnboundedCache::new(self.ttl))
            }
            None => Arc::new(UnboundedCache::new(self.ttl)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slot(v: i64) -> CacheSlot {
        CacheSlot::Present(Fetched::One(json!(v)))
    }

    #[test]
    fn test_unbounded_put_get() {
        let cache = UnboundedCache::default();
        cache.put(Key::Int(1), slot(1));
        cache.put(Key::Int(2), CacheSlot::Absent);

        assert_eq!(cache.get(&Key::Int(1)), Some(slot(1)));
        assert_eq!(cache.get(&Key::Int(2)), Some(CacheSlot::Absent));
        assert_eq!(cache.get(&Key::Int(3)), None);

        cache.invalidate(&Key::Int(1));
        assert_eq!(cache.get(&Key::Int(1)), None);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = UnboundedCache::new(Some(Duration::from_millis(20)));
        cache.put(Key::Int(1), slot(1));
        assert!(cache.get(&Key::Int(1)).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&Key::Int(1)).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[cfg(feature = "lru-cache")]
    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache = LruKeyCache::new(2, None);
        cache.put(Key::Int(1), slot(1));
        cache.put(Key::Int(2), slot(2));
        // 访问 1，使 2 成为最久未使用
        assert!(cache.get(&Key::Int(1)).is_some());
        cache.put(Key::Int(3), slot(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&Key::Int(2)).is_none());
        assert!(cache.get(&Key::Int(1)).is_some());
    }

    #[test]
    fn test_policy_defaults() {
        let policy = CachePolicy::default();
        assert!(policy.cache_absent_keys);
        assert_eq!(policy.capacity, None);
        assert_eq!(CachePolicy::bounded(8).capacity, Some(8));
    }
}
