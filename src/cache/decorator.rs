//! 缓存装饰器
//!
//! `CachedContainer` 把请求的键分成已缓存与未缓存两部分：已缓存的直接返回，
//! 未缓存的一次性委托给被包装的容器，结果写回缓存后合并返回。
//! `CachingProcessor` 在注册阶段为容器套上该装饰器。

use super::{CachePolicy, CacheSlot, KeyCache};
use crate::container::{lookup, Container, ContainerLifecycle, FetchResult, SharedContainer};
use crate::errors::{BoxError, ContainerError};
use crate::key::{Key, KeySet};
use crate::registry::{LifecycleProcessor, Registration};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct InnerStats {
    hits: AtomicU64,
    misses: AtomicU64,
    delegated_fetches: AtomicU64,
}

/// 缓存统计信息（按键计数）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// 委托给被包装容器的 fetch 次数
    pub delegated_fetches: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct CachedContainer {
    inner: SharedContainer,
    cache: Arc<dyn KeyCache>,
    cache_absent_keys: bool,
    /// 正在委托中的键集合，相同键集合的并发请求排队等待同一次查询
    in_flight: DashMap<KeySet, Arc<Mutex<()>>>,
    stats: InnerStats,
}

impl CachedContainer {
    pub fn new(inner: SharedContainer, policy: &CachePolicy) -> Self {
        Self::with_cache(inner, policy.build(), policy.cache_absent_keys)
    }

    pub fn with_cache(inner: SharedContainer, cache: Arc<dyn KeyCache>, cache_absent_keys: bool) -> Self {
        Self {
            inner,
            cache,
            cache_absent_keys,
            in_flight: DashMap::new(),
            stats: InnerStats::default(),
        }
    }

    pub fn inner(&self) -> &SharedContainer {
        &self.inner
    }

    pub fn invalidate(&self, key: &Key) {
        self.cache.invalidate(key);
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            delegated_fetches: self.stats.delegated_fetches.load(Ordering::Relaxed),
        }
    }

    /// 命中的键写入 `result`，返回未缓存的键
    fn partition(&self, keys: &KeySet, result: &mut FetchResult) -> KeySet {
        let mut uncached = KeySet::new();
        for key in keys {
            match self.cache.get(key) {
                Some(CacheSlot::Present(fetched)) => {
                    result.insert(key.clone(), fetched);
                }
                Some(CacheSlot::Absent) => {}
                None => {
                    uncached.insert(key.clone());
                }
            }
        }
        uncached
    }

    async fn load(&self, keys: &KeySet, result: &mut FetchResult) -> Result<(), ContainerError> {
        // 排队期间其他请求可能已经填充了缓存
        let remaining = self.partition(keys, result);
        if remaining.is_empty() {
            return Ok(());
        }

        self.stats.misses.fetch_add(remaining.len() as u64, Ordering::Relaxed);
        self.stats.delegated_fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = self.inner.fetch(&remaining).await?;

        for key in remaining {
            match lookup(&fetched, &key) {
                Some(found) => {
                    self.cache.put(key.clone(), CacheSlot::Present(found.clone()));
                    result.insert(key, found.clone());
                }
                None if self.cache_absent_keys => self.cache.put(key, CacheSlot::Absent),
                None => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Container for CachedContainer {
    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    async fn fetch(&self, keys: &KeySet) -> Result<FetchResult, ContainerError> {
        if keys.is_empty() {
            return Ok(FetchResult::new());
        }

        let mut result = FetchResult::with_capacity(keys.len());
        let uncached = self.partition(keys, &mut result);
        self.stats
            .hits
            .fetch_add((keys.len() - uncached.len()) as u64, Ordering::Relaxed);
        if uncached.is_empty() {
            log::debug!("缓存命中: {} ({} 个键)", self.namespace(), keys.len());
            return Ok(result);
        }

        let flight = Arc::clone(self.in_flight.entry(uncached.clone()).or_default().value());
        let outcome = {
            let _guard = flight.lock().await;
            self.load(&uncached, &mut result).await
        };
        // 只剩映射表和当前请求持有时清理
        self.in_flight
            .remove_if(&uncached, |_, f| Arc::ptr_eq(f, &flight) && Arc::strong_count(f) <= 2);

        outcome.map(|_| result)
    }

    fn lifecycle(&self) -> Option<&dyn ContainerLifecycle> {
        Some(self)
    }
}

impl ContainerLifecycle for CachedContainer {
    fn init(&self) -> Result<(), BoxError> {
        match self.inner.lifecycle() {
            Some(lifecycle) => lifecycle.init(),
            None => Ok(()),
        }
    }

    fn destroy(&self) {
        self.cache.clear();
        if let Some(lifecycle) = self.inner.lifecycle() {
            lifecycle.destroy();
        }
    }
}

/// 为新注册的容器包装缓存的生命周期处理器
///
/// 默认对所有命名空间使用同一缓存策略；也可以只为指定命名空间启用，
/// 或排除某些命名空间。每个容器拥有独立的缓存实例。
#[derive(Debug, Clone)]
pub struct CachingProcessor {
    default_policy: Option<CachePolicy>,
    named: HashMap<String, CachePolicy>,
    excluded: HashSet<String>,
}

impl Default for CachingProcessor {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl CachingProcessor {
    pub fn new(default_policy: CachePolicy) -> Self {
        Self {
            default_policy: Some(default_policy),
            named: HashMap::new(),
            excluded: HashSet::new(),
        }
    }

    /// 只缓存通过 `with_namespace` 指定的命名空间
    pub fn selective() -> Self {
        Self {
            default_policy: None,
            named: HashMap::new(),
            excluded: HashSet::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>, policy: CachePolicy) -> Self {
        self.named.insert(namespace.into(), policy);
        self
    }

    pub fn exclude(mut self, namespace: impl Into<String>) -> Self {
        self.excluded.insert(namespace.into());
        self
    }

    pub fn policy_for(&self, namespace: &str) -> Option<&CachePolicy> {
        if self.excluded.contains(namespace) {
            return None;
        }
        self.named.get(namespace).or(self.default_policy.as_ref())
    }
}

impl LifecycleProcessor for CachingProcessor {
    fn name(&self) -> &str {
        "caching"
    }

    fn before_register(
        &self,
        namespace: &str,
        registration: Registration,
    ) -> Result<Registration, BoxError> {
        let Some(policy) = self.policy_for(namespace).cloned() else {
            return Ok(registration);
        };
        log::debug!("为容器 {} 启用缓存: {:?}", namespace, policy);
        Ok(registration.map_container(move |container| {
            Arc::new(CachedContainer::new(container, &policy)) as SharedContainer
        }))
    }
}
