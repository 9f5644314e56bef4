//! 容器注册表
//!
//! 管理容器命名空间的唯一归属：
//! - 每个命名空间同一时刻只有一个条目，替换是原子的
//! - 注册、移除、懒加载创建按命名空间互斥，生命周期处理器链不会交错执行
//! - 已创建容器的读取不获取任何命名空间锁
//! - 懒加载工厂在并发首次使用时最多只调用一次

mod lifecycle;

pub use lifecycle::{
    ContainerFactory, DestroyOrder, LifecycleProcessor, LifecycleStage, ProcessorChain,
    Registration,
};

use crate::container::SharedContainer;
use crate::errors::ContainerError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// 重复注册同一命名空间时的策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacePolicy {
    /// 原子替换并触发销毁/创建事件
    #[default]
    Replace,
    /// 拒绝并返回 `DuplicateRegistration`
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryPolicy {
    pub replace: ReplacePolicy,
    pub destroy_order: DestroyOrder,
}

struct RegistryEntry {
    generation: u64,
    registered_at: DateTime<Utc>,
    /// 懒加载条目的工厂；实例条目为 None
    factory: Option<Arc<dyn ContainerFactory>>,
    instance: OnceLock<SharedContainer>,
    /// 注册时的处理器链快照
    chain: ProcessorChain,
}

/// 注册表条目的只读视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub namespace: String,
    pub generation: u64,
    pub registered_at: DateTime<Utc>,
    pub lazy: bool,
    pub materialized: bool,
}

#[derive(Default)]
struct InnerStats {
    lookups: AtomicUsize,
    hits: AtomicUsize,
    materializations: AtomicUsize,
    registrations: AtomicUsize,
    replacements: AtomicUsize,
    removals: AtomicUsize,
}

/// 注册表统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub lookups: usize,
    pub hits: usize,
    pub materializations: usize,
    pub registrations: usize,
    pub replacements: usize,
    pub removals: usize,
}

impl RegistryStats {
    /// 直接命中已创建实例的比例
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

pub struct ContainerRegistry {
    entries: DashMap<String, Arc<RegistryEntry>>,
    /// 按命名空间的变更锁
    locks: DashMap<String, Arc<Mutex<()>>>,
    processors: RwLock<Vec<Arc<dyn LifecycleProcessor>>>,
    policy: RegistryPolicy,
    generation: AtomicU64,
    stats: InnerStats,
}

impl ContainerRegistry {
    /// 不带任何处理器的注册表
    pub fn new() -> Self {
        Self::with_policy(RegistryPolicy::default())
    }

    pub fn with_policy(policy: RegistryPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            processors: RwLock::new(Vec::new()),
            policy,
            generation: AtomicU64::new(0),
            stats: InnerStats::default(),
        }
    }

    /// 默认注册表：为所有新注册的容器启用无界缓存
    pub fn with_default_processors() -> Self {
        let registry = Self::new();
        registry.add_processor(Arc::new(crate::cache::CachingProcessor::default()));
        registry
    }

    pub fn policy(&self) -> RegistryPolicy {
        self.policy
    }

    /// 追加生命周期处理器；只影响之后的注册
    pub fn add_processor(&self, processor: Arc<dyn LifecycleProcessor>) {
        log::info!("安装容器生命周期处理器: {}", processor.name());
        self.processors.write().push(processor);
    }

    /// 以容器自身的命名空间注册
    pub fn register(&self, container: SharedContainer) -> Result<(), ContainerError> {
        let namespace = container.namespace().to_string();
        self.register_with(&namespace, Registration::Instance(container))
    }

    /// 注册懒加载工厂，首次 `get` 时才创建容器
    pub fn register_lazy<F>(&self, namespace: &str, factory: F) -> Result<(), ContainerError>
    where
        F: ContainerFactory + 'static,
    {
        self.register_with(namespace, Registration::Lazy(Arc::new(factory)))
    }

    /// 注册实例或工厂
    ///
    /// 替换已有容器时的顺序：BeforeRegister(新) → AfterDestroy(旧) → AfterCreate(新)
    /// → init(新) → 替换条目 → destroy(旧)。任何一步失败都会中止注册：
    /// 已收到 AfterCreate(新) 的处理器收到 AfterDestroy(新)，
    /// 已收到 AfterDestroy(旧) 的处理器重新收到 AfterCreate(旧)，注册表保持原状。
    pub fn register_with(
        &self,
        namespace: &str,
        registration: Registration,
    ) -> Result<(), ContainerError> {
        let lock = self.mutation_lock(namespace);
        let _guard = lock.lock();

        let existing = self.current_entry(namespace);
        if existing.is_some() && self.policy.replace == ReplacePolicy::Strict {
            return Err(ContainerError::DuplicateRegistration {
                namespace: namespace.to_string(),
            });
        }

        let chain = self.snapshot();
        let registration = chain.before_register(namespace, registration)?;

        let order = self.policy.destroy_order;
        let retired = existing
            .as_ref()
            .and_then(|old| old.instance.get().map(|container| (old, Arc::clone(container))));
        if let Some((old, container)) = retired.as_ref() {
            old.chain.after_destroy(namespace, container, order)?;
        }
        let restore = |err: ContainerError| {
            if let Some((old, container)) = retired.as_ref() {
                old.chain.revert_destroy(namespace, container, order);
            }
            err
        };

        let (factory, instance) = match registration {
            Registration::Instance(container) => {
                let container = chain.after_create(namespace, container).map_err(restore)?;
                if let Err(e) = init_container(namespace, &container) {
                    chain.revert_create(namespace, &container);
                    return Err(restore(e));
                }
                (None, OnceLock::from(container))
            }
            Registration::Lazy(factory) => (Some(factory), OnceLock::new()),
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = RegistryEntry {
            generation,
            registered_at: Utc::now(),
            factory,
            instance,
            chain,
        };

        let lazy = entry.factory.is_some();
        self.entries.insert(namespace.to_string(), Arc::new(entry));
        self.stats.registrations.fetch_add(1, Ordering::Relaxed);

        match existing {
            Some(old) => {
                self.stats.replacements.fetch_add(1, Ordering::Relaxed);
                log::info!("替换容器: {} (generation {})", namespace, generation);
                if let Some(container) = old.instance.get() {
                    destroy_container(namespace, container);
                }
            }
            None => log::info!("注册容器: {} (lazy: {})", namespace, lazy),
        }
        Ok(())
    }

    /// 获取容器；懒加载条目在首次调用时创建
    pub fn get(&self, namespace: &str) -> Result<SharedContainer, ContainerError> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);

        let entry = self
            .current_entry(namespace)
            .ok_or_else(|| ContainerError::not_found(namespace))?;
        if let Some(container) = entry.instance.get() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(container));
        }

        self.materialize(namespace)
    }

    fn materialize(&self, namespace: &str) -> Result<SharedContainer, ContainerError> {
        let lock = self.mutation_lock(namespace);
        let _guard = lock.lock();

        // 等锁期间条目可能已被创建、替换或移除
        let entry = self
            .current_entry(namespace)
            .ok_or_else(|| ContainerError::not_found(namespace))?;
        if let Some(container) = entry.instance.get() {
            return Ok(Arc::clone(container));
        }
        let factory = entry
            .factory
            .as_ref()
            .ok_or_else(|| ContainerError::not_found(namespace))?;

        log::debug!("懒加载创建容器: {}", namespace);
        let container = factory
            .create(namespace)
            .map_err(|e| ContainerError::factory_failed(namespace, e))?;
        let container = entry.chain.after_create(namespace, container)?;
        if let Err(e) = init_container(namespace, &container) {
            entry.chain.revert_create(namespace, &container);
            return Err(e);
        }

        let _ = entry.instance.set(Arc::clone(&container));
        self.stats.materializations.fetch_add(1, Ordering::Relaxed);
        Ok(container)
    }

    /// 移除容器，返回是否存在该条目
    ///
    /// 已创建的容器先经过 AfterDestroy 处理器链，然后才调用容器自身的 `destroy`。
    pub fn remove(&self, namespace: &str) -> Result<bool, ContainerError> {
        let lock = self.mutation_lock(namespace);
        let _guard = lock.lock();

        let Some(entry) = self.current_entry(namespace) else {
            return Ok(false);
        };
        if let Some(container) = entry.instance.get() {
            entry
                .chain
                .after_destroy(namespace, container, self.policy.destroy_order)?;
        }

        self.entries.remove(namespace);
        self.stats.removals.fetch_add(1, Ordering::Relaxed);
        log::info!("移除容器: {}", namespace);

        if let Some(container) = entry.instance.get() {
            destroy_container(namespace, container);
        }
        self.release_lock(namespace, &lock);
        Ok(true)
    }

    /// 移除所有容器（关闭时调用），返回移除失败的错误
    pub fn clear(&self) -> Vec<ContainerError> {
        let mut failures = Vec::new();
        for namespace in self.namespaces() {
            if let Err(e) = self.remove(&namespace) {
                log::warn!("移除容器 {} 失败: {}", namespace, e);
                failures.push(e);
            }
        }
        failures
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.entries.contains_key(namespace)
    }

    /// 已注册的命名空间（排序）
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        namespaces.sort();
        namespaces
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_info(&self, namespace: &str) -> Option<EntryInfo> {
        self.current_entry(namespace).map(|entry| EntryInfo {
            namespace: namespace.to_string(),
            generation: entry.generation,
            registered_at: entry.registered_at,
            lazy: entry.factory.is_some(),
            materialized: entry.instance.get().is_some(),
        })
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            lookups: self.stats.lookups.load(Ordering::Relaxed),
            hits: self.stats.hits.load(Ordering::Relaxed),
            materializations: self.stats.materializations.load(Ordering::Relaxed),
            registrations: self.stats.registrations.load(Ordering::Relaxed),
            replacements: self.stats.replacements.load(Ordering::Relaxed),
            removals: self.stats.removals.load(Ordering::Relaxed),
        }
    }

    fn current_entry(&self, namespace: &str) -> Option<Arc<RegistryEntry>> {
        self.entries.get(namespace).map(|e| Arc::clone(e.value()))
    }

    fn snapshot(&self) -> ProcessorChain {
        ProcessorChain::new(self.processors.read().clone())
    }

    fn mutation_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(namespace) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.locks.entry(namespace.to_string()).or_default().value())
    }

    /// 命名空间已无条目且没有其他持有者时丢弃它的锁；持有者为锁表本身与调用方
    fn release_lock(&self, namespace: &str, held: &Arc<Mutex<()>>) {
        self.locks.remove_if(namespace, |_, lock| {
            Arc::ptr_eq(lock, held)
                && Arc::strong_count(lock) <= 2
                && !self.entries.contains_key(namespace)
        });
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn init_container(namespace: &str, container: &SharedContainer) -> Result<(), ContainerError> {
    if let Some(lifecycle) = container.lifecycle() {
        lifecycle.init().map_err(|source| ContainerError::InitFailed {
            namespace: namespace.to_string(),
            source,
        })?;
    }
    Ok(())
}

fn destroy_container(namespace: &str, container: &SharedContainer) {
    if let Some(lifecycle) = container.lifecycle() {
        log::debug!("销毁容器: {}", namespace);
        lifecycle.destroy();
    }
}
