//! 容器生命周期处理器
//!
//! 注册表的每次变更都会经过处理器链：
//! - `BeforeRegister`：容器或工厂写入注册表之前，处理器可以替换它（例如包装缓存）
//! - `AfterCreate`：容器实例即将被保存（注册实例时，或懒加载工厂首次创建后）
//! - `AfterDestroy`：容器被移除或替换之后，处理器做清理
//!
//! 创建类事件按处理器添加顺序执行，销毁事件的顺序由 `DestroyOrder` 决定。

use crate::container::SharedContainer;
use crate::errors::{BoxError, ContainerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    BeforeRegister,
    AfterCreate,
    AfterDestroy,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleStage::BeforeRegister => "before-register",
            LifecycleStage::AfterCreate => "after-create",
            LifecycleStage::AfterDestroy => "after-destroy",
        };
        f.write_str(name)
    }
}

/// 销毁事件在处理器链上的执行顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyOrder {
    /// 与添加顺序相反（默认，与创建对称）
    #[default]
    Reverse,
    Forward,
}

/// 懒加载容器工厂
pub trait ContainerFactory: Send + Sync {
    fn create(&self, namespace: &str) -> Result<SharedContainer, BoxError>;
}

impl<F> ContainerFactory for F
where
    F: Fn(&str) -> Result<SharedContainer, BoxError> + Send + Sync,
{
    fn create(&self, namespace: &str) -> Result<SharedContainer, BoxError> {
        self(namespace)
    }
}

/// 注册请求：容器实例，或首次使用时才创建容器的工厂
#[derive(Clone)]
pub enum Registration {
    Instance(SharedContainer),
    Lazy(Arc<dyn ContainerFactory>),
}

impl Registration {
    pub fn is_lazy(&self) -> bool {
        matches!(self, Registration::Lazy(_))
    }

    /// 对（将要）创建的容器做变换；懒加载时变换在工厂创建容器后执行
    pub fn map_container<F>(self, map: F) -> Registration
    where
        F: Fn(SharedContainer) -> SharedContainer + Send + Sync + 'static,
    {
        match self {
            Registration::Instance(container) => Registration::Instance(map(container)),
            Registration::Lazy(inner) => Registration::Lazy(Arc::new(MappedFactory {
                inner,
                map: Box::new(map),
            })),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Instance(container) => {
                f.debug_tuple("Instance").field(&container.namespace()).finish()
            }
            Registration::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

impl From<SharedContainer> for Registration {
    fn from(container: SharedContainer) -> Self {
        Registration::Instance(container)
    }
}

struct MappedFactory {
    inner: Arc<dyn ContainerFactory>,
    map: Box<dyn Fn(SharedContainer) -> SharedContainer + Send + Sync>,
}

impl ContainerFactory for MappedFactory {
    fn create(&self, namespace: &str) -> Result<SharedContainer, BoxError> {
        self.inner.create(namespace).map(|container| (self.map)(container))
    }
}

/// 生命周期处理器；所有方法都有透传的默认实现
pub trait LifecycleProcessor: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn before_register(
        &self,
        _namespace: &str,
        registration: Registration,
    ) -> Result<Registration, BoxError> {
        Ok(registration)
    }

    fn after_create(
        &self,
        _namespace: &str,
        container: SharedContainer,
    ) -> Result<SharedContainer, BoxError> {
        Ok(container)
    }

    fn after_destroy(&self, _namespace: &str, _container: &SharedContainer) -> Result<(), BoxError> {
        Ok(())
    }
}

/// 注册时刻的处理器链快照
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Arc<Vec<Arc<dyn LifecycleProcessor>>>,
}

impl ProcessorChain {
    pub fn new(processors: Vec<Arc<dyn LifecycleProcessor>>) -> Self {
        Self {
            processors: Arc::new(processors),
        }
    }

    pub fn before_register(
        &self,
        namespace: &str,
        registration: Registration,
    ) -> Result<Registration, ContainerError> {
        self.processors
            .iter()
            .try_fold(registration, |current, processor| {
                processor
                    .before_register(namespace, current)
                    .map_err(|e| lifecycle_error(namespace, processor.as_ref(), LifecycleStage::BeforeRegister, e))
            })
    }

    /// 依次执行 AfterCreate；某个处理器失败时，已收到该事件的处理器会收到对应的 AfterDestroy
    pub fn after_create(
        &self,
        namespace: &str,
        container: SharedContainer,
    ) -> Result<SharedContainer, ContainerError> {
        let mut current = container;
        for (index, processor) in self.processors.iter().enumerate() {
            match processor.after_create(namespace, Arc::clone(&current)) {
                Ok(next) => current = next,
                Err(e) => {
                    let err = lifecycle_error(namespace, processor.as_ref(), LifecycleStage::AfterCreate, e);
                    undo_create(namespace, &current, self.processors[..index].iter().rev());
                    return Err(err);
                }
            }
        }
        Ok(current)
    }

    /// 按 `order` 执行 AfterDestroy；某个处理器失败时，已收到该事件的处理器会重新收到 AfterCreate
    pub fn after_destroy(
        &self,
        namespace: &str,
        container: &SharedContainer,
        order: DestroyOrder,
    ) -> Result<(), ContainerError> {
        let ordered = self.ordered(order);
        for (index, processor) in ordered.iter().copied().enumerate() {
            if let Err(e) = processor.after_destroy(namespace, container) {
                let err = lifecycle_error(namespace, processor.as_ref(), LifecycleStage::AfterDestroy, e);
                undo_destroy(namespace, container, ordered[..index].iter().rev().copied());
                return Err(err);
            }
        }
        Ok(())
    }

    /// 撤销一次完整的 AfterCreate：按添加顺序的逆序发送 AfterDestroy，忽略错误
    pub fn revert_create(&self, namespace: &str, container: &SharedContainer) {
        undo_create(namespace, container, self.processors.iter().rev());
    }

    /// 撤销一次完整的 AfterDestroy：按执行顺序的逆序重新发送 AfterCreate，忽略返回的替代容器
    pub fn revert_destroy(&self, namespace: &str, container: &SharedContainer, order: DestroyOrder) {
        undo_destroy(namespace, container, self.ordered(order).into_iter().rev());
    }

    fn ordered(&self, order: DestroyOrder) -> Vec<&Arc<dyn LifecycleProcessor>> {
        match order {
            DestroyOrder::Reverse => self.processors.iter().rev().collect(),
            DestroyOrder::Forward => self.processors.iter().collect(),
        }
    }
}

fn undo_create<'a>(
    namespace: &str,
    container: &SharedContainer,
    processors: impl Iterator<Item = &'a Arc<dyn LifecycleProcessor>>,
) {
    for processor in processors {
        if let Err(e) = processor.after_destroy(namespace, container) {
            log::warn!(
                "回滚容器 {} 时处理器 {} 的 {} 失败: {}",
                namespace,
                processor.name(),
                LifecycleStage::AfterDestroy,
                e
            );
        }
    }
}

fn undo_destroy<'a>(
    namespace: &str,
    container: &SharedContainer,
    processors: impl Iterator<Item = &'a Arc<dyn LifecycleProcessor>>,
) {
    for processor in processors {
        if let Err(e) = processor.after_create(namespace, Arc::clone(container)) {
            log::warn!(
                "回滚容器 {} 时处理器 {} 的 {} 失败: {}",
                namespace,
                processor.name(),
                LifecycleStage::AfterCreate,
                e
            );
        }
    }
}

fn lifecycle_error(
    namespace: &str,
    processor: &dyn LifecycleProcessor,
    stage: LifecycleStage,
    source: BoxError,
) -> ContainerError {
    log::warn!(
        "生命周期处理器 {} 在 {} 阶段处理容器 {} 失败: {}",
        processor.name(),
        stage,
        namespace,
        source
    );
    ContainerError::Lifecycle {
        namespace: namespace.to_string(),
        processor: processor.name().to_string(),
        stage,
        source,
    }
}
