//! 数据源容器
//!
//! 容器是按命名空间标识的批量查询源：输入一组键，返回按键分组的数据。
//! 注册表持有容器的共享引用，装配执行器通过注册表解析容器并调用 `fetch`。

pub mod lambda;
pub mod map;
pub mod query;

pub use lambda::LambdaContainer;
pub use map::MapContainer;
pub use query::{QueryContainer, QueryProvider, QueryRequest, TableProvider};

use crate::errors::{BoxError, ContainerError};
use crate::key::{Key, KeySet};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// 容器中的一条数据
pub type Record = Value;

/// 一次查询的结果：只包含有数据的键
pub type FetchResult = HashMap<Key, Fetched>;

/// 共享的容器实例
pub type SharedContainer = Arc<dyn Container>;

/// 单个键对应的数据：一条或有序的多条
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    One(Record),
    Many(Vec<Record>),
}

impl Fetched {
    pub fn len(&self) -> usize {
        match self {
            Fetched::One(_) => 1,
            Fetched::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<&Record> {
        match self {
            Fetched::One(record) => Some(record),
            Fetched::Many(records) => records.first(),
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Fetched::One(record) => vec![record],
            Fetched::Many(records) => records,
        }
    }
}

/// 容器可选的自身生命周期能力
///
/// `init` 在容器进入使用时调用一次（注册时，或懒加载容器首次创建成功时），
/// `destroy` 在容器被移除或替换时调用一次。进程退出时不保证调用 `destroy`。
pub trait ContainerLifecycle: Send + Sync {
    fn init(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn destroy(&self) {}
}

#[async_trait]
pub trait Container: Send + Sync {
    /// 全局唯一的命名空间
    fn namespace(&self) -> &str;

    /// 批量查询；空键集合必须直接返回空结果，不产生 I/O
    async fn fetch(&self, keys: &KeySet) -> Result<FetchResult, ContainerError>;

    /// 若容器实现了自身生命周期，返回该能力
    fn lifecycle(&self) -> Option<&dyn ContainerLifecycle> {
        None
    }
}

/// 按键查找结果，找不到时尝试数字/字符串的另一种形式
pub fn lookup<'a>(result: &'a FetchResult, key: &Key) -> Option<&'a Fetched> {
    result
        .get(key)
        .or_else(|| key.coerced().and_then(|alt| result.get(&alt)))
}

/// 从数据集中挑出请求的键，结果以请求方的键为准
pub(crate) fn select_keys(data: &FetchResult, keys: &KeySet) -> FetchResult {
    keys.iter()
        .filter_map(|key| lookup(data, key).map(|found| (key.clone(), found.clone())))
        .collect()
}
