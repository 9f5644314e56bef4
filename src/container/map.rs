//! 基于内存 Map 的字典容器

use super::{select_keys, Container, ContainerLifecycle, FetchResult, Fetched, Record};
use crate::errors::ContainerError;
use crate::key::{Key, KeySet};
use async_trait::async_trait;
use parking_lot::RwLock;

/// 创建后数据不再变化的键值容器；被销毁时清空数据
pub struct MapContainer {
    namespace: String,
    data: RwLock<FetchResult>,
}

impl MapContainer {
    pub fn new(namespace: impl Into<String>, data: FetchResult) -> Self {
        Self {
            namespace: namespace.into(),
            data: RwLock::new(data),
        }
    }

    /// 一对一数据：每个键一条记录
    pub fn from_records<I, K>(namespace: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = (K, Record)>,
        K: Into<Key>,
    {
        let data = records
            .into_iter()
            .map(|(key, record)| (key.into(), Fetched::One(record)))
            .collect();
        Self::new(namespace, data)
    }

    /// 一对多数据：每个键一组有序记录
    pub fn from_groups<I, K>(namespace: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<Record>)>,
        K: Into<Key>,
    {
        let data = groups
            .into_iter()
            .map(|(key, records)| (key.into(), Fetched::Many(records)))
            .collect();
        Self::new(namespace, data)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl Container for MapContainer {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch(&self, keys: &KeySet) -> Result<FetchResult, ContainerError> {
        if keys.is_empty() {
            return Ok(FetchResult::new());
        }
        Ok(select_keys(&self.data.read(), keys))
    }

    fn lifecycle(&self) -> Option<&dyn ContainerLifecycle> {
        Some(self)
    }
}

impl ContainerLifecycle for MapContainer {
    fn destroy(&self) {
        log::debug!("清空字典容器数据: {}", self.namespace);
        self.data.write().clear();
    }
}
