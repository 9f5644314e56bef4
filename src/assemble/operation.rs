//! 装配操作描述
//!
//! 一个装配操作把目标对象上的键字段绑定到某个容器，并声明如何把查询结果
//! 写回目标对象。操作在配置解析阶段创建，之后不再变化，可以在多次装配之间复用。

use super::target::Target;
use crate::container::Fetched;
use crate::errors::BoxError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// 每个键对应一条还是一组数据
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    OneToOne,
    OneToMany,
    /// 键字段本身包含多个键（数组或逗号分隔的字符串），写回所有命中记录的列表
    ManyToMany,
}

/// 字段映射：从数据记录的 `source` 字段读取，写入目标对象的 `target` 字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropMapping {
    /// None 表示写入整条记录
    #[serde(default)]
    pub source: Option<String>,
    pub target: String,
}

impl PropMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            target: target.into(),
        }
    }

    pub fn whole(target: impl Into<String>) -> Self {
        Self {
            source: None,
            target: target.into(),
        }
    }
}

/// 自定义合并处理器；提供时完全接管写回，标准字段映射不再执行
pub trait MergeHandler: Send + Sync {
    fn merge(&self, target: &mut dyn Target, value: &Fetched) -> Result<(), BoxError>;
}

impl<F> MergeHandler for F
where
    F: Fn(&mut dyn Target, &Fetched) -> Result<(), BoxError> + Send + Sync,
{
    fn merge(&self, target: &mut dyn Target, value: &Fetched) -> Result<(), BoxError> {
        self(target, value)
    }
}

#[derive(Clone)]
pub struct AssembleOperation {
    namespace: String,
    key_field: String,
    cardinality: Cardinality,
    mappings: Vec<PropMapping>,
    handler: Option<Arc<dyn MergeHandler>>,
    groups: BTreeSet<String>,
    sort: i32,
}

impl AssembleOperation {
    pub fn new(namespace: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key_field: key_field.into(),
            cardinality: Cardinality::OneToOne,
            mappings: Vec::new(),
            handler: None,
            groups: BTreeSet::new(),
            sort: 0,
        }
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn one_to_many(self) -> Self {
        self.cardinality(Cardinality::OneToMany)
    }

    pub fn many_to_many(self) -> Self {
        self.cardinality(Cardinality::ManyToMany)
    }

    /// 追加字段映射 source → target
    pub fn map(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.mappings.push(PropMapping::new(source, target));
        self
    }

    /// 追加整条记录到 target 的映射
    pub fn map_whole(mut self, target: impl Into<String>) -> Self {
        self.mappings.push(PropMapping::whole(target));
        self
    }

    pub fn mapping(mut self, mapping: PropMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn MergeHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn sort(mut self, sort: i32) -> Self {
        self.sort = sort;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn get_cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn mappings(&self) -> &[PropMapping] {
        &self.mappings
    }

    pub fn merge_handler(&self) -> Option<&Arc<dyn MergeHandler>> {
        self.handler.as_ref()
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn sort_order(&self) -> i32 {
        self.sort
    }

    /// 属于任一给定分组
    pub fn in_any_group<S: AsRef<str>>(&self, groups: &[S]) -> bool {
        groups.iter().any(|g| self.groups.contains(g.as_ref()))
    }

    /// 日志与报告中使用的标识
    pub fn label(&self) -> String {
        format!("{}<-{}", self.namespace, self.key_field)
    }
}

impl fmt::Debug for AssembleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembleOperation")
            .field("namespace", &self.namespace)
            .field("key_field", &self.key_field)
            .field("cardinality", &self.cardinality)
            .field("mappings", &self.mappings)
            .field("handler", &self.handler.is_some())
            .field("groups", &self.groups)
            .field("sort", &self.sort)
            .finish()
    }
}
