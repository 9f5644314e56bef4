//! 查询提供者容器
//!
//! 将一批键翻译为一次批量查询（例如 `WHERE key_column IN (...)`），交给外部的
//! `QueryProvider` 执行，再按键列对返回的行分组。容器本身不关心查询如何实现。

use super::{Container, FetchResult, Fetched, Record};
use crate::assemble::Cardinality;
use crate::errors::{BoxError, ContainerError};
use crate::key::{Key, KeySet};
use async_trait::async_trait;
use std::sync::Arc;

/// 一次批量查询请求
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub namespace: String,
    /// 用于分组的键列
    pub key_column: String,
    pub keys: KeySet,
    /// 需要返回的列；为空表示全部
    pub columns: Vec<String>,
}

#[async_trait]
pub trait QueryProvider: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>, BoxError>;
}

pub struct QueryContainer {
    namespace: String,
    key_column: String,
    columns: Vec<String>,
    cardinality: Cardinality,
    provider: Arc<dyn QueryProvider>,
}

impl QueryContainer {
    pub fn new(
        namespace: impl Into<String>,
        key_column: impl Into<String>,
        provider: Arc<dyn QueryProvider>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key_column: key_column.into(),
            columns: Vec::new(),
            cardinality: Cardinality::OneToOne,
            provider,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// 按键列分组；查询列不包含键列时仍需要读取键列
    fn group_rows(&self, keys: &KeySet, rows: Vec<Record>) -> FetchResult {
        let mut grouped: std::collections::HashMap<Key, Vec<Record>> = Default::default();
        for row in rows {
            let Some(row_key) = row.get(&self.key_column).and_then(Key::from_value) else {
                log::debug!("忽略缺少键列 {} 的行: {}", self.key_column, self.namespace);
                continue;
            };
            let key = if keys.contains(&row_key) {
                row_key
            } else {
                match row_key.coerced().filter(|alt| keys.contains(alt)) {
                    Some(alt) => alt,
                    None => continue,
                }
            };
            grouped.entry(key).or_default().push(row);
        }

        grouped
            .into_iter()
            .map(|(key, mut rows)| {
                let fetched = match self.cardinality {
                    Cardinality::OneToOne if rows.len() == 1 => Fetched::One(rows.remove(0)),
                    // 多行交给执行器按基数策略处理
                    _ => Fetched::Many(rows),
                };
                (key, fetched)
            })
            .collect()
    }
}

#[async_trait]
impl Container for QueryContainer {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch(&self, keys: &KeySet) -> Result<FetchResult, ContainerError> {
        if keys.is_empty() {
            return Ok(FetchResult::new());
        }
        let request = QueryRequest {
            namespace: self.namespace.clone(),
            key_column: self.key_column.clone(),
            keys: keys.clone(),
            columns: self.columns.clone(),
        };
        let rows = self
            .provider
            .query(&request)
            .await
            .map_err(|e| ContainerError::fetch_failed(self.namespace.as_str(), e))?;
        log::debug!("查询 {} 返回 {} 行 ({} 个键)", self.namespace, rows.len(), keys.len());
        Ok(self.group_rows(keys, rows))
    }
}

/// 内存表查询提供者：按键列过滤行并投影列
#[derive(Debug, Clone, Default)]
pub struct TableProvider {
    rows: Vec<Record>,
}

impl TableProvider {
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl QueryProvider for TableProvider {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>, BoxError> {
        let matches = |row: &Record| {
            row.get(&request.key_column)
                .and_then(Key::from_value)
                .map(|key| {
                    request.keys.contains(&key)
                        || key.coerced().is_some_and(|alt| request.keys.contains(&alt))
                })
                .unwrap_or(false)
        };

        Ok(self
            .rows
            .iter()
            .filter(|row| matches(*row))
            .map(|row| project(row, &request.key_column, &request.columns))
            .collect())
    }
}

fn project(row: &Record, key_column: &str, columns: &[String]) -> Record {
    if columns.is_empty() {
        return row.clone();
    }
    let Some(object) = row.as_object() else {
        return row.clone();
    };
    let projected = object
        .iter()
        .filter(|(name, _)| name.as_str() == key_column || columns.iter().any(|c| c == *name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    Record::Object(projected)
}
