//! 装配执行器
//!
//! 对一批目标对象执行装配操作：
//! 1. 收集键字段上去重后的非空键，键为空的目标跳过；多对多操作展开键字段上的多个键
//! 2. 通过注册表解析容器，找不到时整个操作失败
//! 3. 整批只调用一次 `fetch`
//! 4. 按基数分组
//! 5. 对有数据的目标按字段映射写回（或交给合并处理器）
//! 6. 没有数据的目标保持原样
//!
//! 一个操作失败只影响该操作，其余操作照常执行，结果记录在 `AssembleReport` 中。

use super::grouping::{self, CardinalityPolicy};
use super::operation::{AssembleOperation, Cardinality};
use super::target::Target;
use crate::container::{lookup, FetchResult, Fetched, SharedContainer};
use crate::errors::{AssembleError, ContainerError};
use crate::key::{Key, KeySet};
use crate::registry::ContainerRegistry;
use futures_util::future;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

/// 多个操作的执行方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// 按排序逐个执行，后面的操作能看到前面操作写入的键
    #[default]
    Sequential,
    /// 共用同一容器的操作合并为一次查询，不同容器并发查询；
    /// 所有键在执行前一次性收集
    Batched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub cardinality: CardinalityPolicy,
    pub mode: ExecutionMode,
}

/// 单个操作的执行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOutcome {
    pub keys_requested: usize,
    pub keys_matched: usize,
    pub targets_enriched: usize,
    pub targets_skipped: usize,
}

#[derive(Debug)]
pub struct OperationReport {
    pub label: String,
    pub namespace: String,
    pub result: Result<OperationOutcome, AssembleError>,
}

#[derive(Debug, Default)]
pub struct AssembleReport {
    pub operations: Vec<OperationReport>,
}

impl AssembleReport {
    pub fn is_success(&self) -> bool {
        self.operations.iter().all(|op| op.result.is_ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = (&OperationReport, &AssembleError)> {
        self.operations
            .iter()
            .filter_map(|op| op.result.as_ref().err().map(|e| (op, e)))
    }

    pub fn failed_namespaces(&self) -> Vec<&str> {
        let mut namespaces: Vec<&str> = self.errors().map(|(op, _)| op.namespace.as_str()).collect();
        namespaces.sort_unstable();
        namespaces.dedup();
        namespaces
    }

    pub fn targets_enriched(&self) -> usize {
        self.operations
            .iter()
            .filter_map(|op| op.result.as_ref().ok())
            .map(|outcome| outcome.targets_enriched)
            .sum()
    }

    /// 第一个失败的操作转为错误
    pub fn into_result(self) -> Result<Vec<OperationOutcome>, AssembleError> {
        self.operations.into_iter().map(|op| op.result).collect()
    }

    fn push(&mut self, operation: &AssembleOperation, result: Result<OperationOutcome, AssembleError>) {
        if let Err(e) = &result {
            log::warn!("装配操作 {} 失败: {}", operation.label(), e);
        }
        self.operations.push(OperationReport {
            label: operation.label(),
            namespace: operation.namespace().to_string(),
            result,
        });
    }
}

pub struct AssembleExecutor {
    registry: Arc<ContainerRegistry>,
    options: ExecutorOptions,
}

impl AssembleExecutor {
    pub fn new(registry: Arc<ContainerRegistry>) -> Self {
        Self::with_options(registry, ExecutorOptions::default())
    }

    pub fn with_options(registry: Arc<ContainerRegistry>, options: ExecutorOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// 执行全部操作
    pub async fn execute<T>(&self, targets: &mut [T], operations: &[AssembleOperation]) -> AssembleReport
    where
        T: Target + Send,
    {
        self.execute_filtered(targets, operations, |_| true).await
    }

    /// 只执行属于任一给定分组的操作
    pub async fn execute_in_groups<T, S>(
        &self,
        targets: &mut [T],
        operations: &[AssembleOperation],
        groups: &[S],
    ) -> AssembleReport
    where
        T: Target + Send,
        S: AsRef<str> + Sync,
    {
        self.execute_filtered(targets, operations, |op| op.in_any_group(groups))
            .await
    }

    /// 按过滤条件选择操作，按 sort 稳定排序后执行
    pub async fn execute_filtered<T, F>(
        &self,
        targets: &mut [T],
        operations: &[AssembleOperation],
        filter: F,
    ) -> AssembleReport
    where
        T: Target + Send,
        F: Fn(&AssembleOperation) -> bool,
    {
        let mut selected: Vec<&AssembleOperation> = operations.iter().filter(|op| filter(*op)).collect();
        selected.sort_by_key(|op| op.sort_order());

        let mut report = AssembleReport::default();
        if targets.is_empty() || selected.is_empty() {
            return report;
        }

        match self.options.mode {
            ExecutionMode::Sequential => {
                for operation in selected {
                    let result = self.execute_operation(targets, operation).await;
                    report.push(operation, result);
                }
            }
            ExecutionMode::Batched => self.execute_batched(targets, &selected, &mut report).await,
        }
        report
    }

    /// 并发执行多个互不相关的批次
    pub async fn execute_batches<T>(
        &self,
        batches: Vec<&mut [T]>,
        operations: &[AssembleOperation],
    ) -> Vec<AssembleReport>
    where
        T: Target + Send,
    {
        future::join_all(batches.into_iter().map(|batch| self.execute(batch, operations))).await
    }

    /// 对一批目标执行单个操作
    pub async fn execute_operation<T>(
        &self,
        targets: &mut [T],
        operation: &AssembleOperation,
    ) -> Result<OperationOutcome, AssembleError>
    where
        T: Target + Send,
    {
        let keys = collect_keys(targets, operation);
        let container = self.registry.get(operation.namespace())?;
        let raw = fetch(&container, &keys).await?;
        self.apply(targets, operation, &keys, raw)
    }

    async fn execute_batched<T>(
        &self,
        targets: &mut [T],
        operations: &[&AssembleOperation],
        report: &mut AssembleReport,
    ) where
        T: Target + Send,
    {
        // 按命名空间分组，保持首次出现的顺序
        let mut batches: Vec<(&str, Vec<&AssembleOperation>, Vec<KeySet>)> = Vec::new();
        for &operation in operations {
            let keys = collect_keys(targets, operation);
            match batches.iter_mut().find(|(ns, _, _)| *ns == operation.namespace()) {
                Some((_, ops, key_sets)) => {
                    ops.push(operation);
                    key_sets.push(keys);
                }
                None => batches.push((operation.namespace(), vec![operation], vec![keys])),
            }
        }

        let fetches = batches.iter().map(|(namespace, _, key_sets)| async move {
            let union: KeySet = key_sets.iter().flatten().cloned().collect();
            let result = match self.registry.get(namespace) {
                Ok(container) => fetch(&container, &union).await,
                Err(e) => Err(e),
            };
            result.map_err(Arc::new)
        });
        let fetched = future::join_all(fetches).await;

        for ((_, ops, key_sets), raw) in batches.into_iter().zip(fetched) {
            match raw {
                Ok(raw) => {
                    for (operation, keys) in ops.into_iter().zip(key_sets) {
                        let subset = restrict(&raw, &keys);
                        let result = self.apply(targets, operation, &keys, subset);
                        report.push(operation, result);
                    }
                }
                Err(e) => {
                    for operation in ops {
                        report.push(operation, Err(AssembleError::Container(Arc::clone(&e))));
                    }
                }
            }
        }
    }

    fn apply<T: Target>(
        &self,
        targets: &mut [T],
        operation: &AssembleOperation,
        keys: &KeySet,
        raw: FetchResult,
    ) -> Result<OperationOutcome, AssembleError> {
        let grouped = grouping::group(
            operation.namespace(),
            keys,
            raw,
            operation.get_cardinality(),
            self.options.cardinality,
        )?;

        let mut outcome = OperationOutcome {
            keys_requested: keys.len(),
            keys_matched: grouped.len(),
            ..Default::default()
        };
        let cardinality = operation.get_cardinality();
        for target in targets.iter_mut() {
            let value = target
                .read(operation.key_field())
                .and_then(|v| resolve(&grouped, &v, cardinality));
            match value {
                Some(value) => {
                    grouping::write_back(target, operation, &value)?;
                    outcome.targets_enriched += 1;
                }
                None => outcome.targets_skipped += 1,
            }
        }

        log::debug!(
            "装配 {}: {} 个键, 命中 {}, 回填 {} 个目标",
            operation.label(),
            outcome.keys_requested,
            outcome.keys_matched,
            outcome.targets_enriched
        );
        Ok(outcome)
    }
}

fn collect_keys<T: Target>(targets: &[T], operation: &AssembleOperation) -> KeySet {
    let cardinality = operation.get_cardinality();
    targets
        .iter()
        .filter_map(|target| target.read(operation.key_field()))
        .flat_map(|value| target_keys(&value, cardinality))
        .collect()
}

fn target_keys(value: &Value, cardinality: Cardinality) -> Vec<Key> {
    match cardinality {
        Cardinality::ManyToMany => Key::from_value_list(value),
        Cardinality::OneToOne | Cardinality::OneToMany => {
            Key::from_value(value).into_iter().collect()
        }
    }
}

/// 目标键字段对应的数据；多对多按目标上键的顺序拼接
fn resolve<'a>(
    grouped: &'a FetchResult,
    value: &Value,
    cardinality: Cardinality,
) -> Option<Cow<'a, Fetched>> {
    match cardinality {
        Cardinality::ManyToMany => {
            let keys = Key::from_value_list(value);
            grouping::concat(keys.iter().filter_map(|key| lookup(grouped, key))).map(Cow::Owned)
        }
        Cardinality::OneToOne | Cardinality::OneToMany => Key::from_value(value)
            .and_then(|key| lookup(grouped, &key))
            .map(Cow::Borrowed),
    }
}

async fn fetch(container: &SharedContainer, keys: &KeySet) -> Result<FetchResult, ContainerError> {
    if keys.is_empty() {
        return Ok(FetchResult::new());
    }
    container.fetch(keys).await
}

/// 合并查询的结果中只保留某个操作请求的键
fn restrict(raw: &FetchResult, keys: &KeySet) -> FetchResult {
    keys.iter()
        .filter_map(|key| lookup(raw, key).map(|found| (key.clone(), found.clone())))
        .collect()
}
