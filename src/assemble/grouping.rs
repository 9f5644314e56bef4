//! 分组与写回
//!
//! 容器返回的原始结果先按操作声明的基数规整：一对一取单条，一对多与多对多取有序列表；
//! 随后按字段映射把数据写入目标对象。多对多的目标先按自身键的顺序拼接各键的列表。

use super::operation::{AssembleOperation, Cardinality, PropMapping};
use super::target::Target;
use crate::container::{FetchResult, Fetched, Record};
use crate::errors::AssembleError;
use crate::key::KeySet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一对一操作遇到多条数据时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityPolicy {
    /// 取第一条并记录警告
    #[default]
    Lenient,
    /// 返回 `CardinalityMismatch`
    Strict,
}

/// 按基数规整原始结果，丢弃未请求的键
pub fn group(
    namespace: &str,
    keys: &KeySet,
    raw: FetchResult,
    cardinality: Cardinality,
    policy: CardinalityPolicy,
) -> Result<FetchResult, AssembleError> {
    let mut grouped = FetchResult::with_capacity(raw.len());
    for (key, fetched) in raw {
        let requested =
            keys.contains(&key) || key.coerced().is_some_and(|alt| keys.contains(&alt));
        if !requested {
            log::debug!("丢弃容器 {} 返回的未请求键 {}", namespace, key);
            continue;
        }

        let value = match (cardinality, fetched) {
            (Cardinality::OneToOne, Fetched::One(record)) => Fetched::One(record),
            (Cardinality::OneToOne, Fetched::Many(records)) => {
                let count = records.len();
                let mut records = records.into_iter();
                let Some(first) = records.next() else {
                    continue;
                };
                if count > 1 {
                    match policy {
                        CardinalityPolicy::Strict => {
                            return Err(AssembleError::CardinalityMismatch {
                                namespace: namespace.to_string(),
                                key,
                                count,
                            });
                        }
                        CardinalityPolicy::Lenient => log::warn!(
                            "容器 {} 的一对一键 {} 对应 {} 条数据，取第一条",
                            namespace,
                            key,
                            count
                        ),
                    }
                }
                Fetched::One(first)
            }
            (Cardinality::OneToMany | Cardinality::ManyToMany, Fetched::Many(records)) => {
                Fetched::Many(records)
            }
            (Cardinality::OneToMany | Cardinality::ManyToMany, Fetched::One(record)) => {
                Fetched::Many(vec![record])
            }
        };
        grouped.insert(key, value);
    }
    Ok(grouped)
}

/// 按给定顺序拼接多个键的数据；没有任何命中时返回 None
pub fn concat<'a>(values: impl IntoIterator<Item = &'a Fetched>) -> Option<Fetched> {
    let mut matched = false;
    let mut records = Vec::new();
    for value in values {
        matched = true;
        match value {
            Fetched::One(record) => records.push(record.clone()),
            Fetched::Many(many) => records.extend(many.iter().cloned()),
        }
    }
    matched.then_some(Fetched::Many(records))
}

/// 把规整后的数据写入目标对象
pub fn write_back<T: Target>(
    target: &mut T,
    operation: &AssembleOperation,
    value: &Fetched,
) -> Result<(), AssembleError> {
    if let Some(handler) = operation.merge_handler() {
        return handler
            .merge(target, value)
            .map_err(|source| AssembleError::Handler {
                namespace: operation.namespace().to_string(),
                source,
            });
    }

    for mapping in operation.mappings() {
        apply_mapping(target, mapping, value);
    }
    Ok(())
}

fn apply_mapping<T: Target>(target: &mut T, mapping: &PropMapping, value: &Fetched) {
    let source = mapping.source.as_deref();
    match value {
        Fetched::One(record) => {
            // 记录上缺少字段时保留目标原值
            if let Some(projected) = project(record, source) {
                target.write(&mapping.target, projected);
            }
        }
        Fetched::Many(records) => {
            let projected = records.iter().filter_map(|r| project(r, source)).collect();
            target.write(&mapping.target, Value::Array(projected));
        }
    }
}

fn project(record: &Record, source: Option<&str>) -> Option<Value> {
    match source {
        None => Some(record.clone()),
        Some(field) => record.get(field).cloned(),
    }
}
