use crate::assemble::{
    AssembleExecutor, AssembleOperation, Cardinality, CardinalityPolicy, ExecutionMode,
    ExecutorOptions, PropMapping,
};
use crate::cache::{CachePolicy, CachingProcessor};
use crate::container::{
    FetchResult, Fetched, MapContainer, QueryContainer, SharedContainer, TableProvider,
};
use crate::errors::{ConfigError, EngineError};
use crate::key::Key;
use crate::registry::{ContainerRegistry, DestroyOrder, RegistryPolicy, ReplacePolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// 引擎配置（TOML）
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub assemble: AssembleConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// 启动时注册的静态容器
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
    /// 预先解析好的装配操作
    #[serde(default)]
    pub operations: Vec<OperationConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    #[serde(default)]
    pub replace_policy: ReplacePolicy,
    #[serde(default)]
    pub destroy_order: DestroyOrder,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembleConfig {
    #[serde(default)]
    pub cardinality: CardinalityPolicy,
    #[serde(default)]
    pub mode: ExecutionMode,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Is cache enabled
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Default capacity per container, unbounded when absent
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Default time-to-live in seconds, never expires when absent
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    #[serde(default = "default_cache_absent_keys")]
    pub cache_absent_keys: bool,

    /// Namespaces that are never cached
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Named cache policies, each applied to its listed namespaces
    #[serde(default)]
    pub named: BTreeMap<String, NamedCacheConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            capacity: None,
            ttl_secs: None,
            cache_absent_keys: default_cache_absent_keys(),
            exclude: Vec::new(),
            named: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedCacheConfig {
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub namespaces: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// 键 -> 数据
    Map,
    /// 数据行，按键列分组
    Table,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub namespace: String,
    pub kind: ContainerKind,
    #[serde(default)]
    pub cardinality: Cardinality,
    /// map: 键为字符串，能解析为整数时按整数键处理
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    /// table: 分组键列
    #[serde(default)]
    pub key_column: Option<String>,
    /// table: 返回的列，为空表示全部
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OperationConfig {
    pub namespace: String,
    /// 目标对象上的键字段
    pub key: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub mappings: Vec<PropMapping>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub sort: i32,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_absent_keys() -> bool {
    true
}

impl EngineConfig {
    /// 从文件加载配置，应用环境变量覆盖并校验
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(origin.clone(), e))?;
        let mut config = Self::from_toml_str(&content, &origin)?;
        config.apply_env_overrides()?;
        config.validate()?;
        log::info!(
            "加载配置 {}: {} 个容器, {} 个装配操作",
            origin,
            config.containers.len(),
            config.operations.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlParse(origin.to_string(), e))
    }

    /// 环境变量覆盖：
    /// - `DATAFILL_CARDINALITY`: lenient | strict
    /// - `DATAFILL_REPLACE_POLICY`: replace | strict
    /// - `DATAFILL_CACHE_ENABLED`: true | false
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DATAFILL_CARDINALITY") {
            self.assemble.cardinality = match raw.trim().to_ascii_lowercase().as_str() {
                "lenient" => CardinalityPolicy::Lenient,
                "strict" => CardinalityPolicy::Strict,
                _ => return Err(invalid("DATAFILL_CARDINALITY", &raw)),
            };
        }
        if let Some(raw) = lookup("DATAFILL_REPLACE_POLICY") {
            self.registry.replace_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "replace" => ReplacePolicy::Replace,
                "strict" => ReplacePolicy::Strict,
                _ => return Err(invalid("DATAFILL_REPLACE_POLICY", &raw)),
            };
        }
        if let Some(raw) = lookup("DATAFILL_CACHE_ENABLED") {
            self.cache.enabled = raw
                .trim()
                .parse::<bool>()
                .map_err(|_| invalid("DATAFILL_CACHE_ENABLED", &raw))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for container in &self.containers {
            if container.namespace.trim().is_empty() {
                return Err(ConfigError::FieldMissing("containers.namespace".to_string()));
            }
            if !seen.insert(container.namespace.as_str()) {
                return Err(ConfigError::DuplicateNamespace(container.namespace.clone()));
            }
            if container.kind == ContainerKind::Table && container.key_column.is_none() {
                return Err(ConfigError::FieldMissing(format!(
                    "containers.{}.key_column",
                    container.namespace
                )));
            }
        }
        for operation in &self.operations {
            if operation.namespace.trim().is_empty() {
                return Err(ConfigError::FieldMissing("operations.namespace".to_string()));
            }
            if operation.key.trim().is_empty() {
                return Err(ConfigError::FieldMissing(format!(
                    "operations.{}.key",
                    operation.namespace
                )));
            }
            if operation.mappings.iter().any(|m| m.target.trim().is_empty()) {
                return Err(ConfigError::FieldMissing(format!(
                    "operations.{}.mappings.target",
                    operation.namespace
                )));
            }
        }
        Ok(())
    }

    pub fn registry_policy(&self) -> RegistryPolicy {
        RegistryPolicy {
            replace: self.registry.replace_policy,
            destroy_order: self.registry.destroy_order,
        }
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            cardinality: self.assemble.cardinality,
            mode: self.assemble.mode,
        }
    }

    /// 缓存关闭时返回 None
    pub fn caching_processor(&self) -> Option<CachingProcessor> {
        if !self.cache.enabled {
            return None;
        }
        let default_policy = CachePolicy {
            capacity: self.cache.capacity,
            ttl: self.cache.ttl_secs.map(Duration::from_secs),
            cache_absent_keys: self.cache.cache_absent_keys,
        };
        let mut processor = CachingProcessor::new(default_policy);
        for (name, named) in &self.cache.named {
            let policy = CachePolicy {
                capacity: named.capacity,
                ttl: named.ttl_secs.map(Duration::from_secs),
                cache_absent_keys: self.cache.cache_absent_keys,
            };
            log::debug!("缓存策略 {} 应用于 {:?}", name, named.namespaces);
            for namespace in &named.namespaces {
                processor = processor.with_namespace(namespace.clone(), policy.clone());
            }
        }
        for namespace in &self.cache.exclude {
            processor = processor.exclude(namespace.clone());
        }
        Some(processor)
    }

    pub fn build_containers(&self) -> Vec<SharedContainer> {
        self.containers.iter().map(ContainerConfig::build).collect()
    }

    pub fn operations(&self) -> Vec<AssembleOperation> {
        self.operations.iter().map(OperationConfig::to_operation).collect()
    }

    /// 创建注册表：安装缓存处理器并注册静态容器
    pub fn build_registry(&self) -> Result<Arc<ContainerRegistry>, EngineError> {
        let registry = ContainerRegistry::with_policy(self.registry_policy());
        if let Some(processor) = self.caching_processor() {
            registry.add_processor(Arc::new(processor));
        }
        for container in self.build_containers() {
            registry.register(container)?;
        }
        Ok(Arc::new(registry))
    }

    pub fn build_executor(&self) -> Result<AssembleExecutor, EngineError> {
        Ok(AssembleExecutor::with_options(
            self.build_registry()?,
            self.executor_options(),
        ))
    }
}

impl ContainerConfig {
    pub fn build(&self) -> SharedContainer {
        match self.kind {
            ContainerKind::Map => {
                let data: FetchResult = self
                    .data
                    .iter()
                    .map(|(raw, value)| {
                        let fetched = match (self.cardinality, value) {
                            (Cardinality::OneToMany | Cardinality::ManyToMany, Value::Array(items)) => {
                                Fetched::Many(items.clone())
                            }
                            (Cardinality::OneToMany | Cardinality::ManyToMany, other) => {
                                Fetched::Many(vec![other.clone()])
                            }
                            (Cardinality::OneToOne, other) => Fetched::One(other.clone()),
                        };
                        (Key::parse_lenient(raw), fetched)
                    })
                    .collect();
                Arc::new(MapContainer::new(self.namespace.clone(), data))
            }
            ContainerKind::Table => {
                let provider = Arc::new(TableProvider::new(self.rows.clone()));
                let key_column = self.key_column.clone().unwrap_or_default();
                Arc::new(
                    QueryContainer::new(self.namespace.clone(), key_column, provider)
                        .with_columns(self.columns.clone())
                        .with_cardinality(self.cardinality),
                )
            }
        }
    }
}

impl OperationConfig {
    pub fn to_operation(&self) -> AssembleOperation {
        let mut operation = AssembleOperation::new(self.namespace.clone(), self.key.clone())
            .cardinality(self.cardinality)
            .sort(self.sort);
        for mapping in &self.mappings {
            operation = operation.mapping(mapping.clone());
        }
        for group in &self.groups {
            operation = operation.group(group.clone());
        }
        operation
    }
}

fn invalid(field: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}
