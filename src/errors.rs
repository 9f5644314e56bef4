use crate::key::Key;
use crate::registry::LifecycleStage;
use std::sync::Arc;
use thiserror::Error;

/// 通用的底层错误类型（容器实现、工厂、处理器返回）
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),
    #[error("Assemble error: {0}")]
    Assemble(#[from] AssembleError),
}

/// 容器注册表与容器查询相关的错误
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container '{namespace}' is not registered")]
    NotFound { namespace: String },

    #[error("Container '{namespace}' is already registered")]
    DuplicateRegistration { namespace: String },

    #[error("Lifecycle processor '{processor}' failed during {stage} of '{namespace}': {source}")]
    Lifecycle {
        namespace: String,
        processor: String,
        stage: LifecycleStage,
        #[source]
        source: BoxError,
    },

    #[error("Container '{namespace}' failed to initialize: {source}")]
    InitFailed {
        namespace: String,
        #[source]
        source: BoxError,
    },

    #[error("Factory for container '{namespace}' failed: {source}")]
    FactoryFailed {
        namespace: String,
        #[source]
        source: BoxError,
    },

    #[error("Fetch from container '{namespace}' failed: {source}")]
    FetchFailed {
        namespace: String,
        #[source]
        source: BoxError,
    },
}

impl ContainerError {
    pub fn not_found(namespace: impl Into<String>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
        }
    }

    pub fn fetch_failed(namespace: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::FetchFailed {
            namespace: namespace.into(),
            source: source.into(),
        }
    }

    pub fn factory_failed(namespace: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::FactoryFailed {
            namespace: namespace.into(),
            source: source.into(),
        }
    }

    /// 是否为配置形态的错误（未注册 / 重复注册）
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::DuplicateRegistration { .. }
        )
    }
}

/// 装配操作执行过程中的错误
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Container '{namespace}' returned {count} values for one-to-one key {key}")]
    CardinalityMismatch {
        namespace: String,
        key: Key,
        count: usize,
    },

    /// 合并查询失败时，共用同一容器的操作共享同一个错误
    #[error(transparent)]
    Container(Arc<ContainerError>),

    #[error("Merge handler for '{namespace}' failed: {source}")]
    Handler {
        namespace: String,
        #[source]
        source: BoxError,
    },
}

impl AssembleError {
    /// 容器层面的错误（未注册、创建失败、查询失败等）
    pub fn container_error(&self) -> Option<&ContainerError> {
        match self {
            Self::Container(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ContainerError> for AssembleError {
    fn from(error: ContainerError) -> Self {
        Self::Container(Arc::new(error))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from file '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
    #[error("Required configuration field '{0}' is missing or invalid")]
    FieldMissing(String),
    #[error("Container namespace '{0}' is declared more than once")]
    DuplicateNamespace(String),
}
