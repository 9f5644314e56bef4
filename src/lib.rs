//! datafill: 数据装配引擎
//!
//! 容器按命名空间注册到 [`registry::ContainerRegistry`]，
//! [`assemble::AssembleExecutor`] 从目标对象收集键、批量查询容器并把结果写回。

pub mod args;
pub mod assemble;
pub mod cache;
pub mod config;
pub mod container;
pub mod errors;
pub mod key;
pub mod registry;

pub use assemble::{AssembleExecutor, AssembleOperation, AssembleReport, Cardinality};
pub use config::EngineConfig;
pub use container::{Container, Fetched, SharedContainer};
pub use errors::{AssembleError, ConfigError, ContainerError, EngineError};
pub use key::{Key, KeySet};
pub use registry::ContainerRegistry;
