//! 装配：根据装配操作从容器取数并回填目标对象

pub mod executor;
pub mod grouping;
pub mod operation;
pub mod target;

pub use executor::{
    AssembleExecutor, AssembleReport, ExecutionMode, ExecutorOptions, OperationOutcome,
    OperationReport,
};
pub use grouping::CardinalityPolicy;
pub use operation::{AssembleOperation, Cardinality, MergeHandler, PropMapping};
pub use target::Target;
