//! Response behaviour: what to send for a matched resource.

mod context;
mod resolver;
mod types;

pub use context::ExecutionContext;
pub use resolver::{
    ConfiguredStatusCode, ResponseBehaviourResolver, ScriptExecutionError, StatusCodeStrategy,
};
pub use types::{BehaviourError, BehaviourKind, PerformanceSimulation, ResponseBehaviour};
