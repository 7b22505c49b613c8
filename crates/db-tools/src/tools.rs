//! Tool registry, validation and execution coordinator.

pub mod executor;
pub mod invocation;
pub mod limiter;
pub mod outcome;
pub mod registry;
pub mod resource;
pub mod schema;
pub mod validator;

pub use executor::{Coordinator, CoordinatorConfig};
pub use invocation::{new_correlation_id, Invocation, InvocationRecord, InvocationState};
pub use limiter::Limiter;
pub use outcome::{Failure, FailureKind, Outcome};
pub use registry::{Registry, RegistryBuilder};
pub use resource::{ResourceGuard, ResourceLocks};
pub use schema::{
    boxed_tool_future, ResourceScope, SideEffect, ToolContext, ToolDescriptor, ToolFuture,
    ToolHandler,
};
pub use validator::{check_schema, collect_schema, validate, validate_with, Patterns, SchemaError};
