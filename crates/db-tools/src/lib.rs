pub mod server;

pub mod backend;
pub mod builtins;
pub mod config;
pub mod error;
pub mod logging;
pub mod tools;

pub use crate::backend::{KvBackend, MemoryKvBackend, SharedKvBackend};
pub use crate::config::{ConfigOverrides, LogConfig, ServerConfig, Transport};
pub use crate::error::{CoreError, CoreResult, ToolError};
pub use crate::server::Server;
pub use crate::tools::{Coordinator, CoordinatorConfig, Invocation, Outcome, Registry, RegistryBuilder};
