//! Tool descriptor types and the handler capability interface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ToolError;

/// Declared side-effect class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// Tool only reads its backing resource.
    ReadOnly,
    /// Tool writes to its backing resource.
    Mutating,
}

impl SideEffect {
    pub fn is_mutating(&self) -> bool {
        matches!(self, SideEffect::Mutating)
    }
}

/// Per-invocation context handed to a handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub correlation_id: String,
    pub tool: String,
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send>>;

/// Handler type: takes validated JSON args plus context, resolves to a JSON result.
pub type ToolHandler = Arc<dyn Fn(serde_json::Value, ToolContext) -> ToolFuture + Send + Sync>;

pub fn boxed_tool_future<F>(future: F) -> ToolFuture
where
    F: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
{
    Box::pin(future)
}

/// Backing resource a tool touches.
///
/// Invocations on the same resource are serialized against mutating tools.
/// `key_field` names a string argument that narrows the scope, so that e.g.
/// writes to two different namespaces of the same store run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub resource: String,
    pub key_field: Option<String>,
}

impl ResourceScope {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            key_field: None,
        }
    }

    pub fn keyed_by(mut self, field: impl Into<String>) -> Self {
        self.key_field = Some(field.into());
        self
    }
}

/// Complete tool definition: schema, side-effect class, limits and handler.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    pub description: String,
    /// JSON Schema (subset) for validating input arguments.
    pub input_schema: serde_json::Value,
    pub side_effect: SideEffect,
    /// Overrides the coordinator's default timeout.
    pub timeout: Option<Duration>,
    /// Overrides the coordinator's default per-tool concurrency.
    pub concurrency: Option<usize>,
    pub resource: Option<ResourceScope>,
    pub handler: ToolHandler,
}

impl ToolDescriptor {
    pub fn new<F, Fut>(name: impl Into<String>, side_effect: SideEffect, handler: F) -> Self
    where
        F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({}),
            side_effect,
            timeout: None,
            concurrency: None,
            resource: None,
            handler: Arc::new(move |args, ctx| boxed_tool_future(handler(args, ctx))),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    pub fn with_resource(mut self, scope: ResourceScope) -> Self {
        self.resource = Some(scope);
        self
    }

    /// Lock path for an invocation with `args`, outermost scope first.
    ///
    /// A keyed scope locks the resource (shared) and then the key; an unkeyed
    /// scope locks only the resource. Mutating tools without a declared
    /// resource are serialized on a scope private to the tool. Read-only
    /// tools without a resource take no locks.
    pub fn lock_path(&self, args: &serde_json::Value) -> Vec<String> {
        match &self.resource {
            Some(scope) => {
                let mut path = vec![scope.resource.clone()];
                if let Some(field) = &scope.key_field {
                    if let Some(key) = args.get(field).and_then(|v| v.as_str()) {
                        path.push(format!("{}/{}", scope.resource, key));
                    }
                }
                path
            }
            None if self.side_effect.is_mutating() => vec![format!("tool:{}", self.name)],
            None => Vec::new(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("side_effect", &self.side_effect)
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(side_effect: SideEffect) -> ToolDescriptor {
        ToolDescriptor::new("noop", side_effect, |_args, _ctx| async { Ok(json!(null)) })
    }

    #[test]
    fn builder_sets_overrides() {
        let tool = noop(SideEffect::ReadOnly)
            .with_description("does nothing")
            .with_timeout(Duration::from_millis(50))
            .with_concurrency(2);
        assert_eq!(tool.description, "does nothing");
        assert_eq!(tool.timeout, Some(Duration::from_millis(50)));
        assert_eq!(tool.concurrency, Some(2));
        assert_eq!(tool.input_schema, json!({}));
    }

    #[test]
    fn read_only_without_resource_takes_no_locks() {
        assert!(noop(SideEffect::ReadOnly).lock_path(&json!({})).is_empty());
    }

    #[test]
    fn mutating_without_resource_is_scoped_to_tool() {
        let path = noop(SideEffect::Mutating).lock_path(&json!({}));
        assert_eq!(path, vec!["tool:noop".to_string()]);
    }

    #[test]
    fn keyed_scope_narrows_by_argument() {
        let tool = noop(SideEffect::Mutating)
            .with_resource(ResourceScope::new("kv").keyed_by("namespace"));
        assert_eq!(
            tool.lock_path(&json!({"namespace": "users"})),
            vec!["kv".to_string(), "kv/users".to_string()]
        );
        // Missing key field falls back to the whole resource.
        assert_eq!(tool.lock_path(&json!({})), vec!["kv".to_string()]);
    }

    #[tokio::test]
    async fn handler_is_callable_through_descriptor() {
        let tool = ToolDescriptor::new("echo", SideEffect::ReadOnly, |args, _ctx| async move {
            Ok(args)
        });
        let ctx = ToolContext {
            correlation_id: "c1".to_string(),
            tool: "echo".to_string(),
        };
        let result = (tool.handler)(json!({"msg": "hi"}), ctx).await.unwrap();
        assert_eq!(result, json!({"msg": "hi"}));
    }

    #[test]
    fn side_effect_serde() {
        assert_eq!(serde_json::to_string(&SideEffect::ReadOnly).unwrap(), "\"read_only\"");
        assert!(SideEffect::Mutating.is_mutating());
    }
}
