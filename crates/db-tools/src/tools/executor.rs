//! Tool execution pipeline: lookup, validate, admit, execute, normalize.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle};

use super::invocation::{Invocation, InvocationRecord, InvocationState};
use super::limiter::Limiter;
use super::outcome::{Failure, Outcome};
use super::registry::Registry;
use super::resource::ResourceLocks;
use super::schema::{ToolContext, ToolDescriptor};
use super::validator::validate_with;

/// Limits applied by the [`Coordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Concurrent executions across all tools.
    pub global_concurrency: usize,
    /// Default concurrent executions per tool. Writers are further
    /// serialized per resource by the lock table, not by this limit.
    pub tool_concurrency: usize,
    /// Invocations allowed to wait on each limiter.
    pub queue_depth: usize,
    /// Handler timeout when the descriptor does not set one.
    pub default_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            global_concurrency: 10,
            tool_concurrency: 4,
            queue_depth: 32,
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs invocations against a frozen [`Registry`].
///
/// Admission order is fixed (per-tool slot, global slot, resource locks) so
/// waiters can never form a cycle.
pub struct Coordinator {
    registry: Registry,
    config: CoordinatorConfig,
    global: Limiter,
    slots: HashMap<String, ToolSlot>,
    locks: ResourceLocks,
}

/// A registered tool paired with its admission limiter.
struct ToolSlot {
    tool: Arc<ToolDescriptor>,
    limiter: Limiter,
}

impl Coordinator {
    pub fn new(registry: Registry, config: CoordinatorConfig) -> Self {
        let slots = registry
            .descriptors()
            .into_iter()
            .map(|tool| {
                let limit = tool.concurrency.unwrap_or(config.tool_concurrency).max(1);
                let limiter = Limiter::new(format!("tool '{}'", tool.name), limit, config.queue_depth);
                let slot = ToolSlot {
                    tool: tool.clone(),
                    limiter,
                };
                (tool.name.clone(), slot)
            })
            .collect();

        Self {
            global: Limiter::new("server", config.global_concurrency.max(1), config.queue_depth),
            registry,
            config,
            slots,
            locks: ResourceLocks::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Admission limiter for a registered tool.
    pub fn limiter(&self, tool: &str) -> Option<&Limiter> {
        self.slots.get(tool).map(|slot| &slot.limiter)
    }

    pub fn global_limiter(&self) -> &Limiter {
        &self.global
    }

    /// Run one invocation through the whole pipeline and log its record.
    ///
    /// Always yields exactly one outcome; nothing a handler does escapes as a
    /// panic or error from this call.
    #[tracing::instrument(
        skip_all,
        fields(correlation_id = %invocation.correlation_id, tool = %invocation.tool)
    )]
    pub async fn dispatch(&self, invocation: Invocation) -> Outcome {
        let mut lifecycle = Lifecycle::new(&invocation);
        let outcome = self.run(&invocation, &mut lifecycle.state).await;
        lifecycle.finish(&outcome);
        outcome
    }

    async fn run(&self, invocation: &Invocation, state: &mut InvocationState) -> Outcome {
        state.advance(InvocationState::Validating);

        let Some(ToolSlot { tool, limiter }) = self.slots.get(&invocation.tool) else {
            return Failure::unknown_tool(&invocation.tool).into();
        };
        let patterns = self.registry.patterns();
        if let Err(error) = validate_with(&invocation.arguments, &tool.input_schema, patterns) {
            return Failure::validation(&error).into();
        }

        state.advance(InvocationState::Queued);
        let _tool_slot = match limiter.acquire().await {
            Ok(permit) => permit,
            Err(failure) => return failure.into(),
        };
        let _global_slot = match self.global.acquire().await {
            Ok(permit) => permit,
            Err(failure) => return failure.into(),
        };
        let lock_path = tool.lock_path(&invocation.arguments);
        let _resource = self
            .locks
            .acquire(&lock_path, tool.side_effect.is_mutating())
            .await;

        state.advance(InvocationState::Executing);
        self.execute(tool, invocation).await
    }

    /// Execute an admitted invocation on its own task, bounded by the timeout.
    async fn execute(&self, tool: &ToolDescriptor, invocation: &Invocation) -> Outcome {
        let timeout = tool.timeout.unwrap_or(self.config.default_timeout);
        let handler = tool.handler.clone();
        let args = invocation.arguments.clone();
        let ctx = ToolContext {
            correlation_id: invocation.correlation_id.clone(),
            tool: tool.name.clone(),
        };

        let mut task = AbortOnDrop(tokio::spawn(async move { handler(args, ctx).await }));

        match tokio::time::timeout(timeout, &mut task.0).await {
            Err(_elapsed) => Failure::timeout(&tool.name, timeout).into(),
            Ok(Ok(Ok(value))) => Outcome::Success(value),
            Ok(Ok(Err(error))) => Failure::execution(&tool.name, &error).into(),
            Ok(Err(join_error)) => Failure::internal_fault(&tool.name, &join_detail(join_error)).into(),
        }
    }
}

/// Tracks one dispatch from arrival to its record.
///
/// Dropped before [`Lifecycle::finish`], it logs a `cancelled` record so a
/// client that hangs up still leaves a log line.
struct Lifecycle<'a> {
    invocation: &'a Invocation,
    started: Instant,
    state: InvocationState,
}

impl<'a> Lifecycle<'a> {
    fn new(invocation: &'a Invocation) -> Self {
        Self {
            invocation,
            started: Instant::now(),
            state: InvocationState::Received,
        }
    }

    fn finish(&mut self, outcome: &Outcome) {
        let record = InvocationRecord::new(self.invocation, self.started.elapsed(), outcome);
        self.state.advance_to_terminal(record.state);
        record.log();
    }
}

impl Drop for Lifecycle<'_> {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state.advance(InvocationState::Cancelled);
        InvocationRecord::cancelled(self.invocation, self.started.elapsed()).log();
    }
}

/// Aborts the handler task when dropped: on timeout, and when the caller
/// stops waiting because the client went away.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn join_detail(error: JoinError) -> String {
    if !error.is_panic() {
        return "handler task was cancelled".to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::tools::outcome::FailureKind;
    use crate::tools::registry::RegistryBuilder;
    use crate::tools::schema::{ResourceScope, SideEffect};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_tool() -> ToolDescriptor {
        ToolDescriptor::new("echo", SideEffect::ReadOnly, |args, _ctx| async move {
            Ok(json!({"msg": args["msg"]}))
        })
        .with_input_schema(json!({
            "type": "object",
            "required": ["msg"],
            "properties": {"msg": {"type": "string"}}
        }))
    }

    fn coordinator(tools: Vec<ToolDescriptor>, config: CoordinatorConfig) -> Arc<Coordinator> {
        let mut builder = RegistryBuilder::new();
        for tool in tools {
            builder.register(tool).unwrap();
        }
        Arc::new(Coordinator::new(builder.build(), config))
    }

    fn sleeper(name: &str, millis: u64) -> ToolDescriptor {
        ToolDescriptor::new(name, SideEffect::ReadOnly, move |_args, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!("done"))
        })
    }

    async fn wait_for_waiters(limiter: &Limiter, count: usize) {
        while limiter.waiting() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let coord = coordinator(vec![echo_tool()], CoordinatorConfig::default());
        let outcome = coord.dispatch(Invocation::new("echo", json!({"msg": "hi"}))).await;
        assert_eq!(outcome, Outcome::Success(json!({"msg": "hi"})));
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let coord = coordinator(vec![echo_tool()], CoordinatorConfig::default());
        let outcome = coord.dispatch(Invocation::new("nope", json!({}))).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::UnknownTool));
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let tool = ToolDescriptor::new("guarded", SideEffect::ReadOnly, move |_args, _ctx| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!(null)) }
        })
        .with_input_schema(json!({
            "type": "object",
            "required": ["limit"],
            "properties": {"limit": {"type": "integer", "minimum": 1, "maximum": 10}}
        }));
        let coord = coordinator(vec![tool], CoordinatorConfig::default());

        for args in [json!({}), json!({"limit": "5"}), json!({"limit": 0}), json!({"limit": 11}), json!([])] {
            let outcome = coord.dispatch(Invocation::new("guarded", args)).await;
            assert_eq!(outcome.failure_kind(), Some(FailureKind::ValidationError));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let outcome = coord.dispatch(Invocation::new("guarded", json!({"limit": 5}))).await;
        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_becomes_execution_error() {
        let tool = ToolDescriptor::new("broken", SideEffect::ReadOnly, |_args, _ctx| async {
            Err(ToolError::Retryable {
                message: "connection refused".to_string(),
                retry_after_ms: 200,
            })
        });
        let coord = coordinator(vec![tool], CoordinatorConfig::default());
        let outcome = coord.dispatch(Invocation::new("broken", json!({}))).await;
        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::ExecutionError);
                assert_eq!(failure.retry_after_ms, Some(200));
                assert!(failure.message.contains("connection refused"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panic_is_contained_as_internal_fault() {
        let tool = ToolDescriptor::new("explodes", SideEffect::ReadOnly, |_args, _ctx| async {
            if true {
                panic!("handler exploded");
            }
            Ok(Value::Null)
        });
        let coord = coordinator(vec![tool, echo_tool()], CoordinatorConfig::default());

        let outcome = coord.dispatch(Invocation::new("explodes", json!({}))).await;
        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::InternalFault);
                assert!(failure.message.contains("handler exploded"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        // Coordinator keeps serving afterwards.
        let outcome = coord.dispatch(Invocation::new("echo", json!({"msg": "still here"}))).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn panic_while_building_future_is_contained() {
        let tool = ToolDescriptor::new("eager_panic", SideEffect::ReadOnly, |_args, _ctx| {
            if true {
                panic!("before the future");
            }
            async { Ok(Value::Null) }
        });
        let coord = coordinator(vec![tool], CoordinatorConfig::default());
        let outcome = coord.dispatch(Invocation::new("eager_panic", json!({}))).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::InternalFault));
    }

    #[tokio::test]
    async fn timeout_releases_slot() {
        let tool = sleeper("slow", 5_000)
            .with_timeout(Duration::from_millis(30))
            .with_concurrency(1);
        let config = CoordinatorConfig {
            queue_depth: 0,
            ..CoordinatorConfig::default()
        };
        let coord = coordinator(vec![tool], config);

        let outcome = coord.dispatch(Invocation::new("slow", json!({}))).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));

        assert_eq!(coord.limiter("slow").unwrap().available(), 1);
        assert_eq!(
            coord.global_limiter().available(),
            coord.config().global_concurrency
        );

        // The slot is reusable: a second call times out again rather than
        // being refused with backpressure.
        let outcome = coord.dispatch(Invocation::new("slow", json!({}))).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn default_timeout_applies_without_override() {
        let config = CoordinatorConfig {
            default_timeout: Duration::from_millis(20),
            ..CoordinatorConfig::default()
        };
        let coord = coordinator(vec![sleeper("slow", 5_000)], config);
        let outcome = coord.dispatch(Invocation::new("slow", json!({}))).await;
        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::Timeout);
                assert_eq!(failure.message, "tool 'slow' timed out after 20ms");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn queue_overflow_fails_fast_with_backpressure() {
        let tool = sleeper("busy", 200).with_concurrency(1);
        let config = CoordinatorConfig {
            queue_depth: 1,
            ..CoordinatorConfig::default()
        };
        let coord = coordinator(vec![tool], config);

        let running = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.dispatch(Invocation::new("busy", json!({}))).await })
        };
        while coord.limiter("busy").unwrap().available() > 0 {
            tokio::task::yield_now().await;
        }
        let queued = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.dispatch(Invocation::new("busy", json!({}))).await })
        };
        wait_for_waiters(coord.limiter("busy").unwrap(), 1).await;

        let started = Instant::now();
        let rejected = coord.dispatch(Invocation::new("busy", json!({}))).await;
        assert_eq!(rejected.failure_kind(), Some(FailureKind::Backpressure));
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(running.await.unwrap().is_success());
        assert!(queued.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn busy_tool_does_not_starve_others() {
        let config = CoordinatorConfig {
            queue_depth: 0,
            ..CoordinatorConfig::default()
        };
        let coord = coordinator(vec![sleeper("hog", 300).with_concurrency(1), echo_tool()], config);

        let hog = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.dispatch(Invocation::new("hog", json!({}))).await })
        };
        while coord.limiter("hog").unwrap().available() > 0 {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        let outcome = coord.dispatch(Invocation::new("echo", json!({"msg": "x"}))).await;
        assert!(outcome.is_success());
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(hog.await.unwrap().is_success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mutations_do_not_lose_updates() {
        let counter = Arc::new(parking_lot::Mutex::new(0u64));
        let shared = counter.clone();
        let tool = ToolDescriptor::new("increment", SideEffect::Mutating, move |_args, _ctx| {
            let counter = shared.clone();
            async move {
                // Read, yield, write: interleaving would lose updates.
                let current = *counter.lock();
                tokio::time::sleep(Duration::from_millis(1)).await;
                *counter.lock() = current + 1;
                Ok(json!(current + 1))
            }
        })
        .with_resource(ResourceScope::new("counter"))
        .with_concurrency(8);
        let config = CoordinatorConfig {
            queue_depth: 64,
            ..CoordinatorConfig::default()
        };
        let coord = coordinator(vec![tool], config);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let coord = coord.clone();
                tokio::spawn(async move { coord.dispatch(Invocation::new("increment", json!({}))).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }
        assert_eq!(*counter.lock(), 32);
    }

    #[tokio::test]
    async fn mutations_serialize_per_resource_key_only() {
        let writer = ToolDescriptor::new("write_row", SideEffect::Mutating, |_args, _ctx| async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(Value::Null)
        })
        .with_resource(ResourceScope::new("rows").keyed_by("table"));
        let coord = coordinator(vec![writer], CoordinatorConfig::default());
        let write = |table: &str| coord.dispatch(Invocation::new("write_row", json!({"table": table})));

        let started = Instant::now();
        let (a, b) = tokio::join!(write("users"), write("orders"));
        assert!(a.is_success() && b.is_success());
        assert!(started.elapsed() < Duration::from_millis(250), "{:?}", started.elapsed());

        let started = Instant::now();
        let (a, b) = tokio::join!(write("users"), write("users"));
        assert!(a.is_success() && b.is_success());
        assert!(started.elapsed() >= Duration::from_millis(300), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn read_only_calls_are_idempotent() {
        let coord = coordinator(vec![echo_tool()], CoordinatorConfig::default());
        let first = coord.dispatch(Invocation::new("echo", json!({"msg": "same"}))).await;
        let second = coord.dispatch(Invocation::new("echo", json!({"msg": "same"}))).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn dropped_dispatch_aborts_handler_and_releases_slot() {
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();
        let tool = ToolDescriptor::new("long", SideEffect::ReadOnly, move |_args, _ctx| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
        .with_concurrency(1);
        let coord = coordinator(vec![tool], CoordinatorConfig::default());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), coord.dispatch(Invocation::new("long", json!({})))).await;
        assert!(abandoned.is_err());
        assert_eq!(coord.limiter("long").unwrap().available(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abandoned_dispatch_logs_a_cancelled_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.log");
        let writer = crate::logging::RotatingWriter::open(&path, 0, 0).unwrap();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(writer)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let coord = coordinator(vec![sleeper("stalls", 5_000), echo_tool()], CoordinatorConfig::default());
        let invocation = Invocation::new("stalls", json!({})).with_correlation_id("gone-1");
        let abandoned = tokio::time::timeout(Duration::from_millis(20), coord.dispatch(invocation)).await;
        assert!(abandoned.is_err());
        let finished = coord
            .dispatch(Invocation::new("echo", json!({"msg": "hi"})).with_correlation_id("done-1"))
            .await;
        assert!(finished.is_success());

        let records: Vec<Value> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(|line| line["fields"]["message"] == "invocation finished")
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["fields"]["correlation_id"], "gone-1");
        assert_eq!(records[0]["fields"]["status"], "cancelled");
        assert_eq!(records[0]["level"], "WARN");
        assert_eq!(records[1]["fields"]["correlation_id"], "done-1");
        assert_eq!(records[1]["fields"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn handler_sees_correlation_id() {
        let tool = ToolDescriptor::new("whoami", SideEffect::ReadOnly, |_args, ctx| async move {
            Ok(json!({"id": ctx.correlation_id, "tool": ctx.tool}))
        });
        let coord = coordinator(vec![tool], CoordinatorConfig::default());
        let outcome = coord
            .dispatch(Invocation::new("whoami", json!({})).with_correlation_id("req-42"))
            .await;
        assert_eq!(outcome, Outcome::Success(json!({"id": "req-42", "tool": "whoami"})));
    }
}
