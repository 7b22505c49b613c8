//! Key-value tools over a [`KvBackend`](crate::backend::KvBackend).
//!
//! All tools share the `kv` resource, narrowed by `namespace`: writes to one
//! namespace are serialized while other namespaces stay concurrent.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::backend::SharedKvBackend;
use crate::error::ToolError;
use crate::tools::{ResourceScope, SideEffect, ToolDescriptor};

const NAME_PATTERN: &str = "^[A-Za-z0-9_.-]{1,64}$";
const MAX_LIST_LIMIT: u64 = 1000;

pub fn kv_tools(backend: SharedKvBackend) -> Vec<ToolDescriptor> {
    vec![
        kv_get(backend.clone()),
        kv_list(backend.clone()),
        kv_put(backend.clone()),
        kv_delete(backend.clone()),
        counter_increment(backend),
    ]
}

fn scope() -> ResourceScope {
    ResourceScope::new("kv").keyed_by("namespace")
}

fn name_schema() -> Value {
    json!({ "type": "string", "pattern": NAME_PATTERN })
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::failed(format!("invalid arguments: {e}")))
}

#[derive(Debug, Deserialize)]
struct KeyArgs {
    namespace: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    namespace: String,
    prefix: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PutArgs {
    namespace: String,
    key: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct IncrementArgs {
    namespace: String,
    key: String,
    #[serde(default = "default_step")]
    by: i64,
}

fn default_step() -> i64 {
    1
}

fn key_schema() -> Value {
    json!({
        "type": "object",
        "required": ["namespace", "key"],
        "properties": {
            "namespace": name_schema(),
            "key": name_schema()
        },
        "additionalProperties": false
    })
}

fn kv_get(backend: SharedKvBackend) -> ToolDescriptor {
    ToolDescriptor::new("kv_get", SideEffect::ReadOnly, move |args, _ctx| {
        get_value(backend.clone(), args)
    })
    .with_description("Read the value stored under a key.")
    .with_input_schema(key_schema())
    .with_resource(scope())
}

fn kv_list(backend: SharedKvBackend) -> ToolDescriptor {
    ToolDescriptor::new("kv_list", SideEffect::ReadOnly, move |args, _ctx| {
        list_keys(backend.clone(), args)
    })
    .with_description("List keys in a namespace, sorted, optionally filtered by prefix.")
    .with_input_schema(json!({
        "type": "object",
        "required": ["namespace"],
        "properties": {
            "namespace": name_schema(),
            "prefix": { "type": "string", "maxLength": 64 },
            "limit": { "type": "integer", "minimum": 1, "maximum": MAX_LIST_LIMIT }
        },
        "additionalProperties": false
    }))
    .with_resource(scope())
}

fn kv_put(backend: SharedKvBackend) -> ToolDescriptor {
    ToolDescriptor::new("kv_put", SideEffect::Mutating, move |args, _ctx| {
        put_value(backend.clone(), args)
    })
    .with_description("Store a JSON value under a key, returning the previous value.")
    .with_input_schema(json!({
        "type": "object",
        "required": ["namespace", "key", "value"],
        "properties": {
            "namespace": name_schema(),
            "key": name_schema(),
            "value": {}
        },
        "additionalProperties": false
    }))
    .with_resource(scope())
}

fn kv_delete(backend: SharedKvBackend) -> ToolDescriptor {
    ToolDescriptor::new("kv_delete", SideEffect::Mutating, move |args, _ctx| {
        delete_key(backend.clone(), args)
    })
    .with_description("Delete a key.")
    .with_input_schema(key_schema())
    .with_resource(scope())
}

fn counter_increment(backend: SharedKvBackend) -> ToolDescriptor {
    ToolDescriptor::new("counter_increment", SideEffect::Mutating, move |args, _ctx| {
        increment(backend.clone(), args)
    })
    .with_description("Atomically add `by` (default 1) to an integer counter.")
    .with_input_schema(json!({
        "type": "object",
        "required": ["namespace", "key"],
        "properties": {
            "namespace": name_schema(),
            "key": name_schema(),
            "by": { "type": "integer", "minimum": i64::MIN, "maximum": i64::MAX }
        },
        "additionalProperties": false
    }))
    .with_resource(scope())
}

async fn get_value(backend: SharedKvBackend, args: Value) -> Result<Value, ToolError> {
    let KeyArgs { namespace, key } = parse(args)?;
    let value = backend.get(&namespace, &key).await?;
    Ok(json!({ "key": key, "value": value }))
}

async fn list_keys(backend: SharedKvBackend, args: Value) -> Result<Value, ToolError> {
    let ListArgs {
        namespace,
        prefix,
        limit,
    } = parse(args)?;
    let mut keys = backend.keys(&namespace, prefix.as_deref()).await?;
    keys.truncate(limit.unwrap_or(MAX_LIST_LIMIT as usize));
    Ok(json!({ "keys": keys }))
}

async fn put_value(backend: SharedKvBackend, args: Value) -> Result<Value, ToolError> {
    let PutArgs {
        namespace,
        key,
        value,
    } = parse(args)?;
    let previous = backend.put(&namespace, &key, value).await?;
    Ok(json!({ "key": key, "previous": previous }))
}

async fn delete_key(backend: SharedKvBackend, args: Value) -> Result<Value, ToolError> {
    let KeyArgs { namespace, key } = parse(args)?;
    let deleted = backend.delete(&namespace, &key).await?;
    Ok(json!({ "deleted": deleted }))
}

/// Read-modify-write over two backend round trips; relies on the
/// coordinator's exclusive namespace lock to avoid lost updates.
async fn increment(backend: SharedKvBackend, args: Value) -> Result<Value, ToolError> {
    let IncrementArgs { namespace, key, by } = parse(args)?;
    let current = match backend.get(&namespace, &key).await? {
        None => 0,
        Some(value) => value
            .as_i64()
            .ok_or_else(|| ToolError::failed(format!("value at '{key}' is not an integer")))?,
    };
    let next = current
        .checked_add(by)
        .ok_or_else(|| ToolError::failed(format!("counter '{key}' would overflow")))?;
    backend.put(&namespace, &key, json!(next)).await?;
    Ok(json!({ "key": key, "value": next }))
}
