//! JSON Schema subset validation for tool arguments.
//!
//! Supported keywords: `type` (string or array of strings), `required`,
//! `properties`, `additionalProperties: false`, `items`, `enum`, `const`,
//! `minimum`, `maximum`, `exclusiveMinimum`, `exclusiveMaximum`, `minLength`,
//! `maxLength`, `pattern`, `minItems`, `maxItems`. An empty schema `{}`
//! accepts anything. Validation never has side effects.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use serde_json::{Map, Value};

const KNOWN_TYPES: [&str; 7] = [
    "string", "number", "integer", "boolean", "object", "array", "null",
];

/// A value that does not satisfy its schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", display_path(.path))]
pub struct SchemaError {
    /// JSON pointer to the offending value (empty for the root).
    pub path: String,
    pub message: String,
}

impl SchemaError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "arguments"
    } else {
        path
    }
}

/// Compiled `pattern` keywords, keyed by their source text.
///
/// Filled by [`collect_schema`] at registration so validation never compiles
/// a regex on the request path.
#[derive(Debug, Clone, Default)]
pub struct Patterns {
    compiled: HashMap<String, Regex>,
}

impl Patterns {
    pub fn get(&self, pattern: &str) -> Option<&Regex> {
        self.compiled.get(pattern)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    pub(crate) fn extend(&mut self, other: Patterns) {
        self.compiled.extend(other.compiled);
    }
}

/// Validate `value` against `schema`, compiling patterns as they are met.
pub fn validate(value: &Value, schema: &Value) -> Result<(), SchemaError> {
    validate_with(value, schema, &Patterns::default())
}

/// Validate `value` against `schema`, reusing precompiled patterns.
pub fn validate_with(value: &Value, schema: &Value, patterns: &Patterns) -> Result<(), SchemaError> {
    validate_at(value, schema, "", patterns)
}

fn validate_at(value: &Value, schema: &Value, path: &str, patterns: &Patterns) -> Result<(), SchemaError> {
    let schema_obj = match schema.as_object() {
        Some(obj) if !obj.is_empty() => obj,
        _ => return Ok(()),
    };

    check_type(value, schema_obj, path)?;
    check_enum(value, schema_obj, path)?;

    match value {
        Value::Object(obj) => check_object(obj, schema_obj, path, patterns)?,
        Value::Array(items) => check_array(items, schema_obj, path, patterns)?,
        Value::String(s) => check_string(s, schema_obj, path, patterns)?,
        Value::Number(_) => check_number(value, schema_obj, path)?,
        _ => {}
    }

    Ok(())
}

fn check_type(value: &Value, schema: &Map<String, Value>, path: &str) -> Result<(), SchemaError> {
    let allowed: Vec<&str> = match schema.get("type") {
        None => return Ok(()),
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(|t| t.as_str()).collect(),
        Some(_) => return Err(SchemaError::new(path, "schema 'type' must be a string or array")),
    };

    if allowed.iter().any(|t| type_matches(value, t)) {
        return Ok(());
    }
    Err(SchemaError::new(
        path,
        format!("expected type '{}', got {}", allowed.join("' or '"), json_type_name(value)),
    ))
}

fn type_matches(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn check_enum(value: &Value, schema: &Map<String, Value>, path: &str) -> Result<(), SchemaError> {
    if let Some(expected) = schema.get("const") {
        if value != expected {
            return Err(SchemaError::new(path, format!("must equal {expected}")));
        }
    }
    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            let listed: Vec<String> = options.iter().map(|o| o.to_string()).collect();
            return Err(SchemaError::new(
                path,
                format!("must be one of [{}]", listed.join(", ")),
            ));
        }
    }
    Ok(())
}

fn check_object(
    obj: &Map<String, Value>,
    schema: &Map<String, Value>,
    path: &str,
    patterns: &Patterns,
) -> Result<(), SchemaError> {
    if let Some(Value::Array(required)) = schema.get("required") {
        for key in required.iter().filter_map(|r| r.as_str()) {
            if !obj.contains_key(key) {
                return Err(SchemaError::new(path, format!("missing required field '{key}'")));
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());

    if let Some(props) = properties {
        for (key, prop_schema) in props {
            if let Some(prop_value) = obj.get(key) {
                validate_at(prop_value, prop_schema, &child_path(path, key), patterns)?;
            }
        }
    }

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        for key in obj.keys() {
            let declared = properties.map(|p| p.contains_key(key)).unwrap_or(false);
            if !declared {
                return Err(SchemaError::new(path, format!("unexpected field '{key}'")));
            }
        }
    }

    Ok(())
}

fn check_array(
    items: &[Value],
    schema: &Map<String, Value>,
    path: &str,
    patterns: &Patterns,
) -> Result<(), SchemaError> {
    if let Some(min) = schema.get("minItems").and_then(|m| m.as_u64()) {
        if (items.len() as u64) < min {
            return Err(SchemaError::new(path, format!("must have at least {min} items")));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(|m| m.as_u64()) {
        if (items.len() as u64) > max {
            return Err(SchemaError::new(path, format!("must have at most {max} items")));
        }
    }
    if let Some(item_schema) = schema.get("items") {
        for (index, item) in items.iter().enumerate() {
            validate_at(item, item_schema, &child_path(path, &index.to_string()), patterns)?;
        }
    }
    Ok(())
}

fn check_string(
    s: &str,
    schema: &Map<String, Value>,
    path: &str,
    patterns: &Patterns,
) -> Result<(), SchemaError> {
    let length = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(|m| m.as_u64()) {
        if length < min {
            return Err(SchemaError::new(path, format!("must be at least {min} characters")));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(|m| m.as_u64()) {
        if length > max {
            return Err(SchemaError::new(path, format!("must be at most {max} characters")));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(|p| p.as_str()) {
        let matched = match patterns.get(pattern) {
            Some(re) => re.is_match(s),
            None => Regex::new(pattern)
                .map_err(|e| SchemaError::new(path, format!("invalid pattern in schema: {e}")))?
                .is_match(s),
        };
        if !matched {
            return Err(SchemaError::new(path, format!("does not match pattern '{pattern}'")));
        }
    }
    Ok(())
}

fn check_number(value: &Value, schema: &Map<String, Value>, path: &str) -> Result<(), SchemaError> {
    let bound = |key: &str| {
        schema
            .get(key)
            .filter(|b| b.is_number())
            .and_then(|b| compare_numbers(value, b).map(|ordering| (b, ordering)))
    };

    if let Some((min, Ordering::Less)) = bound("minimum") {
        return Err(SchemaError::new(path, format!("must be >= {min}")));
    }
    if let Some((max, Ordering::Greater)) = bound("maximum") {
        return Err(SchemaError::new(path, format!("must be <= {max}")));
    }
    if let Some((min, Ordering::Less | Ordering::Equal)) = bound("exclusiveMinimum") {
        return Err(SchemaError::new(path, format!("must be > {min}")));
    }
    if let Some((max, Ordering::Greater | Ordering::Equal)) = bound("exclusiveMaximum") {
        return Err(SchemaError::new(path, format!("must be < {max}")));
    }
    Ok(())
}

/// Integers compare exactly; anything else falls back to `f64`.
fn compare_numbers(value: &Value, bound: &Value) -> Option<Ordering> {
    fn as_integer(value: &Value) -> Option<i128> {
        value
            .as_i64()
            .map(i128::from)
            .or_else(|| value.as_u64().map(i128::from))
    }
    match (as_integer(value), as_integer(bound)) {
        (Some(value), Some(bound)) => Some(value.cmp(&bound)),
        _ => value.as_f64()?.partial_cmp(&bound.as_f64()?),
    }
}

fn child_path(parent: &str, segment: &str) -> String {
    let escaped = segment.replace('~', "~0").replace('/', "~1");
    format!("{parent}/{escaped}")
}

/// Checks that a descriptor's schema is usable before it is registered.
///
/// Catches unknown type names and patterns that do not compile, so a bad
/// schema fails startup rather than every request.
pub fn check_schema(schema: &Value) -> Result<(), String> {
    collect_schema(schema).map(|_| ())
}

/// Like [`check_schema`], returning every compiled `pattern` in the schema.
pub fn collect_schema(schema: &Value) -> Result<Patterns, String> {
    let mut patterns = Patterns::default();
    collect_into(schema, &mut patterns)?;
    Ok(patterns)
}

fn collect_into(schema: &Value, patterns: &mut Patterns) -> Result<(), String> {
    let Some(obj) = schema.as_object() else {
        return Err("schema must be a JSON object".to_string());
    };

    match obj.get("type") {
        None => {}
        Some(Value::String(t)) => check_type_name(t)?,
        Some(Value::Array(types)) => {
            for t in types {
                let name = t.as_str().ok_or("schema 'type' entries must be strings")?;
                check_type_name(name)?;
            }
        }
        Some(_) => return Err("schema 'type' must be a string or array".to_string()),
    }

    if let Some(pattern) = obj.get("pattern") {
        let pattern = pattern.as_str().ok_or("schema 'pattern' must be a string")?;
        if patterns.get(pattern).is_none() {
            let re = Regex::new(pattern).map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
            patterns.compiled.insert(pattern.to_string(), re);
        }
    }

    if let Some(required) = obj.get("required") {
        let all_strings = required
            .as_array()
            .map(|r| r.iter().all(|k| k.is_string()))
            .unwrap_or(false);
        if !all_strings {
            return Err("schema 'required' must be an array of strings".to_string());
        }
    }

    if let Some(props) = obj.get("properties") {
        let props = props.as_object().ok_or("schema 'properties' must be an object")?;
        for (key, prop) in props {
            collect_into(prop, patterns).map_err(|e| format!("property '{key}': {e}"))?;
        }
    }

    if let Some(items) = obj.get("items") {
        collect_into(items, patterns).map_err(|e| format!("items: {e}"))?;
    }

    Ok(())
}

fn check_type_name(name: &str) -> Result<(), String> {
    if KNOWN_TYPES.contains(&name) {
        Ok(())
    } else {
        Err(format!("unknown schema type: {name}"))
    }
}

/// Returns a human-readable name for the JSON type of a value.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
