use serde_json::json;

use crate::tools::{SideEffect, ToolDescriptor};

/// Returns its `msg` argument unchanged. Useful as a liveness check for the
/// whole dispatch path.
pub fn echo_tool() -> ToolDescriptor {
    ToolDescriptor::new("echo", SideEffect::ReadOnly, |args, _ctx| async move {
        Ok(json!({ "msg": args["msg"] }))
    })
    .with_description("Echo the given message back to the caller.")
    .with_input_schema(json!({
        "type": "object",
        "required": ["msg"],
        "properties": {
            "msg": { "type": "string" }
        },
        "additionalProperties": false
    }))
}
