//! Built-in tool set registered by the server binary.

pub mod echo;
pub mod kv;

use crate::backend::SharedKvBackend;
use crate::error::CoreResult;
use crate::tools::RegistryBuilder;

/// Register every built-in tool against `backend`.
pub fn register_all(builder: &mut RegistryBuilder, backend: SharedKvBackend) -> CoreResult<()> {
    builder.register(echo::echo_tool())?;
    for tool in kv::kv_tools(backend) {
        builder.register(tool)?;
    }
    Ok(())
}
