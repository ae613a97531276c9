use async_trait::async_trait;

use aero_host_protocol::CompiledModule;

use crate::error::CompileError;

/// Turns module bytes copied out of the shared heap into an executable module.
#[async_trait]
pub trait ModuleCompiler: Send + Sync {
    async fn compile(&self, bytes: Vec<u8>) -> Result<CompiledModule, CompileError>;
}

/// Validates the bytes as a WebAssembly module on a blocking thread and hands them back as the
/// compiled module.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidatingCompiler;

#[async_trait]
impl ModuleCompiler for ValidatingCompiler {
    async fn compile(&self, bytes: Vec<u8>) -> Result<CompiledModule, CompileError> {
        tokio::task::spawn_blocking(move || -> Result<CompiledModule, CompileError> {
            wasmparser::validate(&bytes).map_err(|e| CompileError::Invalid(e.to_string()))?;
            Ok(CompiledModule::new(bytes.into()))
        })
        .await
        .map_err(|e| CompileError::Task(e.to_string()))?
    }
}
