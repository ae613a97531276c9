//! Per-instance creation of the execution unit (and the optional clock unit).

use std::sync::Arc;

use aero_host_protocol::{channel, ClockMessage, CoreMessage, HostMessage, MessagePort, Tag};
use aero_host_shared::{layout, AsyncPtr, SharedHeap};

use crate::artifacts::ArtifactStore;
use crate::assets::{
    AssetBase, AssetFetcher, BRIDGE_SCRIPT, CLOCK_SCRIPT, CORE_NO_RETURN_SCRIPT, CORE_SCRIPT,
};
use crate::error::HostError;
use crate::worker::{WorkerRole, WorkerSource, WorkerSpawner};
use crate::InstanceId;

const SCRIPT_MIME: &str = "text/javascript";

/// Which build of the execution unit is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreVariant {
    /// Prebuilt bridge script.
    Bridge,
    /// Patched `cxcore.js`.
    Core,
    /// Patched `cxcore-no-return-call.js`, used after the unit asks for a retry.
    NoReturnCall,
}

/// An execution unit that has reported `INIT` (and, if requested, whose clock unit is running).
#[derive(Debug)]
pub struct ReadyCore {
    pub variant: CoreVariant,
    pub port: MessagePort,
    pub heap: SharedHeap,
    pub async_ptr: AsyncPtr,
    pub clock: Option<MessagePort>,
}

pub struct ExecutionChannel {
    base: AssetBase,
    fetcher: Arc<dyn AssetFetcher>,
    spawner: Arc<dyn WorkerSpawner>,
    artifacts: Arc<ArtifactStore>,
    use_bridge: bool,
}

impl ExecutionChannel {
    pub fn new(
        base: AssetBase,
        fetcher: Arc<dyn AssetFetcher>,
        spawner: Arc<dyn WorkerSpawner>,
        artifacts: Arc<ArtifactStore>,
        use_bridge: bool,
    ) -> Self {
        Self {
            base,
            fetcher,
            spawner,
            artifacts,
            use_bridge,
        }
    }

    /// Start the execution unit for `instance` and wait until it is ready for commands.
    pub async fn create(&self, instance: InstanceId) -> Result<ReadyCore, HostError> {
        let mut variant = if self.use_bridge {
            CoreVariant::Bridge
        } else {
            CoreVariant::Core
        };

        loop {
            tracing::debug!(%instance, ?variant, "starting execution unit");
            let mut port = self.spawn_core(variant).await?;

            let init = loop {
                let Some(envelope) = port.recv().await else {
                    return Err(HostError::Disconnected);
                };
                match CoreMessage::from_envelope(envelope)? {
                    CoreMessage::Init {
                        heap,
                        async_ptr_offset,
                        start_real_time,
                    } => break Some((heap, async_ptr_offset, start_real_time)),
                    CoreMessage::InitRetry if variant != CoreVariant::NoReturnCall => break None,
                    CoreMessage::InitRetry => {
                        return Err(HostError::InitFailed(
                            "no-return-call core requested another retry".to_string(),
                        ));
                    }
                    CoreMessage::InitFailed { value } => {
                        tracing::error!(%instance, %value, "core initialization failed");
                        return Err(HostError::InitFailed(value));
                    }
                    other => {
                        tracing::warn!(%instance, tag = other.tag().name(), "message before INIT ignored");
                    }
                }
            };

            let Some((heap, async_ptr_offset, start_real_time)) = init else {
                tracing::warn!(%instance, "fast core failed; retrying with no-return-call core");
                variant = CoreVariant::NoReturnCall;
                continue;
            };

            let async_ptr = AsyncPtr::from_byte_offset(async_ptr_offset);
            if async_ptr.word() + layout::COMPILE_FLAG_WORD >= heap.words().len() {
                return Err(HostError::AsyncPtrOutOfRange(async_ptr_offset));
            }

            let clock = if start_real_time >= 0 {
                Some(
                    self.start_clock(&port, &heap, async_ptr_offset, start_real_time)
                        .await?,
                )
            } else {
                None
            };

            tracing::info!(%instance, ?variant, heap_len = heap.byte_len(), clock = clock.is_some(), "execution unit ready");
            return Ok(ReadyCore {
                variant,
                port,
                heap,
                async_ptr,
                clock,
            });
        }
    }

    async fn spawn_core(&self, variant: CoreVariant) -> Result<MessagePort, HostError> {
        let (script, on_failure) = match variant {
            CoreVariant::Bridge => {
                let url = self.base.join(BRIDGE_SCRIPT)?;
                return self.spawner.spawn(WorkerRole::Core, WorkerSource::Url(url));
            }
            CoreVariant::Core => (CORE_SCRIPT, Tag::InitRetry),
            CoreVariant::NoReturnCall => (CORE_NO_RETURN_SCRIPT, Tag::InitFailed),
        };

        let source = self.fetcher.fetch(&self.base.join(script)?).await?;
        let source = String::from_utf8_lossy(&source);
        let patched = patch_core_script(&source, script, &self.base, on_failure)?;
        self.spawn_blob(WorkerRole::Core, patched.into_bytes())
    }

    /// Start the clock unit, wire it to the execution unit and wait for its first message.
    async fn start_clock(
        &self,
        core: &MessagePort,
        heap: &SharedHeap,
        base_ptr: u32,
        start_real_time: i64,
    ) -> Result<MessagePort, HostError> {
        let script = self.fetcher.fetch(&self.base.join(CLOCK_SCRIPT)?).await?;
        let mut clock = self.spawn_blob(WorkerRole::Clock, script)?;

        let (core_end, clock_end) = channel();
        core.post(HostMessage::TimerPort(core_end).into_envelope())?;
        clock.post(
            ClockMessage::InitMemory {
                heap: heap.clone(),
                base_ptr,
                start_real_time,
                port: clock_end,
            }
            .into_envelope(),
        )?;

        match clock.recv().await {
            Some(_) => {
                tracing::debug!(start_real_time, "clock unit running");
                Ok(clock)
            }
            None => Err(HostError::Spawn(
                "clock unit closed before acknowledging".to_string(),
            )),
        }
    }

    fn spawn_blob(&self, role: WorkerRole, script: Vec<u8>) -> Result<MessagePort, HostError> {
        let script: Arc<[u8]> = script.into();
        let locator = self.artifacts.create(SCRIPT_MIME, Arc::clone(&script));
        let spawned = self.spawner.spawn(
            role,
            WorkerSource::Blob {
                locator: locator.clone(),
                script,
            },
        );
        self.artifacts.revoke(&locator);
        spawned
    }
}

/// Point the core's module reference at the asset base and append the bootstrap epilogue.
///
/// The epilogue runs the core's own init routine and posts `failure_tag` with the error text if
/// it rejects.
pub fn patch_core_script(
    source: &str,
    script_name: &str,
    base: &AssetBase,
    failure_tag: Tag,
) -> Result<String, HostError> {
    let wasm_name = script_name.replace(".js", ".wasm");
    let wasm_url = base.join(&wasm_name)?;
    let mut patched = source.replacen(&wasm_name, wasm_url.as_str(), 1);
    patched.push_str(&format!(
        "cxCoreInit.promise.then(function(){{cxCoreInit();}}).catch(function(e){{postMessage({{type:{},value:e.toString()}});}})",
        failure_tag as u32
    ));
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn patch_replaces_first_module_reference_and_appends_epilogue() {
        let base = AssetBase::new(Url::parse("https://cdn.example/cx/").unwrap());
        let src = "var f='cxcore.wasm';load(f);";
        let out = patch_core_script(src, CORE_SCRIPT, &base, Tag::InitRetry).unwrap();
        assert!(out.starts_with("var f='https://cdn.example/cx/cxcore.wasm';load(f);"));
        assert!(out.ends_with(&format!(
            "postMessage({{type:{},value:e.toString()}});}})",
            Tag::InitRetry as u32
        )));
    }

    #[test]
    fn no_return_call_variant_uses_its_own_module() {
        let base = AssetBase::new(Url::parse("https://cdn.example/cx/").unwrap());
        let src = "x('cxcore-no-return-call.wasm')";
        let out = patch_core_script(src, CORE_NO_RETURN_SCRIPT, &base, Tag::InitFailed).unwrap();
        assert!(out.contains("https://cdn.example/cx/cxcore-no-return-call.wasm"));
        assert!(out.contains(&format!("type:{}", Tag::InitFailed as u32)));
    }
}
