//! Message pump: decodes everything the execution unit (and its clock unit) sends and serves it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aero_block::{DeviceId, DeviceLookup};
use aero_host_protocol::{
    CompileReply, CoreMessage, DecodeError, Envelope, HostMessage, IoRequest, PortReceiver,
};
use aero_host_shared::HeapError;

use crate::display::DisplayCommand;
use crate::error::DispatchError;
use crate::hud::HudEvent;
use crate::system::Instance;

/// Suggested file name for modules that failed to compile.
pub const FAILED_MODULE_DUMP: &str = "fail.wasm";

const WASM_MIME: &str = "application/wasm";

#[derive(Debug, Default)]
pub(crate) struct DispatchStats {
    messages: AtomicU64,
    unknown_tags: AtomicU64,
    malformed: AtomicU64,
    io_completed: AtomicU64,
    duplicate_io: AtomicU64,
    modules_compiled: AtomicU64,
    compile_failures: AtomicU64,
    dumps: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            unknown_tags: self.unknown_tags.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            io_completed: self.io_completed.load(Ordering::Relaxed),
            duplicate_io: self.duplicate_io.load(Ordering::Relaxed),
            modules_compiled: self.modules_compiled.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            dumps: self.dumps.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of an instance's dispatch counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub messages: u64,
    pub unknown_tags: u64,
    pub malformed: u64,
    pub io_completed: u64,
    /// I/O requests rejected because their transaction id was already in flight.
    pub duplicate_io: u64,
    pub modules_compiled: u64,
    pub compile_failures: u64,
    pub dumps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Core,
    Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoDirection {
    Read,
    Write,
}

pub(crate) async fn pump(
    instance: Arc<Instance>,
    mut core: PortReceiver,
    mut clock: Option<PortReceiver>,
) {
    let mut state = instance.subscribe();
    tracing::debug!(instance = %instance.id, "message pump started");
    while !instance.is_halted() {
        let (source, envelope) = tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            envelope = core.recv() => match envelope {
                Some(envelope) => (Source::Core, envelope),
                None => {
                    instance.halt("execution unit closed its channel".to_string());
                    break;
                }
            },
            envelope = recv_clock(&mut clock) => match envelope {
                Some(envelope) => (Source::Clock, envelope),
                None => {
                    tracing::debug!(instance = %instance.id, "clock unit closed its channel");
                    clock = None;
                    continue;
                }
            },
        };
        handle(&instance, source, envelope);
    }
    tracing::debug!(instance = %instance.id, "message pump stopped");
}

async fn recv_clock(clock: &mut Option<PortReceiver>) -> Option<Envelope> {
    match clock {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn handle(instance: &Arc<Instance>, source: Source, envelope: Envelope) {
    bump(&instance.stats.messages);
    let raw_tag = envelope.raw_tag();
    match CoreMessage::from_envelope(envelope) {
        Ok(message) => {
            tracing::trace!(instance = %instance.id, ?source, tag = message.tag().name(), "message");
            dispatch(instance, message);
        }
        Err(DecodeError::UnknownTag(tag)) => {
            bump(&instance.stats.unknown_tags);
            tracing::error!(instance = %instance.id, ?source, tag, "unknown message tag");
        }
        Err(err) => {
            bump(&instance.stats.malformed);
            tracing::error!(instance = %instance.id, ?source, ?raw_tag, error = %err, "malformed message");
        }
    }
}

fn dispatch(instance: &Arc<Instance>, message: CoreMessage) {
    let services = &instance.services;
    match message {
        CoreMessage::IoRead(req) => start_io(instance, IoDirection::Read, req),
        CoreMessage::IoWrite(req) => start_io(instance, IoDirection::Write, req),
        CoreMessage::CompileRequest { start, len, reply } => {
            let instance = Arc::clone(instance);
            tokio::spawn(async move { compile(&instance, start, len, reply).await });
        }
        CoreMessage::DumpData { path, value } => {
            let instance = Arc::clone(instance);
            tokio::spawn(async move { dump(&instance, &path, &value).await });
        }
        CoreMessage::HudGlobalStat {
            int_wrapper,
            stat_name,
            stat_type,
        } => {
            let stat = instance.hud().register_stat(int_wrapper, stat_name, stat_type);
            services.hud.event(HudEvent::GlobalStat(stat));
        }
        CoreMessage::HudAddContext(ctx) => {
            instance.hud().add_context(ctx);
            services.hud.event(HudEvent::ContextAdded(ctx));
        }
        CoreMessage::HudRemoveContext(ctx) => {
            if instance.hud().remove_context(ctx.ctx_type, ctx.ctx_id) {
                services.hud.event(HudEvent::ContextRemoved(ctx));
            }
        }
        CoreMessage::HudUpdateContext(ctx) => {
            if instance.hud().update_context(ctx) {
                services.hud.event(HudEvent::ContextUpdated(ctx));
            } else {
                tracing::debug!(instance = %instance.id, ?ctx, "update for unknown context");
            }
        }
        CoreMessage::DbgDisasResult { text } => {
            instance.hud().set_disassembly(text.clone());
            services.hud.event(HudEvent::Disassembly(text));
        }
        CoreMessage::CurTraces { traces } => {
            let text = instance.hud().set_traces(&traces).to_string();
            services.hud.event(HudEvent::Traces(text));
        }
        CoreMessage::StartVga {
            vga_device,
            vga_ram_offset,
        } => {
            instance.enable_keyboard();
            services.display.display(DisplayCommand::Start {
                vga_device,
                vga_ram_offset,
            });
        }
        CoreMessage::VgaMode(mode) => services.display.display(DisplayCommand::Mode(mode)),
        CoreMessage::VgaSetWidth(w) => services.display.display(DisplayCommand::Width(w)),
        CoreMessage::VgaSetHeight(h) => services.display.display(DisplayCommand::Height(h)),
        message @ (CoreMessage::Init { .. }
        | CoreMessage::InitRetry
        | CoreMessage::InitFailed { .. }) => {
            tracing::warn!(
                instance = %instance.id,
                tag = message.tag().name(),
                "initialization message after the unit became ready"
            );
        }
    }
}

fn start_io(instance: &Arc<Instance>, direction: IoDirection, req: IoRequest) {
    if !instance.begin_io(req.io_transaction) {
        bump(&instance.stats.duplicate_io);
        tracing::warn!(
            instance = %instance.id,
            io_transaction = req.io_transaction,
            "I/O transaction already in flight; request dropped"
        );
        return;
    }

    let instance = Arc::clone(instance);
    tokio::spawn(async move {
        let result = perform_io(&instance, direction, req).await;
        instance.finish_io(req.io_transaction);
        match result {
            Ok(()) => {
                tracing::trace!(
                    instance = %instance.id,
                    ?direction,
                    dev_id = req.dev_id,
                    start = req.start,
                    len = req.len,
                    "I/O complete"
                );
                let reply = HostMessage::IoResult {
                    io_transaction: req.io_transaction,
                };
                match instance.post_with_interrupt(reply) {
                    Ok(()) => bump(&instance.stats.io_completed),
                    Err(err) => tracing::warn!(instance = %instance.id, error = %err, "I/O result undeliverable"),
                }
            }
            Err(err) => {
                instance.halt(format!(
                    "{direction:?} for I/O transaction {}: {err}",
                    req.io_transaction
                ));
            }
        }
    });
}

async fn perform_io(
    instance: &Instance,
    direction: IoDirection,
    req: IoRequest,
) -> Result<(), DispatchError> {
    let dev = DeviceId(req.dev_id);
    let device = instance
        .services
        .registry
        .device(dev)
        .ok_or(DispatchError::UnknownDevice(dev))?;
    let block = device
        .as_block()
        .cloned()
        .ok_or(DispatchError::NotBlockDevice(dev))?;

    let offset = req.buffer_offset as usize;
    let len = req.len as usize;
    let end = offset.checked_add(len).ok_or(HeapError::OffsetOverflow)?;
    if end > instance.heap.byte_len() {
        return Err(HeapError::OutOfBounds {
            offset,
            len,
            capacity: instance.heap.byte_len(),
        }
        .into());
    }

    match direction {
        IoDirection::Read => {
            let mut buf = vec![0u8; len];
            block
                .read(req.start, &mut buf)
                .await
                .map_err(|source| DispatchError::Device { dev, source })?;
            instance.heap.bytes().write_from(offset, &buf)?;
        }
        IoDirection::Write => {
            let buf = instance.heap.bytes().to_vec(offset, len)?;
            block
                .write(req.start, &buf)
                .await
                .map_err(|source| DispatchError::Device { dev, source })?;
        }
    }
    Ok(())
}

async fn compile(instance: &Instance, start: u32, len: u32, reply: CompileReply) {
    let bytes = match instance.heap.bytes().to_vec(start as usize, len as usize) {
        Ok(bytes) => bytes,
        Err(err) => {
            bump(&instance.stats.compile_failures);
            report_jit_error(instance, &err.to_string());
            return;
        }
    };

    match instance.services.compiler.compile(bytes.clone()).await {
        Ok(module) => {
            if reply.sets_completion_flag() {
                instance.async_ptr.mark_module_complete(&instance.heap);
            }
            tracing::debug!(instance = %instance.id, start, len, ?reply, "module compiled");
            match instance.post_with_interrupt(HostMessage::CompileResult { reply, module }) {
                Ok(()) => bump(&instance.stats.modules_compiled),
                Err(err) => tracing::warn!(instance = %instance.id, error = %err, "compile result undeliverable"),
            }
        }
        Err(err) => {
            bump(&instance.stats.compile_failures);
            report_jit_error(instance, &err.to_string());
            let locator = instance.services.artifacts.create(WASM_MIME, bytes);
            dump(instance, &locator, FAILED_MODULE_DUMP).await;
        }
    }
}

fn report_jit_error(instance: &Instance, message: &str) {
    tracing::error!(instance = %instance.id, error = message, "module compilation failed");
    if let Some(callback) = &instance.services.jit_error {
        callback(message);
    }
}

/// Deliver the artifact at `locator` to the dump sink, revoking it first.
async fn dump(instance: &Instance, locator: &str, file_name: &str) {
    let Some(artifact) = instance.services.artifacts.revoke(locator) else {
        tracing::warn!(instance = %instance.id, locator, "dump requested for unknown artifact");
        return;
    };
    match instance.services.dump.dump(file_name, &artifact.bytes).await {
        Ok(()) => bump(&instance.stats.dumps),
        Err(err) => tracing::warn!(instance = %instance.id, file_name, error = %err, "dump failed"),
    }
}
