//! A running machine instance.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use aero_block::DeviceRegistry;
use aero_host_protocol::{
    ContextInfo, DbgState, DisasMode, HostMessage, MessagePort, PortClosed, PortSender,
};
use aero_host_shared::{AsyncPtr, SharedHeap};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::artifacts::ArtifactStore;
use crate::boot::{self, BootReport, CommandSink};
use crate::channel::{CoreVariant, ReadyCore};
use crate::compile::ModuleCompiler;
use crate::config::MachineConfig;
use crate::dispatch::{self, DispatchStats, DispatchStatsSnapshot};
use crate::display::{DisplaySink, KeyEvent};
use crate::dump::DumpSink;
use crate::error::HostError;
use crate::hud::{self, HudEvent, HudSink, HudState, StatSample};

/// Handle of a machine instance within its [`crate::Host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    /// Stopped after a fatal error; the message pump has exited.
    Halted(String),
}

impl InstanceState {
    pub fn is_halted(&self) -> bool {
        matches!(self, InstanceState::Halted(_))
    }
}

/// Called with the error text whenever a module fails to compile.
pub type JitErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Host collaborators shared by every instance.
pub(crate) struct Services {
    pub registry: Arc<RwLock<DeviceRegistry>>,
    pub artifacts: Arc<ArtifactStore>,
    pub compiler: Arc<dyn ModuleCompiler>,
    pub hud: Arc<dyn HudSink>,
    pub display: Arc<dyn DisplaySink>,
    pub dump: Arc<dyn DumpSink>,
    pub jit_error: Option<JitErrorCallback>,
}

/// Per-instance state shared by the [`System`] handle, the pump and its request tasks.
pub(crate) struct Instance {
    pub id: InstanceId,
    pub heap: SharedHeap,
    pub async_ptr: AsyncPtr,
    pub services: Arc<Services>,
    pub stats: DispatchStats,
    core: PortSender,
    state: watch::Sender<InstanceState>,
    pending_io: Mutex<HashSet<u32>>,
    hud: Mutex<HudState>,
    keyboard: AtomicBool,
}

impl Instance {
    /// Post without waking the unit.
    pub fn post(&self, message: HostMessage) -> Result<(), PortClosed> {
        self.core.post(message.into_envelope())
    }

    /// Store the interrupt sentinel, then post.
    pub fn post_with_interrupt(&self, message: HostMessage) -> Result<(), PortClosed> {
        self.async_ptr.raise_interrupt(&self.heap);
        self.core.post(message.into_envelope())
    }

    pub fn state(&self) -> InstanceState {
        self.state.borrow().clone()
    }

    pub fn is_halted(&self) -> bool {
        self.state.borrow().is_halted()
    }

    pub fn subscribe(&self) -> watch::Receiver<InstanceState> {
        self.state.subscribe()
    }

    /// Move to [`InstanceState::Halted`]. The first reason wins.
    pub fn halt(&self, reason: String) {
        self.state.send_if_modified(|state| {
            if state.is_halted() {
                return false;
            }
            tracing::error!(instance = %self.id, %reason, "instance halted");
            *state = InstanceState::Halted(reason);
            true
        });
    }

    /// Register an in-flight I/O transaction. False if it is already in flight.
    pub fn begin_io(&self, io_transaction: u32) -> bool {
        lock(&self.pending_io).insert(io_transaction)
    }

    pub fn finish_io(&self, io_transaction: u32) -> bool {
        lock(&self.pending_io).remove(&io_transaction)
    }

    pub fn pending_io(&self) -> usize {
        lock(&self.pending_io).len()
    }

    pub fn hud(&self) -> MutexGuard<'_, HudState> {
        lock(&self.hud)
    }

    pub fn enable_keyboard(&self) {
        self.keyboard.store(true, Ordering::Release);
    }

    fn keyboard_enabled(&self) -> bool {
        self.keyboard.load(Ordering::Acquire)
    }
}

impl CommandSink for Instance {
    fn post(&self, message: HostMessage) -> Result<(), PortClosed> {
        Instance::post(self, message)
    }
}

/// A created machine: a ready execution unit plus its message pump.
pub struct System {
    instance: Arc<Instance>,
    variant: CoreVariant,
    pump: JoinHandle<()>,
    sampler: Mutex<Option<JoinHandle<()>>>,
    /// Keeps the clock unit's channel open for the lifetime of the system.
    _clock: Option<PortSender>,
}

impl System {
    pub(crate) fn start(id: InstanceId, core: ReadyCore, services: Arc<Services>) -> Self {
        let ReadyCore {
            variant,
            port,
            heap,
            async_ptr,
            clock,
        } = core;
        let (core_tx, core_rx) = port.split();
        let (clock_tx, clock_rx) = match clock.map(MessagePort::split) {
            Some((tx, rx)) => (Some(tx), Some(rx)),
            None => (None, None),
        };

        let (state, _) = watch::channel(InstanceState::Running);
        let instance = Arc::new(Instance {
            id,
            heap,
            async_ptr,
            services,
            stats: DispatchStats::default(),
            core: core_tx,
            state,
            pending_io: Mutex::new(HashSet::new()),
            hud: Mutex::new(HudState::default()),
            keyboard: AtomicBool::new(false),
        });

        let pump = tokio::spawn(dispatch::pump(Arc::clone(&instance), core_rx, clock_rx));
        Self {
            instance,
            variant,
            pump,
            sampler: Mutex::new(None),
            _clock: clock_tx,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.instance.id
    }

    pub fn variant(&self) -> CoreVariant {
        self.variant
    }

    pub fn heap(&self) -> &SharedHeap {
        &self.instance.heap
    }

    pub fn async_ptr(&self) -> AsyncPtr {
        self.instance.async_ptr
    }

    pub fn state(&self) -> InstanceState {
        self.instance.state()
    }

    /// Wait until the instance halts and return the reason.
    pub async fn halted(&self) -> String {
        let mut rx = self.instance.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            if let InstanceState::Halted(reason) = state {
                return reason;
            }
            if rx.changed().await.is_err() {
                return "instance dropped".to_string();
            }
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.instance.stats.snapshot()
    }

    /// Number of I/O transactions currently in flight.
    pub fn pending_io(&self) -> usize {
        self.instance.pending_io()
    }

    /// Validate `config` and boot the machine.
    pub async fn run(&self, config: &MachineConfig) -> Result<BootReport, HostError> {
        self.ensure_running()?;
        let report = boot::boot(
            self.instance.as_ref(),
            self.instance.services.registry.as_ref(),
            config,
        )
        .await?;
        tracing::info!(instance = %self.id(), commands = report.commands, "machine started");
        Ok(report)
    }

    /// Ask the unit to start reporting HUD data. With `sample_every`, registered statistics are
    /// sampled and sent to the HUD sink periodically.
    pub fn attach_hud(&self, sample_every: Option<Duration>) -> Result<(), HostError> {
        if sample_every == Some(Duration::ZERO) {
            return Err(HostError::ZeroSamplePeriod);
        }
        self.command(HostMessage::AttachHud)?;
        if let Some(period) = sample_every {
            let instance = Arc::clone(&self.instance);
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    if instance.is_halted() {
                        break;
                    }
                    let samples = instance.hud().sample(&instance.heap);
                    instance.services.hud.event(HudEvent::Stats(samples));
                }
            });
            if let Some(previous) = lock(&self.sampler).replace(task) {
                previous.abort();
            }
        }
        Ok(())
    }

    pub fn sample_stats(&self) -> Vec<StatSample> {
        self.instance.hud().sample(&self.instance.heap)
    }

    pub fn contexts(&self) -> Vec<ContextInfo> {
        self.instance.hud().contexts().to_vec()
    }

    pub fn disassembly(&self) -> Option<String> {
        self.instance.hud().disassembly().map(str::to_string)
    }

    pub fn traces(&self) -> String {
        self.instance.hud().traces().to_string()
    }

    /// Attach the debugger to a detached context, or detach it from a stopped one.
    /// Returns true when an attach was requested.
    pub fn toggle_debugger(&self, ctx_type: u32, ctx_id: u32) -> Result<bool, HostError> {
        let ctx = self.context(ctx_type, ctx_id)?;
        let attach = hud::toggle_attaches(ctx.dbg_state)
            .ok_or(HostError::ContextNotStopped { ctx_type, ctx_id })?;
        let message = if attach {
            HostMessage::DbgAttach { ctx_type, ctx_id }
        } else {
            HostMessage::DbgDetach { ctx_type, ctx_id }
        };
        self.command(message)?;
        Ok(attach)
    }

    /// Request a disassembly (or wasm dump) at `addr` for a stopped context.
    pub fn disassemble(
        &self,
        mode: DisasMode,
        ctx_type: u32,
        ctx_id: u32,
        addr: u32,
    ) -> Result<(), HostError> {
        let ctx = self.context(ctx_type, ctx_id)?;
        if ctx.dbg_state != DbgState::Stopped {
            return Err(HostError::ContextNotStopped { ctx_type, ctx_id });
        }
        self.command(HostMessage::DbgDisas {
            mode,
            ctx_type,
            ctx_id,
            addr,
        })
    }

    /// Apply a JIT bisect trace list (hex addresses, one per line). Blank input sends nothing.
    pub fn jit_bisect(&self, text: &str) -> Result<usize, HostError> {
        let traces = hud::parse_traces(text)?;
        if traces.is_empty() {
            return Ok(0);
        }
        let n = traces.len();
        self.command(HostMessage::JitBisect { traces })?;
        Ok(n)
    }

    pub fn request_traces(&self) -> Result<(), HostError> {
        self.command(HostMessage::JitGetCurTraces)
    }

    /// Forward a key press. Returns false when the event stays with the host.
    pub fn key_down(&self, event: KeyEvent) -> Result<bool, HostError> {
        self.key(event, |key_code| HostMessage::QueueKeyDown { key_code })
    }

    pub fn key_up(&self, event: KeyEvent) -> Result<bool, HostError> {
        self.key(event, |key_code| HostMessage::QueueKeyUp { key_code })
    }

    fn key(
        &self,
        event: KeyEvent,
        message: impl FnOnce(u32) -> HostMessage,
    ) -> Result<bool, HostError> {
        if !self.instance.keyboard_enabled() || !event.is_forwarded() {
            return Ok(false);
        }
        self.command(message(event.key_code))?;
        Ok(true)
    }

    fn context(&self, ctx_type: u32, ctx_id: u32) -> Result<ContextInfo, HostError> {
        self.instance
            .hud()
            .context(ctx_type, ctx_id)
            .ok_or(HostError::UnknownContext { ctx_type, ctx_id })
    }

    fn command(&self, message: HostMessage) -> Result<(), HostError> {
        self.ensure_running()?;
        tracing::debug!(instance = %self.id(), command = message.tag().name(), "command");
        self.instance.post_with_interrupt(message)?;
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), HostError> {
        match self.instance.state() {
            InstanceState::Running => Ok(()),
            InstanceState::Halted(reason) => Err(HostError::Halted(reason)),
        }
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.pump.abort();
        if let Some(sampler) = lock(&self.sampler).take() {
            sampler.abort();
        }
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("id", &self.instance.id)
            .field("variant", &self.variant)
            .field("state", &self.instance.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
