#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aero_host::assets::{
    AssetBase, StaticAssets, BRIDGE_SCRIPT, CLOCK_SCRIPT, CORE_NO_RETURN_SCRIPT, CORE_SCRIPT,
    NETWORK_MODULE, RUNTIME_SCRIPT,
};
use aero_host::protocol::{
    channel, ClockMessage, CoreMessage, Envelope, HostMessage, MessagePort, PortSender, Tag,
};
use aero_host::shared::{AsyncPtr, SharedHeap};
use aero_host::{
    DisplayCommand, DisplaySink, DumpSink, Host, HostConfig, HostError, HudEvent, HudSink,
    System, WorkerRole, WorkerSource, WorkerSpawner,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// How the fake execution unit answers a spawn.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Post `INIT_RETRY` from any unit started from a script whose epilogue reports `INIT_RETRY`.
    pub retry_fast_core: bool,
    /// Post `INIT_FAILED` with this text instead of `INIT`.
    pub init_failure: Option<String>,
    pub start_real_time: i64,
    pub heap_len: usize,
    pub async_ptr_offset: u32,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            retry_fast_core: false,
            init_failure: None,
            start_real_time: -1,
            heap_len: 64 * 1024,
            async_ptr_offset: 256,
        }
    }
}

/// A host command as seen by the fake unit.
#[derive(Debug)]
pub struct Received {
    pub message: HostMessage,
    /// The interrupt word held the sentinel when the command arrived.
    pub interrupted: bool,
}

/// Test-side handle of a running fake execution unit.
pub struct FakeCore {
    pub heap: SharedHeap,
    pub async_ptr: AsyncPtr,
    to_host: PortSender,
    received: mpsc::UnboundedReceiver<Received>,
}

impl FakeCore {
    pub fn send(&self, message: CoreMessage) {
        self.to_host.post(message.into_envelope()).unwrap();
    }

    pub fn send_envelope(&self, envelope: Envelope) {
        self.to_host.post(envelope).unwrap();
    }

    pub async fn next(&mut self) -> Received {
        tokio::time::timeout(TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for a host command")
            .expect("host command stream closed")
    }

    /// Next command other than `TIMER_PORT`.
    pub async fn next_command(&mut self) -> Received {
        loop {
            let received = self.next().await;
            if !matches!(received.message, HostMessage::TimerPort(_)) {
                return received;
            }
        }
    }

    /// Whatever has arrived so far, after letting in-flight commands land.
    pub async fn drain(&mut self) -> Vec<Received> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut out = Vec::new();
        while let Ok(received) = self.received.try_recv() {
            out.push(received);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockInit {
    pub base_ptr: u32,
    pub start_real_time: i64,
    pub heap_len: usize,
}

#[derive(Debug, Clone)]
pub struct Spawn {
    pub role: WorkerRole,
    pub url: Option<String>,
    pub script: Option<String>,
}

pub struct FakeSpawner {
    behavior: Behavior,
    spawns: Mutex<Vec<Spawn>>,
    clock_inits: Arc<Mutex<Vec<ClockInit>>>,
    cores: mpsc::UnboundedSender<FakeCore>,
}

impl FakeSpawner {
    pub fn new(behavior: Behavior) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeCore>) {
        let (cores, rx) = mpsc::unbounded_channel();
        let spawner = Arc::new(Self {
            behavior,
            spawns: Mutex::new(Vec::new()),
            clock_inits: Arc::new(Mutex::new(Vec::new())),
            cores,
        });
        (spawner, rx)
    }

    pub fn spawns(&self) -> Vec<Spawn> {
        self.spawns.lock().unwrap().clone()
    }

    pub fn core_spawns(&self) -> usize {
        self.spawns()
            .iter()
            .filter(|s| s.role == WorkerRole::Core)
            .count()
    }

    pub fn clock_inits(&self) -> Vec<ClockInit> {
        self.clock_inits.lock().unwrap().clone()
    }

    fn start_core(&self, unit: MessagePort, script: Option<&str>) {
        let (to_host, mut from_host) = unit.split();
        let retry_epilogue = format!("type:{},", Tag::InitRetry as u32);
        if self.behavior.retry_fast_core && script.is_some_and(|s| s.contains(&retry_epilogue)) {
            to_host.post(CoreMessage::InitRetry.into_envelope()).unwrap();
            return;
        }
        if let Some(value) = &self.behavior.init_failure {
            to_host
                .post(
                    CoreMessage::InitFailed {
                        value: value.clone(),
                    }
                    .into_envelope(),
                )
                .unwrap();
            return;
        }

        let heap = SharedHeap::new(self.behavior.heap_len);
        let async_ptr = AsyncPtr::from_byte_offset(self.behavior.async_ptr_offset);
        to_host
            .post(
                CoreMessage::Init {
                    heap: heap.clone(),
                    async_ptr_offset: self.behavior.async_ptr_offset,
                    start_real_time: self.behavior.start_real_time,
                }
                .into_envelope(),
            )
            .unwrap();

        let (tx, received) = mpsc::unbounded_channel();
        let unit_heap = heap.clone();
        tokio::spawn(async move {
            while let Some(envelope) = from_host.recv().await {
                let interrupted = async_ptr.interrupt_pending(&unit_heap);
                if interrupted {
                    async_ptr.clear_interrupt(&unit_heap);
                }
                let message = HostMessage::from_envelope(envelope).expect("undecodable host command");
                if tx.send(Received { message, interrupted }).is_err() {
                    break;
                }
            }
        });

        let _ = self.cores.send(FakeCore {
            heap,
            async_ptr,
            to_host,
            received,
        });
    }

    fn start_clock(&self, unit: MessagePort) {
        let (to_host, mut from_host) = unit.split();
        let inits = Arc::clone(&self.clock_inits);
        tokio::spawn(async move {
            let Some(envelope) = from_host.recv().await else {
                return;
            };
            let (base_ptr, start_real_time, heap, timer) = match ClockMessage::from_envelope(envelope)
            {
                Ok(ClockMessage::InitMemory {
                    heap,
                    base_ptr,
                    start_real_time,
                    port,
                }) => (base_ptr, start_real_time, heap, port),
                Err(_) => return,
            };
            inits.lock().unwrap().push(ClockInit {
                base_ptr,
                start_real_time,
                heap_len: heap.byte_len(),
            });
            to_host.post(Envelope::default()).unwrap();
            while from_host.recv().await.is_some() {}
            drop(timer);
            drop(to_host);
        });
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(&self, role: WorkerRole, source: WorkerSource) -> Result<MessagePort, HostError> {
        let script = source
            .script()
            .map(|s| String::from_utf8_lossy(s).into_owned());
        let url = match &source {
            WorkerSource::Url(url) => Some(url.to_string()),
            WorkerSource::Blob { .. } => None,
        };
        self.spawns.lock().unwrap().push(Spawn {
            role,
            url,
            script: script.clone(),
        });

        let (host_end, unit_end) = channel();
        match role {
            WorkerRole::Core => self.start_core(unit_end, script.as_deref()),
            WorkerRole::Clock => self.start_clock(unit_end),
        }
        Ok(host_end)
    }
}

pub fn asset_base() -> AssetBase {
    AssetBase::new(Url::parse("https://assets.test/cx/").unwrap())
}

pub fn static_assets(base: &AssetBase) -> Arc<StaticAssets> {
    let assets = StaticAssets::new();
    for (name, body) in [
        (RUNTIME_SCRIPT, "runtime();"),
        (NETWORK_MODULE, "tun();"),
        (BRIDGE_SCRIPT, "bridge();"),
        (CORE_SCRIPT, "load('cxcore.wasm');"),
        (CORE_NO_RETURN_SCRIPT, "load('cxcore-no-return-call.wasm');"),
        (CLOCK_SCRIPT, "tick();"),
    ] {
        assets.insert_named(base, name, body).unwrap();
    }
    Arc::new(assets)
}

#[derive(Default)]
pub struct RecordingHud(Mutex<Vec<HudEvent>>);

impl RecordingHud {
    pub fn events(&self) -> Vec<HudEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl HudSink for RecordingHud {
    fn event(&self, event: HudEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingDisplay(Mutex<Vec<DisplayCommand>>);

impl RecordingDisplay {
    pub fn commands(&self) -> Vec<DisplayCommand> {
        self.0.lock().unwrap().clone()
    }
}

impl DisplaySink for RecordingDisplay {
    fn display(&self, command: DisplayCommand) {
        self.0.lock().unwrap().push(command);
    }
}

#[derive(Default)]
pub struct MemoryDumps(Mutex<Vec<(String, Vec<u8>)>>);

impl MemoryDumps {
    pub fn dumps(&self) -> Vec<(String, Vec<u8>)> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl DumpSink for MemoryDumps {
    async fn dump(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<()> {
        self.0
            .lock()
            .unwrap()
            .push((file_name.to_string(), bytes.to_vec()));
        Ok(())
    }
}

pub struct Harness {
    pub host: Host,
    pub spawner: Arc<FakeSpawner>,
    pub cores: mpsc::UnboundedReceiver<FakeCore>,
    pub assets: Arc<StaticAssets>,
    pub hud: Arc<RecordingHud>,
    pub display: Arc<RecordingDisplay>,
    pub dumps: Arc<MemoryDumps>,
    pub jit_errors: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_config(behavior, |_| {})
    }

    pub fn with_config(behavior: Behavior, configure: impl FnOnce(&mut HostConfig)) -> Self {
        let base = asset_base();
        let mut config = HostConfig::new(base.clone());
        configure(&mut config);

        let assets = static_assets(&base);
        let (spawner, cores) = FakeSpawner::new(behavior);
        let hud = Arc::new(RecordingHud::default());
        let display = Arc::new(RecordingDisplay::default());
        let dumps = Arc::new(MemoryDumps::default());
        let jit_errors = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::clone(&jit_errors);

        // A configured dump directory takes precedence over the in-memory sink.
        let keep_dumps_in_memory = config.dump_dir.is_none();
        let mut builder = Host::builder(config)
            .spawner(spawner.clone())
            .fetcher(assets.clone())
            .hud(hud.clone())
            .display(display.clone())
            .on_jit_error(move |message| errors.lock().unwrap().push(message.to_string()));
        if keep_dumps_in_memory {
            builder = builder.dump(dumps.clone());
        }
        let host = builder.build().unwrap();

        Self {
            host,
            spawner,
            cores,
            assets,
            hud,
            display,
            dumps,
            jit_errors,
        }
    }

    /// Create a system and return it with the fake unit behind it.
    pub async fn system(&mut self) -> (System, FakeCore) {
        let system = tokio::time::timeout(TIMEOUT, self.host.create_system())
            .await
            .expect("timed out creating a system")
            .unwrap();
        let core = tokio::time::timeout(TIMEOUT, self.cores.recv())
            .await
            .expect("timed out waiting for the fake unit")
            .expect("spawner dropped");
        (system, core)
    }
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
