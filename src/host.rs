//! Root context: owns everything shared between machine instances.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use aero_block::{BlockDevice, Device, DeviceId, DeviceLookup, DeviceRegistry};

use crate::artifacts::ArtifactStore;
use crate::assets::{AssetFetcher, FileAssetFetcher};
use crate::channel::ExecutionChannel;
use crate::compile::{ModuleCompiler, ValidatingCompiler};
use crate::config::HostConfig;
use crate::display::{DisplaySink, LogDisplay};
use crate::dump::{DirDumpSink, DumpSink, LogDumpSink};
use crate::error::HostError;
use crate::hud::{HudSink, LogHud};
use crate::loader::RuntimeLoader;
use crate::system::{InstanceId, JitErrorCallback, Services, System};
use crate::worker::WorkerSpawner;

pub struct HostBuilder {
    config: HostConfig,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    fetcher: Option<Arc<dyn AssetFetcher>>,
    compiler: Option<Arc<dyn ModuleCompiler>>,
    hud: Option<Arc<dyn HudSink>>,
    display: Option<Arc<dyn DisplaySink>>,
    dump: Option<Arc<dyn DumpSink>>,
    jit_error: Option<JitErrorCallback>,
}

impl HostBuilder {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            spawner: None,
            fetcher: None,
            compiler: None,
            hud: None,
            display: None,
            dump: None,
            jit_error: None,
        }
    }

    /// Required.
    pub fn spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Defaults to [`FileAssetFetcher`].
    pub fn fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Defaults to [`ValidatingCompiler`].
    pub fn compiler(mut self, compiler: Arc<dyn ModuleCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn hud(mut self, hud: Arc<dyn HudSink>) -> Self {
        self.hud = Some(hud);
        self
    }

    pub fn display(mut self, display: Arc<dyn DisplaySink>) -> Self {
        self.display = Some(display);
        self
    }

    /// Defaults to a [`DirDumpSink`] when a dump directory is configured, else [`LogDumpSink`].
    pub fn dump(mut self, dump: Arc<dyn DumpSink>) -> Self {
        self.dump = Some(dump);
        self
    }

    pub fn on_jit_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.jit_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<Host, HostError> {
        let spawner = self
            .spawner
            .ok_or_else(|| HostError::Spawn("no worker spawner configured".to_string()))?;
        let fetcher: Arc<dyn AssetFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(FileAssetFetcher),
        };
        let dump: Arc<dyn DumpSink> = match (self.dump, &self.config.dump_dir) {
            (Some(dump), _) => dump,
            (None, Some(dir)) => Arc::new(DirDumpSink::new(dir.clone())),
            (None, None) => Arc::new(LogDumpSink),
        };
        let compiler: Arc<dyn ModuleCompiler> = match self.compiler {
            Some(compiler) => compiler,
            None => Arc::new(ValidatingCompiler),
        };
        let hud: Arc<dyn HudSink> = match self.hud {
            Some(hud) => hud,
            None => Arc::new(LogHud),
        };
        let display: Arc<dyn DisplaySink> = match self.display {
            Some(display) => display,
            None => Arc::new(LogDisplay),
        };

        let artifacts = Arc::new(ArtifactStore::new());
        let loader = Arc::new(RuntimeLoader::new(
            self.config.asset_base.clone(),
            Arc::clone(&fetcher),
            self.config.network,
        ));
        let channel = ExecutionChannel::new(
            self.config.asset_base.clone(),
            fetcher,
            spawner,
            Arc::clone(&artifacts),
            self.config.use_bridge,
        );
        let services = Arc::new(Services {
            registry: Arc::new(RwLock::new(DeviceRegistry::new())),
            artifacts,
            compiler,
            hud,
            display,
            dump,
            jit_error: self.jit_error,
        });

        tracing::info!(
            asset_base = %self.config.asset_base,
            bridge = self.config.use_bridge,
            network = self.config.network,
            "host ready"
        );
        Ok(Host {
            config: self.config,
            loader,
            channel,
            services,
            next_instance: AtomicU32::new(0),
        })
    }
}

/// Owns the device registry, the shared runtime loader and the artifact store, and creates
/// machine instances.
pub struct Host {
    config: HostConfig,
    loader: Arc<RuntimeLoader>,
    channel: ExecutionChannel,
    services: Arc<Services>,
    next_instance: AtomicU32,
}

impl Host {
    pub fn builder(config: HostConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<RuntimeLoader> {
        &self.loader
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.services.artifacts
    }

    pub fn register_device(&self, device: Device) -> DeviceId {
        self.registry().register(device)
    }

    pub fn register_block(&self, device: Arc<dyn BlockDevice>) -> DeviceId {
        self.registry().register_block(device)
    }

    pub fn device(&self, id: DeviceId) -> Option<Device> {
        self.services.registry.device(id)
    }

    /// Create a machine instance: wait for the shared runtime, then start an execution unit and
    /// its message pump. The machine is booted separately with [`System::run`].
    pub async fn create_system(&self) -> Result<System, HostError> {
        let id = InstanceId(self.next_instance.fetch_add(1, Ordering::Relaxed));
        let ticket = self.loader.ensure_loaded(id);
        let readiness = ticket.wait().await?;
        tracing::debug!(instance = %id, ?readiness, "runtime ready");

        let core = self.channel.create(id).await?;
        Ok(System::start(id, core, Arc::clone(&self.services)))
    }

    fn registry(&self) -> RwLockWriteGuard<'_, DeviceRegistry> {
        match self.services.registry.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
