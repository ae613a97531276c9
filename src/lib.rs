//! Host-side control plane for browser-style machine instances.
//!
//! A [`Host`] loads the shared runtime once, starts one execution unit per [`System`], boots the
//! machine from a [`MachineConfig`] and serves the unit's I/O, compile, debug and display
//! requests until the instance halts.

pub mod artifacts;
pub mod assets;
pub mod boot;
pub mod channel;
pub mod compile;
pub mod config;
pub mod dispatch;
pub mod display;
pub mod dump;
pub mod error;
pub mod host;
pub mod hud;
pub mod loader;
pub mod system;
pub mod worker;

pub use artifacts::{Artifact, ArtifactStore};
pub use assets::{AssetBase, AssetFetcher, FileAssetFetcher, StaticAssets};
pub use boot::{boot, BootReport, CommandSink, RecordingSink};
pub use channel::{CoreVariant, ExecutionChannel, ReadyCore};
pub use compile::{ModuleCompiler, ValidatingCompiler};
pub use config::{DiskConfig, FloppyConfig, HostArgs, HostConfig, MachineConfig};
pub use dispatch::DispatchStatsSnapshot;
pub use display::{DisplayCommand, DisplaySink, KeyEvent, LogDisplay};
pub use dump::{DirDumpSink, DumpSink, LogDumpSink};
pub use error::{AssetError, BootError, CompileError, DispatchError, HostError};
pub use host::{Host, HostBuilder};
pub use hud::{GlobalStat, HudEvent, HudSink, LogHud, StatSample};
pub use loader::{LoadState, Readiness, ReadyTicket, RuntimeLoader};
pub use system::{InstanceId, InstanceState, JitErrorCallback, System};
pub use worker::{WorkerRole, WorkerSource, WorkerSpawner};

pub use aero_block as block;
pub use aero_host_protocol as protocol;
pub use aero_host_shared as shared;
