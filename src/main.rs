#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aero_block::{DeviceId, DeviceRegistry, FileBlockDevice};
use aero_host::assets::{
    AssetFetcher, FileAssetFetcher, BRIDGE_SCRIPT, CLOCK_SCRIPT, CORE_NO_RETURN_SCRIPT,
    CORE_SCRIPT, NETWORK_MODULE, RUNTIME_SCRIPT,
};
use aero_host::protocol::{Attachment, HostMessage};
use aero_host::{HostArgs, HostConfig, MachineConfig, RecordingSink};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Host-side control plane for aero machine instances")]
struct Cli {
    #[command(flatten)]
    host: HostArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a machine description and print the boot commands it produces, one JSON object
    /// per line.
    Plan {
        /// Machine description (JSON). Device entries are disk image paths, relative to the file.
        machine: PathBuf,
    },
    /// Check that every script the host loads is reachable under the asset base.
    Assets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HostConfig::from_args(cli.host).context("resolve host configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Plan { machine } => plan(&machine).await,
        Command::Assets => check_assets(&config).await,
    }
}

async fn plan(machine: &Path) -> Result<()> {
    let raw = tokio::fs::read(machine)
        .await
        .with_context(|| format!("read {}", machine.display()))?;
    let config: MachineConfig<PathBuf> = serde_json::from_slice(&raw)
        .with_context(|| format!("parse machine description {}", machine.display()))?;

    let root = machine.parent().unwrap_or_else(|| Path::new("."));
    let mut registry = DeviceRegistry::new();
    let mut opened: HashMap<PathBuf, DeviceId> = HashMap::new();
    for path in config.devices() {
        let path = root.join(path);
        if opened.contains_key(&path) {
            continue;
        }
        let device = FileBlockDevice::open(&path, false)
            .await
            .with_context(|| format!("open disk image {}", path.display()))?;
        let id = registry.register_block(Arc::new(device));
        opened.insert(path, id);
    }

    let config = config.try_map_devices(|path| {
        opened
            .get(&root.join(&path))
            .copied()
            .with_context(|| format!("device {} was not opened", path.display()))
    })?;

    let sink = RecordingSink::new();
    let report = aero_host::boot(&sink, &registry, &config).await;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for message in sink.take() {
        writeln!(out, "{}", describe(message))?;
    }
    out.flush()?;

    let report = report.context("machine description rejected")?;
    tracing::info!(
        commands = report.commands,
        floppies = report.floppies,
        disks = report.disks,
        "boot plan complete"
    );
    Ok(())
}

/// JSON form of a command: its tag name, its scalar fields and a summary of each attachment.
fn describe(message: HostMessage) -> Value {
    let tag = message.tag().name();
    let (mut fields, attachments) = message.into_envelope().into_parts();
    fields.insert("tag".to_string(), json!(tag));
    if !attachments.is_empty() {
        let summary = attachments
            .iter()
            .map(|a| match a {
                Attachment::Buffer(bytes) => json!({ "buffer": bytes.len() }),
                Attachment::Heap(heap) => json!({ "heap": heap.byte_len() }),
                Attachment::Port(_) => json!("port"),
                Attachment::Module(module) => json!({ "module": module.len() }),
            })
            .collect::<Vec<_>>();
        fields.insert("attachments".to_string(), Value::Array(summary));
    }
    Value::Object(fields)
}

async fn check_assets(config: &HostConfig) -> Result<()> {
    let fetcher = FileAssetFetcher;
    let mut missing = 0usize;
    for name in [
        RUNTIME_SCRIPT,
        NETWORK_MODULE,
        BRIDGE_SCRIPT,
        CORE_SCRIPT,
        CORE_NO_RETURN_SCRIPT,
        CLOCK_SCRIPT,
    ] {
        let url = config.asset_base.join(name)?;
        match fetcher.fetch(&url).await {
            Ok(bytes) => println!("ok       {name} ({} bytes)", bytes.len()),
            Err(err) => {
                missing += 1;
                println!("missing  {name}: {err}");
            }
        }
    }
    anyhow::ensure!(missing == 0, "{missing} asset(s) unavailable under {}", config.asset_base);
    Ok(())
}
