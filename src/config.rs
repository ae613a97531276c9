use std::path::PathBuf;

use aero_block::DeviceId;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::assets::AssetBase;
use crate::error::AssetError;

/// Host-level settings shared by every machine instance.
///
/// Every flag can also be set through the environment variable named in its help text.
#[derive(Debug, Clone, clap::Args)]
pub struct HostArgs {
    /// Base URL the runtime, core and clock scripts are fetched from. Must end with `/`.
    ///
    /// Environment variable: `AERO_HOST_ASSET_BASE`.
    #[arg(long, env = "AERO_HOST_ASSET_BASE")]
    pub asset_base: Option<Url>,

    /// Spawn the execution unit from the prebuilt bridge script instead of patching the core.
    ///
    /// Environment variable: `AERO_HOST_BRIDGE`.
    #[arg(long, env = "AERO_HOST_BRIDGE")]
    pub bridge: bool,

    /// Also load the network-stack module during runtime startup.
    ///
    /// Environment variable: `AERO_HOST_NETWORK`.
    #[arg(long, env = "AERO_HOST_NETWORK")]
    pub network: bool,

    /// Directory diagnostic dumps (for example `fail.wasm`) are written to.
    ///
    /// Environment variable: `AERO_HOST_DUMP_DIR`.
    #[arg(long, env = "AERO_HOST_DUMP_DIR")]
    pub dump_dir: Option<PathBuf>,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `AERO_HOST_LOG_LEVEL`.
    #[arg(long, env = "AERO_HOST_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub asset_base: AssetBase,
    pub use_bridge: bool,
    pub network: bool,
    pub dump_dir: Option<PathBuf>,
    pub log_level: String,
}

impl HostConfig {
    /// Config with every optional feature off, fetching assets from `asset_base`.
    pub fn new(asset_base: AssetBase) -> Self {
        Self {
            asset_base,
            use_bridge: false,
            network: false,
            dump_dir: None,
            log_level: "info".to_string(),
        }
    }

    /// Resolve parsed arguments. Without `--asset-base`, assets are read from `./assets/`.
    pub fn from_args(args: HostArgs) -> Result<Self, AssetError> {
        let asset_base = match args.asset_base {
            Some(url) => AssetBase::new(url),
            None => {
                let dir = std::env::current_dir()
                    .map_err(|source| AssetError::Io {
                        url: ".".to_string(),
                        source,
                    })?
                    .join("assets");
                AssetBase::from_directory(&dir)?
            }
        };

        let dump_dir = args.dump_dir.filter(|p| !p.as_os_str().is_empty());

        let log_level = args
            .log_level
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "info".to_string());

        Ok(Self {
            asset_base,
            use_bridge: args.bridge,
            network: args.network,
            dump_dir,
            log_level,
        })
    }
}

/// Declarative machine description.
///
/// `D` is how devices are referenced: registry ids for a live host, or anything the caller maps
/// to ids before booting (the CLI uses image paths).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig<D = DeviceId> {
    /// Guest memory size in bytes.
    pub mem: u32,
    /// Core clock override. Absent means the core picks its own rate.
    #[serde(default, alias = "MhZ", skip_serializing_if = "Option::is_none")]
    pub clock_mhz: Option<u32>,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub bios: Option<D>,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub vga_bios: Option<D>,
    #[serde(default = "Vec::new")]
    pub floppies: Vec<FloppyConfig<D>>,
    #[serde(default = "Vec::new")]
    pub disks: Vec<DiskConfig<D>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloppyConfig<D = DeviceId> {
    /// Drive index; defaults to the entry's position in the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub dev: Option<D>,
    /// Declared size in KiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig<D = DeviceId> {
    pub dev: D,
    /// `"ata"` or `"atapi"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Attachment index; defaults to the entry's position in the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
}

fn none<T>() -> Option<T> {
    None
}

impl<D> MachineConfig<D> {
    pub fn new(mem: u32) -> Self {
        Self {
            mem,
            clock_mhz: None,
            bios: None,
            vga_bios: None,
            floppies: Vec::new(),
            disks: Vec::new(),
        }
    }

    /// Every device reference, in boot order. A device referenced twice appears twice.
    pub fn devices(&self) -> impl Iterator<Item = &D> {
        self.bios
            .iter()
            .chain(self.vga_bios.iter())
            .chain(self.floppies.iter().filter_map(|fl| fl.dev.as_ref()))
            .chain(self.disks.iter().map(|d| &d.dev))
    }

    /// Replace every device reference, failing on the first one `f` rejects.
    pub fn try_map_devices<T, E>(
        self,
        mut f: impl FnMut(D) -> Result<T, E>,
    ) -> Result<MachineConfig<T>, E> {
        let bios = self.bios.map(&mut f).transpose()?;
        let vga_bios = self.vga_bios.map(&mut f).transpose()?;
        let floppies = self
            .floppies
            .into_iter()
            .map(|fl| {
                Ok(FloppyConfig {
                    index: fl.index,
                    dev: fl.dev.map(&mut f).transpose()?,
                    size: fl.size,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        let disks = self
            .disks
            .into_iter()
            .map(|d| {
                Ok(DiskConfig {
                    dev: f(d.dev)?,
                    kind: d.kind,
                    id: d.id,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        Ok(MachineConfig {
            mem: self.mem,
            clock_mhz: self.clock_mhz,
            bios,
            vga_bios,
            floppies,
            disks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_camel_case_with_mhz_alias() {
        let json = r#"{
            "mem": 67108864,
            "MhZ": 50,
            "bios": 0,
            "vgaBios": 1,
            "floppies": [{ "size": 1440 }],
            "disks": [{ "dev": 2, "type": "ata" }]
        }"#;
        let cfg: MachineConfig<u32> = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.mem, 64 * 1024 * 1024);
        assert_eq!(cfg.clock_mhz, Some(50));
        assert_eq!(cfg.bios, Some(0));
        assert_eq!(cfg.vga_bios, Some(1));
        assert_eq!(cfg.floppies[0].size, Some(1440));
        assert_eq!(cfg.floppies[0].dev, None);
        assert_eq!(cfg.disks[0].kind, "ata");
        assert_eq!(cfg.disks[0].id, None);
    }

    #[test]
    fn missing_optional_sections_default_to_empty() {
        let cfg: MachineConfig<u32> = serde_json::from_str(r#"{ "mem": 1024 }"#).unwrap();
        assert!(cfg.bios.is_none());
        assert!(cfg.vga_bios.is_none());
        assert!(cfg.floppies.is_empty());
        assert!(cfg.disks.is_empty());
    }

    #[test]
    fn map_devices_preserves_layout() {
        let cfg: MachineConfig<PathBuf> = serde_json::from_str(
            r#"{ "mem": 1, "bios": "a.bin", "vgaBios": "b.bin", "disks": [{ "dev": "c.img", "type": "atapi", "id": 1 }] }"#,
        )
        .unwrap();
        let mut next = 0;
        let mapped = cfg
            .try_map_devices(|_| -> Result<DeviceId, ()> {
                next += 1;
                Ok(DeviceId(next - 1))
            })
            .unwrap();
        assert_eq!(mapped.bios, Some(DeviceId(0)));
        assert_eq!(mapped.vga_bios, Some(DeviceId(1)));
        assert_eq!(mapped.disks[0].dev, DeviceId(2));
        assert_eq!(mapped.disks[0].id, Some(1));
    }

    #[test]
    fn devices_are_listed_in_boot_order() {
        let cfg: MachineConfig<u32> = serde_json::from_str(
            r#"{ "mem": 1, "bios": 4, "vgaBios": 5, "floppies": [{ "size": 1440 }, { "dev": 6 }], "disks": [{ "dev": 4, "type": "ata" }] }"#,
        )
        .unwrap();
        assert_eq!(cfg.devices().copied().collect::<Vec<_>>(), vec![4, 5, 6, 4]);
    }
}
