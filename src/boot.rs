//! Boot sequencer: turns a [`MachineConfig`] into the command stream that starts a machine.

use std::sync::{Arc, Mutex};

use aero_block::{BlockDevice, Device, DeviceId, DeviceLookup, Permissions};
use aero_host_protocol::{DiskType, HostMessage, PortClosed};

use crate::config::MachineConfig;
use crate::error::BootError;

/// Highest floppy index / IDE attachment index the execution unit accepts.
const MAX_SLOT: u32 = 1;

/// Destination for boot commands.
pub trait CommandSink: Send + Sync {
    fn post(&self, message: HostMessage) -> Result<(), PortClosed>;
}

/// Records every command instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<HostMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<HostMessage> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<HostMessage>> {
        match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CommandSink for RecordingSink {
    fn post(&self, message: HostMessage) -> Result<(), PortClosed> {
        self.lock().push(message);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Commands posted, `INIT_SYSTEM` and `START_SYSTEM` included.
    pub commands: usize,
    pub floppies: usize,
    pub disks: usize,
}

/// Validate `config` and post the boot commands to `sink`, in order.
///
/// Each step waits for the previous one, so commands reach the unit in configuration order. On
/// error, commands posted before the failing entry stay posted and nothing further is sent.
pub async fn boot(
    sink: &dyn CommandSink,
    devices: &dyn DeviceLookup,
    config: &MachineConfig,
) -> Result<BootReport, BootError> {
    let result = run(sink, devices, config).await;
    if let Err(err) = &result {
        tracing::warn!(error = %err, "boot halted");
    }
    result
}

async fn run(
    sink: &dyn CommandSink,
    devices: &dyn DeviceLookup,
    config: &MachineConfig,
) -> Result<BootReport, BootError> {
    let bios = config.bios.ok_or(BootError::MissingFirmware("bios"))?;
    let vga_bios = config.vga_bios.ok_or(BootError::MissingFirmware("vgaBios"))?;

    let bios_dev = resolve_block(devices, bios)?;
    let vga_dev = resolve_block(devices, vga_bios)?;
    let bios_data = read_all(bios, &bios_dev).await?;
    let vga_data = read_all(vga_bios, &vga_dev).await?;

    let mut report = BootReport::default();
    emit(sink, &mut report, HostMessage::InitSystem {
        mhz: config.clock_mhz.unwrap_or(0),
        mem: config.mem,
        bios: bios_data,
        vga_bios: vga_data,
    })?;

    let mut floppy_used = [false; (MAX_SLOT + 1) as usize];
    for (position, floppy) in config.floppies.iter().enumerate() {
        let index = floppy.index.unwrap_or(position as u32);
        if index > MAX_SLOT {
            return Err(BootError::InvalidFloppyIndex(index));
        }
        if floppy_used[index as usize] {
            return Err(BootError::DuplicateFloppyIndex(index));
        }
        floppy_used[index as usize] = true;

        match (floppy.dev, floppy.size) {
            (Some(dev), size) => {
                let device = devices.device(dev).ok_or(BootError::UnknownDevice(dev))?;
                let Device::Block(block) = device else {
                    return Err(BootError::PassthroughFloppy { index, dev });
                };
                let len = block.len();
                if let Some(size) = size {
                    if u64::from(size) * 1024 != u64::from(len) {
                        return Err(BootError::FloppySizeMismatch {
                            index,
                            declared: size,
                            actual: len,
                        });
                    }
                }
                let bits = block
                    .permission_bits()
                    .await
                    .map_err(|source| BootError::Permissions { dev, source })?;
                let write_protected =
                    !Permissions::from_bits_retain(bits).contains(Permissions::WRITABLE);
                emit(sink, &mut report, HostMessage::CreateFloppyDisk { index, len })?;
                emit(sink, &mut report, HostMessage::SwapFloppy {
                    index,
                    dev_id: dev.0,
                    len,
                    write_protected,
                })?;
            }
            (None, Some(size)) => {
                let len = size
                    .checked_mul(1024)
                    .ok_or(BootError::FloppyTooLarge { index, size })?;
                emit(sink, &mut report, HostMessage::CreateFloppyDisk { index, len })?;
            }
            (None, None) => {
                tracing::debug!(index, "empty floppy entry");
                continue;
            }
        }
        report.floppies += 1;
    }

    let mut disk_used = [false; (MAX_SLOT + 1) as usize];
    for (position, disk) in config.disks.iter().enumerate() {
        let id = disk.id.unwrap_or(position as u32);
        if id > MAX_SLOT {
            return Err(BootError::InvalidDiskId(id));
        }
        if disk_used[id as usize] {
            return Err(BootError::DuplicateDiskId(id));
        }
        disk_used[id as usize] = true;

        let disk_type = match disk.kind.as_str() {
            "ata" => DiskType::HardDisk,
            "atapi" => DiskType::Cdrom,
            other => return Err(BootError::UnknownDiskType(other.to_string())),
        };
        let device = devices
            .device(disk.dev)
            .ok_or(BootError::UnknownDevice(disk.dev))?;
        emit(sink, &mut report, HostMessage::CreateIdeDisk {
            disk_type,
            index: id,
            dev_id: disk.dev.0,
            len: device.len(),
        })?;
        report.disks += 1;
    }

    emit(sink, &mut report, HostMessage::StartSystem)?;
    Ok(report)
}

fn emit(
    sink: &dyn CommandSink,
    report: &mut BootReport,
    message: HostMessage,
) -> Result<(), BootError> {
    tracing::debug!(command = message.tag().name(), "boot command");
    sink.post(message)?;
    report.commands += 1;
    Ok(())
}

fn resolve_block(devices: &dyn DeviceLookup, id: DeviceId) -> Result<Arc<dyn BlockDevice>, BootError> {
    match devices.device(id) {
        Some(Device::Block(block)) => Ok(block),
        Some(Device::Passthrough { .. }) => Err(BootError::NotBlockDevice(id)),
        None => Err(BootError::UnknownDevice(id)),
    }
}

async fn read_all(id: DeviceId, device: &Arc<dyn BlockDevice>) -> Result<Vec<u8>, BootError> {
    let mut data = vec![0; device.len() as usize];
    device
        .read(0, &mut data)
        .await
        .map_err(|source| BootError::Firmware { dev: id, source })?;
    Ok(data)
}
