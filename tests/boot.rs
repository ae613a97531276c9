mod support;

use std::sync::Arc;

use aero_host::block::{DeviceId, MemBlockDevice};
use aero_host::protocol::{DiskType, HostMessage};
use aero_host::{BootError, DiskConfig, FloppyConfig, HostError, MachineConfig};

use support::{Behavior, Harness};

const MIB: u32 = 1024 * 1024;

struct Firmware {
    bios: DeviceId,
    vga: DeviceId,
}

fn firmware(h: &Harness) -> Firmware {
    Firmware {
        bios: h
            .host
            .register_block(Arc::new(MemBlockDevice::read_only(vec![0xaa; 128]))),
        vga: h
            .host
            .register_block(Arc::new(MemBlockDevice::read_only(vec![0x55; 64]))),
    }
}

fn machine(fw: &Firmware, mem: u32) -> MachineConfig {
    let mut config = MachineConfig::new(mem);
    config.bios = Some(fw.bios);
    config.vga_bios = Some(fw.vga);
    config
}

fn ata(dev: DeviceId, id: Option<u32>) -> DiskConfig {
    DiskConfig {
        dev,
        kind: "ata".to_string(),
        id,
    }
}

#[tokio::test]
async fn boots_64mib_machine_with_one_ata_disk() {
    let mut h = Harness::new(Behavior::default());
    let fw = firmware(&h);
    let disk = h.host.register_block(Arc::new(MemBlockDevice::zeroed(MIB)));
    let (system, mut core) = h.system().await;

    let mut config = machine(&fw, 64 * MIB);
    config.disks.push(ata(disk, None));
    let report = system.run(&config).await.unwrap();
    assert_eq!(report.commands, 3);
    assert_eq!(report.disks, 1);
    assert_eq!(report.floppies, 0);

    let first = core.next_command().await;
    assert!(!first.interrupted);
    match first.message {
        HostMessage::InitSystem {
            mhz,
            mem,
            bios,
            vga_bios,
        } => {
            assert_eq!(mhz, 0);
            assert_eq!(mem, 64 * MIB);
            assert_eq!(bios, vec![0xaa; 128]);
            assert_eq!(vga_bios, vec![0x55; 64]);
        }
        other => panic!("expected INIT_SYSTEM, got {other:?}"),
    }
    match core.next_command().await.message {
        HostMessage::CreateIdeDisk {
            disk_type,
            index,
            dev_id,
            len,
        } => {
            assert_eq!(disk_type, DiskType::HardDisk);
            assert_eq!(index, 0);
            assert_eq!(dev_id, disk.0);
            assert_eq!(len, MIB);
        }
        other => panic!("expected CREATE_IDE_DISK, got {other:?}"),
    }
    assert!(matches!(
        core.next_command().await.message,
        HostMessage::StartSystem
    ));
    assert!(core.drain().await.is_empty());
}

#[tokio::test]
async fn missing_vga_bios_is_rejected_before_any_command() {
    let mut h = Harness::new(Behavior::default());
    let fw = firmware(&h);
    let (system, mut core) = h.system().await;

    let mut config = machine(&fw, 64 * MIB);
    config.vga_bios = None;
    let err = system.run(&config).await.unwrap_err();
    assert!(matches!(
        err,
        HostError::Boot(BootError::MissingFirmware("vgaBios"))
    ));
    assert!(core.drain().await.is_empty());
}

#[tokio::test]
async fn duplicate_disk_id_stops_after_first_disk() {
    let mut h = Harness::new(Behavior::default());
    let fw = firmware(&h);
    let a = h.host.register_block(Arc::new(MemBlockDevice::zeroed(MIB)));
    let b = h.host.register_block(Arc::new(MemBlockDevice::zeroed(2 * MIB)));
    let (system, mut core) = h.system().await;

    let mut config = machine(&fw, 64 * MIB);
    config.disks.push(ata(a, Some(0)));
    config.disks.push(DiskConfig {
        dev: b,
        kind: "atapi".to_string(),
        id: Some(0),
    });
    let err = system.run(&config).await.unwrap_err();
    assert!(matches!(
        err,
        HostError::Boot(BootError::DuplicateDiskId(0))
    ));

    let tags: Vec<_> = core
        .drain()
        .await
        .into_iter()
        .map(|r| r.message.tag().name())
        .collect();
    assert_eq!(tags, ["INIT_SYSTEM", "CREATE_IDE_DISK"]);
}

#[tokio::test]
async fn floppy_size_mismatch_sends_no_floppy_commands() {
    let mut h = Harness::new(Behavior::default());
    let fw = firmware(&h);
    let floppy = h
        .host
        .register_block(Arc::new(MemBlockDevice::zeroed(1440 * 1024)));
    let (system, mut core) = h.system().await;

    let mut config = machine(&fw, 16 * MIB);
    config.floppies.push(FloppyConfig {
        index: None,
        dev: Some(floppy),
        size: Some(720),
    });
    let err = system.run(&config).await.unwrap_err();
    match err {
        HostError::Boot(BootError::FloppySizeMismatch {
            index,
            declared,
            actual,
        }) => {
            assert_eq!(index, 0);
            assert_eq!(declared, 720);
            assert_eq!(actual, 1440 * 1024);
        }
        other => panic!("unexpected error {other:?}"),
    }

    let tags: Vec<_> = core
        .drain()
        .await
        .into_iter()
        .map(|r| r.message.tag().name())
        .collect();
    assert_eq!(tags, ["INIT_SYSTEM"]);
}

#[tokio::test]
async fn floppies_precede_disks_and_read_only_images_are_write_protected() {
    let mut h = Harness::new(Behavior::default());
    let fw = firmware(&h);
    let floppy = h
        .host
        .register_block(Arc::new(MemBlockDevice::read_only(vec![0; 1440 * 1024])));
    let disk = h.host.register_block(Arc::new(MemBlockDevice::zeroed(MIB)));
    let (system, mut core) = h.system().await;

    let mut config = machine(&fw, 16 * MIB);
    config.disks.push(ata(disk, None));
    config.floppies.push(FloppyConfig {
        index: None,
        dev: Some(floppy),
        size: Some(1440),
    });
    let report = system.run(&config).await.unwrap();
    assert_eq!(report.floppies, 1);

    let received = core.drain().await;
    let tags: Vec<_> = received.iter().map(|r| r.message.tag().name()).collect();
    assert_eq!(
        tags,
        [
            "INIT_SYSTEM",
            "CREATE_FLOPPY_DISK",
            "SWAP_FLOPPY",
            "CREATE_IDE_DISK",
            "START_SYSTEM"
        ]
    );
    match &received[2].message {
        HostMessage::SwapFloppy {
            index,
            dev_id,
            len,
            write_protected,
        } => {
            assert_eq!(*index, 0);
            assert_eq!(*dev_id, floppy.0);
            assert_eq!(*len, 1440 * 1024);
            assert!(*write_protected);
        }
        other => panic!("expected SWAP_FLOPPY, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_floppy_declaration_is_rejected() {
    let mut h = Harness::new(Behavior::default());
    let fw = firmware(&h);
    let (system, mut core) = h.system().await;

    let mut config = machine(&fw, 16 * MIB);
    config.floppies.push(FloppyConfig {
        index: Some(1),
        dev: None,
        size: Some(u32::MAX / 512),
    });
    let err = system.run(&config).await.unwrap_err();
    assert!(matches!(
        err,
        HostError::Boot(BootError::FloppyTooLarge {
            index: 1,
            size
        }) if size == u32::MAX / 512
    ));

    let tags: Vec<_> = core
        .drain()
        .await
        .into_iter()
        .map(|r| r.message.tag().name())
        .collect();
    assert_eq!(tags, ["INIT_SYSTEM"]);
}
