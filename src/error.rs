use aero_block::{DeviceError, DeviceId};
use aero_host_protocol::{DecodeError, PortClosed};
use aero_host_shared::HeapError;
use thiserror::Error;

/// Machine configuration rejected by the boot sequencer.
///
/// Commands posted before the failing step stay posted; nothing after it is sent.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("machine configuration must define `{0}`")]
    MissingFirmware(&'static str),

    #[error("device {0} is not registered")]
    UnknownDevice(DeviceId),

    #[error("device {0} is not a block device")]
    NotBlockDevice(DeviceId),

    #[error("invalid floppy index {0}")]
    InvalidFloppyIndex(u32),

    #[error("floppy index {0} is configured twice")]
    DuplicateFloppyIndex(u32),

    #[error("floppy {index}: device {dev} is backed by the execution unit")]
    PassthroughFloppy { index: u32, dev: DeviceId },

    #[error("floppy {index}: declared size {declared} KiB does not match device length {actual} bytes")]
    FloppySizeMismatch {
        index: u32,
        declared: u32,
        actual: u32,
    },

    #[error("floppy {index}: declared size {size} KiB exceeds the addressable range")]
    FloppyTooLarge { index: u32, size: u32 },

    #[error("invalid disk id {0}")]
    InvalidDiskId(u32),

    #[error("disk id {0} is configured twice")]
    DuplicateDiskId(u32),

    #[error("unknown disk type {0:?}")]
    UnknownDiskType(String),

    #[error("reading firmware from device {dev}: {source}")]
    Firmware {
        dev: DeviceId,
        #[source]
        source: DeviceError,
    },

    #[error("querying permissions of device {dev}: {source}")]
    Permissions {
        dev: DeviceId,
        #[source]
        source: DeviceError,
    },

    #[error("execution unit is gone")]
    Disconnected(#[from] PortClosed),
}

/// Fatal failure while serving an I/O request. The instance halts.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("I/O request for unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("I/O request for device {0}, which is not a block device")]
    NotBlockDevice(DeviceId),

    #[error("device {dev}: {source}")]
    Device {
        dev: DeviceId,
        #[source]
        source: DeviceError,
    },

    #[error("shared heap: {0}")]
    Heap(#[from] HeapError),

    #[error("execution unit is gone")]
    Disconnected(#[from] PortClosed),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid module: {0}")]
    Invalid(String),

    #[error("module bytes out of heap bounds: {0}")]
    Range(#[from] HeapError),

    #[error("compile task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid asset url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported asset scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("reading asset {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to create or drive a machine instance.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("shared runtime is unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("core initialization failed: {0}")]
    InitFailed(String),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("failed to start worker: {0}")]
    Spawn(String),

    #[error("execution unit closed its channel before becoming ready")]
    Disconnected,

    #[error("malformed message from execution unit: {0}")]
    Protocol(#[from] DecodeError),

    #[error("async pointer at byte {0} lies outside the shared heap")]
    AsyncPtrOutOfRange(u32),

    #[error(transparent)]
    Boot(#[from] BootError),

    #[error("unknown debug context {ctx_type}:{ctx_id}")]
    UnknownContext { ctx_type: u32, ctx_id: u32 },

    #[error("debug context {ctx_type}:{ctx_id} is not stopped")]
    ContextNotStopped { ctx_type: u32, ctx_id: u32 },

    #[error("HUD sampling period must be non-zero")]
    ZeroSamplePeriod,

    #[error("invalid trace address {0:?}")]
    InvalidTrace(String),

    #[error("instance has halted: {0}")]
    Halted(String),

    #[error("execution unit is gone")]
    PortClosed(#[from] PortClosed),
}
