use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;

use crate::Result;

/// Registry handle for a device. This is the `devId` the execution unit uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

bitflags! {
    /// Permission bits reported by [`BlockDevice::permission_bits`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Host-served block storage (the only kind the I/O path accepts).
    Block,
    /// Storage implemented inside the execution unit itself; the host only knows its id.
    Passthrough,
}

/// Byte-addressed asynchronous storage backend.
///
/// Every call must satisfy `offset + buf.len() <= len()`; implementations reject violations
/// with [`crate::DeviceError::OutOfRange`] (see [`crate::checked_range`]).
#[async_trait]
pub trait BlockDevice: Send + Sync {
    /// Device size in bytes.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `dst.len()` bytes starting at `offset`. Returns the number of bytes transferred.
    async fn read(&self, offset: u32, dst: &mut [u8]) -> Result<u32>;

    /// Write `src` starting at `offset`. Returns the number of bytes transferred.
    async fn write(&self, offset: u32, src: &[u8]) -> Result<u32>;

    /// Raw permission bits; see [`Permissions`].
    async fn permission_bits(&self) -> Result<u32>;
}

/// A registered device.
#[derive(Clone)]
pub enum Device {
    Block(Arc<dyn BlockDevice>),
    Passthrough { len: u32 },
}

impl Device {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Block(_) => DeviceKind::Block,
            Device::Passthrough { .. } => DeviceKind::Passthrough,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            Device::Block(dev) => dev.len(),
            Device::Passthrough { len } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_block(&self) -> Option<&Arc<dyn BlockDevice>> {
        match self {
            Device::Block(dev) => Some(dev),
            Device::Passthrough { .. } => None,
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
