//! Block devices served to the execution unit.
//!
//! The execution unit never touches storage directly: it posts I/O requests that name a device
//! by id, and the host resolves the id in a [`DeviceRegistry`] and performs the transfer through
//! the [`BlockDevice`] trait. This crate provides:
//!
//! - [`BlockDevice`]: async byte-addressed read/write/permission interface
//! - [`DeviceRegistry`]: id → [`Device`] arena shared by every machine instance
//! - [`MemBlockDevice`]: in-memory backend (tests, small firmware images)
//! - [`FileBlockDevice`]: file-backed backend

mod device;
mod error;
mod file;
mod mem;
mod registry;
mod util;

pub use device::{BlockDevice, Device, DeviceId, DeviceKind, Permissions};
pub use error::{DeviceError, Result};
pub use file::FileBlockDevice;
pub use mem::MemBlockDevice;
pub use registry::{DeviceLookup, DeviceRegistry};
pub use util::checked_range;
