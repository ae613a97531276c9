use std::sync::Mutex;

use async_trait::async_trait;

use crate::{checked_range, BlockDevice, DeviceError, Permissions, Result};

/// In-memory block device.
pub struct MemBlockDevice {
    data: Mutex<Vec<u8>>,
    len: u32,
    writable: bool,
}

impl MemBlockDevice {
    /// Writable device backed by `data`.
    ///
    /// Panics if `data` is larger than `u32::MAX` bytes.
    pub fn new(data: Vec<u8>) -> Self {
        let len = u32::try_from(data.len()).expect("in-memory device larger than 4 GiB");
        Self {
            data: Mutex::new(data),
            len,
            writable: true,
        }
    }

    pub fn read_only(data: Vec<u8>) -> Self {
        Self {
            writable: false,
            ..Self::new(data)
        }
    }

    /// Zero-filled writable device of `len` bytes.
    pub fn zeroed(len: u32) -> Self {
        Self::new(vec![0; len as usize])
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl BlockDevice for MemBlockDevice {
    fn len(&self) -> u32 {
        self.len
    }

    async fn read(&self, offset: u32, dst: &mut [u8]) -> Result<u32> {
        checked_range(offset, dst.len(), self.len)?;
        let data = self.lock();
        let start = offset as usize;
        dst.copy_from_slice(&data[start..start + dst.len()]);
        Ok(dst.len() as u32)
    }

    async fn write(&self, offset: u32, src: &[u8]) -> Result<u32> {
        if !self.writable {
            return Err(DeviceError::ReadOnly);
        }
        checked_range(offset, src.len(), self.len)?;
        let mut data = self.lock();
        let start = offset as usize;
        data[start..start + src.len()].copy_from_slice(src);
        Ok(src.len() as u32)
    }

    async fn permission_bits(&self) -> Result<u32> {
        let mut perms = Permissions::READABLE;
        if self.writable {
            perms |= Permissions::WRITABLE;
        }
        Ok(perms.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_only_device_rejects_writes_and_clears_writable_bit() {
        let dev = MemBlockDevice::read_only(vec![7; 32]);
        assert!(matches!(
            dev.write(0, &[1]).await.unwrap_err(),
            DeviceError::ReadOnly
        ));
        let bits = dev.permission_bits().await.unwrap();
        assert_eq!(bits & Permissions::WRITABLE.bits(), 0);
        assert_eq!(dev.snapshot(), vec![7; 32]);
    }

    #[tokio::test]
    async fn partial_write_only_touches_its_range() {
        let dev = MemBlockDevice::zeroed(8);
        assert_eq!(dev.write(2, &[9, 9, 9]).await.unwrap(), 3);
        assert_eq!(dev.snapshot(), vec![0, 0, 9, 9, 9, 0, 0, 0]);
        assert_eq!(dev.permission_bits().await.unwrap(), 0b11);
    }
}
