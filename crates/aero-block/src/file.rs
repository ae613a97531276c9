use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::{checked_range, BlockDevice, DeviceError, Permissions, Result};

/// Block device backed by a host file.
///
/// The device length is fixed at open time; writes never grow the file.
pub struct FileBlockDevice {
    path: PathBuf,
    file: Mutex<File>,
    len: u32,
    writable: bool,
}

impl FileBlockDevice {
    pub async fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .await?;
        let byte_len = file.metadata().await?.len();
        let len = u32::try_from(byte_len).map_err(|_| DeviceError::TooLarge(byte_len))?;
        tracing::debug!(path = %path.display(), len, writable, "opened file block device");
        Ok(Self {
            path,
            file: Mutex::new(file),
            len,
            writable,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BlockDevice for FileBlockDevice {
    fn len(&self) -> u32 {
        self.len
    }

    async fn read(&self, offset: u32, dst: &mut [u8]) -> Result<u32> {
        checked_range(offset, dst.len(), self.len)?;
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset as u64)).await?;
        file.read_exact(dst).await?;
        Ok(dst.len() as u32)
    }

    async fn write(&self, offset: u32, src: &[u8]) -> Result<u32> {
        if !self.writable {
            return Err(DeviceError::ReadOnly);
        }
        checked_range(offset, src.len(), self.len)?;
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset as u64)).await?;
        file.write_all(src).await?;
        file.flush().await?;
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
