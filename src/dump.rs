//! Diagnostic dump sinks (`DUMP_DATA`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[async_trait]
pub trait DumpSink: Send + Sync {
    /// Deliver `bytes` under the suggested `file_name`.
    async fn dump(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<()>;
}

/// Logs dumps without keeping them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDumpSink;

#[async_trait]
impl DumpSink for LogDumpSink {
    async fn dump(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<()> {
        tracing::info!(file_name, len = bytes.len(), "diagnostic dump discarded (no dump directory)");
        Ok(())
    }
}

/// Writes dumps into a directory, never overwriting an earlier dump.
#[derive(Debug, Clone)]
pub struct DirDumpSink {
    dir: PathBuf,
}

impl DirDumpSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn free_path(&self, file_name: &str) -> std::io::Result<PathBuf> {
        // Only the final component is used; the name comes from the execution unit.
        let name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "dump.bin".to_string());
        let candidate = self.dir.join(&name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (name.clone(), String::new()),
        };
        let mut n = 1u32;
        loop {
            let candidate = self.dir.join(format!("{stem} ({n}){ext}"));
            if !tokio::fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

#[async_trait]
impl DumpSink for DirDumpSink {
    async fn dump(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.free_path(file_name).await?;
        tokio::fs::write(&path, bytes).await?;
        tracing::info!(path = %path.display(), len = bytes.len(), "diagnostic dump written");
        Ok(())
    }
}
