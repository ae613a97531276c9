//! Locating and fetching the runtime's script assets.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::error::AssetError;

pub const RUNTIME_SCRIPT: &str = "cheerpOS.js";
pub const NETWORK_MODULE: &str = "tun/tailscale_tun_auto.js";
pub const BRIDGE_SCRIPT: &str = "cxbridge.js";
pub const CORE_SCRIPT: &str = "cxcore.js";
pub const CORE_NO_RETURN_SCRIPT: &str = "cxcore-no-return-call.js";
pub const CLOCK_SCRIPT: &str = "workerclock.js";

/// Directory URL every asset name is resolved against. Always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBase {
    url: Url,
}

impl AssetBase {
    pub fn new(mut url: Url) -> Self {
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Self { url }
    }

    pub fn from_directory(dir: &Path) -> Result<Self, AssetError> {
        let url = Url::from_directory_path(dir)
            .map_err(|()| AssetError::UnsupportedScheme(dir.display().to_string()))?;
        Ok(Self { url })
    }

    /// Recover the base from a stack trace that mentions the loaded script `marker`.
    ///
    /// The base is the latest `http:`/`https:` origin preceding `/<marker>` (falling back to a
    /// `chrome-extension:` origin), up to and including that `/`.
    pub fn from_stack_trace(trace: &str, marker: &str) -> Option<Self> {
        let needle = format!("/{marker}");
        let end = trace.find(&needle)?;
        if end == 0 {
            return None;
        }
        let before = &trace[..end];
        let http = before.rfind("http:");
        let https = before.rfind("https:");
        let start = match (http, https) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
        .or_else(|| before.rfind("chrome-extension:"))?;
        let url = Url::parse(&trace[start..=end]).ok()?;
        Some(Self { url })
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }

    pub fn join(&self, name: &str) -> Result<Url, AssetError> {
        Ok(self.url.join(name)?)
    }
}

impl std::fmt::Display for AssetBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.url.fmt(f)
    }
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, AssetError>;
}

/// Reads `file:` URLs from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAssetFetcher;

#[async_trait]
impl AssetFetcher for FileAssetFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, AssetError> {
        if url.scheme() != "file" {
            return Err(AssetError::UnsupportedScheme(url.scheme().to_string()));
        }
        let path = url
            .to_file_path()
            .map_err(|()| AssetError::NotFound(url.to_string()))?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AssetError::NotFound(url.to_string()))
            }
            Err(source) => Err(AssetError::Io {
                url: url.to_string(),
                source,
            }),
        }
    }
}

/// Assets held in memory, keyed by full URL. Records every fetch.
#[derive(Debug, Default)]
pub struct StaticAssets {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fetched: Mutex<Vec<String>>,
}

impl StaticAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &Url, bytes: impl Into<Vec<u8>>) {
        lock(&self.entries).insert(url.to_string(), bytes.into());
    }

    /// Convenience for `insert(base.join(name))`.
    pub fn insert_named(
        &self,
        base: &AssetBase,
        name: &str,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<(), AssetError> {
        self.insert(&base.join(name)?, bytes);
        Ok(())
    }

    /// URLs fetched so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        lock(&self.fetched).clone()
    }
}

#[async_trait]
impl AssetFetcher for StaticAssets {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, AssetError> {
        lock(&self.fetched).push(url.to_string());
        lock(&self.entries)
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| AssetError::NotFound(url.to_string()))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
