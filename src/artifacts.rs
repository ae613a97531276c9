use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const LOCATOR_PREFIX: &str = "blob:aero-host/";

/// Bytes registered under a `blob:` locator.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub mime: &'static str,
    pub bytes: Arc<[u8]>,
}

/// In-memory object store handing out `blob:` locators.
///
/// Locators stay valid until [`ArtifactStore::revoke`] is called; each one is revoked at most
/// once.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    next: AtomicU64,
    entries: Mutex<HashMap<String, Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, mime: &'static str, bytes: impl Into<Arc<[u8]>>) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let locator = format!("{LOCATOR_PREFIX}{n}");
        let bytes = bytes.into();
        tracing::trace!(%locator, mime, len = bytes.len(), "artifact created");
        self.lock().insert(locator.clone(), Artifact { mime, bytes });
        locator
    }

    pub fn get(&self, locator: &str) -> Option<Artifact> {
        self.lock().get(locator).cloned()
    }

    pub fn revoke(&self, locator: &str) -> Option<Artifact> {
        let removed = self.lock().remove(locator);
        if removed.is_some() {
            tracing::trace!(%locator, "artifact revoked");
        }
        removed
    }

    /// Number of live locators.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Artifact>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_are_unique_and_revoked_once() {
        let store = ArtifactStore::new();
        let a = store.create("text/javascript", b"a()".to_vec());
        let b = store.create("application/wasm", vec![0, 0x61, 0x73, 0x6d]);
        assert_ne!(a, b);
        assert!(a.starts_with("blob:"));
        assert_eq!(store.len(), 2);

        assert_eq!(&*store.get(&a).unwrap().bytes, b"a()");
        let revoked = store.revoke(&b).unwrap();
        assert_eq!(revoked.mime, "application/wasm");
        assert!(store.revoke(&b).is_none());
        assert_eq!(store.len(), 1);
    }
}
