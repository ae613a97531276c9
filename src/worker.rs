use std::fmt;
use std::sync::Arc;

use aero_host_protocol::MessagePort;
use url::Url;

use crate::error::HostError;

/// Which external unit is being started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Core,
    Clock,
}

/// Script a worker is started from.
#[derive(Clone)]
pub enum WorkerSource {
    /// Prebuilt script loaded directly from the asset base.
    Url(Url),
    /// Host-generated script registered in the artifact store.
    Blob { locator: String, script: Arc<[u8]> },
}

impl WorkerSource {
    pub fn script(&self) -> Option<&[u8]> {
        match self {
            WorkerSource::Url(_) => None,
            WorkerSource::Blob { script, .. } => Some(script),
        }
    }
}

impl fmt::Debug for WorkerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerSource::Url(url) => f.debug_tuple("Url").field(&url.as_str()).finish(),
            WorkerSource::Blob { locator, script } => f
                .debug_struct("Blob")
                .field("locator", locator)
                .field("len", &script.len())
                .finish(),
        }
    }
}

/// Starts execution and clock units.
///
/// Returns the host's endpoint of the unit's message channel. The unit keeps running until that
/// endpoint is dropped.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, role: WorkerRole, source: WorkerSource) -> Result<MessagePort, HostError>;
}
