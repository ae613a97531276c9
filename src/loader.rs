//! One-time loading of the shared execution runtime.
//!
//! The runtime is loaded once per [`crate::Host`]. Loading produces two load events (the runtime
//! script, then the network-stack module or an immediate stand-in when networking is disabled);
//! the second one makes the runtime ready and releases every waiting instance in arrival order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::assets::{AssetBase, AssetFetcher, NETWORK_MODULE, RUNTIME_SCRIPT};
use crate::error::HostError;
use crate::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadState {
    NotLoaded,
    LoadingStage1,
    LoadingStage2,
    Ready,
    /// An asset fetch failed; terminal.
    Failed,
}

/// How a [`ReadyTicket`] was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The runtime was already ready when the ticket was issued.
    Immediate,
    /// The instance waited and was released at this position of the queue (0-based).
    Released { position: usize },
}

type Waiter = (InstanceId, oneshot::Sender<Result<Readiness, HostError>>);

struct Inner {
    state: LoadState,
    waiting: VecDeque<Waiter>,
    failure: Option<String>,
    runtime_script: Option<Arc<[u8]>>,
}

pub struct RuntimeLoader {
    base: AssetBase,
    fetcher: Arc<dyn AssetFetcher>,
    network: bool,
    inner: Mutex<Inner>,
}

impl RuntimeLoader {
    pub fn new(base: AssetBase, fetcher: Arc<dyn AssetFetcher>, network: bool) -> Self {
        Self {
            base,
            fetcher,
            network,
            inner: Mutex::new(Inner {
                state: LoadState::NotLoaded,
                waiting: VecDeque::new(),
                failure: None,
                runtime_script: None,
            }),
        }
    }

    pub fn state(&self) -> LoadState {
        self.lock().state
    }

    /// Number of instances waiting for the runtime.
    pub fn waiting(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Ask for the runtime on behalf of `instance`. The first call starts loading.
    pub fn ensure_loaded(self: &Arc<Self>, instance: InstanceId) -> ReadyTicket {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            LoadState::Ready => ReadyTicket {
                instance,
                kind: TicketKind::Immediate,
            },
            LoadState::Failed => ReadyTicket {
                instance,
                kind: TicketKind::Failed(inner.failure.clone().unwrap_or_default()),
            },
            LoadState::NotLoaded | LoadState::LoadingStage1 | LoadState::LoadingStage2 => {
                let (tx, rx) = oneshot::channel();
                inner.waiting.push_back((instance, tx));
                if state == LoadState::NotLoaded {
                    inner.state = LoadState::LoadingStage1;
                    tracing::info!(base = %self.base, network = self.network, "loading runtime");
                    let loader = Arc::clone(self);
                    tokio::spawn(async move { loader.load().await });
                } else {
                    tracing::debug!(%instance, "runtime still loading; instance queued");
                }
                ReadyTicket {
                    instance,
                    kind: TicketKind::Queued(rx),
                }
            }
        }
    }

    async fn load(self: Arc<Self>) {
        let runtime = async {
            match self.fetch(RUNTIME_SCRIPT).await {
                Ok(script) => {
                    self.lock().runtime_script = Some(script.into());
                    self.load_event();
                    if !self.network {
                        self.load_event();
                    }
                }
                Err(err) => self.fail(RUNTIME_SCRIPT, err),
            }
        };
        let network = async {
            if !self.network {
                return;
            }
            match self.fetch(NETWORK_MODULE).await {
                Ok(_) => self.load_event(),
                Err(err) => self.fail(NETWORK_MODULE, err),
            }
        };
        tokio::join!(runtime, network);
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, HostError> {
        let url = self.base.join(name)?;
        Ok(self.fetcher.fetch(&url).await?)
    }

    fn load_event(&self) {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            LoadState::LoadingStage1 => inner.state = LoadState::LoadingStage2,
            LoadState::LoadingStage2 => {
                inner.state = LoadState::Ready;
                let waiting = std::mem::take(&mut inner.waiting);
                drop(inner);
                tracing::info!(waiting = waiting.len(), "runtime ready");
                for (position, (instance, tx)) in waiting.into_iter().enumerate() {
                    tracing::debug!(%instance, position, "releasing instance");
                    let _ = tx.send(Ok(Readiness::Released { position }));
                }
            }
            _ => {}
        }
    }

    fn fail(&self, asset: &str, err: HostError) {
        tracing::error!(asset, error = %err, "runtime asset failed to load");
        let mut inner = self.lock();
        if inner.state == LoadState::Failed {
            return;
        }
        let message = format!("{asset}: {err}");
        inner.state = LoadState::Failed;
        inner.failure = Some(message.clone());
        let waiting = std::mem::take(&mut inner.waiting);
        drop(inner);
        for (_, tx) in waiting {
            let _ = tx.send(Err(HostError::RuntimeUnavailable(message.clone())));
        }
    }

    /// Runtime script bytes, once loaded. Held for the lifetime of the loader.
    pub fn runtime_script(&self) -> Option<Arc<[u8]>> {
        self.lock().runtime_script.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

enum TicketKind {
    Immediate,
    Queued(oneshot::Receiver<Result<Readiness, HostError>>),
    Failed(String),
}

/// Handed out by [`RuntimeLoader::ensure_loaded`]; resolves once the runtime is ready.
pub struct ReadyTicket {
    instance: InstanceId,
    kind: TicketKind,
}

impl ReadyTicket {
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// True when the runtime was already ready and the instance was not queued.
    pub fn is_immediate(&self) -> bool {
        matches!(self.kind, TicketKind::Immediate)
    }

    pub async fn wait(self) -> Result<Readiness, HostError> {
        match self.kind {
            TicketKind::Immediate => Ok(Readiness::Immediate),
            TicketKind::Failed(message) => Err(HostError::RuntimeUnavailable(message)),
            TicketKind::Queued(rx) => rx.await.unwrap_or_else(|_| {
                Err(HostError::RuntimeUnavailable(
                    "loader dropped before the runtime became ready".to_string(),
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::StaticAssets;
    use url::Url;

    fn base() -> AssetBase {
        AssetBase::new(Url::parse("https://assets.example/cx/").unwrap())
    }

    fn assets(network: bool) -> Arc<StaticAssets> {
        let assets = StaticAssets::new();
        assets
            .insert_named(&base(), RUNTIME_SCRIPT, b"runtime".to_vec())
            .unwrap();
        if network {
            assets
                .insert_named(&base(), NETWORK_MODULE, b"net".to_vec())
                .unwrap();
        }
        Arc::new(assets)
    }

    #[tokio::test]
    async fn queued_instances_are_released_in_order() {
        let loader = Arc::new(RuntimeLoader::new(base(), assets(true), true));
        assert_eq!(loader.state(), LoadState::NotLoaded);

        let tickets: Vec<_> = (0..3)
            .map(|i| loader.ensure_loaded(InstanceId(i)))
            .collect();
        assert!(tickets.iter().all(|t| !t.is_immediate()));
        assert_eq!(loader.state(), LoadState::LoadingStage1);

        for (i, ticket) in tickets.into_iter().enumerate() {
            assert_eq!(
                ticket.wait().await.unwrap(),
                Readiness::Released { position: i }
            );
        }
        assert_eq!(loader.state(), LoadState::Ready);
        assert_eq!(loader.waiting(), 0);
        assert_eq!(loader.runtime_script().as_deref(), Some(&b"runtime"[..]));

        let late = loader.ensure_loaded(InstanceId(3));
        assert!(late.is_immediate());
        assert_eq!(late.wait().await.unwrap(), Readiness::Immediate);
    }

    #[tokio::test]
    async fn runtime_is_fetched_once() {
        let fetcher = assets(false);
        let loader = Arc::new(RuntimeLoader::new(base(), fetcher.clone(), false));
        let a = loader.ensure_loaded(InstanceId(0));
        let b = loader.ensure_loaded(InstanceId(1));
        a.wait().await.unwrap();
        b.wait().await.unwrap();
        loader.ensure_loaded(InstanceId(2)).wait().await.unwrap();
        assert_eq!(
            fetcher.fetched(),
            vec!["https://assets.example/cx/cheerpOS.js".to_string()]
        );
    }

    #[tokio::test]
    async fn fetch_failure_rejects_waiters_and_later_callers() {
        let loader = Arc::new(RuntimeLoader::new(base(), Arc::new(StaticAssets::new()), false));
        let err = loader.ensure_loaded(InstanceId(0)).wait().await.unwrap_err();
        assert!(matches!(err, HostError::RuntimeUnavailable(_)));
        assert_eq!(loader.state(), LoadState::Failed);

        let later = loader.ensure_loaded(InstanceId(1));
        assert!(!later.is_immediate());
        assert!(matches!(
            later.wait().await,
            Err(HostError::RuntimeUnavailable(_))
        ));
    }
}
