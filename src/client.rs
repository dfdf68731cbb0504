use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::models::{AssetKind, RefusalBody};

/// AssetRef
///
/// One asset designator from the client's point of view: which exercise,
/// which attachment family, which index within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetRef {
    pub exercise_id: Uuid,
    pub kind: AssetKind,
    pub index: u32,
}

impl AssetRef {
    fn path(&self) -> String {
        format!(
            "/exercises/{}/assets/{}/{}",
            self.exercise_id,
            self.kind.as_str(),
            self.index
        )
    }
}

/// FetchError
///
/// Per-asset failure reaching the proxy. A failure for one asset never
/// corrupts the state of sibling assets in the same batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network/transport error before any response arrived.
    #[error("transport failure")]
    Transport(#[from] reqwest::Error),
    /// The service answered with a structured refusal or another
    /// non-success status.
    #[error("refused with status {status}: {reason}")]
    Refused { status: u16, reason: String },
}

/// FetchFailure
///
/// A failed asset paired with what went wrong, carried in the batch result
/// so partial failure is visible rather than silently dropped.
#[derive(Debug)]
pub struct FetchFailure {
    pub asset: AssetRef,
    pub error: FetchError,
}

/// AssetHandle
///
/// A transient local handle: the fetched bytes held in memory, exclusively
/// owned by whoever owns the batch. Releases itself on drop and decrements
/// the client's live-handle count, so a leak is observable in tests and a
/// release is guaranteed on every exit path.
#[derive(Debug)]
pub struct AssetHandle {
    asset: AssetRef,
    bytes: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl AssetHandle {
    fn new(asset: AssetRef, bytes: Vec<u8>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { asset, bytes, live }
    }

    pub fn asset(&self) -> &AssetRef {
        &self.asset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for AssetHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Batch
///
/// The settled outcome of one target set: handles for every asset that
/// succeeded and failures for every asset that did not. Dropping the batch
/// releases every handle it exposed.
#[derive(Debug)]
pub struct Batch {
    pub handles: Vec<AssetHandle>,
    pub failures: Vec<FetchFailure>,
}

impl Batch {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// LoadError
///
/// A whole-batch outcome that exposes no handles at all.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A newer target set started before this one settled; every buffer
    /// fetched for the stale set has been released.
    #[error("target set superseded before settlement")]
    Superseded,
}

/// Phase
///
/// The per-target-set state machine: `Idle -> Requesting -> {Ready, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Requesting,
    Ready,
    Failed,
}

struct Inner {
    // Monotonically increasing target-set counter. Results carrying an older
    // generation are discarded on arrival, never applied.
    generation: u64,
    phase: Phase,
}

/// SecureFetchClient
///
/// The consuming side of the asset proxy. Exchanges its bearer credential
/// for asset bytes, materializes them as transient in-memory handles, and
/// guarantees their release on every exit path: replacement by a new target
/// set, teardown, or error.
///
/// Handles for a target set are exposed only once *all* of its requests have
/// settled, so the owner never observes a partially loaded set.
pub struct SecureFetchClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    inner: Arc<Mutex<Inner>>,
    live: Arc<AtomicUsize>,
}

impl SecureFetchClient {
    /// new
    ///
    /// Creates a client against the service's base URL (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: None,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                phase: Phase::Idle,
            })),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// with_token
    ///
    /// Attaches the session credential sent as a Bearer header with every
    /// asset request. Without one, only public assets are reachable.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Current state-machine phase, for the owning component's rendering.
    pub fn phase(&self) -> Phase {
        self.inner.lock().expect("client state poisoned").phase
    }

    /// Number of handles currently alive. Returns to its prior level once a
    /// batch is dropped or replaced; used to assert the no-leak contract.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// load
    ///
    /// Makes `refs` the desired target set: issues one credentialed request
    /// per asset in parallel, waits for all of them to settle, and exposes
    /// the resulting handles together.
    ///
    /// If a newer `load` starts before this one settles, this call returns
    /// `LoadError::Superseded` and every byte buffer it fetched is released
    /// without ever becoming a handle: stale results are discarded on
    /// arrival, not applied.
    pub async fn load(&self, refs: Vec<AssetRef>) -> Result<Batch, LoadError> {
        let my_generation = {
            let mut inner = self.inner.lock().expect("client state poisoned");
            inner.generation += 1;
            inner.phase = Phase::Requesting;
            inner.generation
        };

        let mut tasks: JoinSet<(usize, Result<Vec<u8>, FetchError>)> = JoinSet::new();
        for (position, asset) in refs.iter().cloned().enumerate() {
            let http = self.http.clone();
            let url = format!("{}{}", self.base_url, asset.path());
            let token = self.token.clone();
            tasks.spawn(async move {
                (position, fetch_one(http, url, token).await)
            });
        }

        // Settle everything before exposing anything.
        let mut settled: Vec<Option<Result<Vec<u8>, FetchError>>> =
            (0..refs.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => settled[position] = Some(outcome),
                // A panicked fetch task counts as a transport-class failure
                // for its slot; the slot stays None and is reported below.
                Err(join_err) => {
                    tracing::error!(error = %join_err, "asset fetch task failed");
                }
            }
        }

        let mut inner = self.inner.lock().expect("client state poisoned");
        if inner.generation != my_generation {
            // Superseded: the buffers in `settled` drop here and are never
            // exposed. The newer load owns the phase.
            return Err(LoadError::Superseded);
        }

        let mut handles = Vec::new();
        let mut failures = Vec::new();
        for (asset, outcome) in refs.into_iter().zip(settled.into_iter()) {
            match outcome {
                Some(Ok(bytes)) => {
                    handles.push(AssetHandle::new(asset, bytes, Arc::clone(&self.live)));
                }
                Some(Err(error)) => failures.push(FetchFailure { asset, error }),
                None => failures.push(FetchFailure {
                    asset,
                    error: FetchError::Refused {
                        status: 0,
                        reason: "fetch task aborted".to_string(),
                    },
                }),
            }
        }

        inner.phase = if failures.is_empty() {
            Phase::Ready
        } else {
            Phase::Failed
        };

        Ok(Batch { handles, failures })
    }
}

/// fetch_one
///
/// One credentialed GET against the proxy. Refusals are decoded from the
/// structured JSON body when present.
async fn fetch_one(
    http: reqwest::Client,
    url: String,
    token: Option<String>,
) -> Result<Vec<u8>, FetchError> {
    let mut request = http.get(&url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let reason = response
            .json::<RefusalBody>()
            .await
            .map(|body| body.reason)
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(FetchError::Refused {
            status: status.as_u16(),
            reason,
        });
    }

    Ok(response.bytes().await?.to_vec())
}
