use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::models::RefusalBody;

/// StoreError
///
/// Infrastructure failure in the profile/content datastore. Distinct from a
/// denial: callers can retry, and the entitlement evaluator must never fold
/// this into "denied".
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Postgres failure (unreachable, timed out, bad query).
    #[error("datastore query failed")]
    Query(#[from] sqlx::Error),
}

/// StorageError
///
/// Infrastructure failure in the object store path: minting the signed URL
/// or fetching through it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The presigner rejected the request or could not be configured.
    #[error("failed to presign object key: {0}")]
    Presign(String),
    /// Transport failure while fetching the signed URL server-side.
    #[error("upstream fetch failed")]
    Upstream(#[from] reqwest::Error),
    /// The object store answered the signed fetch with a non-success status.
    #[error("upstream fetch returned status {0}")]
    UpstreamStatus(u16),
}

/// Fault
///
/// The transient-failure class. Every variant maps to 503 so clients can
/// distinguish "we could not check" from "you may not see this" and retry.
#[derive(Debug, Error)]
pub enum Fault {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntoResponse for Fault {
    fn into_response(self) -> axum::response::Response {
        // The underlying cause goes to the log only, never to the wire.
        tracing::error!(error = %self, "transient infrastructure fault");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RefusalBody {
                error: "unavailable".to_string(),
                reason: "transient".to_string(),
            }),
        )
            .into_response()
    }
}
