use crate::{
    AppState,
    auth::{Principal, Role},
    entitlement::{DenyReason, Evaluation, Evaluator},
    error::Fault,
    models::{AssetKind, DecisionView, RefusalBody},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

// Cache directive attached to every proxied asset response. Short and
// private: the bytes may be entitlement-gated, so no shared cache may hold
// them, and the window stays well under the signed grant's lifetime.
const ASSET_CACHE_CONTROL: &str = "private, max-age=300";

// --- Query Structs ---

/// ProbeParams
///
/// Accepted query parameters for the admin decision probe. `principal`
/// names the profile to evaluate for; absent means anonymous.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct ProbeParams {
    pub principal: Option<Uuid>,
}

// --- Refusal Mapping ---

/// refusal
///
/// Maps a denial to a transport response under the uniform existence-hiding
/// policy: anonymous callers get 401 for anything not publicly readable
/// (the only denial they can receive); authenticated non-admin callers get
/// a generic 404 so denial and non-existence are indistinguishable.
/// Specific reasons are reserved for the admin probe and the server log.
fn refusal(reason: DenyReason) -> Response {
    tracing::debug!(reason = reason.as_str(), "asset access denied");
    match reason {
        DenyReason::AuthenticationRequired => (
            StatusCode::UNAUTHORIZED,
            Json(RefusalBody {
                error: "unauthorized".to_string(),
                reason: reason.as_str().to_string(),
            }),
        )
            .into_response(),
        _ => collapsed_not_found(),
    }
}

/// not_found
///
/// Non-existence under the same policy. Admin callers see which link was
/// actually missing; everyone else sees the collapsed form.
fn not_found(principal: &Principal, detail: &'static str) -> Response {
    if principal.is_admin() {
        return (
            StatusCode::NOT_FOUND,
            Json(RefusalBody {
                error: "not_found".to_string(),
                reason: detail.to_string(),
            }),
        )
            .into_response();
    }
    if matches!(principal, Principal::Anonymous) {
        // Anonymous callers cannot distinguish a missing exercise from a
        // restricted one: both demand authentication first.
        return refusal(DenyReason::AuthenticationRequired);
    }
    collapsed_not_found()
}

fn collapsed_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(RefusalBody {
            error: "not_found".to_string(),
            reason: "not_found".to_string(),
        }),
    )
        .into_response()
}

// --- Handlers ---

/// get_exercise_asset
///
/// [Public Route] The asset endpoint: decides entitlement for the caller,
/// and on grant mints a one-hour signed URL against the object store,
/// consumes it server-side and streams the bytes back with a short private
/// cache directive.
///
/// *Security*: the store's native URL never appears in the response body,
/// headers or redirect target. The proxy exists precisely so the client
/// cannot harvest a durable direct link.
#[utoipa::path(
    get,
    path = "/exercises/{id}/assets/{kind}/{index}",
    params(
        ("id" = Uuid, Path, description = "Exercise ID"),
        ("kind" = AssetKind, Path, description = "Asset family: statement or correction"),
        ("index" = u32, Path, description = "Index within the asset family"),
    ),
    responses(
        (status = 200, description = "Asset bytes", content_type = "application/pdf"),
        (status = 401, description = "Authentication required", body = RefusalBody),
        (status = 404, description = "Not found or not entitled", body = RefusalBody),
        (status = 503, description = "Transient infrastructure fault", body = RefusalBody),
    )
)]
pub async fn get_exercise_asset(
    principal: Principal,
    State(state): State<AppState>,
    Path((exercise_id, kind, index)): Path<(Uuid, AssetKind, u32)>,
) -> Result<Response, Fault> {
    let evaluator = Evaluator::new(state.repo.clone());

    let decision = match evaluator.evaluate(&principal, exercise_id).await? {
        Evaluation::UnknownExercise => {
            return Ok(not_found(&principal, "exercise_not_found"));
        }
        Evaluation::Decided(decision) => decision,
    };

    if let Some(reason) = decision.deny_reason() {
        return Ok(refusal(reason));
    }

    // Granted: resolve the designator to its single object key. A missing
    // attachment is a not-found, never a denial.
    let Some(object_key) = state
        .repo
        .get_asset_key(exercise_id, kind, index as i32)
        .await?
    else {
        return Ok(not_found(&principal, "asset_not_found"));
    };

    // Grant issuance happens strictly after a granted decision.
    let grant = state.storage.presign_download(&object_key).await?;
    let fetched = state.storage.fetch_signed(&grant).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static(ASSET_CACHE_CONTROL),
    );
    let content_type = fetched
        .content_type
        .as_deref()
        .unwrap_or("application/pdf");
    if let Ok(value) = header::HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(len) = fetched.content_length {
        headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(len));
    }

    Ok((StatusCode::OK, headers, Body::from_stream(fetched.stream)).into_response())
}

/// probe_entitlement
///
/// [Admin Route] Returns the full, uncollapsed entitlement decision for any
/// principal against one exercise. This is the debugging counterpart of the
/// collapsed wire responses: support staff can see the specific reason an
/// asset request was refused.
#[utoipa::path(
    get,
    path = "/admin/entitlements/{id}",
    params(
        ("id" = Uuid, Path, description = "Exercise ID"),
        ProbeParams,
    ),
    responses(
        (status = 200, description = "Decision", body = DecisionView),
        (status = 403, description = "Admin role required", body = RefusalBody),
        (status = 404, description = "Exercise not found", body = RefusalBody),
    )
)]
pub async fn probe_entitlement(
    principal: Principal,
    State(state): State<AppState>,
    Path(exercise_id): Path<Uuid>,
    Query(params): Query<ProbeParams>,
) -> Result<Response, Fault> {
    // The probe itself is not existence-sensitive: non-admins get an
    // explicit 401/403 rather than the collapsed form.
    if !principal.is_admin() {
        let (status, error, reason) = match principal {
            Principal::Anonymous => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                DenyReason::AuthenticationRequired,
            ),
            Principal::Known { .. } => {
                (StatusCode::FORBIDDEN, "forbidden", DenyReason::AdminRequired)
            }
        };
        return Ok((
            status,
            Json(RefusalBody {
                error: error.to_string(),
                reason: reason.as_str().to_string(),
            }),
        )
            .into_response());
    }

    // Re-resolve the probed principal the same way the extractor would: the
    // profile row is the source of truth, and a missing row means anonymous.
    let probed = match params.principal {
        Some(id) => match state.repo.get_profile(id).await? {
            Some(profile) => Principal::Known {
                id: profile.id,
                role: Role::parse(&profile.role),
            },
            None => Principal::Anonymous,
        },
        None => Principal::Anonymous,
    };

    let evaluator = Evaluator::new(state.repo.clone());
    let decision = match evaluator.evaluate(&probed, exercise_id).await? {
        Evaluation::UnknownExercise => {
            return Ok(not_found(&principal, "exercise_not_found"));
        }
        Evaluation::Decided(decision) => decision,
    };

    Ok(Json(DecisionView {
        exercise_id,
        principal_id: probed.id(),
        granted: decision.is_granted(),
        reason: decision.deny_reason().map(|r| r.as_str().to_string()),
        evaluated_at: Utc::now(),
    })
    .into_response())
}
