use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Core Application Schemas (Mapped to Database) ---

/// ProfileRow
///
/// The caller's canonical identity record stored in the `public.profiles`
/// table. This is the server-side source of truth for the role and the
/// subscription state; nothing in it is taken from client-supplied metadata.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct ProfileRow {
    // Primary key, also the foreign key to the external auth provider's user id.
    pub id: Uuid,
    pub email: String,
    // The RBAC field: 'student' or 'admin'. Parsed into `auth::Role`.
    pub role: String,
    // A disabled profile denies access to restricted content regardless of
    // subscription state.
    pub is_active: bool,
    // None means the subscription never expires.
    pub subscription_expires_at: Option<DateTime<Utc>>,
}

/// Visibility
///
/// Stored per exercise. `Public` short-circuits every other entitlement
/// check, including for anonymous callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Visibility {
    Public,
    Restricted,
}

/// ExerciseRow
///
/// An exercise record from the `public.exercises` table. The level linkage is
/// not stored here; it is derived through the chapter -> subject ->
/// subject_levels chain and fetched separately.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExerciseRow {
    pub id: Uuid,
    // FK to public.chapters.id; the first hop of the level-linkage chain.
    pub chapter_id: Uuid,
    pub visibility: Visibility,
}

/// AssetKind
///
/// Which family of attachments is being addressed. An exercise may carry
/// several statements and several corrections; the pair (kind, index)
/// designates exactly one object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum AssetKind {
    Statement,
    Correction,
}

impl AssetKind {
    /// Canonical lowercase name, matching both the URL path segment and the
    /// `kind` column of `exercise_assets`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Statement => "statement",
            AssetKind::Correction => "correction",
        }
    }
}

/// ExerciseAccess
///
/// The pre-fetched facts the entitlement decision needs about one exercise:
/// its visibility and the full set of level ids reachable through its
/// subject. Assembled by the repository, consumed by the pure decision core.
#[derive(Debug, Clone)]
pub struct ExerciseAccess {
    pub visibility: Visibility,
    // May legitimately be empty (e.g., a public exercise with no level links).
    pub level_ids: Vec<Uuid>,
}

/// EntitlementFacts
///
/// The student-side facts paired against [`ExerciseAccess`]: the profile
/// record (if any) and the caller's assigned level ids.
#[derive(Debug, Clone, Default)]
pub struct EntitlementFacts {
    pub profile: Option<ProfileRow>,
    pub level_ids: Vec<Uuid>,
}

/// --- Wire Schemas (Output) ---

/// RefusalBody
///
/// Structured JSON refusal returned instead of asset bytes. The `reason`
/// exposed to non-admin callers is deliberately coarse; specific reasons are
/// reserved for the admin decision probe.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RefusalBody {
    /// Machine-readable error class: "unauthorized", "forbidden",
    /// "not_found" or "unavailable".
    pub error: String,
    /// Reason string usable for client-side messaging.
    pub reason: String,
}

/// DecisionView
///
/// Output schema of the admin decision probe
/// (GET /admin/entitlements/{exercise_id}). Carries the full, uncollapsed
/// decision for support and debugging.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DecisionView {
    pub exercise_id: Uuid,
    /// The principal the decision was evaluated for; None means anonymous.
    pub principal_id: Option<Uuid>,
    pub granted: bool,
    /// Specific denial reason (snake_case), absent when granted.
    pub reason: Option<String>,
    #[ts(type = "string")]
    pub evaluated_at: DateTime<Utc>,
}
