use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{Principal, Role},
    error::StoreError,
    models::{EntitlementFacts, ExerciseAccess, Visibility},
    repository::RepositoryState,
};

/// DenyReason
///
/// Why a principal may not access an exercise asset. A denial is an ordinary
/// result, not an error; every reason is usable for client-side messaging
/// and for test assertions. What reaches the wire for non-admin callers is
/// collapsed by the handler layer, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum DenyReason {
    AuthenticationRequired,
    InactiveProfile,
    SubscriptionExpired,
    LevelMismatch,
    AdminRequired,
}

impl DenyReason {
    /// Snake_case wire form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::AuthenticationRequired => "authentication_required",
            DenyReason::InactiveProfile => "inactive_profile",
            DenyReason::SubscriptionExpired => "subscription_expired",
            DenyReason::LevelMismatch => "level_mismatch",
            DenyReason::AdminRequired => "admin_required",
        }
    }
}

/// Decision
///
/// The outcome of one entitlement evaluation. Computed fresh per request,
/// never cached across requests, because subscription state can change at
/// any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Denied(DenyReason),
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted)
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Granted => None,
            Decision::Denied(reason) => Some(*reason),
        }
    }
}

/// Evaluation
///
/// An evaluation against a known exercise, or the fact that the exercise
/// does not exist. The handler layer decides how much of that distinction
/// each caller is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    UnknownExercise,
    Decided(Decision),
}

/// decide
///
/// The pure decision core. Operates only on pre-fetched facts plus an
/// explicit clock (no ambient session state, no datastore access), so every
/// branch is directly unit-testable.
///
/// Order of checks:
/// 1. Public visibility grants unconditionally, even for anonymous callers,
///    regardless of profile completeness.
/// 2. Admin role grants unconditionally.
/// 3. Anonymous callers are denied: authentication required.
/// 4. Students require an existing active profile, an unexpired (or absent)
///    subscription, and at least one level shared with the exercise's
///    linked levels. The level test is an intersection, not an equality:
///    a subject may be linked to multiple levels.
pub fn decide(
    principal: &Principal,
    access: &ExerciseAccess,
    facts: &EntitlementFacts,
    now: DateTime<Utc>,
) -> Decision {
    if access.visibility == Visibility::Public {
        return Decision::Granted;
    }

    let role = match principal {
        Principal::Anonymous => return Decision::Denied(DenyReason::AuthenticationRequired),
        Principal::Known { role, .. } => *role,
    };

    if role == Role::Admin {
        return Decision::Granted;
    }

    // Student path: every missing link maps to its own reason.
    let Some(profile) = facts.profile.as_ref() else {
        return Decision::Denied(DenyReason::InactiveProfile);
    };
    if !profile.is_active {
        return Decision::Denied(DenyReason::InactiveProfile);
    }
    if let Some(expiry) = profile.subscription_expires_at {
        if expiry < now {
            return Decision::Denied(DenyReason::SubscriptionExpired);
        }
    }

    let intersects = access
        .level_ids
        .iter()
        .any(|level| facts.level_ids.contains(level));
    if !intersects {
        return Decision::Denied(DenyReason::LevelMismatch);
    }

    Decision::Granted
}

/// Evaluator
///
/// The async wrapper around [`decide`]: performs the read-only datastore
/// lookups a decision needs and nothing more. Public exercises, admins and
/// anonymous callers are decided without touching profile or level data.
///
/// Holds no locks and no mutable state; safe to use from arbitrarily many
/// concurrent requests.
pub struct Evaluator {
    repo: RepositoryState,
}

impl Evaluator {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    /// evaluate
    ///
    /// Resolves the decision for (principal, exercise_id). "Not entitled" is
    /// an ordinary [`Decision::Denied`]; only genuine datastore failures
    /// surface as `Err`, so callers can distinguish "you may not see this"
    /// from "we could not check".
    pub async fn evaluate(
        &self,
        principal: &Principal,
        exercise_id: Uuid,
    ) -> Result<Evaluation, StoreError> {
        let Some(exercise) = self.repo.get_exercise(exercise_id).await? else {
            return Ok(Evaluation::UnknownExercise);
        };

        // Only the restricted-student branch of `decide` inspects the facts;
        // skip the lookups everywhere else.
        let (access, facts) = match (exercise.visibility, principal) {
            (
                Visibility::Restricted,
                Principal::Known {
                    id,
                    role: Role::Student,
                },
            ) => {
                let exercise_levels = self.repo.get_exercise_levels(exercise_id).await?;
                let profile = self.repo.get_profile(*id).await?;
                let profile_levels = self.repo.get_profile_levels(*id).await?;
                (
                    ExerciseAccess {
                        visibility: exercise.visibility,
                        level_ids: exercise_levels,
                    },
                    EntitlementFacts {
                        profile,
                        level_ids: profile_levels,
                    },
                )
            }
            _ => (
                ExerciseAccess {
                    visibility: exercise.visibility,
                    level_ids: Vec::new(),
                },
                EntitlementFacts::default(),
            ),
        };

        Ok(Evaluation::Decided(decide(
            principal,
            &access,
            &facts,
            Utc::now(),
        )))
    }
}
