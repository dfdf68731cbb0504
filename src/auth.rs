use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::Fault,
    repository::RepositoryState,
};

/// Claims
///
/// The payload structure expected inside a bearer JWT. Signed by the external
/// auth provider's secret and validated on every request that carries one.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the UUID of the caller, keyed to public.profiles.
    pub sub: Uuid,
    /// Expiration Time (exp): timestamp after which the JWT must not be accepted.
    pub exp: usize,
    /// Issued At (iat): timestamp when the JWT was issued.
    pub iat: usize,
}

/// Role
///
/// The authoritative role of an authenticated caller, parsed from the
/// `profiles.role` column. Unrecognized values degrade to `Student`,
/// the least-privileged authenticated role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "admin" => Role::Admin,
            _ => Role::Student,
        }
    }
}

/// Principal
///
/// The resolved identity of one request. Anonymity is a normal, expected
/// state: a missing, expired or malformed credential resolves to
/// `Anonymous` rather than rejecting the request, because public assets are
/// reachable without any credential. The role is always re-derived from the
/// profiles table, never taken from client-controlled metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    Known { id: Uuid, role: Role },
}

impl Principal {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Principal::Anonymous => None,
            Principal::Known { id, .. } => Some(*id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Principal::Known {
                role: Role::Admin,
                ..
            }
        )
    }
}

/// Principal Extractor Implementation
///
/// Implements Axum's FromRequestParts trait, making Principal usable as a
/// function argument in any handler. Resolution order:
/// 1. Local Bypass: development-time access via the 'x-user-id' header,
///    guarded by the Env check and still resolved against the database.
/// 2. Token Validation: standard Bearer extraction and JWT decoding; any
///    credential defect resolves to Anonymous.
/// 3. DB Lookup: the profile row is the source of truth for the role and
///    for the caller's continued existence.
///
/// Rejection: only a datastore fault rejects (503). "No credential" is not
/// an error here.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = Fault;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        // Local Development Bypass. Inert unless Env::Local; the profile row
        // must still exist so the role stays authoritative.
        if config.env == Env::Local {
            if let Some(user_id_header) = parts.headers.get("x-user-id") {
                if let Ok(id_str) = user_id_header.to_str() {
                    if let Ok(user_id) = Uuid::parse_str(id_str) {
                        if let Some(profile) = repo.get_profile(user_id).await? {
                            return Ok(Principal::Known {
                                id: profile.id,
                                role: Role::parse(&profile.role),
                            });
                        }
                    }
                }
            }
        }

        // Bearer extraction. Absence of the header is ordinary anonymity.
        let Some(auth_header) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(Principal::Anonymous);
        };

        let Some(token) = auth_header.strip_prefix("Bearer ") else {
            return Ok(Principal::Anonymous);
        };

        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        // Expired, malformed or mis-signed tokens all collapse to Anonymous.
        // The entitlement evaluator will deny restricted content with
        // "authentication required", which is the message the client needs.
        let token_data = match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => data,
            Err(_) => return Ok(Principal::Anonymous),
        };

        // A valid token whose subject no longer has a profile row means the
        // user was deleted after issuance: unauthenticated, not an error.
        // A datastore failure, by contrast, propagates as a fault.
        match repo.get_profile(token_data.claims.sub).await? {
            Some(profile) => Ok(Principal::Known {
                id: profile.id,
                role: Role::parse(&profile.role),
            }),
            None => Ok(Principal::Anonymous),
        }
    }
}
