use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Defines endpoints reachable without any credential. The asset endpoint is
/// deliberately here rather than behind an authentication layer: exercises
/// marked public must be retrievable by anonymous callers, so the
/// entitlement check runs inside the handler against the resolved Principal
/// instead of rejecting credential-less requests at the router boundary.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated liveness endpoint for monitoring and load balancer
        // checks. Returns "ok" immediately.
        .route("/health", get(|| async { "ok" }))
        // GET /exercises/{id}/assets/{kind}/{index}
        // The entitlement-gated asset endpoint. Decides access for the
        // caller, then proxies the object bytes through a short-lived signed
        // grant. Never redirects to, or reveals, the store's native URL.
        .route(
            "/exercises/{id}/assets/{kind}/{index}",
            get(handlers::get_exercise_asset),
        )
}
