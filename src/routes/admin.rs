use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// Defines the routes exclusively accessible to principals with the 'admin'
/// role. The role check happens inside the handlers against the resolved
/// Principal; anonymous callers receive 401 and authenticated non-admins
/// receive 403 with reason `admin_required`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/entitlements/{id}?principal={uuid}
        // The decision probe: returns the full, uncollapsed entitlement
        // decision for any principal against one exercise. This is where the
        // specific denial reasons hidden from ordinary callers surface for
        // support and debugging.
        .route("/entitlements/{id}", get(handlers::probe_entitlement))
}
