/// Router Module Index
///
/// Organizes the routing logic into security-segregated modules. The asset
/// endpoint itself lives in the public module because anonymous callers may
/// legitimately reach public assets; the entitlement decision happens inside
/// the handler, against the resolved Principal, on every request.

/// Routes accessible to all callers (anonymous included). Entitlement is
/// enforced per request inside the handlers.
pub mod public;

/// Routes restricted exclusively to principals with the 'admin' role.
pub mod admin;
