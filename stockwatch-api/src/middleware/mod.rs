/// Middleware modules for the API server
///
/// Token checks live in `stockwatch_shared::auth::middleware`; this module
/// only holds response-level concerns.

pub mod security;
