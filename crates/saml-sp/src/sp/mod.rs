pub mod acs;
pub mod login;
pub mod metadata;

use crate::schema::Assertion;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use std::sync::Arc;

/// Opaque relay token threaded through the login redirect. Upstream
/// middleware inserts it as a request extension; this is the typed carrier
/// for what the wire protocol calls `RelayState` (context key
/// `saml.RelayState`).
#[derive(Debug, Clone)]
pub struct RelayState(pub String);

/// A fully validated assertion, attached to the request for the downstream
/// handler once the ACS pipeline accepts a response (context key
/// `saml.assertion`).
#[derive(Debug, Clone)]
pub struct AcceptedAssertion {
    pub assertion: Arc<Assertion>,
    pub relay_state: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login::login))
        .route("/metadata", get(metadata::metadata))
        .route(
            "/acs",
            post(acs::session_established)
                .layer(middleware::from_fn_with_state(state, acs::accept_response)),
        )
}
