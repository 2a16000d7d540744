use crate::binding;
use crate::error::Error;
use crate::sp::RelayState;
use crate::state::AppState;
use axum::Extension;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// SP-initiated login: builds a fresh AuthnRequest, encodes it per the
/// HTTP-Redirect binding, and 302-redirects the browser to the IdP's SSO
/// endpoint with `RelayState` and `SAMLRequest` query parameters.
pub async fn login(
    State(state): State<Arc<AppState>>,
    relay_state: Option<Extension<RelayState>>,
) -> Result<Response, Error> {
    // Failures here are operational (metadata unavailable, misconfiguration),
    // not something the browser sent wrong.
    let destination = state
        .sp
        .idp_sso_url()
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;

    let request = state.sp.new_authn_request(&destination);
    let message = binding::encode_redirect(request.to_xml().as_bytes())
        .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;

    let relay = relay_state
        .map(|Extension(RelayState(token))| token)
        .unwrap_or_default();
    let location = binding::redirect_url(&destination, &relay, &message);

    state.requests.remember(request.id.clone());

    tracing::info!(request_id = request.id, destination, "redirecting to identity provider");

    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}
