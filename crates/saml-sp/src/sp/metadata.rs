use crate::error::Error;
use crate::state::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Serves the SP's own SAML metadata document.
pub async fn metadata(State(state): State<Arc<AppState>>) -> Result<Response, Error> {
    let xml = state
        .sp
        .metadata_xml()
        .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;

    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf8")],
        xml,
    )
        .into_response())
}
