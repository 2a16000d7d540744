//! Assertion Consumer Service: the response acceptance pipeline.
//!
//! `accept_response` runs as middleware in front of whatever handler owns the
//! authenticated session. The stages run in a fixed order; reordering them
//! weakens the security argument (structural signature binding must precede
//! cryptographic verification, destination checking must precede both).

use std::path::Path;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::attributes;
use crate::crypto::{self, EngineErrorKind};
use crate::error::Error;
use crate::request_tracker::RequestTracker;
use crate::schema::{
    self, Assertion, AssertionPayload, Conditions, SignatureRef, SubjectConfirmationData,
};
use crate::security::Verdict;
use crate::service_provider::ServiceProvider;
use crate::sp::{AcceptedAssertion, RelayState};
use crate::state::AppState;

/// Upper bound on the buffered form body.
const MAX_FORM_BYTES: usize = 1024 * 1024;

#[derive(Deserialize)]
struct AcsForm {
    #[serde(rename = "SAMLResponse")]
    saml_response: Option<String>,
    #[serde(rename = "RelayState")]
    relay_state: Option<String>,
}

/// Buffers the POST body (so the downstream handler can re-read it), runs the
/// acceptance pipeline, and on success forwards the request with the
/// validated assertion and relay token attached as extensions.
pub async fn accept_response(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|e| Error::Malformed(format!("unable to read POST data: {e}")))?;

    let form: AcsForm = serde_urlencoded::from_bytes(&bytes)
        .map_err(|e| Error::Malformed(format!("unable to parse form: {e}")))?;
    let saml_response = form
        .saml_response
        .ok_or_else(|| Error::Malformed("missing SAMLResponse field".into()))?;

    let assertion =
        validate_response(&state.sp, &state.requests, &saml_response, Utc::now()).await?;

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(AcceptedAssertion {
        assertion: Arc::new(assertion),
        relay_state: form.relay_state.clone(),
    });
    if let Some(token) = form.relay_state {
        request.extensions_mut().insert(RelayState(token));
    }

    Ok(next.run(request).await)
}

/// Default downstream handler mounted behind the pipeline: acknowledges the
/// session and logs who arrived.
pub async fn session_established(Extension(accepted): Extension<AcceptedAssertion>) -> Response {
    let name_id = accepted
        .assertion
        .subject
        .as_ref()
        .and_then(|s| s.name_id.as_ref())
        .map(|n| n.value.as_str())
        .unwrap_or("unknown");
    let attrs = attributes::extract_attributes(&accepted.assertion);

    tracing::info!(
        name_id,
        attribute_count = attrs.len(),
        relay_state = accepted.relay_state.as_deref(),
        "assertion accepted"
    );

    (StatusCode::OK, "session established\n").into_response()
}

/// Decodes and validates a base64 SAMLResponse, yielding the trusted
/// assertion. There is no partial acceptance: every check must pass.
pub async fn validate_response(
    sp: &ServiceProvider,
    requests: &RequestTracker,
    encoded: &str,
    now: DateTime<Utc>,
) -> Result<Assertion, Error> {
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Malformed(format!("could not decode base64 payload: {e}")))?;

    let response = schema::Response::parse(&raw)?;

    let metadata = sp.idp_metadata().await?;

    if response.destination.as_deref() != Some(sp.acs_url.as_str()) {
        return Err(Error::Rejected(format!(
            "wrong ACS destination, expecting {:?}, got {:?}",
            sp.acs_url,
            response.destination.as_deref().unwrap_or_default()
        )));
    }

    if !metadata.entity_id.is_empty() {
        match response.issuer.as_deref() {
            None => return Err(Error::Rejected("missing Issuer element".into())),
            Some(issuer) if issuer != metadata.entity_id => {
                return Err(Error::Rejected(format!(
                    "issuer {issuer:?} does not match expected entity ID {:?}",
                    metadata.entity_id
                )));
            }
            Some(_) => {}
        }
    }

    match &response.status {
        Some(status) if status.status_code == schema::STATUS_SUCCESS => {}
        Some(status) => {
            return Err(Error::Rejected(format!(
                "unexpected status code {:?}",
                status.status_code
            )));
        }
        None => return Err(Error::Rejected("missing Status element".into())),
    }

    let allowed = allowed_in_response_to(sp, requests);
    check_in_response_to(&allowed, response.in_response_to.as_deref(), "Response")?;

    // Resolve the IdP certificate before any signature work; failing here is
    // an operational problem, not a protocol violation.
    let idp_cert = sp
        .idp_cert_file()
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;

    if let Some(signature) = &response.signature {
        validate_signed_node(signature, &response.id)?;
    }
    if let Some(assertion) = response.assertion() {
        if let Some(signature) = &assertion.signature {
            validate_signed_node(signature, &assertion.id)?;
        }
    }

    let mut signature_ok = false;
    let assertion_signed = response.assertion().is_some_and(|a| a.signature.is_some());
    if response.signature.is_some() || assertion_signed {
        verify_with_policy(sp, &raw, idp_cert)?;
        signature_ok = true;
    }

    let assertion = match &response.payload {
        Some(AssertionPayload::Encrypted(encrypted)) => {
            let key_file = sp
                .privkey_file()
                .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;

            let plaintext =
                crypto::decrypt(&encrypted.encrypted_data, key_file).map_err(|e| {
                    match e.kind() {
                        EngineErrorKind::Io => Error::Internal(anyhow::anyhow!(e)),
                        _ => {
                            if sp.policy.classify(&e) == Verdict::Ignore {
                                tracing::warn!(
                                    error = %e,
                                    "decryption error waived by policy still rejects"
                                );
                            }
                            Error::Decryption(e.to_string())
                        }
                    }
                })?;

            let assertion = Assertion::parse(&plaintext)?;

            if let Some(signature) = &assertion.signature {
                validate_signed_node(signature, &assertion.id)?;
                verify_with_policy(sp, &plaintext, idp_cert)?;
                signature_ok = true;
            }

            assertion
        }
        Some(AssertionPayload::Plain(assertion)) => assertion.clone(),
        None => return Err(Error::Rejected("missing assertion".into())),
    };

    if !signature_ok {
        return Err(Error::SignatureMissing);
    }

    if !metadata.entity_id.is_empty() {
        match assertion.issuer.as_deref() {
            None => return Err(Error::Rejected("missing Assertion Issuer".into())),
            Some(issuer) if issuer != metadata.entity_id => {
                return Err(Error::Rejected(format!(
                    "assertion issuer {issuer:?} does not match expected entity ID {:?}",
                    metadata.entity_id
                )));
            }
            Some(_) => {}
        }
    }

    let confirmation_data = assertion
        .subject
        .as_ref()
        .ok_or_else(|| Error::Rejected("missing Assertion Subject".into()))?
        .confirmation
        .as_ref()
        .ok_or_else(|| Error::Rejected("missing Assertion SubjectConfirmation".into()))?
        .data
        .as_ref()
        .ok_or_else(|| Error::Rejected("missing Assertion SubjectConfirmationData".into()))?;

    if confirmation_data.recipient.as_deref() != Some(sp.acs_url.as_str()) {
        return Err(Error::Rejected(format!(
            "unexpected assertion recipient, expecting {:?}, got {:?}",
            sp.acs_url,
            confirmation_data.recipient.as_deref().unwrap_or_default()
        )));
    }

    let conditions = assertion
        .conditions
        .as_ref()
        .ok_or_else(|| Error::Rejected("missing Assertion Conditions".into()))?;

    if let Some(restriction) = &conditions.audience_restriction {
        if !restriction.audiences.iter().any(|a| a == &sp.entity_id) {
            return Err(Error::Rejected(format!(
                "audience restriction does not include {:?}",
                sp.entity_id
            )));
        }
    }

    check_temporal(conditions, confirmation_data, now, sp.clock_drift_tolerance)?;

    check_in_response_to(
        &allowed,
        confirmation_data.in_response_to.as_deref(),
        "SubjectConfirmationData",
    )?;

    if let Some(in_response_to) = &response.in_response_to {
        requests.consume(in_response_to);
    }

    Ok(assertion)
}

fn allowed_in_response_to(sp: &ServiceProvider, requests: &RequestTracker) -> Vec<String> {
    let mut allowed = requests.outstanding();
    if sp.allow_idp_initiated {
        allowed.push(String::new());
    }
    allowed
}

/// Correlation rule: an empty allowed set skips the check, a set holding only
/// the empty string accepts any value, and otherwise membership is required.
fn check_in_response_to(allowed: &[String], got: Option<&str>, element: &str) -> Result<(), Error> {
    if allowed.is_empty() {
        return Ok(());
    }
    if allowed.len() == 1 && allowed[0].is_empty() {
        return Ok(());
    }

    let got = got.unwrap_or_default();
    if allowed.iter().any(|id| id == got) {
        return Ok(());
    }

    Err(Error::Rejected(format!(
        "unexpected {element} InResponseTo value {got:?}"
    )))
}

/// Binds a signature to the element that carries it. An empty Reference URI
/// means the whole document; a fragment must name the enclosing element's ID;
/// external URIs are never looked up. This is the structural defense against
/// signature wrapping.
fn validate_signed_node(signature: &SignatureRef, node_id: &str) -> Result<(), Error> {
    let uri = signature.reference_uri.as_deref().unwrap_or_default();
    if uri.is_empty() {
        return Ok(());
    }

    match uri.strip_prefix('#') {
        Some(id) if id == node_id => Ok(()),
        Some(_) => Err(Error::Rejected(format!(
            "signed Reference URI {uri:?} does not match element ID {node_id:?}"
        ))),
        None => Err(Error::Rejected(format!("cannot look up external URI {uri:?}"))),
    }
}

fn verify_with_policy(sp: &ServiceProvider, message: &[u8], idp_cert: &Path) -> Result<(), Error> {
    match crypto::verify(message, idp_cert, &sp.verify_options()) {
        Ok(()) => Ok(()),
        Err(e) => match sp.policy.classify(&e) {
            Verdict::Ignore => {
                tracing::warn!(error = %e, "engine error waived by security policy");
                Ok(())
            }
            // An ambiguous reference means the signature is bound to a
            // different element than the one being trusted, even when the
            // crypto itself would verify.
            Verdict::Reject if e.kind() == EngineErrorKind::DuplicateId => {
                Err(Error::Rejected(e.to_string()))
            }
            Verdict::Reject => Err(Error::SignatureInvalid(e.to_string())),
        },
    }
}

/// Validity windows with symmetric clock drift tolerance. Missing instants
/// are unspecified and pass.
fn check_temporal(
    conditions: &Conditions,
    confirmation_data: &SubjectConfirmationData,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), Error> {
    if let Some(not_before) = conditions.not_before {
        if not_before > now + tolerance {
            return Err(Error::Rejected(format!(
                "assertion conditions are not valid yet: NotBefore {not_before}, now {now}"
            )));
        }
    }

    if let Some(not_on_or_after) = conditions.not_on_or_after {
        if not_on_or_after <= now - tolerance {
            return Err(Error::Rejected(format!(
                "assertion conditions already expired: NotOnOrAfter {not_on_or_after}, now {now}"
            )));
        }
    }

    if let Some(not_on_or_after) = confirmation_data.not_on_or_after {
        if not_on_or_after <= now - tolerance {
            return Err(Error::Rejected(format!(
                "subject confirmation already expired: NotOnOrAfter {not_on_or_after}, now {now}"
            )));
        }
    }

    Ok(())
}
