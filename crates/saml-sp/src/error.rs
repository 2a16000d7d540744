use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing configuration: {0}")]
    ConfigMissing(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("IdP metadata fetch failed: {0}")]
    Network(String),
    #[error("response rejected: {0}")]
    Rejected(String),
    #[error("no signature found on Response or Assertion")]
    SignatureMissing,
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
    #[error("assertion decryption failed: {0}")]
    Decryption(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// The one-line message sent to the client. Enumerated per kind so that
    /// internal cause chains never leak into a response body.
    pub fn public_message(&self) -> &'static str {
        match self {
            Error::ConfigMissing(_) => "service provider is not fully configured",
            Error::Malformed(_) => "malformed payload",
            Error::Network(_) => "could not retrieve identity provider metadata",
            Error::Rejected(_) => "response rejected",
            Error::SignatureMissing => "unable to validate signature: node not found",
            Error::SignatureInvalid(_) => "unable to verify message signature",
            Error::Decryption(_) => "unable to decrypt assertion",
            Error::Io(_) | Error::Internal(_) => "an internal error occurred, please try again",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");

        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf8")],
            self.public_message(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failures_are_client_errors() {
        assert_eq!(
            Error::Rejected("wrong destination".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::SignatureMissing.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::Malformed("bad base64".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn internal_failures_are_server_errors() {
        assert_eq!(
            Error::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::Io(std::io::Error::other("disk")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn public_message_hides_details() {
        let err = Error::Rejected("issuer \"https://evil\" does not match".into());
        assert_eq!(err.public_message(), "response rejected");

        let err = Error::Internal(anyhow::anyhow!("secret: /etc/saml/key.pem"));
        assert!(!err.public_message().contains("key.pem"));
    }
}
