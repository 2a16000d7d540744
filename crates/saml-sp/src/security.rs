//! Classification of crypto-engine errors.
//!
//! The engine reports everything that goes wrong; this policy decides which
//! failures abort acceptance and which are advisory. An `Ignore` verdict
//! means the pipeline proceeds as if verification succeeded, so the
//! non-security list below is a security-critical allowlist: it names exactly
//! the kinds that may be waived, and nothing else ever is.

use crate::crypto::{EngineError, EngineErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Genuine security failure: abort acceptance.
    Reject,
    /// Advisory condition: log and continue as verified.
    Ignore,
}

#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    /// Waive certificate NotBefore/NotAfter violations. IdPs routinely keep
    /// serving self-signed certificates past their window; the signature
    /// itself still verifies against the pinned key.
    pub ignore_stale_certificate: bool,
    /// Waive a missing DTD file configured for the verifier.
    pub ignore_missing_dtd: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            ignore_stale_certificate: true,
            ignore_missing_dtd: true,
        }
    }
}

impl SecurityPolicy {
    /// A policy with no waivers: every engine error rejects.
    pub fn strict() -> Self {
        Self {
            ignore_stale_certificate: false,
            ignore_missing_dtd: false,
        }
    }

    pub fn classify(&self, error: &EngineError) -> Verdict {
        match error.kind() {
            EngineErrorKind::CertificateExpired | EngineErrorKind::CertificateNotYetValid
                if self.ignore_stale_certificate =>
            {
                Verdict::Ignore
            }
            EngineErrorKind::DtdUnavailable if self.ignore_missing_dtd => Verdict::Ignore,
            _ => Verdict::Reject,
        }
    }
}
