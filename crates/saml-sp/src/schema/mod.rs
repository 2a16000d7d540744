//! SAML 2.0 message and metadata schema: parsing for inbound documents,
//! serialization for outbound ones. Parsing matches on local element names so
//! that prefix choices made by the IdP do not matter.

pub mod assertion;
pub mod authn_request;
pub mod metadata;
pub mod response;

pub use assertion::{
    Assertion, AudienceRestriction, Conditions, NameId, SignatureRef, Subject,
    SubjectConfirmation, SubjectConfirmationData,
};
pub use authn_request::AuthnRequest;
pub use metadata::{Endpoint, IdpMetadata, KeyDescriptor, SpMetadata};
pub use response::{AssertionPayload, EncryptedAssertion, Response, Status};

use chrono::{DateTime, Utc};

pub const PROTOCOL_NAMESPACE: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const ASSERTION_NAMESPACE: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const METADATA_NAMESPACE: &str = "urn:oasis:names:tc:SAML:2.0:metadata";

pub const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

pub const NAME_ID_FORMAT_ENTITY: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:entity";
pub const NAME_ID_FORMAT_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";

/// Formats an instant as xs:dateTime the way SAML peers expect it: UTC,
/// second precision, `Z` suffix.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parses an xs:dateTime attribute value. Fractional seconds and numeric
/// offsets are accepted; everything is normalized to UTC.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_round_trip() {
        let formatted = "2026-03-01T12:30:45Z";
        let parsed = parse_instant(formatted).unwrap();
        assert_eq!(format_instant(parsed), formatted);
    }

    #[test]
    fn parse_instant_accepts_fractional_seconds() {
        let parsed = parse_instant("2026-03-01T12:30:45.123Z").unwrap();
        assert_eq!(format_instant(parsed), "2026-03-01T12:30:45Z");
    }

    #[test]
    fn parse_instant_rejects_garbage() {
        assert!(parse_instant("not-a-date").is_none());
        assert!(parse_instant("").is_none());
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(xml_escape(r#"<a b="c&d">"#), "&lt;a b=&quot;c&amp;d&quot;&gt;");
    }
}
