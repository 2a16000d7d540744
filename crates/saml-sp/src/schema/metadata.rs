use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::Error;
use crate::schema::{HTTP_POST_BINDING, METADATA_NAMESPACE, format_instant, xml_escape};

/// A single sign-on endpoint advertised by the IdP.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub binding: String,
    pub location: String,
}

/// A key advertised by the IdP, tagged with its intended use.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDescriptor {
    pub key_use: Option<String>,
    /// Base64 DER certificate from `ds:X509Certificate`, whitespace included
    /// as published.
    pub certificate: Option<String>,
}

/// The subset of an IdP EntityDescriptor the service provider acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct IdpMetadata {
    pub entity_id: String,
    pub sso_endpoints: Vec<Endpoint>,
    pub key_descriptors: Vec<KeyDescriptor>,
}

impl IdpMetadata {
    pub fn parse(xml: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(xml)
            .map_err(|e| Error::Malformed(format!("IdP metadata is not UTF-8: {e}")))?;

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut entity_id = None;
        let mut sso_endpoints = Vec::new();
        let mut key_descriptors: Vec<KeyDescriptor> = Vec::new();
        let mut in_idp_descriptor = false;
        let mut in_key_descriptor = false;
        let mut in_certificate = false;
        let mut saw_entity_descriptor = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e) | Event::Empty(e))
                    if e.local_name().as_ref() == b"EntityDescriptor" =>
                {
                    saw_entity_descriptor = true;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"entityID" {
                            entity_id = Some(attr.unescape_value().unwrap_or_default().to_string());
                        }
                    }
                }
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"IDPSSODescriptor" => {
                    in_idp_descriptor = true;
                }
                Ok(Event::Start(e) | Event::Empty(e))
                    if in_idp_descriptor && e.local_name().as_ref() == b"SingleSignOnService" =>
                {
                    let mut binding = None;
                    let mut location = None;
                    for attr in e.attributes().flatten() {
                        let value = attr.unescape_value().unwrap_or_default();
                        match attr.key.as_ref() {
                            b"Binding" => binding = Some(value.to_string()),
                            b"Location" => location = Some(value.to_string()),
                            _ => {}
                        }
                    }
                    if let (Some(binding), Some(location)) = (binding, location) {
                        sso_endpoints.push(Endpoint { binding, location });
                    }
                }
                Ok(Event::Start(e)) if in_idp_descriptor && e.local_name().as_ref() == b"KeyDescriptor" => {
                    in_key_descriptor = true;
                    let mut key_use = None;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"use" {
                            key_use = Some(attr.unescape_value().unwrap_or_default().to_string());
                        }
                    }
                    key_descriptors.push(KeyDescriptor {
                        key_use,
                        certificate: None,
                    });
                }
                Ok(Event::Start(e)) if in_key_descriptor && e.local_name().as_ref() == b"X509Certificate" => {
                    in_certificate = true;
                }
                Ok(Event::Text(e)) => {
                    if in_certificate {
                        if let Some(descriptor) = key_descriptors.last_mut() {
                            descriptor.certificate =
                                Some(e.unescape().unwrap_or_default().to_string());
                        }
                    }
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"IDPSSODescriptor" => in_idp_descriptor = false,
                    b"KeyDescriptor" => in_key_descriptor = false,
                    b"X509Certificate" => in_certificate = false,
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::Malformed(format!("IdP metadata XML: {e}"))),
                _ => {}
            }
        }

        if !saw_entity_descriptor {
            return Err(Error::Malformed("no EntityDescriptor element".into()));
        }

        Ok(Self {
            entity_id: entity_id.unwrap_or_default(),
            sso_endpoints,
            key_descriptors,
        })
    }
}

const SUPPORTED_ENCRYPTION_METHODS: &[&str] = &[
    "http://www.w3.org/2001/04/xmlenc#aes128-cbc",
    "http://www.w3.org/2001/04/xmlenc#aes192-cbc",
    "http://www.w3.org/2001/04/xmlenc#aes256-cbc",
    "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p",
];

/// The service provider's own EntityDescriptor, served to IdPs.
#[derive(Debug, Clone, PartialEq)]
pub struct SpMetadata {
    pub entity_id: String,
    pub valid_until: DateTime<Utc>,
    pub acs_url: String,
    /// Base64 DER of the SP certificate, embedded under both key uses.
    pub certificate: String,
}

impl SpMetadata {
    pub fn to_xml(&self) -> String {
        let certificate = xml_escape(&self.certificate);

        let mut xml = String::new();
        xml.push_str("<md:EntityDescriptor xmlns:md=\"");
        xml.push_str(METADATA_NAMESPACE);
        xml.push_str("\" xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\" entityID=\"");
        xml.push_str(&xml_escape(&self.entity_id));
        xml.push_str("\" validUntil=\"");
        xml.push_str(&format_instant(self.valid_until));
        xml.push_str("\"><md:SPSSODescriptor AuthnRequestsSigned=\"false\" WantAssertionsSigned=\"true\" protocolSupportEnumeration=\"urn:oasis:names:tc:SAML:2.0:protocol\">");

        xml.push_str("<md:KeyDescriptor use=\"signing\"><ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
        xml.push_str(&certificate);
        xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>");

        xml.push_str("<md:KeyDescriptor use=\"encryption\"><ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
        xml.push_str(&certificate);
        xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo>");
        for method in SUPPORTED_ENCRYPTION_METHODS {
            xml.push_str("<md:EncryptionMethod Algorithm=\"");
            xml.push_str(method);
            xml.push_str("\"/>");
        }
        xml.push_str("</md:KeyDescriptor>");

        xml.push_str("<md:AssertionConsumerService Binding=\"");
        xml.push_str(HTTP_POST_BINDING);
        xml.push_str("\" Location=\"");
        xml.push_str(&xml_escape(&self.acs_url));
        xml.push_str("\" index=\"1\"/>");

        xml.push_str("</md:SPSSODescriptor></md:EntityDescriptor>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{HTTP_REDIRECT_BINDING, parse_instant};

    const IDP_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" entityID="https://idp.example/meta">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo><ds:X509Data><ds:X509Certificate>c2lnbmluZw==</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
    </md:KeyDescriptor>
    <md:KeyDescriptor use="encryption">
      <ds:KeyInfo><ds:X509Data><ds:X509Certificate>ZW5jcnlwdGlvbg==</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example/sso/post"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example/sso/redirect"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#;

    #[test]
    fn parses_entity_id_endpoints_and_keys() {
        let metadata = IdpMetadata::parse(IDP_METADATA.as_bytes()).unwrap();
        assert_eq!(metadata.entity_id, "https://idp.example/meta");

        assert_eq!(metadata.sso_endpoints.len(), 2);
        assert_eq!(metadata.sso_endpoints[0].binding, HTTP_POST_BINDING);
        assert_eq!(metadata.sso_endpoints[1].binding, HTTP_REDIRECT_BINDING);
        assert_eq!(
            metadata.sso_endpoints[1].location,
            "https://idp.example/sso/redirect"
        );

        assert_eq!(metadata.key_descriptors.len(), 2);
        assert_eq!(metadata.key_descriptors[0].key_use.as_deref(), Some("signing"));
        assert_eq!(
            metadata.key_descriptors[1].certificate.as_deref(),
            Some("ZW5jcnlwdGlvbg==")
        );
    }

    #[test]
    fn parse_rejects_non_metadata_documents() {
        assert!(IdpMetadata::parse(b"<Unrelated/>").is_err());
        assert!(IdpMetadata::parse(b"not xml <<").is_err());
    }

    #[test]
    fn sp_metadata_lists_both_key_uses_and_the_acs() {
        let metadata = SpMetadata {
            entity_id: "https://sp.example/saml/metadata".into(),
            valid_until: parse_instant("2026-06-01T00:00:00Z").unwrap(),
            acs_url: "https://sp.example/saml/acs".into(),
            certificate: "Q0VSVA==".into(),
        };

        let xml = metadata.to_xml();
        assert!(xml.contains(r#"entityID="https://sp.example/saml/metadata""#));
        assert!(xml.contains(r#"validUntil="2026-06-01T00:00:00Z""#));
        assert!(xml.contains(r#"use="signing""#));
        assert!(xml.contains(r#"use="encryption""#));
        assert_eq!(xml.matches("Q0VSVA==").count(), 2);
        assert!(xml.contains(r#"AuthnRequestsSigned="false""#));
        assert!(xml.contains(r#"WantAssertionsSigned="true""#));
        assert!(xml.contains(r#"Location="https://sp.example/saml/acs" index="1""#));
        assert!(xml.contains("aes256-cbc"));
        assert!(xml.contains("rsa-oaep-mgf1p"));
    }

    #[test]
    fn sp_metadata_is_deterministic() {
        let metadata = SpMetadata {
            entity_id: "https://sp.example/saml/metadata".into(),
            valid_until: parse_instant("2026-06-01T00:00:00Z").unwrap(),
            acs_url: "https://sp.example/saml/acs".into(),
            certificate: "Q0VSVA==".into(),
        };
        assert_eq!(metadata.to_xml(), metadata.to_xml());
    }
}
