use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::Error;
use crate::schema::{
    ASSERTION_NAMESPACE, NAME_ID_FORMAT_ENTITY, NAME_ID_FORMAT_TRANSIENT, PROTOCOL_NAMESPACE,
    format_instant, parse_instant, xml_escape,
};

/// An outbound authentication request, sent to the IdP's SSO endpoint via the
/// HTTP-Redirect binding.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthnRequest {
    pub id: String,
    pub version: String,
    pub issue_instant: DateTime<Utc>,
    pub destination: String,
    pub assertion_consumer_service_url: String,
    pub issuer: String,
}

impl AuthnRequest {
    pub fn new(
        destination: impl Into<String>,
        acs_url: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("id-{}", uuid::Uuid::new_v4()),
            version: "2.0".to_string(),
            issue_instant: Utc::now(),
            destination: destination.into(),
            assertion_consumer_service_url: acs_url.into(),
            issuer: issuer.into(),
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<samlp:AuthnRequest xmlns:samlp=\"");
        xml.push_str(PROTOCOL_NAMESPACE);
        xml.push_str("\" xmlns:saml=\"");
        xml.push_str(ASSERTION_NAMESPACE);
        xml.push_str("\" ID=\"");
        xml.push_str(&xml_escape(&self.id));
        xml.push_str("\" Version=\"");
        xml.push_str(&xml_escape(&self.version));
        xml.push_str("\" IssueInstant=\"");
        xml.push_str(&format_instant(self.issue_instant));
        xml.push_str("\" Destination=\"");
        xml.push_str(&xml_escape(&self.destination));
        xml.push_str("\" AssertionConsumerServiceURL=\"");
        xml.push_str(&xml_escape(&self.assertion_consumer_service_url));
        xml.push_str("\"><saml:Issuer Format=\"");
        xml.push_str(NAME_ID_FORMAT_ENTITY);
        xml.push_str("\">");
        xml.push_str(&xml_escape(&self.issuer));
        xml.push_str("</saml:Issuer><samlp:NameIDPolicy AllowCreate=\"true\" Format=\"");
        xml.push_str(NAME_ID_FORMAT_TRANSIENT);
        xml.push_str("\"/></samlp:AuthnRequest>");
        xml
    }

    pub fn parse(xml: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(xml)
            .map_err(|e| Error::Malformed(format!("AuthnRequest is not UTF-8: {e}")))?;

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut id = None;
        let mut version = None;
        let mut issue_instant = None;
        let mut destination = None;
        let mut acs_url = None;
        let mut issuer = None;
        let mut in_issuer = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e) | Event::Empty(e)) if e.local_name().as_ref() == b"AuthnRequest" => {
                    for attr in e.attributes().flatten() {
                        let value = attr.unescape_value().unwrap_or_default();
                        match attr.key.as_ref() {
                            b"ID" => id = Some(value.to_string()),
                            b"Version" => version = Some(value.to_string()),
                            b"IssueInstant" => issue_instant = parse_instant(&value),
                            b"Destination" => destination = Some(value.to_string()),
                            b"AssertionConsumerServiceURL" => acs_url = Some(value.to_string()),
                            _ => {}
                        }
                    }
                }
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"Issuer" => in_issuer = true,
                Ok(Event::Text(e)) => {
                    if in_issuer {
                        issuer = Some(e.unescape().unwrap_or_default().to_string());
                    }
                }
                Ok(Event::End(e)) => {
                    if e.local_name().as_ref() == b"Issuer" {
                        in_issuer = false;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::Malformed(format!("AuthnRequest XML: {e}"))),
                _ => {}
            }
        }

        Ok(Self {
            id: id.ok_or_else(|| Error::Malformed("AuthnRequest has no ID".into()))?,
            version: version.unwrap_or_default(),
            issue_instant: issue_instant
                .ok_or_else(|| Error::Malformed("AuthnRequest has no IssueInstant".into()))?,
            destination: destination.unwrap_or_default(),
            assertion_consumer_service_url: acs_url.unwrap_or_default(),
            issuer: issuer.unwrap_or_default(),
        })
    }
}
