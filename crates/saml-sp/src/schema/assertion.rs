use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::Error;
use crate::schema::parse_instant;

/// Structural view of a `ds:Signature` node: only the Reference URI matters
/// to the acceptance pipeline; the cryptographic work happens in the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureRef {
    pub reference_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameId {
    pub format: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubjectConfirmationData {
    pub recipient: Option<String>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub in_response_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubjectConfirmation {
    pub method: Option<String>,
    pub data: Option<SubjectConfirmationData>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Subject {
    pub name_id: Option<NameId>,
    pub confirmation: Option<SubjectConfirmation>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudienceRestriction {
    pub audiences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conditions {
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub audience_restriction: Option<AudienceRestriction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: Option<String>,
    pub values: Vec<String>,
}

/// A parsed assertion, either taken directly from a Response or recovered by
/// decrypting an EncryptedAssertion. Statements beyond attributes are not
/// modeled; downstream consumers work from the subject and attribute map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assertion {
    pub id: String,
    pub issuer: Option<String>,
    pub signature: Option<SignatureRef>,
    pub subject: Option<Subject>,
    pub conditions: Option<Conditions>,
    pub attributes: Vec<Attribute>,
}

impl Assertion {
    /// Parses a standalone Assertion document, e.g. decrypted plaintext.
    pub fn parse(xml: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(xml)
            .map_err(|e| Error::Malformed(format!("assertion is not UTF-8: {e}")))?;

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"Assertion" => {
                    return parse_assertion_body(&mut reader, &e);
                }
                Ok(Event::Start(_) | Event::Empty(_)) => {
                    return Err(Error::Malformed("document root is not an Assertion".into()));
                }
                Ok(Event::Eof) => {
                    return Err(Error::Malformed("no Assertion element found".into()));
                }
                Err(e) => return Err(Error::Malformed(format!("assertion XML: {e}"))),
                _ => {}
            }
        }
    }
}

fn path_is(stack: &[String], tail: &[&str]) -> bool {
    stack.len() == tail.len() && stack.iter().zip(tail).all(|(a, b)| a == b)
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| attr.unescape_value().unwrap_or_default().to_string())
}

/// Consumes events up to and including the end tag matching `start`, building
/// the Assertion. The reader must be positioned right after the start event.
///
/// Paths are matched exactly from the assertion root, so elements smuggled in
/// at other depths (nested assertions included) cannot overwrite fields.
pub(crate) fn parse_assertion_body(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Assertion, Error> {
    let mut assertion = Assertion {
        id: attr_value(start, b"ID").unwrap_or_default(),
        ..Assertion::default()
    };

    let mut depth = 1usize;
    let mut stack: Vec<String> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Malformed(format!("assertion XML: {e}")))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();

                match local.as_str() {
                    "Signature" if stack.is_empty() && assertion.signature.is_none() => {
                        assertion.signature = Some(SignatureRef::default());
                    }
                    "Reference" if path_is(&stack, &["Signature", "SignedInfo"]) => {
                        if let Some(sig) = assertion.signature.as_mut() {
                            sig.reference_uri = attr_value(e, b"URI");
                        }
                    }
                    "Subject" if stack.is_empty() => {
                        assertion.subject = Some(Subject::default());
                    }
                    "NameID" if path_is(&stack, &["Subject"]) => {
                        if let Some(subject) = assertion.subject.as_mut() {
                            subject.name_id = Some(NameId {
                                format: attr_value(e, b"Format"),
                                value: String::new(),
                            });
                        }
                    }
                    "SubjectConfirmation" if path_is(&stack, &["Subject"]) => {
                        if let Some(subject) = assertion.subject.as_mut() {
                            subject.confirmation = Some(SubjectConfirmation {
                                method: attr_value(e, b"Method"),
                                data: None,
                            });
                        }
                    }
                    "SubjectConfirmationData"
                        if path_is(&stack, &["Subject", "SubjectConfirmation"]) =>
                    {
                        if let Some(confirmation) = assertion
                            .subject
                            .as_mut()
                            .and_then(|s| s.confirmation.as_mut())
                        {
                            confirmation.data = Some(SubjectConfirmationData {
                                recipient: attr_value(e, b"Recipient"),
                                not_on_or_after: attr_value(e, b"NotOnOrAfter")
                                    .and_then(|v| parse_instant(&v)),
                                in_response_to: attr_value(e, b"InResponseTo"),
                            });
                        }
                    }
                    "Conditions" if stack.is_empty() => {
                        assertion.conditions = Some(Conditions {
                            not_before: attr_value(e, b"NotBefore").and_then(|v| parse_instant(&v)),
                            not_on_or_after: attr_value(e, b"NotOnOrAfter")
                                .and_then(|v| parse_instant(&v)),
                            audience_restriction: None,
                        });
                    }
                    "AudienceRestriction" if path_is(&stack, &["Conditions"]) => {
                        if let Some(conditions) = assertion.conditions.as_mut() {
                            conditions.audience_restriction = Some(AudienceRestriction::default());
                        }
                    }
                    "Attribute" if path_is(&stack, &["AttributeStatement"]) => {
                        assertion.attributes.push(Attribute {
                            name: attr_value(e, b"Name"),
                            values: Vec::new(),
                        });
                    }
                    _ => {}
                }

                if matches!(event, Event::Start(_)) {
                    depth += 1;
                    stack.push(local);
                }
            }
            Event::Text(ref e) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if path_is(&stack, &["Issuer"]) {
                    assertion.issuer = Some(text);
                } else if path_is(&stack, &["Subject", "NameID"]) {
                    if let Some(name_id) = assertion
                        .subject
                        .as_mut()
                        .and_then(|s| s.name_id.as_mut())
                    {
                        name_id.value = text;
                    }
                } else if path_is(&stack, &["Conditions", "AudienceRestriction", "Audience"]) {
                    if let Some(restriction) = assertion
                        .conditions
                        .as_mut()
                        .and_then(|c| c.audience_restriction.as_mut())
                    {
                        restriction.audiences.push(text);
                    }
                } else if path_is(&stack, &["AttributeStatement", "Attribute", "AttributeValue"]) {
                    if let Some(attribute) = assertion.attributes.last_mut() {
                        attribute.values.push(text);
                    }
                }
            }
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                stack.pop();
            }
            Event::Eof => {
                return Err(Error::Malformed("unterminated Assertion element".into()));
            }
            _ => {}
        }
    }

    Ok(assertion)
}
