use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::Error;
use crate::schema::assertion::{Assertion, SignatureRef, parse_assertion_body};

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub status_code: String,
}

/// An EncryptedAssertion, kept as the raw `xenc:EncryptedData` subtree the
/// decryption engine consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedAssertion {
    pub encrypted_data: String,
}

/// A Response carries exactly one assertion, in one of two shapes. Both
/// variants converge on the same `Assertion` once the pipeline is past
/// retrieval.
#[derive(Debug, Clone, PartialEq)]
pub enum AssertionPayload {
    Plain(Assertion),
    Encrypted(EncryptedAssertion),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub id: String,
    pub in_response_to: Option<String>,
    pub destination: Option<String>,
    pub issuer: Option<String>,
    pub status: Option<Status>,
    pub signature: Option<SignatureRef>,
    pub payload: Option<AssertionPayload>,
}

impl Response {
    pub fn parse(xml: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(xml)
            .map_err(|e| Error::Malformed(format!("response is not UTF-8: {e}")))?;

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let root = loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    if e.local_name().as_ref() != b"Response" {
                        return Err(Error::Malformed("document root is not a Response".into()));
                    }
                    break e;
                }
                Ok(Event::Empty(_)) => {
                    return Err(Error::Malformed("empty document root".into()));
                }
                Ok(Event::Eof) => {
                    return Err(Error::Malformed("no Response element found".into()));
                }
                Err(e) => return Err(Error::Malformed(format!("response XML: {e}"))),
                _ => {}
            }
        };

        let mut response = Response {
            id: attr_value(&root, b"ID").unwrap_or_default(),
            in_response_to: attr_value(&root, b"InResponseTo"),
            destination: attr_value(&root, b"Destination"),
            ..Response::default()
        };

        let mut depth = 1usize;
        let mut stack: Vec<String> = Vec::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|e| Error::Malformed(format!("response XML: {e}")))?;

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();

                    match local.as_str() {
                        "Assertion" if stack.is_empty() => {
                            if response.payload.is_some() {
                                return Err(Error::Malformed(
                                    "more than one assertion element in Response".into(),
                                ));
                            }
                            if let Event::Start(e) = &event {
                                let assertion = parse_assertion_body(&mut reader, e)?;
                                response.payload = Some(AssertionPayload::Plain(assertion));
                                continue;
                            }
                        }
                        "EncryptedData" if path_is(&stack, &["EncryptedAssertion"]) => {
                            if response.payload.is_some() {
                                return Err(Error::Malformed(
                                    "more than one assertion element in Response".into(),
                                ));
                            }
                            if let Event::Start(e) = &event {
                                let raw = capture_subtree(&mut reader, e)?;
                                response.payload =
                                    Some(AssertionPayload::Encrypted(EncryptedAssertion {
                                        encrypted_data: raw,
                                    }));
                                continue;
                            }
                        }
                        "Signature" if stack.is_empty() && response.signature.is_none() => {
                            response.signature = Some(SignatureRef::default());
                        }
                        "Reference" if path_is(&stack, &["Signature", "SignedInfo"]) => {
                            if let Some(sig) = response.signature.as_mut() {
                                sig.reference_uri = attr_value(e, b"URI");
                            }
                        }
                        "StatusCode" if path_is(&stack, &["Status"]) => {
                            response.status = Some(Status {
                                status_code: attr_value(e, b"Value").unwrap_or_default(),
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
                    if path_is(&stack, &["Issuer"]) {
                        response.issuer = Some(e.unescape().unwrap_or_default().to_string());
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
                    return Err(Error::Malformed("unterminated Response element".into()));
                }
                _ => {}
            }
        }

        Ok(response)
    }

    pub fn assertion(&self) -> Option<&Assertion> {
        match &self.payload {
            Some(AssertionPayload::Plain(assertion)) => Some(assertion),
            _ => None,
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

/// Re-emits the raw XML of the element whose start tag was just read,
/// consuming events through its matching end tag.
fn capture_subtree(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<String, Error> {
    let mut xml = String::new();
    push_start_tag(&mut xml, start, false);

    let mut depth = 1usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                push_start_tag(&mut xml, &e, false);
            }
            Ok(Event::Empty(e)) => push_start_tag(&mut xml, &e, true),
            Ok(Event::Text(e)) => {
                xml.push_str(std::str::from_utf8(&e).unwrap_or_default());
            }
            Ok(Event::CData(e)) => {
                xml.push_str("<![CDATA[");
                xml.push_str(std::str::from_utf8(&e).unwrap_or_default());
                xml.push_str("]]>");
            }
            Ok(Event::End(e)) => {
                depth -= 1;
                if depth == 0 {
                    xml.push_str("</");
                    xml.push_str(std::str::from_utf8(e.name().as_ref()).unwrap_or_default());
                    xml.push('>');
                    break;
                }
                xml.push_str("</");
                xml.push_str(std::str::from_utf8(e.name().as_ref()).unwrap_or_default());
                xml.push('>');
            }
            Ok(Event::Eof) => {
                return Err(Error::Malformed("unterminated element".into()));
            }
            Err(e) => return Err(Error::Malformed(format!("response XML: {e}"))),
            _ => {}
        }
    }

    Ok(xml)
}

fn push_start_tag(xml: &mut String, e: &BytesStart, self_closing: bool) {
    xml.push('<');
    xml.push_str(std::str::from_utf8(e).unwrap_or_default());
    if self_closing {
        xml.push('/');
    }
    xml.push('>');
}
