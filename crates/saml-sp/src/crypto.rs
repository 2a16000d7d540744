//! Crypto engine adapter: XML-DSig verification and XML-Enc decryption over
//! openssl primitives with exclusive-C14N canonicalization.
//!
//! The surface is two operations, `verify` and `decrypt`, both taking key
//! material as filesystem paths. The engine reports what went wrong through
//! typed `EngineError` kinds and never decides whether a failure is fatal;
//! that classification belongs to `SecurityPolicy`.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::Verifier;
use openssl::symm::{Cipher, Crypter, Mode};
use openssl::x509::X509;
use quick_xml::Reader;
use quick_xml::events::Event;
use xml_canonicalization::Canonicalizer;

pub const DSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";

const AES_IV_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The document or a crypto structure inside it could not be parsed.
    Parse,
    /// No `ds:Signature` element present.
    NoSignature,
    /// A signature element is structurally incomplete.
    MalformedSignature,
    /// Signature, digest, or encryption algorithm this engine does not speak.
    UnsupportedAlgorithm,
    /// The Reference URI points at no element in the document.
    ReferenceNotFound,
    /// More than one element in the document claims the referenced ID.
    DuplicateId,
    /// The referenced element's digest does not match.
    DigestMismatch,
    /// The RSA signature over SignedInfo does not verify.
    SignatureMismatch,
    CertificateExpired,
    CertificateNotYetValid,
    /// A DTD file was requested in the options but cannot be read.
    DtdUnavailable,
    /// Key or certificate material could not be loaded or used.
    Key,
    /// An openssl primitive failed.
    Crypto,
    Io,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct EngineError {
    kind: EngineErrorKind,
    message: String,
}

impl EngineError {
    fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub dtd_file: Option<PathBuf>,
}

/// Verifies every enveloped signature in `xml` against the certificate at
/// `cert_file`. All signatures present must verify.
pub fn verify(xml: &[u8], cert_file: &Path, options: &VerifyOptions) -> Result<(), EngineError> {
    if let Some(dtd) = &options.dtd_file {
        if std::fs::metadata(dtd).is_err() {
            return Err(EngineError::new(
                EngineErrorKind::DtdUnavailable,
                format!("cannot read DTD file {}", dtd.display()),
            ));
        }
    }

    let pem = std::fs::read(cert_file)
        .map_err(|e| EngineError::new(EngineErrorKind::Io, format!("read certificate: {e}")))?;
    let cert = X509::from_pem(&pem)
        .map_err(|e| EngineError::new(EngineErrorKind::Key, format!("parse certificate: {e}")))?;
    let public_key = cert
        .public_key()
        .map_err(|e| EngineError::new(EngineErrorKind::Key, format!("certificate public key: {e}")))?;

    let text = std::str::from_utf8(xml)
        .map_err(|e| EngineError::new(EngineErrorKind::Parse, format!("document is not UTF-8: {e}")))?;

    let signatures = extract_signatures(text)?;
    if signatures.is_empty() {
        return Err(EngineError::new(
            EngineErrorKind::NoSignature,
            "no Signature element in document",
        ));
    }

    for signature in &signatures {
        verify_signature(text, signature, &public_key)?;
    }

    check_certificate_window(&cert)?;

    Ok(())
}

/// Decrypts an `xenc:EncryptedData` element with the RSA private key at
/// `key_file`, returning the plaintext bytes.
pub fn decrypt(encrypted_data_xml: &str, key_file: &Path) -> Result<Vec<u8>, EngineError> {
    let pem = std::fs::read(key_file)
        .map_err(|e| EngineError::new(EngineErrorKind::Io, format!("read private key: {e}")))?;
    let rsa = Rsa::private_key_from_pem(&pem)
        .map_err(|e| EngineError::new(EngineErrorKind::Key, format!("parse private key: {e}")))?;

    let encrypted = parse_encrypted_data(encrypted_data_xml)?;

    let padding = match encrypted.key_algorithm.as_str() {
        "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p" => Padding::PKCS1_OAEP,
        "http://www.w3.org/2001/04/xmlenc#rsa-1_5" => Padding::PKCS1,
        other => {
            return Err(EngineError::new(
                EngineErrorKind::UnsupportedAlgorithm,
                format!("key transport algorithm {other}"),
            ));
        }
    };

    let wrapped_key = decode_base64(&encrypted.key_cipher_value, "EncryptedKey CipherValue")?;
    let mut key = vec![0u8; rsa.size() as usize];
    let key_len = rsa
        .private_decrypt(&wrapped_key, &mut key, padding)
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("key unwrap: {e}")))?;
    key.truncate(key_len);

    let cipher = match encrypted.block_algorithm.as_str() {
        "http://www.w3.org/2001/04/xmlenc#aes128-cbc" => Cipher::aes_128_cbc(),
        "http://www.w3.org/2001/04/xmlenc#aes192-cbc" => Cipher::aes_192_cbc(),
        "http://www.w3.org/2001/04/xmlenc#aes256-cbc" => Cipher::aes_256_cbc(),
        other => {
            return Err(EngineError::new(
                EngineErrorKind::UnsupportedAlgorithm,
                format!("block algorithm {other}"),
            ));
        }
    };
    if key.len() != cipher.key_len() {
        return Err(EngineError::new(
            EngineErrorKind::Key,
            format!(
                "unwrapped key is {} bytes, cipher needs {}",
                key.len(),
                cipher.key_len()
            ),
        ));
    }

    let data = decode_base64(&encrypted.data_cipher_value, "EncryptedData CipherValue")?;
    if data.len() < AES_IV_LEN || (data.len() - AES_IV_LEN) % cipher.block_size() != 0 {
        return Err(EngineError::new(
            EngineErrorKind::Crypto,
            "ciphertext is not a whole number of blocks",
        ));
    }
    let (iv, ciphertext) = data.split_at(AES_IV_LEN);

    let mut crypter = Crypter::new(cipher, Mode::Decrypt, &key, Some(iv))
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("cipher init: {e}")))?;
    crypter.pad(false);

    let mut plaintext = vec![0u8; ciphertext.len() + cipher.block_size()];
    let mut written = crypter
        .update(ciphertext, &mut plaintext)
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("decrypt: {e}")))?;
    written += crypter
        .finalize(&mut plaintext[written..])
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("decrypt: {e}")))?;
    plaintext.truncate(written);

    // XML-Enc padding: the final octet is the pad length.
    let pad = *plaintext.last().ok_or_else(|| {
        EngineError::new(EngineErrorKind::Crypto, "decrypted payload is empty")
    })? as usize;
    if pad == 0 || pad > cipher.block_size() || pad > plaintext.len() {
        return Err(EngineError::new(
            EngineErrorKind::Crypto,
            "invalid block padding",
        ));
    }
    plaintext.truncate(plaintext.len() - pad);

    Ok(plaintext)
}

struct RawSignature {
    signed_info: String,
    signature_value: String,
    reference_uri: String,
    digest_value: String,
    digest_algorithm: String,
    signature_algorithm: String,
}

fn extract_signatures(text: &str) -> Result<Vec<RawSignature>, EngineError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut signatures = Vec::new();
    let mut current: Option<RawSignature> = None;
    let mut in_signed_info = false;
    let mut in_signature_value = false;
    let mut in_digest_value = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"Signature" if current.is_none() => {
                        current = Some(RawSignature {
                            signed_info: String::new(),
                            signature_value: String::new(),
                            reference_uri: String::new(),
                            digest_value: String::new(),
                            digest_algorithm: String::new(),
                            signature_algorithm: String::new(),
                        });
                    }
                    b"SignedInfo" if current.is_some() => {
                        in_signed_info = true;
                        if let Some(sig) = current.as_mut() {
                            push_raw_start(&mut sig.signed_info, &e, false, true);
                        }
                    }
                    b"SignatureValue" if current.is_some() && !in_signed_info => {
                        in_signature_value = true;
                    }
                    _ if in_signed_info => {
                        if let Some(sig) = current.as_mut() {
                            push_raw_start(&mut sig.signed_info, &e, false, false);
                            capture_signed_info_parts(sig, &e, &mut in_digest_value);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if in_signed_info {
                    if let Some(sig) = current.as_mut() {
                        push_raw_start(&mut sig.signed_info, &e, true, false);
                        let mut unused = false;
                        capture_signed_info_parts(sig, &e, &mut unused);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let raw = std::str::from_utf8(&e).unwrap_or_default();
                if let Some(sig) = current.as_mut() {
                    if in_signed_info {
                        sig.signed_info.push_str(raw);
                        if in_digest_value {
                            sig.digest_value.push_str(raw);
                        }
                    } else if in_signature_value {
                        sig.signature_value.push_str(raw);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"Signature" => {
                        if let Some(sig) = current.take() {
                            if sig.signed_info.is_empty() || sig.signature_value.trim().is_empty() {
                                return Err(EngineError::new(
                                    EngineErrorKind::MalformedSignature,
                                    "Signature lacks SignedInfo or SignatureValue",
                                ));
                            }
                            signatures.push(sig);
                        }
                    }
                    b"SignedInfo" if in_signed_info => {
                        if let Some(sig) = current.as_mut() {
                            sig.signed_info.push_str("</");
                            sig.signed_info
                                .push_str(std::str::from_utf8(e.name().as_ref()).unwrap_or_default());
                            sig.signed_info.push('>');
                        }
                        in_signed_info = false;
                    }
                    b"SignatureValue" => in_signature_value = false,
                    b"DigestValue" => in_digest_value = false,
                    _ if in_signed_info => {
                        if let Some(sig) = current.as_mut() {
                            sig.signed_info.push_str("</");
                            sig.signed_info
                                .push_str(std::str::from_utf8(e.name().as_ref()).unwrap_or_default());
                            sig.signed_info.push('>');
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EngineError::new(
                    EngineErrorKind::Parse,
                    format!("document XML: {e}"),
                ));
            }
            _ => {}
        }
    }

    Ok(signatures)
}

fn capture_signed_info_parts(
    sig: &mut RawSignature,
    e: &quick_xml::events::BytesStart,
    in_digest_value: &mut bool,
) {
    match e.local_name().as_ref() {
        b"Reference" => {
            if let Some(uri) = attr_value(e, b"URI") {
                sig.reference_uri = uri;
            }
        }
        b"SignatureMethod" => {
            if let Some(alg) = attr_value(e, b"Algorithm") {
                sig.signature_algorithm = alg;
            }
        }
        b"DigestMethod" => {
            if let Some(alg) = attr_value(e, b"Algorithm") {
                sig.digest_algorithm = alg;
            }
        }
        b"DigestValue" => *in_digest_value = true,
        _ => {}
    }
}

fn attr_value(e: &quick_xml::events::BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| attr.unescape_value().unwrap_or_default().to_string())
}

/// Appends a start tag verbatim. For the SignedInfo root the dsig namespace
/// declaration is injected when the tag does not carry one, because the
/// extracted subtree must canonicalize outside its original context.
fn push_raw_start(
    out: &mut String,
    e: &quick_xml::events::BytesStart,
    self_closing: bool,
    is_signed_info_root: bool,
) {
    let raw = std::str::from_utf8(e).unwrap_or_default();
    out.push('<');
    out.push_str(raw);

    if is_signed_info_root {
        let qname = e.name();
        let declaration = match qname.as_ref().iter().position(|&b| b == b':') {
            Some(split) => format!(
                "xmlns:{}=",
                std::str::from_utf8(&qname.as_ref()[..split]).unwrap_or_default()
            ),
            None => "xmlns=".to_string(),
        };
        if !raw.contains(&declaration) {
            out.push(' ');
            out.push_str(&declaration);
            out.push('"');
            out.push_str(DSIG_NAMESPACE);
            out.push('"');
        }
    }

    if self_closing {
        out.push('/');
    }
    out.push('>');
}

fn verify_signature(
    text: &str,
    sig: &RawSignature,
    public_key: &PKey<Public>,
) -> Result<(), EngineError> {
    let referenced = if sig.reference_uri.is_empty() {
        text.to_string()
    } else {
        let id = sig.reference_uri.strip_prefix('#').ok_or_else(|| {
            EngineError::new(
                EngineErrorKind::MalformedSignature,
                format!("external Reference URI {:?}", sig.reference_uri),
            )
        })?;
        extract_element_by_id(text, id)?
    };

    // Enveloped-signature transform: drop the signature being checked from
    // its enclosing element before digesting.
    let scrubbed = remove_signature_containing(&referenced, &sig.signature_value);

    let digest_method = match sig.digest_algorithm.as_str() {
        "http://www.w3.org/2000/09/xmldsig#sha1" => MessageDigest::sha1(),
        "http://www.w3.org/2001/04/xmlenc#sha256" => MessageDigest::sha256(),
        "http://www.w3.org/2001/04/xmldsig-more#sha384" => MessageDigest::sha384(),
        "http://www.w3.org/2001/04/xmlenc#sha512" => MessageDigest::sha512(),
        other => {
            return Err(EngineError::new(
                EngineErrorKind::UnsupportedAlgorithm,
                format!("digest algorithm {other:?}"),
            ));
        }
    };

    let canonical = canonicalize(&scrubbed)?;
    let digest = openssl::hash::hash(digest_method, canonical.as_bytes())
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("digest: {e}")))?;
    if STANDARD.encode(&digest) != strip_whitespace(&sig.digest_value) {
        return Err(EngineError::new(
            EngineErrorKind::DigestMismatch,
            format!("digest mismatch for reference {:?}", sig.reference_uri),
        ));
    }

    let signature_method = match sig.signature_algorithm.as_str() {
        "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => MessageDigest::sha1(),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => MessageDigest::sha256(),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => MessageDigest::sha384(),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => MessageDigest::sha512(),
        other => {
            return Err(EngineError::new(
                EngineErrorKind::UnsupportedAlgorithm,
                format!("signature algorithm {other:?}"),
            ));
        }
    };

    let signature_bytes = decode_base64(&sig.signature_value, "SignatureValue")?;
    let canonical_signed_info = canonicalize(&sig.signed_info)?;

    let mut verifier = Verifier::new(signature_method, public_key)
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("verifier init: {e}")))?;
    verifier
        .update(canonical_signed_info.as_bytes())
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("verifier update: {e}")))?;
    let valid = verifier
        .verify(&signature_bytes)
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("verify: {e}")))?;

    if !valid {
        return Err(EngineError::new(
            EngineErrorKind::SignatureMismatch,
            "RSA signature over SignedInfo does not verify",
        ));
    }

    Ok(())
}

fn check_certificate_window(cert: &X509) -> Result<(), EngineError> {
    let now = openssl::asn1::Asn1Time::days_from_now(0)
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("clock: {e}")))?;

    let expired = cert
        .not_after()
        .compare(&now)
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("time compare: {e}")))?;
    if expired == std::cmp::Ordering::Less {
        return Err(EngineError::new(
            EngineErrorKind::CertificateExpired,
            "certificate validity window has ended",
        ));
    }

    let premature = cert
        .not_before()
        .compare(&now)
        .map_err(|e| EngineError::new(EngineErrorKind::Crypto, format!("time compare: {e}")))?;
    if premature == std::cmp::Ordering::Greater {
        return Err(EngineError::new(
            EngineErrorKind::CertificateNotYetValid,
            "certificate validity window has not started",
        ));
    }

    Ok(())
}

fn canonicalize(xml: &str) -> Result<String, EngineError> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| EngineError::new(EngineErrorKind::Parse, format!("canonicalization: {e}")))?;

    String::from_utf8(output)
        .map_err(|e| EngineError::new(EngineErrorKind::Parse, format!("canonical UTF-8: {e}")))
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn decode_base64(value: &str, what: &str) -> Result<Vec<u8>, EngineError> {
    STANDARD
        .decode(strip_whitespace(value))
        .map_err(|e| EngineError::new(EngineErrorKind::Parse, format!("{what} base64: {e}")))
}

/// Returns the full raw text of the unique element carrying `ID="<id>"`.
/// Zero matches is a dangling reference. More than one match is rejected
/// outright: duplicated IDs are how a signed decoy elsewhere in the document
/// is made to vouch for a forged element carrying the same ID.
fn extract_element_by_id(text: &str, id: &str) -> Result<String, EngineError> {
    let marker = format!("ID=\"{id}\"");
    let positions: Vec<usize> = text
        .match_indices(&marker)
        .map(|(pos, _)| pos)
        .filter(|&pos| {
            text[..pos]
                .as_bytes()
                .last()
                .is_some_and(|b| b.is_ascii_whitespace())
        })
        .collect();

    let attr_pos = match positions.as_slice() {
        [] => {
            return Err(EngineError::new(
                EngineErrorKind::ReferenceNotFound,
                format!("no element with ID {id:?}"),
            ));
        }
        [pos] => *pos,
        _ => {
            return Err(EngineError::new(
                EngineErrorKind::DuplicateId,
                format!("{} elements share ID {id:?}", positions.len()),
            ));
        }
    };

    element_span_at(text, attr_pos).ok_or_else(|| {
        EngineError::new(
            EngineErrorKind::ReferenceNotFound,
            format!("unterminated element with ID {id:?}"),
        )
    })
}

/// The raw span of the element whose start tag contains byte `attr_pos`,
/// matching open and close tags by name so same-named siblings and nesting
/// cannot truncate it.
fn element_span_at(text: &str, attr_pos: usize) -> Option<String> {
    let start = text[..attr_pos].rfind('<')?;
    let after_open = &text[start + 1..];
    let name_len = after_open.find(|c: char| c.is_whitespace() || c == '>' || c == '/')?;
    let name = &after_open[..name_len];

    let open_pat = format!("<{name}");
    let close_pat = format!("</{name}");

    let mut depth = 0usize;
    let mut idx = start;
    while idx < text.len() {
        let rest = &text[idx..];
        if rest.starts_with(&close_pat)
            && rest[close_pat.len()..]
                .chars()
                .next()
                .is_some_and(|c| c == '>' || c.is_whitespace())
        {
            depth = depth.checked_sub(1)?;
            let end = idx + rest.find('>')? + 1;
            if depth == 0 {
                return Some(text[start..end].to_string());
            }
            idx = end;
        } else if rest.starts_with(&open_pat)
            && rest[open_pat.len()..]
                .chars()
                .next()
                .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace())
        {
            let tag_end = idx + rest.find('>')?;
            let self_closing = text.as_bytes()[tag_end - 1] == b'/';
            if self_closing {
                if depth == 0 {
                    return Some(text[start..=tag_end].to_string());
                }
            } else {
                depth += 1;
            }
            idx = tag_end + 1;
        } else {
            idx += rest.chars().next()?.len_utf8();
        }
    }

    None
}

/// Splices out the `ds:Signature` element whose SignatureValue text equals
/// `needle`. If the element is not inside `target`, the input is returned
/// unchanged and the digest comparison decides the outcome.
fn remove_signature_containing(target: &str, needle: &str) -> String {
    if needle.is_empty() {
        return target.to_string();
    }
    let Some(value_pos) = target.find(needle) else {
        return target.to_string();
    };

    let Some(open) = find_signature_open_before(target, value_pos) else {
        return target.to_string();
    };
    let Some(end) = find_signature_close_after(target, value_pos) else {
        return target.to_string();
    };

    let mut result = String::with_capacity(target.len());
    result.push_str(&target[..open]);
    result.push_str(&target[end..]);
    result
}

fn find_signature_open_before(text: &str, before: usize) -> Option<usize> {
    let slice = &text[..before];
    let mut best = None;
    for (pos, _) in slice.match_indices("Signature") {
        let boundary_ok = slice[pos + "Signature".len()..]
            .chars()
            .next()
            .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace());
        if !boundary_ok {
            continue;
        }
        if let Some(open) = tag_open_position(slice, pos) {
            best = Some(open);
        }
    }
    best
}

fn find_signature_close_after(text: &str, after: usize) -> Option<usize> {
    for (pos, _) in text[after..].match_indices("Signature>") {
        let absolute = after + pos;
        if let Some(open) = closing_tag_position(text, absolute) {
            let _ = open;
            return Some(absolute + "Signature>".len());
        }
    }
    None
}

/// If the byte just before `name_pos` ends an opening tag prefix (`<` or
/// `<prefix:`), returns the position of that `<`.
fn tag_open_position(text: &str, name_pos: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if name_pos == 0 {
        return None;
    }
    if bytes[name_pos - 1] == b'<' {
        return Some(name_pos - 1);
    }
    if bytes[name_pos - 1] == b':' {
        let mut i = name_pos - 1;
        while i > 0 && bytes[i - 1] != b'<' {
            if !bytes[i - 1].is_ascii_alphanumeric() && bytes[i - 1] != b'-' && bytes[i - 1] != b'_'
            {
                return None;
            }
            i -= 1;
        }
        if i > 0 {
            return Some(i - 1);
        }
    }
    None
}

/// If `name_pos` sits inside a closing tag (`</Signature>` or
/// `</prefix:Signature>`), returns the position of its `<`.
fn closing_tag_position(text: &str, name_pos: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if name_pos >= 2 && &bytes[name_pos - 2..name_pos] == b"</" {
        return Some(name_pos - 2);
    }
    if name_pos >= 1 && bytes[name_pos - 1] == b':' {
        let mut i = name_pos - 1;
        while i > 1 && bytes[i - 1] != b'/' {
            i -= 1;
        }
        if i > 1 && &bytes[i - 2..i] == b"</" {
            return Some(i - 2);
        }
    }
    None
}

struct EncryptedDataParts {
    block_algorithm: String,
    key_algorithm: String,
    key_cipher_value: String,
    data_cipher_value: String,
}

fn parse_encrypted_data(xml: &str) -> Result<EncryptedDataParts, EngineError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut block_algorithm = None;
    let mut key_algorithm = None;
    let mut key_cipher_value = None;
    let mut data_cipher_value = None;
    let mut in_encrypted_key = false;
    let mut in_cipher_value = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"EncryptedKey" => in_encrypted_key = true,
                b"CipherValue" => in_cipher_value = true,
                b"EncryptionMethod" => {
                    capture_algorithm(&e, in_encrypted_key, &mut block_algorithm, &mut key_algorithm);
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"EncryptionMethod" {
                    capture_algorithm(&e, in_encrypted_key, &mut block_algorithm, &mut key_algorithm);
                }
            }
            Ok(Event::Text(e)) => {
                if in_cipher_value {
                    let value = e.unescape().unwrap_or_default().to_string();
                    if in_encrypted_key {
                        key_cipher_value.get_or_insert(value);
                    } else {
                        data_cipher_value.get_or_insert(value);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"EncryptedKey" => in_encrypted_key = false,
                b"CipherValue" => in_cipher_value = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EngineError::new(
                    EngineErrorKind::Parse,
                    format!("EncryptedData XML: {e}"),
                ));
            }
            _ => {}
        }
    }

    Ok(EncryptedDataParts {
        block_algorithm: block_algorithm.ok_or_else(|| {
            EngineError::new(EngineErrorKind::Parse, "no block EncryptionMethod")
        })?,
        key_algorithm: key_algorithm.ok_or_else(|| {
            EngineError::new(EngineErrorKind::Parse, "no EncryptedKey EncryptionMethod")
        })?,
        key_cipher_value: key_cipher_value.ok_or_else(|| {
            EngineError::new(EngineErrorKind::Parse, "no EncryptedKey CipherValue")
        })?,
        data_cipher_value: data_cipher_value.ok_or_else(|| {
            EngineError::new(EngineErrorKind::Parse, "no EncryptedData CipherValue")
        })?,
    })
}

fn capture_algorithm(
    e: &quick_xml::events::BytesStart,
    in_encrypted_key: bool,
    block_algorithm: &mut Option<String>,
    key_algorithm: &mut Option<String>,
) {
    if let Some(alg) = attr_value(e, b"Algorithm") {
        if in_encrypted_key {
            key_algorithm.get_or_insert(alg);
        } else {
            block_algorithm.get_or_insert(alg);
        }
    }
}
