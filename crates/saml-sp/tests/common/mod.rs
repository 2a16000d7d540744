//! Shared fixtures: a throwaway IdP (key, certificate, metadata), an SP
//! wired against it, and helpers that sign and encrypt SAML documents the
//! same way a real IdP would.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::symm::{Cipher, Crypter, Mode};
use openssl::x509::{X509, X509Builder, X509NameBuilder};
use xml_canonicalization::Canonicalizer;

use saml_sp::config::Config;
use saml_sp::request_tracker::RequestTracker;
use saml_sp::schema::format_instant;
use saml_sp::service_provider::{IdpMetadataSource, KeyMaterial, ServiceProvider};
use saml_sp::state::AppState;

pub const SP_BASE_URL: &str = "https://sp.example";
pub const IDP_ENTITY_ID: &str = "https://idp.example/meta";
pub const IDP_SSO_URL: &str = "https://idp.example/sso";

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

pub fn sp_entity_id() -> String {
    format!("{SP_BASE_URL}/saml/metadata")
}

pub fn sp_acs_url() -> String {
    format!("{SP_BASE_URL}/saml/acs")
}

pub fn generate_key_and_cert() -> (PKey<Private>, X509) {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "saml-sp test").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();

    (pkey, builder.build())
}

pub struct Harness {
    pub app: axum::Router,
    pub state: Arc<AppState>,
    pub idp_key: PKey<Private>,
    pub sp_cert: X509,
}

pub fn harness(allow_idp_initiated: bool) -> Harness {
    let (idp_key, idp_cert) = generate_key_and_cert();
    let (sp_key, sp_cert) = generate_key_and_cert();

    let idp_metadata = idp_metadata_xml(&idp_cert);

    let sp = ServiceProvider::new(
        sp_entity_id(),
        sp_acs_url(),
        IdpMetadataSource::Xml(idp_metadata.into_bytes()),
    )
    .with_key_material(
        KeyMaterial::Pem(String::from_utf8(sp_key.rsa().unwrap().private_key_to_pem().unwrap()).unwrap()),
        KeyMaterial::Pem(String::from_utf8(sp_cert.to_pem().unwrap()).unwrap()),
    )
    .with_allow_idp_initiated(allow_idp_initiated);

    let config = Config {
        base_url: SP_BASE_URL.into(),
        idp_metadata_url: None,
        idp_metadata_path: None,
        key_path: None,
        key_pem: None,
        cert_path: None,
        cert_pem: None,
        allow_idp_initiated,
        clock_drift_tolerance_secs: 90,
        host: "127.0.0.1".into(),
        port: 8080,
    };

    let state = Arc::new(AppState {
        config,
        sp,
        requests: RequestTracker::new(),
    });

    Harness {
        app: saml_sp::app(state.clone()),
        state,
        idp_key,
        sp_cert,
    }
}

pub fn idp_metadata_xml(idp_cert: &X509) -> String {
    let cert_b64 = STANDARD.encode(idp_cert.to_der().unwrap());
    format!(
        concat!(
            "<md:EntityDescriptor xmlns:md=\"urn:oasis:names:tc:SAML:2.0:metadata\" ",
            "xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\" entityID=\"{entity}\">",
            "<md:IDPSSODescriptor protocolSupportEnumeration=\"urn:oasis:names:tc:SAML:2.0:protocol\">",
            "<md:KeyDescriptor use=\"encryption\">",
            "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
            "</md:KeyDescriptor>",
            "<md:SingleSignOnService Binding=\"urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect\" Location=\"{sso}\"/>",
            "<md:SingleSignOnService Binding=\"urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST\" Location=\"{sso}\"/>",
            "</md:IDPSSODescriptor>",
            "</md:EntityDescriptor>",
        ),
        entity = IDP_ENTITY_ID,
        cert = cert_b64,
        sso = IDP_SSO_URL,
    )
}

/// Knobs for building a response document. Defaults describe the happy path.
pub struct ResponseParams {
    pub response_id: String,
    pub assertion_id: String,
    pub destination: String,
    pub recipient: String,
    pub issuer: String,
    pub audience: String,
    pub in_response_to: Option<String>,
    pub status: String,
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
}

impl Default for ResponseParams {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            response_id: "resp-1".into(),
            assertion_id: "assert-1".into(),
            destination: sp_acs_url(),
            recipient: sp_acs_url(),
            issuer: IDP_ENTITY_ID.into(),
            audience: sp_entity_id(),
            in_response_to: None,
            status: STATUS_SUCCESS.into(),
            not_before: now - Duration::seconds(60),
            not_on_or_after: now + Duration::seconds(300),
        }
    }
}

impl ResponseParams {
    fn in_response_to_attr(&self) -> String {
        match &self.in_response_to {
            Some(id) => format!(" InResponseTo=\"{id}\""),
            None => String::new(),
        }
    }

    pub fn assertion_xml(&self) -> String {
        format!(
            concat!(
                "<saml:Assertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"{aid}\" Version=\"2.0\" IssueInstant=\"{instant}\">",
                "<saml:Issuer>{issuer}</saml:Issuer>",
                "<saml:Subject>",
                "<saml:NameID Format=\"urn:oasis:names:tc:SAML:2.0:nameid-format:transient\">alice</saml:NameID>",
                "<saml:SubjectConfirmation Method=\"urn:oasis:names:tc:SAML:2.0:cm:bearer\">",
                "<saml:SubjectConfirmationData NotOnOrAfter=\"{noa}\" Recipient=\"{recipient}\"{irt}/>",
                "</saml:SubjectConfirmation>",
                "</saml:Subject>",
                "<saml:Conditions NotBefore=\"{nb}\" NotOnOrAfter=\"{noa}\">",
                "<saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction>",
                "</saml:Conditions>",
                "<saml:AttributeStatement>",
                "<saml:Attribute Name=\"mail\"><saml:AttributeValue>alice@example.org</saml:AttributeValue></saml:Attribute>",
                "</saml:AttributeStatement>",
                "</saml:Assertion>",
            ),
            aid = self.assertion_id,
            instant = format_instant(self.not_before),
            issuer = self.issuer,
            noa = format_instant(self.not_on_or_after),
            recipient = self.recipient,
            irt = self.in_response_to_attr(),
            nb = format_instant(self.not_before),
            audience = self.audience,
        )
    }

    pub fn response_xml(&self, inner: &str) -> String {
        format!(
            concat!(
                "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
                "xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"{rid}\"{irt} Version=\"2.0\" IssueInstant=\"{instant}\" Destination=\"{destination}\">",
                "<saml:Issuer>{issuer}</saml:Issuer>",
                "<samlp:Status><samlp:StatusCode Value=\"{status}\"/></samlp:Status>",
                "{inner}",
                "</samlp:Response>",
            ),
            rid = self.response_id,
            irt = self.in_response_to_attr(),
            instant = format_instant(self.not_before),
            destination = self.destination,
            issuer = self.issuer,
            status = self.status,
            inner = inner,
        )
    }

    /// Plain assertion, unsigned everywhere.
    pub fn unsigned(&self) -> String {
        self.response_xml(&self.assertion_xml())
    }

    /// Plain assertion with a valid response-level signature.
    pub fn signed(&self, idp_key: &PKey<Private>) -> String {
        let unsigned = self.unsigned();
        sign_enveloped(&unsigned, &self.response_id, "</saml:Issuer>", idp_key)
    }

    /// EncryptedAssertion wrapping a signed assertion; the response envelope
    /// itself stays unsigned.
    pub fn encrypted(&self, idp_key: &PKey<Private>, sp_cert: &X509) -> String {
        let assertion = self.assertion_xml();
        let signed_assertion =
            sign_enveloped(&assertion, &self.assertion_id, "</saml:Issuer>", idp_key);
        let encrypted_data = encrypt_for_recipient(signed_assertion.as_bytes(), sp_cert);
        self.response_xml(&format!(
            "<saml:EncryptedAssertion>{encrypted_data}</saml:EncryptedAssertion>"
        ))
    }
}

pub fn canonicalize(xml: &str) -> String {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .unwrap();
    String::from_utf8(output).unwrap()
}

/// Signs the document's root element (referenced by `element_id`) and splices
/// the signature in directly after `insert_after`, with no surrounding
/// whitespace so that enveloped-signature removal restores the signed bytes.
pub fn sign_enveloped(
    xml: &str,
    element_id: &str,
    insert_after: &str,
    key: &PKey<Private>,
) -> String {
    let digest = openssl::hash::hash(MessageDigest::sha256(), canonicalize(xml).as_bytes()).unwrap();
    let digest_b64 = STANDARD.encode(digest);

    let mut signed_info = String::new();
    signed_info.push_str("<ds:SignedInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">");
    signed_info.push_str(
        "<ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>",
    );
    signed_info.push_str(
        "<ds:SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#rsa-sha256\"/>",
    );
    signed_info.push_str("<ds:Reference URI=\"#");
    signed_info.push_str(element_id);
    signed_info.push_str("\"><ds:Transforms><ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/><ds:Transform Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/></ds:Transforms><ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/><ds:DigestValue>");
    signed_info.push_str(&digest_b64);
    signed_info.push_str("</ds:DigestValue></ds:Reference></ds:SignedInfo>");

    let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), key).unwrap();
    signer
        .update(canonicalize(&signed_info).as_bytes())
        .unwrap();
    let signature_b64 = STANDARD.encode(signer.sign_to_vec().unwrap());

    let mut signature_xml = String::new();
    signature_xml.push_str("<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">");
    signature_xml.push_str(&signed_info);
    signature_xml.push_str("<ds:SignatureValue>");
    signature_xml.push_str(&signature_b64);
    signature_xml.push_str("</ds:SignatureValue></ds:Signature>");

    let insert_at = xml.find(insert_after).expect("insertion marker") + insert_after.len();
    let mut signed = String::with_capacity(xml.len() + signature_xml.len());
    signed.push_str(&xml[..insert_at]);
    signed.push_str(&signature_xml);
    signed.push_str(&xml[insert_at..]);
    signed
}

/// AES-256-CBC + RSA-OAEP EncryptedData, the shape the SP metadata advertises.
pub fn encrypt_for_recipient(plaintext: &[u8], recipient_cert: &X509) -> String {
    let mut cek = [0u8; 32];
    openssl::rand::rand_bytes(&mut cek).unwrap();
    let mut iv = [0u8; 16];
    openssl::rand::rand_bytes(&mut iv).unwrap();

    let cipher = Cipher::aes_256_cbc();
    let block = cipher.block_size();
    let pad = block - (plaintext.len() % block);
    let mut padded = plaintext.to_vec();
    padded.extend(std::iter::repeat_n(pad as u8, pad));

    let mut crypter = Crypter::new(cipher, Mode::Encrypt, &cek, Some(&iv)).unwrap();
    crypter.pad(false);
    let mut ciphertext = vec![0u8; padded.len() + block];
    let mut written = crypter.update(&padded, &mut ciphertext).unwrap();
    written += crypter.finalize(&mut ciphertext[written..]).unwrap();
    ciphertext.truncate(written);

    let mut payload = iv.to_vec();
    payload.extend_from_slice(&ciphertext);

    let rsa = recipient_cert.public_key().unwrap().rsa().unwrap();
    let mut wrapped = vec![0u8; rsa.size() as usize];
    let wrapped_len = rsa
        .public_encrypt(&cek, &mut wrapped, Padding::PKCS1_OAEP)
        .unwrap();
    wrapped.truncate(wrapped_len);

    format!(
        concat!(
            "<xenc:EncryptedData xmlns:xenc=\"http://www.w3.org/2001/04/xmlenc#\" ",
            "Type=\"http://www.w3.org/2001/04/xmlenc#Element\">",
            "<xenc:EncryptionMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#aes256-cbc\"/>",
            "<ds:KeyInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">",
            "<xenc:EncryptedKey>",
            "<xenc:EncryptionMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p\"/>",
            "<xenc:CipherData><xenc:CipherValue>{key}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedKey>",
            "</ds:KeyInfo>",
            "<xenc:CipherData><xenc:CipherValue>{data}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedData>",
        ),
        key = STANDARD.encode(&wrapped),
        data = STANDARD.encode(&payload),
    )
}

/// Form-encodes a response document the way a browser would POST it.
pub fn acs_form_body(response_xml: &str, relay_state: Option<&str>) -> String {
    let b64 = STANDARD.encode(response_xml.as_bytes());
    let mut body = format!("SAMLResponse={}", urlencoding::encode(&b64));
    if let Some(state) = relay_state {
        body.push_str("&RelayState=");
        body.push_str(&urlencoding::encode(state));
    }
    body
}
