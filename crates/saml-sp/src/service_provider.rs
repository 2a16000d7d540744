//! Long-lived service provider configuration: key material resolution, IdP
//! metadata retrieval, SP metadata production, and AuthnRequest construction.
//!
//! The mutable pieces are set-once latches. Concurrent first readers may
//! duplicate a load, but every load produces an equal value and the first
//! write wins, so reads after initialization are lock-free and consistent.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration as StdDuration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use openssl::x509::X509;

use crate::crypto::VerifyOptions;
use crate::error::Error;
use crate::schema::{
    AuthnRequest, HTTP_POST_BINDING, HTTP_REDIRECT_BINDING, IdpMetadata, SpMetadata,
};
use crate::security::SecurityPolicy;

const METADATA_FETCH_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Validity window advertised in the SP's own metadata document.
const METADATA_VALID_FOR_HOURS: i64 = 48;

/// Exactly one source of IdP metadata is configured; precedence questions
/// cannot arise.
#[derive(Debug, Clone)]
pub enum IdpMetadataSource {
    Parsed(IdpMetadata),
    Xml(Vec<u8>),
    Url(String),
}

/// SP key material, either already on disk or as PEM text to be materialized
/// (the crypto engine operates on paths).
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    Path(PathBuf),
    Pem(String),
}

pub struct ServiceProvider {
    /// The SP entity ID, which doubles as its metadata URL.
    pub entity_id: String,
    pub acs_url: String,
    pub allow_idp_initiated: bool,
    pub clock_drift_tolerance: Duration,
    pub policy: SecurityPolicy,
    pub dtd_file: Option<PathBuf>,

    idp_metadata_source: IdpMetadataSource,
    private_key: Option<KeyMaterial>,
    certificate: Option<KeyMaterial>,

    idp_metadata: OnceLock<IdpMetadata>,
    idp_metadata_xml: OnceLock<Vec<u8>>,
    sp_cert_der: OnceLock<Vec<u8>>,
    privkey_path: OnceLock<PathBuf>,
    cert_path: OnceLock<PathBuf>,
    idp_cert_path: OnceLock<PathBuf>,
}

impl ServiceProvider {
    pub fn new(
        entity_id: impl Into<String>,
        acs_url: impl Into<String>,
        idp_metadata_source: IdpMetadataSource,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            acs_url: acs_url.into(),
            allow_idp_initiated: false,
            clock_drift_tolerance: Duration::seconds(90),
            policy: SecurityPolicy::default(),
            dtd_file: None,
            idp_metadata_source,
            private_key: None,
            certificate: None,
            idp_metadata: OnceLock::new(),
            idp_metadata_xml: OnceLock::new(),
            sp_cert_der: OnceLock::new(),
            privkey_path: OnceLock::new(),
            cert_path: OnceLock::new(),
            idp_cert_path: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_key_material(mut self, private_key: KeyMaterial, certificate: KeyMaterial) -> Self {
        self.private_key = Some(private_key);
        self.certificate = Some(certificate);
        self
    }

    #[must_use]
    pub fn with_allow_idp_initiated(mut self, allow: bool) -> Self {
        self.allow_idp_initiated = allow;
        self
    }

    #[must_use]
    pub fn with_clock_drift_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_drift_tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn with_security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_dtd_file(mut self, dtd_file: PathBuf) -> Self {
        self.dtd_file = Some(dtd_file);
        self
    }

    /// A filesystem path holding the SP private key.
    pub fn privkey_file(&self) -> Result<&Path, Error> {
        if let Some(path) = self.privkey_path.get() {
            return Ok(path);
        }

        let path = match &self.private_key {
            Some(KeyMaterial::Path(path)) => {
                std::fs::metadata(path)?;
                path.clone()
            }
            Some(KeyMaterial::Pem(pem)) => write_material(pem.as_bytes())?,
            None => return Err(Error::ConfigMissing("no private key given".into())),
        };

        Ok(self.privkey_path.get_or_init(|| path))
    }

    /// A filesystem path holding the SP certificate.
    pub fn cert_file(&self) -> Result<&Path, Error> {
        if let Some(path) = self.cert_path.get() {
            return Ok(path);
        }

        let path = match &self.certificate {
            Some(KeyMaterial::Path(path)) => {
                std::fs::metadata(path)?;
                path.clone()
            }
            Some(KeyMaterial::Pem(pem)) => write_material(pem.as_bytes())?,
            None => return Err(Error::ConfigMissing("no certificate given".into())),
        };

        Ok(self.cert_path.get_or_init(|| path))
    }

    /// The SP certificate as DER, decoded once and latched.
    pub fn cert_der(&self) -> Result<&[u8], Error> {
        if let Some(der) = self.sp_cert_der.get() {
            return Ok(der);
        }

        let pem = std::fs::read(self.cert_file()?)?;
        let cert = X509::from_pem(&pem)
            .map_err(|e| Error::Malformed(format!("SP certificate PEM: {e}")))?;
        let der = cert
            .to_der()
            .map_err(|e| Error::Malformed(format!("SP certificate encoding: {e}")))?;

        Ok(self.sp_cert_der.get_or_init(|| der))
    }

    /// The parsed IdP metadata, loading it from the configured source on
    /// first use. A URL source is fetched once; the raw bytes and the parsed
    /// value are both latched.
    pub async fn idp_metadata(&self) -> Result<&IdpMetadata, Error> {
        if let Some(metadata) = self.idp_metadata.get() {
            return Ok(metadata);
        }

        let parsed = match &self.idp_metadata_source {
            IdpMetadataSource::Parsed(metadata) => metadata.clone(),
            IdpMetadataSource::Xml(xml) => IdpMetadata::parse(xml)?,
            IdpMetadataSource::Url(url) => {
                let xml = match self.idp_metadata_xml.get() {
                    Some(xml) => xml,
                    None => {
                        let bytes = fetch_metadata(url).await?;
                        self.idp_metadata_xml.get_or_init(|| bytes)
                    }
                };
                IdpMetadata::parse(xml)?
            }
        };

        Ok(self.idp_metadata.get_or_init(|| parsed))
    }

    /// The IdP SSO endpoint to which AuthnRequests are dispatched. The
    /// HTTP-Redirect binding is preferred; HTTP-POST is the fallback.
    pub async fn idp_sso_url(&self) -> Result<String, Error> {
        let metadata = self.idp_metadata().await?;

        let endpoint = metadata
            .sso_endpoints
            .iter()
            .find(|e| e.binding == HTTP_REDIRECT_BINDING)
            .or_else(|| {
                metadata
                    .sso_endpoints
                    .iter()
                    .find(|e| e.binding == HTTP_POST_BINDING)
            })
            .ok_or_else(|| {
                Error::ConfigMissing("IdP metadata advertises no usable SingleSignOnService".into())
            })?;

        Ok(endpoint.location.clone())
    }

    /// A filesystem path holding the IdP certificate extracted from metadata.
    ///
    /// The `encryption`-tagged KeyDescriptor is preferred, falling back to
    /// the first descriptor carrying certificate data.
    pub async fn idp_cert_file(&self) -> Result<&Path, Error> {
        if let Some(path) = self.idp_cert_path.get() {
            return Ok(path);
        }

        let metadata = self.idp_metadata().await?;

        let cert_b64 = metadata
            .key_descriptors
            .iter()
            .find(|d| d.key_use.as_deref() == Some("encryption"))
            .and_then(|d| d.certificate.as_deref())
            .filter(|c| !c.trim().is_empty())
            .or_else(|| {
                metadata
                    .key_descriptors
                    .iter()
                    .filter_map(|d| d.certificate.as_deref())
                    .find(|c| !c.trim().is_empty())
            })
            .ok_or_else(|| Error::ConfigMissing("missing certificate data".into()))?;

        let stripped: String = cert_b64.chars().filter(|c| !c.is_whitespace()).collect();
        let der = STANDARD
            .decode(stripped)
            .map_err(|e| Error::Malformed(format!("IdP certificate base64: {e}")))?;
        let pem = X509::from_der(&der)
            .and_then(|cert| cert.to_pem())
            .map_err(|e| Error::Malformed(format!("IdP certificate DER: {e}")))?;

        let path = write_material(&pem)?;
        Ok(self.idp_cert_path.get_or_init(|| path))
    }

    /// The SP metadata document value, ready to serialize.
    pub fn metadata(&self) -> Result<SpMetadata, Error> {
        let der = self.cert_der()?;

        Ok(SpMetadata {
            entity_id: self.entity_id.clone(),
            valid_until: Utc::now() + Duration::hours(METADATA_VALID_FOR_HOURS),
            acs_url: self.acs_url.clone(),
            certificate: STANDARD.encode(der),
        })
    }

    pub fn metadata_xml(&self) -> Result<String, Error> {
        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}",
            self.metadata()?.to_xml()
        ))
    }

    pub fn new_authn_request(&self, destination: &str) -> AuthnRequest {
        AuthnRequest::new(destination, &self.acs_url, &self.entity_id)
    }

    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            dtd_file: self.dtd_file.clone(),
        }
    }
}

/// Writes key material to a temporary file that lives for the rest of the
/// process: the engine re-reads these paths on every call.
fn write_material(bytes: &[u8]) -> Result<PathBuf, Error> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(bytes)?;
    let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;
    Ok(path)
}

async fn fetch_metadata(url: &str) -> Result<Vec<u8>, Error> {
    let client = reqwest::Client::builder()
        .timeout(METADATA_FETCH_TIMEOUT)
        .build()
        .map_err(|e| Error::Network(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Network(e.to_string()))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(bytes.to_vec())
}
