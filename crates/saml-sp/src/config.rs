use anyhow::{Context, Result, bail};

pub struct Config {
    pub base_url: String,
    pub idp_metadata_url: Option<String>,
    pub idp_metadata_path: Option<String>,
    pub key_path: Option<String>,
    pub key_pem: Option<String>,
    pub cert_path: Option<String>,
    pub cert_pem: Option<String>,
    pub allow_idp_initiated: bool,
    pub clock_drift_tolerance_secs: i64,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("SAML_SP_BASE_URL").context("SAML_SP_BASE_URL must be set")?;

        let idp_metadata_url = std::env::var("SAML_SP_IDP_METADATA_URL").ok();
        let idp_metadata_path = std::env::var("SAML_SP_IDP_METADATA_PATH").ok();
        match (&idp_metadata_url, &idp_metadata_path) {
            (None, None) => {
                bail!("one of SAML_SP_IDP_METADATA_URL or SAML_SP_IDP_METADATA_PATH must be set")
            }
            (Some(_), Some(_)) => {
                bail!("SAML_SP_IDP_METADATA_URL and SAML_SP_IDP_METADATA_PATH are mutually exclusive")
            }
            _ => {}
        }

        let key_path = std::env::var("SAML_SP_KEY_PATH").ok();
        let key_pem = std::env::var("SAML_SP_KEY_PEM").ok();
        if key_path.is_some() && key_pem.is_some() {
            bail!("SAML_SP_KEY_PATH and SAML_SP_KEY_PEM are mutually exclusive");
        }

        let cert_path = std::env::var("SAML_SP_CERT_PATH").ok();
        let cert_pem = std::env::var("SAML_SP_CERT_PEM").ok();
        if cert_path.is_some() && cert_pem.is_some() {
            bail!("SAML_SP_CERT_PATH and SAML_SP_CERT_PEM are mutually exclusive");
        }

        let allow_idp_initiated = std::env::var("SAML_SP_ALLOW_IDP_INITIATED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let clock_drift_tolerance_secs = std::env::var("SAML_SP_CLOCK_DRIFT_TOLERANCE_SECS")
            .unwrap_or_else(|_| "90".into())
            .parse::<i64>()
            .context("SAML_SP_CLOCK_DRIFT_TOLERANCE_SECS must be an integer")?;

        let host = std::env::var("SAML_SP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = std::env::var("SAML_SP_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse::<u16>()
            .context("SAML_SP_PORT must be a valid u16")?;

        Ok(Self {
            base_url,
            idp_metadata_url,
            idp_metadata_path,
            key_path,
            key_pem,
            cert_path,
            cert_pem,
            allow_idp_initiated,
            clock_drift_tolerance_secs,
            host,
            port,
        })
    }

    /// The SP entity ID is its own metadata URL.
    pub fn entity_id(&self) -> String {
        format!("{}/saml/metadata", self.base_url)
    }

    pub fn acs_url(&self) -> String {
        format!("{}/saml/acs", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            base_url: "https://sp.example".into(),
            idp_metadata_url: None,
            idp_metadata_path: Some("idp-metadata.xml".into()),
            key_path: None,
            key_pem: None,
            cert_path: None,
            cert_pem: None,
            allow_idp_initiated: false,
            clock_drift_tolerance_secs: 90,
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }

    #[test]
    fn derived_urls_hang_off_the_base() {
        let config = base_config();
        assert_eq!(config.entity_id(), "https://sp.example/saml/metadata");
        assert_eq!(config.acs_url(), "https://sp.example/saml/acs");
    }
}
