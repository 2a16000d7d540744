use anyhow::{Context, Result};
use chrono::Duration;

use crate::config::Config;
use crate::request_tracker::RequestTracker;
use crate::service_provider::{IdpMetadataSource, KeyMaterial, ServiceProvider};

pub struct AppState {
    pub config: Config,
    pub sp: ServiceProvider,
    pub requests: RequestTracker,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let idp_metadata_source = match (&config.idp_metadata_url, &config.idp_metadata_path) {
            (Some(url), _) => IdpMetadataSource::Url(url.clone()),
            (None, Some(path)) => {
                let xml = std::fs::read(path).context("failed to read IdP metadata file")?;
                IdpMetadataSource::Xml(xml)
            }
            (None, None) => anyhow::bail!("no IdP metadata source configured"),
        };

        let mut sp = ServiceProvider::new(config.entity_id(), config.acs_url(), idp_metadata_source)
            .with_allow_idp_initiated(config.allow_idp_initiated)
            .with_clock_drift_tolerance(Duration::seconds(config.clock_drift_tolerance_secs));

        let private_key = match (&config.key_path, &config.key_pem) {
            (Some(path), _) => Some(KeyMaterial::Path(path.into())),
            (None, Some(pem)) => Some(KeyMaterial::Pem(pem.clone())),
            (None, None) => None,
        };
        let certificate = match (&config.cert_path, &config.cert_pem) {
            (Some(path), _) => Some(KeyMaterial::Path(path.into())),
            (None, Some(pem)) => Some(KeyMaterial::Pem(pem.clone())),
            (None, None) => None,
        };
        if let (Some(private_key), Some(certificate)) = (private_key, certificate) {
            sp = sp.with_key_material(private_key, certificate);
        }

        Ok(Self {
            config,
            sp,
            requests: RequestTracker::new(),
        })
    }
}
