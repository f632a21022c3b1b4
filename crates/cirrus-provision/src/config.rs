//! Explicit configuration record for one cluster.

use cirrus_bootcfg::Iaas;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProvisionError, Result};
use crate::services::{known_features, BASE_FEATURE};
use crate::state::DeployParams;
use crate::topology::is_dns_label;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTimeouts {
    pub connect_secs: u64,
    pub request_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 30,
        }
    }
}

impl HttpTimeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    /// HTTP client with both timeouts applied.
    pub fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect())
            .timeout(self.request())
            .build()
            .map_err(ProvisionError::HttpClient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub domain: String,
    pub region: String,
    pub zone: String,
    pub iaas: Iaas,
    pub image_channel: String,
    pub key_pair: String,
    pub vpc_cidr: String,
    pub internal_subnet_cidr: String,
    pub external_subnet_cidr: String,
    pub dns_provider: String,
    pub dns_api_key: String,
    pub features: Vec<String>,
    pub ca_cert_path: Option<PathBuf>,
    pub prometheus: bool,
    pub alertmanager: bool,
    pub compress_user_data: bool,
    pub discovery_endpoint: String,
    pub image_catalog_url: String,
    pub http: HttpTimeouts,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            domain: String::new(),
            region: "eu-west-1".to_string(),
            zone: "eu-west-1a".to_string(),
            iaas: Iaas::Ec2,
            image_channel: "stable".to_string(),
            key_pair: String::new(),
            vpc_cidr: "10.136.0.0/16".to_string(),
            internal_subnet_cidr: "10.136.0.0/18".to_string(),
            external_subnet_cidr: "10.136.64.0/18".to_string(),
            dns_provider: "route53".to_string(),
            dns_api_key: String::new(),
            features: vec![BASE_FEATURE.to_string()],
            ca_cert_path: None,
            prometheus: false,
            alertmanager: false,
            compress_user_data: true,
            discovery_endpoint: "https://discovery.etcd.io".to_string(),
            image_catalog_url: "https://coreos.com/dist/aws".to_string(),
            http: HttpTimeouts::default(),
        }
    }
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| {
                ProvisionError::validation("config file", path.display().to_string(), e.to_string())
            }),
            "json" => serde_json::from_str(&contents).map_err(|e| {
                ProvisionError::validation("config file", path.display().to_string(), e.to_string())
            }),
            _ => Err(ProvisionError::validation(
                "config file extension",
                ext,
                "toml or json",
            )),
        }
    }

    /// Checks every field before any remote call is made and normalizes feature groups.
    pub fn validate(&mut self) -> Result<()> {
        if !is_dns_label(&self.cluster_id) {
            return Err(ProvisionError::validation(
                "cluster id",
                &self.cluster_id,
                "a DNS label of lowercase letters, digits and hyphens",
            ));
        }
        if self.domain.is_empty() || !self.domain.split('.').all(is_dns_label) {
            return Err(ProvisionError::validation(
                "domain",
                &self.domain,
                "dot-separated DNS labels",
            ));
        }
        for (field, value) in [
            ("region", &self.region),
            ("zone", &self.zone),
            ("image channel", &self.image_channel),
        ] {
            if value.is_empty() {
                return Err(ProvisionError::validation(field, value, "a non-empty value"));
            }
        }
        for (field, value) in [
            ("vpc cidr", &self.vpc_cidr),
            ("internal subnet cidr", &self.internal_subnet_cidr),
            ("external subnet cidr", &self.external_subnet_cidr),
        ] {
            if !is_ipv4_cidr(value) {
                return Err(ProvisionError::validation(field, value, "an IPv4 CIDR block"));
            }
        }

        let known = known_features();
        for feature in &self.features {
            if !known.contains(&feature.as_str()) {
                return Err(ProvisionError::validation(
                    "feature",
                    feature,
                    format!("one of {}", known.join(", ")),
                ));
            }
        }
        if !self.features.iter().any(|f| f == BASE_FEATURE) {
            self.features.insert(0, BASE_FEATURE.to_string());
        }
        Ok(())
    }

    pub fn read_ca_cert(&self) -> Result<Option<String>> {
        match &self.ca_cert_path {
            Some(path) => Ok(Some(std::fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }

    /// Deployment parameters this configuration contributes to the cluster state.
    pub fn deploy_params(&self) -> Result<DeployParams> {
        Ok(DeployParams {
            cluster_id: self.cluster_id.clone(),
            domain: self.domain.clone(),
            region: self.region.clone(),
            zone: self.zone.clone(),
            iaas: self.iaas.to_string(),
            image_channel: self.image_channel.clone(),
            vpc_cidr: self.vpc_cidr.clone(),
            internal_subnet_cidr: self.internal_subnet_cidr.clone(),
            external_subnet_cidr: self.external_subnet_cidr.clone(),
            dns_provider: self.dns_provider.clone(),
            dns_api_key: self.dns_api_key.clone(),
            key_pair: self.key_pair.clone(),
            features: self.features.clone(),
            ca_cert: self.read_ca_cert()?.unwrap_or_default(),
            ..DeployParams::default()
        })
    }
}

/// `a.b.c.d/n` with octets 0-255 and 0 <= n <= 32.
pub fn is_ipv4_cidr(s: &str) -> bool {
    let Some((addr, prefix)) = s.split_once('/') else {
        return false;
    };
    let prefix_ok = matches!(prefix.parse::<u8>(), Ok(p) if p <= 32);
    prefix_ok && addr.parse::<std::net::Ipv4Addr>().is_ok()
}
