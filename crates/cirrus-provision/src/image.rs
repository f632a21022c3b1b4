//! Machine image lookup by release channel and region.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::HttpTimeouts;
use crate::error::{ProvisionError, Result};

#[async_trait]
pub trait ImageCatalog: Send + Sync + 'static {
    async fn resolve(&self, channel: &str, region: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct RegionImages {
    hvm: Option<String>,
}

/// Catalog published as `<base>/<channel>.json`, mapping region to `{"hvm": "<id>"}`.
#[derive(Debug, Clone)]
pub struct HttpImageCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImageCatalog {
    pub fn new(base_url: impl Into<String>, timeouts: &HttpTimeouts) -> Result<Self> {
        Ok(Self {
            client: timeouts.client()?,
            base_url: base_url.into(),
        })
    }

    fn channel_url(&self, channel: &str) -> String {
        format!("{}/{}.json", self.base_url.trim_end_matches('/'), channel)
    }
}

#[async_trait]
impl ImageCatalog for HttpImageCatalog {
    async fn resolve(&self, channel: &str, region: &str) -> Result<String> {
        let url = self.channel_url(channel);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProvisionError::Image {
                reason: format!("connection error: {}", e),
            })?;
        if !response.status().is_success() {
            return Err(ProvisionError::Image {
                reason: format!("HTTP {} from {}", response.status(), url),
            });
        }
        let body = response.text().await.map_err(|e| ProvisionError::Image {
            reason: format!("read error: {}", e),
        })?;

        let image_id = image_for_region(&body, region)?;
        tracing::info!("resolved {} image for {}: {}", channel, region, image_id);
        Ok(image_id)
    }
}

/// Picks the hvm image id for `region` out of a channel document.
pub fn image_for_region(document: &str, region: &str) -> Result<String> {
    let regions: HashMap<String, RegionImages> =
        serde_json::from_str(document).map_err(|e| ProvisionError::Image {
            reason: format!("malformed catalog: {}", e),
        })?;

    match regions.get(region).and_then(|r| r.hvm.as_deref()) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ProvisionError::Image {
            reason: format!("no hvm image for region {}", region),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "eu-west-1": {"hvm": "ami-0a1b2c", "pv": "ami-9f8e7d"},
        "us-east-1": {"hvm": "ami-1234"},
        "ap-south-1": {"pv": "ami-5678"},
        "release_info": {"version": "1688.5.3"}
    }"#;

    #[test]
    fn test_region_lookup() {
        assert_eq!(image_for_region(CATALOG, "eu-west-1").unwrap(), "ami-0a1b2c");
        assert_eq!(image_for_region(CATALOG, "us-east-1").unwrap(), "ami-1234");
    }

    #[test]
    fn test_missing_region_or_hvm() {
        assert!(matches!(
            image_for_region(CATALOG, "sa-east-1"),
            Err(ProvisionError::Image { .. })
        ));
        assert!(matches!(
            image_for_region(CATALOG, "ap-south-1"),
            Err(ProvisionError::Image { .. })
        ));
    }

    #[test]
    fn test_malformed_document() {
        assert!(image_for_region("[]", "eu-west-1").is_err());
    }

    #[test]
    fn test_channel_url() {
        let catalog = HttpImageCatalog::new("https://coreos.com/dist/aws/", &HttpTimeouts::default()).unwrap();
        assert_eq!(
            catalog.channel_url("stable"),
            "https://coreos.com/dist/aws/stable.json"
        );
    }
}
