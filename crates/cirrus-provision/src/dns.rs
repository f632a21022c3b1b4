//! DNS provider seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    A,
    Cname,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => f.write_str("A"),
            RecordType::Cname => f.write_str("CNAME"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub zone: String,
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("zone {0} already exists")]
    ZoneExists(String),

    #[error("zone {0} not found")]
    ZoneNotFound(String),

    #[error("dns provider rejected request: {0}")]
    Rejected(String),

    #[error("dns provider unreachable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DnsProvider: Send + Sync + 'static {
    /// Creates a zone and returns its id. Fails with [`DnsError::ZoneExists`] if present.
    async fn create_zone(&self, domain: &str) -> Result<String, DnsError>;

    async fn add_record(&self, record: &DnsRecord) -> Result<(), DnsError>;
}

/// Creates `domain`, treating an existing zone as success.
pub async fn ensure_zone(dns: &dyn DnsProvider, domain: &str) -> Result<String, DnsError> {
    match dns.create_zone(domain).await {
        Ok(id) => {
            tracing::info!("created dns zone {} ({})", domain, id);
            Ok(id)
        }
        Err(DnsError::ZoneExists(_)) => {
            tracing::info!("dns zone {} already exists, reusing", domain);
            Ok(domain.to_string())
        }
        Err(e) => Err(e),
    }
}
