use std::path::PathBuf;
use thiserror::Error;

use crate::cloud::CloudError;
use crate::dns::DnsError;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid {field}: got '{value}', expected {expected}")]
    Validation {
        field: String,
        value: String,
        expected: String,
    },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("cluster state at {} is corrupt: {reason}", .path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("{op} failed after {attempts} attempt(s): {source}")]
    Cloud {
        op: String,
        attempts: u32,
        #[source]
        source: CloudError,
    },

    #[error("dns: {0}")]
    Dns(#[from] DnsError),

    #[error("bootstrap token: {reason}")]
    Token { reason: String },

    #[error("image lookup: {reason}")]
    Image { reason: String },

    #[error("boot config: {0}")]
    BootConfig(#[from] cirrus_bootcfg::BootcfgError),

    #[error("{failed} of {total} node(s) failed to provision")]
    NodesFailed { failed: usize, total: usize },

    #[error("environment setup failed: {}", .reasons.join("; "))]
    SetupFailed { reasons: Vec<String> },

    #[error("http client: {0}")]
    HttpClient(reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    pub fn validation(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        ProvisionError::Validation {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvisionError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
