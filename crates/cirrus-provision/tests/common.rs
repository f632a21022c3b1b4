//! Shared fixtures for provisioning integration tests.

#![allow(dead_code)]

use cirrus_bootcfg::{BootConfigComposer, Iaas};
use cirrus_provision::{
    ClusterConfig, ClusterStateStore, Collaborators, DeploymentOrchestrator, RetryConfig,
    RetryExecutor, SandboxCloud, SandboxDns, StaticImageCatalog, StaticTokenSource, Topology,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const CLUSTER_ID: &str = "cell-1";
pub const DOMAIN: &str = "cell-1.dc-1.example.lan";
pub const TOKEN: &str = "3e86b59982e49066c5d813af1c2e2579";
pub const IMAGE: &str = "ami-0a1b2c3d";

pub const TOPOLOGY: [&str; 3] = [
    "3:large:quorum:quorum",
    "3:large:master:master",
    "1:large:border:worker,border",
];

pub fn config() -> ClusterConfig {
    let mut config = ClusterConfig {
        cluster_id: CLUSTER_ID.to_string(),
        domain: DOMAIN.to_string(),
        iaas: Iaas::Sandbox,
        key_pair: "ops".to_string(),
        ..ClusterConfig::default()
    };
    config.validate().expect("fixture config is valid");
    config
}

pub fn topology() -> Topology {
    Topology::parse(&TOPOLOGY).expect("fixture topology is valid")
}

/// Sandbox backends plus a state directory that lives as long as the harness.
pub struct Harness {
    pub dir: TempDir,
    pub cloud: Arc<SandboxCloud>,
    pub dns: Arc<SandboxDns>,
    pub store: ClusterStateStore,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let store = ClusterStateStore::new(dir.path().join("clusters"));
        Self {
            dir,
            cloud: Arc::new(SandboxCloud::new()),
            dns: Arc::new(SandboxDns::new()),
            store,
        }
    }

    /// A fresh orchestrator over the same backends and state directory.
    pub fn orchestrator(&self) -> DeploymentOrchestrator {
        self.orchestrator_with(true)
    }

    pub fn orchestrator_with(&self, compress: bool) -> DeploymentOrchestrator {
        let collaborators = Collaborators {
            cloud: self.cloud.clone(),
            dns: self.dns.clone(),
            tokens: Arc::new(StaticTokenSource::new(TOKEN)),
            images: Arc::new(StaticImageCatalog::new(IMAGE)),
            composer: Arc::new(BootConfigComposer::default().with_compression(compress)),
        };
        let retry = RetryExecutor::new(RetryConfig {
            max_attempts: 5,
            delay: Duration::from_millis(1),
        });
        DeploymentOrchestrator::with_retry(config(), self.store.clone(), collaborators, retry)
    }
}
