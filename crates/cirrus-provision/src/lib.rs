#![warn(missing_docs)]

//! Cirrus provisioning subsystem: topology parsing, persisted cluster state,
//! firewall planning, resource reconciliation and deployment orchestration.

pub mod cloud;
pub mod config;
pub mod dns;
pub mod error;
pub mod firewall;
pub mod image;
pub mod orchestrator;
pub mod reconciler;
pub mod retry;
pub mod sandbox;
pub mod services;
pub mod state;
pub mod token;
pub mod topology;

pub use cloud::{CloudApi, CloudError, CloudErrorKind};
pub use config::{ClusterConfig, HttpTimeouts};
pub use dns::{DnsError, DnsProvider};
pub use error::{ProvisionError, Result};
pub use image::{HttpImageCatalog, ImageCatalog};
pub use orchestrator::{
    Collaborators, DeploymentOrchestrator, DeploymentPhase, NodeOutcome, NodeRequest,
};
pub use reconciler::ResourceReconciler;
pub use retry::{RetryConfig, RetryExecutor};
pub use sandbox::{SandboxCloud, SandboxDns, StaticImageCatalog, StaticTokenSource};
pub use state::{ClusterState, ClusterStateStore};
pub use token::{HttpTokenSource, TokenSource};
pub use topology::{Role, Topology, TopologyQuadruplet};
