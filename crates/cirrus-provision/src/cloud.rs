//! Cloud resource API seam.
//!
//! The [`CloudApi`] trait models the remote calls the reconciler issues. Vendor SDK
//! bindings implement it outside this crate; [`crate::sandbox::SandboxCloud`] is the
//! in-memory implementation used for dry runs and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::services::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudErrorKind {
    /// A referenced resource is not visible yet. Eventually consistent, retryable.
    ReferenceNotFound,
    AlreadyExists,
    LimitExceeded,
    Unauthorized,
    InvalidRequest,
    Other,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub message: String,
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn reference_not_found(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::ReferenceNotFound, message)
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: String,
}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from_port == self.to_port {
            write!(f, "{}/{} from {}", self.protocol, self.from_port, self.cidr)
        } else {
            write!(
                f,
                "{}/{}:{} from {}",
                self.protocol, self.from_port, self.to_port, self.cidr
            )
        }
    }
}

/// Next hop of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    InternetGateway(String),
    NatGateway(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetKind {
    Internal,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstanceRequest {
    pub name: String,
    /// Idempotency token, constant across retries of the same launch.
    pub client_token: String,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub instance_profile_arn: String,
    pub key_pair: String,
    pub placement: String,
    pub public_ip: bool,
    pub user_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: String,
    pub private_ip: String,
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub protocol: Protocol,
    pub port: u16,
    pub instance_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerRequest {
    pub name: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub listeners: Vec<Listener>,
}

#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    async fn create_vpc(&self, cidr: &str) -> CloudResult<String>;

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr: &str,
        zone: &str,
        kind: SubnetKind,
    ) -> CloudResult<String>;

    async fn create_route_table(&self, vpc_id: &str) -> CloudResult<String>;

    /// Returns the association id.
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
        -> CloudResult<String>;

    async fn create_internet_gateway(&self) -> CloudResult<String>;

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()>;

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        target: &RouteTarget,
    ) -> CloudResult<()>;

    /// Returns the allocation id of a new public address.
    async fn allocate_address(&self) -> CloudResult<String>;

    async fn create_nat_gateway(&self, subnet_id: &str, allocation_id: &str)
        -> CloudResult<String>;

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> CloudResult<String>;

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> CloudResult<()>;

    /// Returns the policy ARN.
    async fn create_policy(&self, name: &str, document: &str) -> CloudResult<String>;

    /// Returns the role name.
    async fn create_role(&self, name: &str, trust_document: &str) -> CloudResult<String>;

    /// Returns the instance profile ARN.
    async fn create_instance_profile(&self, name: &str) -> CloudResult<String>;

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()>;

    async fn add_role_to_instance_profile(
        &self,
        profile_arn: &str,
        role_name: &str,
    ) -> CloudResult<()>;

    async fn run_instance(&self, request: &RunInstanceRequest) -> CloudResult<Instance>;

    async fn disable_source_dest_check(&self, instance_id: &str) -> CloudResult<()>;

    async fn create_tags(&self, resource_id: &str, tags: &[(String, String)]) -> CloudResult<()>;

    /// Returns the DNS name of the balancer.
    async fn create_load_balancer(&self, request: &LoadBalancerRequest) -> CloudResult<String>;

    async fn register_instances(&self, load_balancer: &str, instance_ids: &[String])
        -> CloudResult<()>;
}
