//! Deployment orchestration: environment setup, then batched node fan-out.

use cirrus_bootcfg::{peers, BootConfig, BootConfigComposer, ClusterStateFlag, NodeContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::cloud::{CloudApi, RunInstanceRequest};
use crate::config::ClusterConfig;
use crate::dns::{ensure_zone, DnsProvider, DnsRecord, RecordType};
use crate::error::{ProvisionError, Result};
use crate::image::ImageCatalog;
use crate::reconciler::ResourceReconciler;
use crate::retry::RetryExecutor;
use crate::state::{ClusterState, ClusterStateStore};
use crate::token::TokenSource;
use crate::topology::{resolve_instance_type, Role, Topology, TopologyQuadruplet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentPhase {
    Uninitialized,
    EnvironmentReady,
    /// Number of batches whose node tasks have all finished.
    NodesProvisioned(usize),
    Complete,
    Aborted(String),
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentPhase::Uninitialized => f.write_str("uninitialized"),
            DeploymentPhase::EnvironmentReady => f.write_str("environment ready"),
            DeploymentPhase::NodesProvisioned(n) => write!(f, "nodes provisioned ({} batch(es))", n),
            DeploymentPhase::Complete => f.write_str("complete"),
            DeploymentPhase::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// One node to add.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRequest {
    pub roles: BTreeSet<Role>,
    pub host_name: String,
    pub host_id: u32,
    pub instance_type: String,
    /// Availability zone; empty means the cluster's zone.
    pub placement: String,
}

impl NodeRequest {
    pub fn from_batch(batch: &TopologyQuadruplet, host_id: u32) -> Self {
        Self {
            roles: batch.roles.clone(),
            host_name: batch.host_name.clone(),
            host_id,
            instance_type: batch.instance_type.clone(),
            placement: String::new(),
        }
    }

    /// `<host_name>-<host_id>`
    pub fn hostname(&self) -> String {
        format!("{}-{}", self.host_name, self.host_id)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub host: String,
    pub instance_id: String,
    pub private_ip: String,
    pub public_ip: Option<String>,
    /// DNS records that could not be published.
    pub dns_warnings: Vec<String>,
}

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub cloud: Arc<dyn CloudApi>,
    pub dns: Arc<dyn DnsProvider>,
    pub tokens: Arc<dyn TokenSource>,
    pub images: Arc<dyn ImageCatalog>,
    pub composer: Arc<BootConfigComposer>,
}

/// Everything a node task needs, cheap to clone into a spawned task.
#[derive(Clone)]
struct NodeWorker {
    config: Arc<ClusterConfig>,
    reconciler: Arc<ResourceReconciler>,
    dns: Arc<dyn DnsProvider>,
    composer: Arc<BootConfigComposer>,
}

impl NodeWorker {
    fn context(
        &self,
        state: &ClusterState,
        request: &NodeRequest,
        cluster_state: ClusterStateFlag,
    ) -> NodeContext {
        let deploy = &state.deploy;
        NodeContext {
            cluster_id: deploy.cluster_id.clone(),
            domain: deploy.domain.clone(),
            region: deploy.region.clone(),
            host_name: request.host_name.clone(),
            host_id: request.host_id as usize,
            roles: request.roles.iter().map(|r| r.as_str().to_string()).collect(),
            iaas: self.config.iaas,
            cluster_state,
            quorum_members: deploy.quorum_members.clone(),
            master_members: deploy.master_members.clone(),
            bootstrap_token: deploy.bootstrap_token.clone(),
            discovery_endpoint: self.config.discovery_endpoint.clone(),
            ca_cert: Some(deploy.ca_cert.clone()).filter(|c| !c.is_empty()),
            prometheus: self.config.prometheus,
            alertmanager: self.config.alertmanager,
        }
    }

    fn compose(
        &self,
        state: &ClusterState,
        request: &NodeRequest,
        cluster_state: ClusterStateFlag,
    ) -> Result<BootConfig> {
        let boot = self
            .composer
            .compose(&self.context(state, request, cluster_state))?;
        for warning in &boot.warnings {
            tracing::warn!("boot config for {}: {}", request.hostname(), warning);
        }
        Ok(boot)
    }

    async fn add_node(
        &self,
        state: &ClusterState,
        request: &NodeRequest,
        cluster_state: ClusterStateFlag,
    ) -> Result<NodeOutcome> {
        let boot = self.compose(state, request, cluster_state)?;
        self.provision(state, request, boot.data).await
    }

    async fn provision(
        &self,
        state: &ClusterState,
        request: &NodeRequest,
        user_data: Vec<u8>,
    ) -> Result<NodeOutcome> {
        let border = request.has_role(Role::Border);
        let subnet_id = if border {
            &state.network.external_subnet_id
        } else {
            &state.network.internal_subnet_id
        };
        let placement = if request.placement.is_empty() {
            state.deploy.zone.clone()
        } else {
            request.placement.clone()
        };
        let launch = RunInstanceRequest {
            name: request.hostname(),
            client_token: Uuid::new_v4().to_string(),
            image_id: state.deploy.image_id.clone(),
            instance_type: resolve_instance_type(&request.instance_type).to_string(),
            subnet_id: subnet_id.clone(),
            security_group_ids: state.firewall.groups_for(request.roles.iter()),
            instance_profile_arn: state.identity.instance_profile_arn.clone(),
            key_pair: state.deploy.key_pair.clone(),
            placement,
            public_ip: border,
            user_data,
        };

        let instance = self.reconciler.launch_instance(&launch).await?;
        if border {
            self.reconciler
                .disable_source_dest_check(&instance.instance_id)
                .await?;
        }
        if request.has_role(Role::Master) && !state.network.load_balancer_name.is_empty() {
            self.reconciler
                .register_with_load_balancer(&state.network.load_balancer_name, &instance.instance_id)
                .await?;
        }

        let mut outcome = NodeOutcome {
            host: request.hostname(),
            instance_id: instance.instance_id,
            private_ip: instance.private_ip,
            public_ip: instance.public_ip,
            dns_warnings: Vec::new(),
        };
        outcome.dns_warnings = self.publish_dns(state, request, &outcome).await;
        Ok(outcome)
    }

    /// Internal A, external A and the CNAME alias. Failures are returned, not raised.
    async fn publish_dns(
        &self,
        state: &ClusterState,
        request: &NodeRequest,
        node: &NodeOutcome,
    ) -> Vec<String> {
        let domain = &state.deploy.domain;
        let zone = if state.deploy.dns_zone_id.is_empty() {
            domain.clone()
        } else {
            state.deploy.dns_zone_id.clone()
        };
        let id = request.host_id as usize;
        let internal = peers::internal_fqdn(&request.host_name, id, domain);

        let mut records = vec![DnsRecord {
            zone: zone.clone(),
            name: internal.clone(),
            record_type: RecordType::A,
            value: node.private_ip.clone(),
        }];
        if let Some(public_ip) = &node.public_ip {
            records.push(DnsRecord {
                zone: zone.clone(),
                name: peers::external_fqdn(&request.host_name, id, domain),
                record_type: RecordType::A,
                value: public_ip.clone(),
            });
        }
        records.push(DnsRecord {
            zone,
            name: format!("{}.{}", request.hostname(), domain),
            record_type: RecordType::Cname,
            value: internal,
        });

        let mut warnings = Vec::new();
        for record in &records {
            match self.dns.add_record(record).await {
                Ok(()) => tracing::info!(
                    "published {} {} -> {}",
                    record.record_type,
                    record.name,
                    record.value
                ),
                Err(e) => {
                    tracing::warn!(
                        "failed to publish {} {}: {}",
                        record.record_type,
                        record.name,
                        e
                    );
                    warnings.push(format!("{} {}: {}", record.record_type, record.name, e));
                }
            }
        }
        warnings
    }
}

pub struct DeploymentOrchestrator {
    config: Arc<ClusterConfig>,
    store: ClusterStateStore,
    reconciler: Arc<ResourceReconciler>,
    collaborators: Collaborators,
    phase: Arc<Mutex<DeploymentPhase>>,
    history: Arc<Mutex<Vec<DeploymentPhase>>>,
}

impl DeploymentOrchestrator {
    pub fn new(config: ClusterConfig, store: ClusterStateStore, collaborators: Collaborators) -> Self {
        Self::with_retry(config, store, collaborators, RetryExecutor::default())
    }

    pub fn with_retry(
        config: ClusterConfig,
        store: ClusterStateStore,
        collaborators: Collaborators,
        retry: RetryExecutor,
    ) -> Self {
        let reconciler = Arc::new(ResourceReconciler::new(
            collaborators.cloud.clone(),
            retry,
            config.cluster_id.clone(),
        ));
        Self {
            config: Arc::new(config),
            store,
            reconciler,
            collaborators,
            phase: Arc::new(Mutex::new(DeploymentPhase::Uninitialized)),
            history: Arc::new(Mutex::new(vec![DeploymentPhase::Uninitialized])),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn store(&self) -> &ClusterStateStore {
        &self.store
    }

    fn phase_lock(&self) -> MutexGuard<'_, DeploymentPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> DeploymentPhase {
        self.phase_lock().clone()
    }

    /// Every phase entered so far, starting with `Uninitialized`.
    pub fn history(&self) -> Vec<DeploymentPhase> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition(&self, next: DeploymentPhase) {
        let mut phase = self.phase_lock();
        if matches!(*phase, DeploymentPhase::Aborted(_)) {
            tracing::warn!("ignoring transition to {} after abort", next);
            return;
        }
        tracing::info!("deployment {}: {} -> {}", self.config.cluster_id, *phase, next);
        *phase = next.clone();
        drop(phase);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(next);
    }

    fn abort(&self, error: &ProvisionError) {
        tracing::error!("deployment {} aborted: {}", self.config.cluster_id, error);
        self.transition(DeploymentPhase::Aborted(error.to_string()));
    }

    fn worker(&self) -> NodeWorker {
        NodeWorker {
            config: self.config.clone(),
            reconciler: self.reconciler.clone(),
            dns: self.collaborators.dns.clone(),
            composer: self.collaborators.composer.clone(),
        }
    }

    fn load_or_empty(&self) -> Result<ClusterState> {
        match self.store.load(&self.config.cluster_id) {
            Ok(state) => Ok(state),
            Err(e) if e.is_not_found() => Ok(ClusterState::default()),
            Err(e) => Err(e),
        }
    }

    /// Stored state of an environment that finished setup.
    pub fn load_ready(&self) -> Result<ClusterState> {
        let state = self.store.load(&self.config.cluster_id)?;
        if !state.is_environment_ready() {
            return Err(ProvisionError::NotFound {
                what: format!("complete environment for '{}'", self.config.cluster_id),
            });
        }
        Ok(state)
    }

    /// Creates or reuses the cluster environment and persists what it learned.
    ///
    /// The three reconciler lanes, DNS zone creation, token acquisition and image
    /// lookup all run to completion. Whatever they produced is merged into the
    /// stored state before any failure is reported.
    pub async fn setup(&self, topology: &Topology) -> Result<ClusterState> {
        let cluster_id = self.config.cluster_id.as_str();
        let mut state = self.load_or_empty()?;

        let mut requested = self.config.deploy_params()?;
        requested.quorum_count = topology.role_count(Role::Quorum);
        requested.master_count = topology.role_count(Role::Master);
        requested.quorum_members = topology.role_members(Role::Quorum);
        requested.master_members = topology.role_members(Role::Master);
        state.deploy.merge_from(&requested);

        let params = state.deploy.clone();
        let mut network = state.network.clone();
        let mut identity = state.identity.clone();
        let mut firewall = state.firewall.clone();
        let reconciler = &self.reconciler;

        tracing::info!("setting up environment for {}", cluster_id);
        let ((network_result, firewall_result), identity_result, zone, token, image) = tokio::join!(
            async {
                // Security groups live in the VPC, so the firewall lane waits for it.
                let vpc = reconciler.ensure_vpc(&params, &mut network).await;
                match vpc {
                    Ok(vpc_id) => tokio::join!(
                        reconciler.network_lane(&params, &mut network),
                        reconciler.firewall_lane(&params, &vpc_id, &mut firewall),
                    ),
                    Err(e) => (
                        Err(e),
                        Err(ProvisionError::NotFound {
                            what: "vpc for security groups".to_string(),
                        }),
                    ),
                }
            },
            reconciler.identity_lane(&mut identity),
            self.ensure_dns_zone(&params.dns_zone_id, &params.domain),
            self.ensure_token(&params.bootstrap_token, params.quorum_count),
            self.ensure_image(&params.image_id, &params.image_channel, &params.region),
        );

        let mut reasons = Vec::new();
        let mut partial = ClusterState {
            network,
            identity,
            firewall,
            ..ClusterState::default()
        };
        for (what, result) in [
            ("network", network_result),
            ("firewall", firewall_result),
            ("identity", identity_result),
        ] {
            if let Err(e) = result {
                reasons.push(format!("{}: {}", what, e));
            }
        }
        match zone {
            Ok(id) => partial.deploy.dns_zone_id = id,
            Err(e) => reasons.push(format!("dns zone: {}", e)),
        }
        match token {
            Ok(t) => partial.deploy.bootstrap_token = t,
            Err(e) => reasons.push(e.to_string()),
        }
        match image {
            Ok(id) => partial.deploy.image_id = id,
            Err(e) => reasons.push(e.to_string()),
        }
        state.merge_from(&partial);
        let mut state = self.store.merge(cluster_id, &state)?;

        if !reasons.is_empty() {
            return Err(ProvisionError::SetupFailed { reasons });
        }

        let mut network = state.network.clone();
        self.reconciler
            .ensure_load_balancer(&mut network, &state.firewall)
            .await?;
        if network != state.network {
            let partial = ClusterState {
                network,
                ..ClusterState::default()
            };
            state = self.store.merge(cluster_id, &partial)?;
        }

        if !state.is_environment_ready() {
            return Err(ProvisionError::SetupFailed {
                reasons: vec!["stored state is missing environment ids".to_string()],
            });
        }
        self.transition(DeploymentPhase::EnvironmentReady);
        Ok(state)
    }

    async fn ensure_dns_zone(&self, existing: &str, domain: &str) -> Result<String> {
        if !existing.is_empty() {
            tracing::info!("reusing dns zone {}", existing);
            return Ok(existing.to_string());
        }
        Ok(ensure_zone(self.collaborators.dns.as_ref(), domain).await?)
    }

    async fn ensure_token(&self, existing: &str, quorum_count: u32) -> Result<String> {
        if !existing.is_empty() {
            tracing::info!("reusing bootstrap token");
            return Ok(existing.to_string());
        }
        self.collaborators.tokens.acquire(quorum_count.max(1)).await
    }

    async fn ensure_image(&self, existing: &str, channel: &str, region: &str) -> Result<String> {
        if !existing.is_empty() {
            tracing::info!("reusing image {}", existing);
            return Ok(existing.to_string());
        }
        self.collaborators.images.resolve(channel, region).await
    }

    /// Sets up the environment, then adds every batch of `topology`.
    ///
    /// Batches run one after another and the nodes of a batch run concurrently.
    /// A failed node never stops its siblings or later batches; the deployment
    /// fails once every task has finished.
    pub async fn deploy(&self, topology: &Topology) -> Result<Vec<NodeOutcome>> {
        let state = match self.setup(topology).await {
            Ok(state) => Arc::new(state),
            Err(e) => {
                self.abort(&e);
                return Err(e);
            }
        };

        let mut outcomes = Vec::new();
        let mut failed = 0usize;
        let mut total = 0usize;

        for (index, batch) in topology.batches.iter().enumerate() {
            tracing::info!("adding {} node(s) for batch {}", batch.count, batch);
            let mut tasks = JoinSet::new();
            for host_id in 1..=batch.count {
                let worker = self.worker();
                let state = state.clone();
                let request = NodeRequest::from_batch(batch, host_id);
                tasks.spawn(async move {
                    let result = worker.add_node(&state, &request, ClusterStateFlag::New).await;
                    (request.hostname(), result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                total += 1;
                match joined {
                    Ok((_, Ok(outcome))) => outcomes.push(outcome),
                    Ok((host, Err(e))) => {
                        tracing::error!("node {} failed: {}", host, e);
                        failed += 1;
                    }
                    Err(e) => {
                        tracing::error!("node task panicked: {}", e);
                        failed += 1;
                    }
                }
            }
            self.transition(DeploymentPhase::NodesProvisioned(index + 1));
        }

        if failed > 0 {
            let err = ProvisionError::NodesFailed { failed, total };
            self.abort(&err);
            return Err(err);
        }
        self.transition(DeploymentPhase::Complete);
        Ok(outcomes)
    }

    /// Adds one node to a cluster whose environment already exists.
    pub async fn add(&self, request: &NodeRequest) -> Result<NodeOutcome> {
        let state = self.load_ready()?;
        self.transition(DeploymentPhase::EnvironmentReady);
        let result = self
            .worker()
            .add_node(&state, request, ClusterStateFlag::Existing)
            .await;
        self.finish_single(result)
    }

    /// Boot configuration `request` would be launched with, without launching it.
    pub fn compose(
        &self,
        state: &ClusterState,
        request: &NodeRequest,
        cluster_state: ClusterStateFlag,
    ) -> Result<BootConfig> {
        self.worker().compose(state, request, cluster_state)
    }

    /// Launches, tags and publishes one node booted with `user_data`.
    pub async fn provision_node(
        &self,
        state: &ClusterState,
        request: &NodeRequest,
        user_data: Vec<u8>,
    ) -> Result<NodeOutcome> {
        self.worker().provision(state, request, user_data).await
    }

    /// Adds one node booted with an externally supplied configuration.
    pub async fn run(&self, request: &NodeRequest, user_data: Vec<u8>) -> Result<NodeOutcome> {
        let state = self.load_ready()?;
        self.transition(DeploymentPhase::EnvironmentReady);
        let result = self.provision_node(&state, request, user_data).await;
        self.finish_single(result)
    }

    fn finish_single(&self, result: Result<NodeOutcome>) -> Result<NodeOutcome> {
        match result {
            Ok(outcome) => {
                self.transition(DeploymentPhase::NodesProvisioned(1));
                self.transition(DeploymentPhase::Complete);
                Ok(outcome)
            }
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }
}
