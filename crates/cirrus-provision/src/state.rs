//! Durable, mergeable record of a cluster's accumulated facts.
//!
//! The record is split into groups owned by one writer each: the network, identity
//! and firewall reconciler lanes, and the setup coordinator for deployment
//! parameters. Writers that run concurrently never share a group, and
//! [`ClusterStateStore::merge`] is only called from the coordinating task after they
//! join.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::topology::{is_dns_label, Role};

const STATE_EXTENSION: &str = "json";

/// Values that count as "not yet written" for first-writer-wins merging.
pub trait Unset {
    fn is_unset(&self) -> bool;
}

impl Unset for String {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl Unset for u32 {
    fn is_unset(&self) -> bool {
        *self == 0
    }
}

impl<T> Unset for Vec<T> {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

/// Copies each listed field from `$src` into `$dst` when `$dst`'s field is unset.
macro_rules! first_writer_wins {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $(
            if $dst.$field.is_unset() && !$src.$field.is_unset() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

/// Written by the network lane, plus the load balancer after the lanes join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkIds {
    pub vpc_id: String,
    pub internal_subnet_id: String,
    pub external_subnet_id: String,
    pub public_route_table_id: String,
    pub public_association_id: String,
    pub internet_gateway_id: String,
    pub gateway_attachment: String,
    pub default_route: String,
    pub allocation_id: String,
    pub nat_gateway_id: String,
    pub private_route_table_id: String,
    pub private_association_id: String,
    pub nat_route: String,
    pub load_balancer_name: String,
    pub load_balancer_dns: String,
}

impl NetworkIds {
    pub fn merge_from(&mut self, other: &NetworkIds) {
        first_writer_wins!(self, other;
            vpc_id, internal_subnet_id, external_subnet_id, public_route_table_id,
            public_association_id, internet_gateway_id, gateway_attachment, default_route,
            allocation_id, nat_gateway_id, private_route_table_id, private_association_id,
            nat_route, load_balancer_name, load_balancer_dns,
        );
    }

    pub fn is_complete(&self) -> bool {
        !self.vpc_id.is_empty()
            && !self.internal_subnet_id.is_empty()
            && !self.external_subnet_id.is_empty()
            && !self.nat_route.is_empty()
    }
}

/// Written by the identity lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityIds {
    pub policy_arn: String,
    pub role_name: String,
    pub instance_profile_arn: String,
    pub policy_attachment: String,
    pub profile_role: String,
}

impl IdentityIds {
    pub fn merge_from(&mut self, other: &IdentityIds) {
        first_writer_wins!(self, other;
            policy_arn, role_name, instance_profile_arn, policy_attachment, profile_role,
        );
    }

    pub fn is_complete(&self) -> bool {
        !self.instance_profile_arn.is_empty() && !self.profile_role.is_empty()
    }
}

/// Written by the firewall lane: one security group per role plus the load balancer's.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallIds {
    pub quorum_sg_id: String,
    pub master_sg_id: String,
    pub worker_sg_id: String,
    pub border_sg_id: String,
    pub elb_sg_id: String,
    pub quorum_ingress: String,
    pub master_ingress: String,
    pub worker_ingress: String,
    pub border_ingress: String,
    pub elb_ingress: String,
}

impl FirewallIds {
    pub fn merge_from(&mut self, other: &FirewallIds) {
        first_writer_wins!(self, other;
            quorum_sg_id, master_sg_id, worker_sg_id, border_sg_id, elb_sg_id,
            quorum_ingress, master_ingress, worker_ingress, border_ingress, elb_ingress,
        );
    }

    pub fn sg_id(&self, role: Role) -> &str {
        match role {
            Role::Quorum => &self.quorum_sg_id,
            Role::Master => &self.master_sg_id,
            Role::Worker => &self.worker_sg_id,
            Role::Border => &self.border_sg_id,
        }
    }

    pub(crate) fn sg_id_mut(&mut self, role: Role) -> &mut String {
        match role {
            Role::Quorum => &mut self.quorum_sg_id,
            Role::Master => &mut self.master_sg_id,
            Role::Worker => &mut self.worker_sg_id,
            Role::Border => &mut self.border_sg_id,
        }
    }

    pub(crate) fn ingress_mut(&mut self, role: Role) -> &mut String {
        match role {
            Role::Quorum => &mut self.quorum_ingress,
            Role::Master => &mut self.master_ingress,
            Role::Worker => &mut self.worker_ingress,
            Role::Border => &mut self.border_ingress,
        }
    }

    /// Security groups for a node carrying `roles`, in role order, without blanks.
    pub fn groups_for<'a>(&'a self, roles: impl IntoIterator<Item = &'a Role>) -> Vec<String> {
        roles
            .into_iter()
            .map(|r| self.sg_id(*r).to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        Role::ALL.iter().all(|r| !self.sg_id(*r).is_empty())
            && !self.elb_sg_id.is_empty()
            && !self.border_ingress.is_empty()
    }
}

/// Parameters fixed at setup time, plus facts from the DNS, token and image tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployParams {
    pub cluster_id: String,
    pub domain: String,
    pub region: String,
    pub zone: String,
    pub iaas: String,
    pub image_channel: String,
    pub image_id: String,
    pub bootstrap_token: String,
    pub vpc_cidr: String,
    pub internal_subnet_cidr: String,
    pub external_subnet_cidr: String,
    pub dns_provider: String,
    pub dns_api_key: String,
    pub dns_zone_id: String,
    pub quorum_count: u32,
    pub master_count: u32,
    /// Host names of every quorum member across all batches.
    pub quorum_members: Vec<String>,
    /// Host names of every master across all batches.
    pub master_members: Vec<String>,
    pub key_pair: String,
    pub features: Vec<String>,
    pub ca_cert: String,
}

impl DeployParams {
    pub fn merge_from(&mut self, other: &DeployParams) {
        first_writer_wins!(self, other;
            cluster_id, domain, region, zone, iaas, image_channel, image_id, bootstrap_token,
            vpc_cidr, internal_subnet_cidr, external_subnet_cidr, dns_provider, dns_api_key,
            dns_zone_id, quorum_count, master_count, quorum_members, master_members, key_pair,
            features, ca_cert,
        );
    }
}

/// All facts accumulated for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterState {
    pub network: NetworkIds,
    pub identity: IdentityIds,
    pub firewall: FirewallIds,
    pub deploy: DeployParams,
}

impl ClusterState {
    /// Fills every unset field from `partial`; populated fields are never overwritten.
    pub fn merge_from(&mut self, partial: &ClusterState) {
        self.network.merge_from(&partial.network);
        self.identity.merge_from(&partial.identity);
        self.firewall.merge_from(&partial.firewall);
        self.deploy.merge_from(&partial.deploy);
    }

    /// Ids of every cloud resource recorded in the state.
    pub fn resource_ids(&self) -> Vec<String> {
        let n = &self.network;
        let i = &self.identity;
        let f = &self.firewall;
        [
            &n.vpc_id,
            &n.internal_subnet_id,
            &n.external_subnet_id,
            &n.public_route_table_id,
            &n.internet_gateway_id,
            &n.allocation_id,
            &n.nat_gateway_id,
            &n.private_route_table_id,
            &n.load_balancer_name,
            &i.policy_arn,
            &i.role_name,
            &i.instance_profile_arn,
            &f.quorum_sg_id,
            &f.master_sg_id,
            &f.worker_sg_id,
            &f.border_sg_id,
            &f.elb_sg_id,
        ]
        .into_iter()
        .filter(|id| !id.is_empty())
        .cloned()
        .collect()
    }

    /// Everything node provisioning reads from setup is present.
    pub fn is_environment_ready(&self) -> bool {
        self.network.is_complete()
            && self.identity.is_complete()
            && self.firewall.is_complete()
            && !self.deploy.bootstrap_token.is_empty()
            && !self.deploy.image_id.is_empty()
    }
}

/// One JSON document per cluster under a per-user directory.
#[derive(Debug, Clone)]
pub struct ClusterStateStore {
    dir: PathBuf,
}

impl ClusterStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.cirrus/clusters`
    pub fn default_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".cirrus").join("clusters"))
            .ok_or_else(|| ProvisionError::NotFound {
                what: "home directory".to_string(),
            })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, cluster_id: &str) -> Result<PathBuf> {
        if !is_dns_label(cluster_id) {
            return Err(ProvisionError::validation(
                "cluster id",
                cluster_id,
                "a DNS label of lowercase letters, digits and hyphens",
            ));
        }
        Ok(self
            .dir
            .join(format!("{}.{}", cluster_id, STATE_EXTENSION)))
    }

    pub fn exists(&self, cluster_id: &str) -> Result<bool> {
        Ok(self.path(cluster_id)?.exists())
    }

    /// Reads the stored record. A missing file is `NotFound`; anything unreadable is `StateCorrupt`.
    pub fn load(&self, cluster_id: &str) -> Result<ClusterState> {
        let path = self.path(cluster_id)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProvisionError::NotFound {
                    what: format!("cluster state for '{}'", cluster_id),
                })
            }
            Err(e) => {
                return Err(ProvisionError::StateCorrupt {
                    path,
                    reason: e.to_string(),
                })
            }
        };
        serde_json::from_str(&contents).map_err(|e| ProvisionError::StateCorrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Atomically replaces the stored record.
    pub fn save(&self, cluster_id: &str, state: &ClusterState) -> Result<()> {
        let path = self.path(cluster_id)?;
        fs::create_dir_all(&self.dir)?;

        let encoded = serde_json::to_vec_pretty(state).map_err(|e| ProvisionError::StateCorrupt {
            path: path.clone(),
            reason: format!("failed to serialize: {}", e),
        })?;

        let mut tmp_path = path.clone();
        tmp_path.set_extension("tmp");
        {
            let mut tmp_file = File::create(&tmp_path)?;
            tmp_file.write_all(&encoded)?;
            tmp_file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        tracing::debug!("saved cluster state to {}", path.display());
        Ok(())
    }

    /// Loads existing-or-empty state, fills unset fields from `partial`, persists and returns it.
    pub fn merge(&self, cluster_id: &str, partial: &ClusterState) -> Result<ClusterState> {
        let mut state = match self.load(cluster_id) {
            Ok(state) => state,
            Err(e) if e.is_not_found() => ClusterState::default(),
            Err(e) => return Err(e),
        };
        state.merge_from(partial);
        self.save(cluster_id, &state)?;
        Ok(state)
    }

    /// Cluster ids with a stored record, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STATE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ClusterStateStore) {
        let dir = TempDir::new().unwrap();
        let store = ClusterStateStore::new(dir.path().join("clusters"));
        (dir, store)
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.load("cell-1").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn save_then_load() {
        let (_dir, store) = store();
        let mut state = ClusterState::default();
        state.network.vpc_id = "vpc-1".to_string();
        state.deploy.quorum_count = 3;
        store.save("cell-1", &state).unwrap();
        assert_eq!(store.load("cell-1").unwrap(), state);
        assert!(store.exists("cell-1").unwrap());
    }

    #[test]
    fn merge_never_overwrites_populated_fields() {
        let (_dir, store) = store();
        let mut seed = ClusterState::default();
        seed.network.vpc_id = "vpc-a".to_string();
        store.save("cell-1", &seed).unwrap();

        let mut partial = ClusterState::default();
        partial.network.vpc_id = "vpc-b".to_string();
        partial.network.internal_subnet_id = "subnet-1".to_string();
        let merged = store.merge("cell-1", &partial).unwrap();

        assert_eq!(merged.network.vpc_id, "vpc-a");
        assert_eq!(merged.network.internal_subnet_id, "subnet-1");
        assert_eq!(store.load("cell-1").unwrap(), merged);
    }

    #[test]
    fn merge_is_idempotent() {
        let (_dir, store) = store();
        let mut partial = ClusterState::default();
        partial.firewall.master_sg_id = "sg-1".to_string();
        partial.deploy.features = vec!["base".to_string()];
        partial.deploy.master_count = 3;

        let once = store.merge("cell-1", &partial).unwrap();
        let raw_once = fs::read(store.path("cell-1").unwrap()).unwrap();
        let twice = store.merge("cell-1", &partial).unwrap();
        let raw_twice = fs::read(store.path("cell-1").unwrap()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(raw_once, raw_twice);
    }

    #[test]
    fn merge_on_fresh_cluster_creates_record() {
        let (_dir, store) = store();
        let mut partial = ClusterState::default();
        partial.identity.role_name = "cell-1-node".to_string();
        let merged = store.merge("cell-1", &partial).unwrap();
        assert_eq!(merged.identity.role_name, "cell-1-node");
        assert_eq!(store.list().unwrap(), vec!["cell-1".to_string()]);
    }

    #[test]
    fn zero_and_empty_do_not_clear_fields() {
        let mut state = ClusterState::default();
        state.deploy.quorum_count = 5;
        state.deploy.features = vec!["insight".to_string()];
        state.merge_from(&ClusterState::default());
        assert_eq!(state.deploy.quorum_count, 5);
        assert_eq!(state.deploy.features, vec!["insight".to_string()]);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.path("cell-1").unwrap(), b"{ not json").unwrap();
        let err = store.load("cell-1").unwrap_err();
        assert!(matches!(err, ProvisionError::StateCorrupt { .. }));

        let err = store.merge("cell-1", &ClusterState::default()).unwrap_err();
        assert!(matches!(err, ProvisionError::StateCorrupt { .. }));
    }

    #[test]
    fn wrongly_typed_field_is_corrupt() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(
            store.path("cell-1").unwrap(),
            br#"{"deploy": {"quorum_count": "three"}}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load("cell-1").unwrap_err(),
            ProvisionError::StateCorrupt { .. }
        ));
    }

    #[test]
    fn cluster_id_must_be_a_label() {
        let (_dir, store) = store();
        let err = store.load("../etc").unwrap_err();
        assert!(matches!(err, ProvisionError::Validation { .. }));
    }

    #[test]
    fn resource_ids_skip_unset_fields() {
        let mut state = ClusterState::default();
        assert!(state.resource_ids().is_empty());
        state.network.vpc_id = "vpc-1".to_string();
        state.firewall.elb_sg_id = "sg-9".to_string();
        state.network.gateway_attachment = "igw-1:vpc-1".to_string();
        assert_eq!(state.resource_ids(), vec!["vpc-1", "sg-9"]);
    }

    #[test]
    fn groups_for_skips_missing_ids() {
        let mut fw = FirewallIds::default();
        fw.worker_sg_id = "sg-w".to_string();
        fw.border_sg_id = "sg-b".to_string();
        let roles = [Role::Quorum, Role::Worker, Role::Border];
        assert_eq!(fw.groups_for(roles.iter()), vec!["sg-w", "sg-b"]);
    }
}
