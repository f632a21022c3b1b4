//! Composition of one node's boot configuration.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

use crate::catalog::FRAGMENTS;
use crate::error::{BootcfgError, Result};
use crate::fragment::{self, Fragment};
use crate::peers;
use crate::render::{self, Vars};
use crate::tags::{ClusterStateFlag, Iaas, TagSet};
use crate::transpile::{Finding, InitTranspiler, InitValidator, Transpiler, Validator};

/// Upper bound on the user data a provider accepts for one instance.
pub const MAX_USER_DATA_BYTES: usize = 16 * 1024;

/// Instance data a boot configuration is rendered against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeContext {
    pub cluster_id: String,
    pub domain: String,
    pub region: String,
    pub host_name: String,
    pub host_id: usize,
    pub roles: Vec<String>,
    pub iaas: Iaas,
    pub cluster_state: ClusterStateFlag,
    /// Host names of every quorum member, e.g. `quorum-1`.
    pub quorum_members: Vec<String>,
    /// Host names of every master.
    pub master_members: Vec<String>,
    pub bootstrap_token: String,
    pub discovery_endpoint: String,
    pub ca_cert: Option<String>,
    pub prometheus: bool,
    pub alertmanager: bool,
}

impl NodeContext {
    /// `<host_name>-<host_id>`
    pub fn hostname(&self) -> String {
        format!("{}-{}", self.host_name, self.host_id)
    }

    pub fn tags(&self) -> TagSet {
        TagSet::for_node(
            &self.roles,
            self.iaas,
            self.cluster_state,
            self.ca_cert.as_deref().is_some_and(|c| !c.is_empty()),
            self.prometheus,
            self.alertmanager,
        )
    }

    /// Template variables, including the computed peer lists.
    pub fn vars(&self) -> Vars {
        let q = self.quorum_members.as_slice();
        let m = self.master_members.as_slice();
        let domain = self.domain.as_str();

        let master_endpoint = match m.first() {
            Some(first) => peers::member_fqdn(first, domain),
            None => "localhost".to_string(),
        };
        let discovery_url = format!(
            "{}/{}",
            self.discovery_endpoint.trim_end_matches('/'),
            self.bootstrap_token
        );

        let mut vars = Vars::new();
        let mut set = |k: &str, v: String| {
            vars.insert(k.to_string(), v);
        };
        set("cluster_id", self.cluster_id.clone());
        set("domain", self.domain.clone());
        set("region", self.region.clone());
        set("host_name", self.host_name.clone());
        set("host_id", self.host_id.to_string());
        set("hostname", self.hostname());
        set("fqdn", peers::internal_fqdn(&self.host_name, self.host_id, domain));
        set("roles", self.roles.join(","));
        set("roles_attr", self.roles.join("+"));
        set("iaas", self.iaas.to_string());
        set("cluster_state", self.cluster_state.as_str().to_string());
        set("quorum_count", q.len().to_string());
        set("master_count", m.len().to_string());
        set("master_quorum", (m.len() / 2 + 1).to_string());
        set("etcd_token", self.bootstrap_token.clone());
        set("discovery_url", discovery_url);
        set("etcd_initial_cluster", peers::etcd_initial_cluster(q, domain));
        set("etcd_endpoints", peers::etcd_endpoints(q, domain));
        set("zk_servers", peers::zk_servers(q, domain));
        set(
            "zk_ensemble_block",
            peers::indent(&peers::zk_ensemble(q, domain, "\n"), 10),
        );
        set("mesos_zk", peers::mesos_zk_url(q, domain));
        set("master_endpoints", peers::master_endpoints(m, domain));
        set("master_endpoint", master_endpoint);
        set(
            "ca_cert_block",
            peers::indent(self.ca_cert.as_deref().unwrap_or_default(), 10),
        );
        vars
    }
}

/// A composed, validated boot configuration.
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub data: Vec<u8>,
    pub compressed: bool,
    /// Non-fatal findings reported while lowering and validating.
    pub warnings: Vec<Finding>,
}

impl BootConfig {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub struct BootConfigComposer {
    fragments: &'static [Fragment],
    transpiler: Arc<dyn Transpiler>,
    validator: Arc<dyn Validator>,
    compress: bool,
    max_bytes: usize,
}

impl Default for BootConfigComposer {
    fn default() -> Self {
        Self::new(Arc::new(InitTranspiler::new()), Arc::new(InitValidator::new()))
    }
}

impl BootConfigComposer {
    pub fn new(transpiler: Arc<dyn Transpiler>, validator: Arc<dyn Validator>) -> Self {
        Self {
            fragments: FRAGMENTS,
            transpiler,
            validator,
            compress: false,
            max_bytes: MAX_USER_DATA_BYTES,
        }
    }

    pub fn with_fragments(mut self, fragments: &'static [Fragment]) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Selected and rendered intermediate document, before lowering.
    pub fn render(&self, ctx: &NodeContext) -> Result<String> {
        let template = fragment::select(self.fragments, &ctx.tags());
        render::render(&template, &ctx.vars())
    }

    pub fn compose(&self, ctx: &NodeContext) -> Result<BootConfig> {
        let rendered = self.render(ctx)?;
        tracing::debug!(
            "rendered boot config for {} ({} bytes)",
            ctx.hostname(),
            rendered.len()
        );

        let lowered = self.transpiler.transpile(&rendered)?;
        let mut findings = lowered.findings;
        findings.extend(self.validator.validate(&lowered.document));

        let data = if self.compress {
            gzip(&lowered.document)?
        } else {
            lowered.document
        };
        if data.len() > self.max_bytes {
            findings.push(Finding::fatal(
                "$",
                format!(
                    "document is {} bytes, limit is {} bytes",
                    data.len(),
                    self.max_bytes
                ),
            ));
        }

        if findings.iter().any(Finding::is_fatal) {
            return Err(BootcfgError::Rejected { findings });
        }
        for warning in &findings {
            tracing::warn!("boot config for {}: {}", ctx.hostname(), warning);
        }

        Ok(BootConfig {
            data,
            compressed: self.compress,
            warnings: findings,
        })
    }
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
