//! In-memory cloud and DNS backend for dry runs and tests.
//!
//! Resources get sequential ids. Calls that reference an id the sandbox never
//! issued fail with `ReferenceNotFound`, the same way a real provider answers
//! before a new resource has propagated. Failures can be injected per operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cloud::{
    CloudApi, CloudError, CloudErrorKind, CloudResult, IngressRule, Instance,
    LoadBalancerRequest, RouteTarget, RunInstanceRequest, SubnetKind,
};
use crate::dns::{DnsError, DnsProvider, DnsRecord};
use crate::error::Result;
use crate::image::ImageCatalog;
use crate::token::TokenSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injected {
    Always,
    Transient(u32),
}

#[derive(Debug, Default)]
struct CloudInner {
    counters: HashMap<&'static str, u32>,
    known: HashSet<String>,
    calls: BTreeMap<&'static str, u32>,
    failures: HashMap<String, Injected>,
    failing_instances: HashSet<String>,
    tags: HashMap<String, Vec<(String, String)>>,
    ingress: HashMap<String, Vec<IngressRule>>,
    instances: Vec<(RunInstanceRequest, Instance)>,
    client_tokens: HashMap<String, Instance>,
    source_dest_disabled: HashSet<String>,
    registrations: HashMap<String, Vec<String>>,
}

impl CloudInner {
    fn issue(&mut self, prefix: &'static str) -> String {
        let n = self.counters.entry(prefix).or_insert(0);
        *n += 1;
        let id = format!("{}-{:08x}", prefix, n);
        self.known.insert(id.clone());
        id
    }

    fn require(&self, id: &str) -> CloudResult<()> {
        if self.known.contains(id) {
            Ok(())
        } else {
            Err(CloudError::reference_not_found(format!("{} does not exist", id)))
        }
    }

    /// Counts the call and applies injected failures.
    fn enter(&mut self, op: &'static str) -> CloudResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get_mut(op) {
            Some(Injected::Always) => Err(CloudError::new(
                CloudErrorKind::Other,
                format!("injected failure in {}", op),
            )),
            Some(Injected::Transient(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(CloudError::reference_not_found(format!(
                    "injected propagation delay in {}",
                    op
                )))
            }
            _ => Ok(()),
        }
    }
}

/// In-memory [`CloudApi`].
#[derive(Debug, Default)]
pub struct SandboxCloud {
    inner: Mutex<CloudInner>,
}

impl SandboxCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CloudInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Treats `ids` as existing, e.g. resources recorded by an earlier run.
    pub fn adopt<I>(&self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.lock().known.extend(ids);
    }

    /// Every call to `op` fails with a permanent error.
    pub fn fail_always(&self, op: &str) {
        self.lock().failures.insert(op.to_string(), Injected::Always);
    }

    /// The next `times` calls to `op` fail with `ReferenceNotFound`.
    pub fn fail_transiently(&self, op: &str, times: u32) {
        self.lock()
            .failures
            .insert(op.to_string(), Injected::Transient(times));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Launches of the instance named `name` are rejected.
    pub fn fail_instance(&self, name: &str) {
        self.lock().failing_instances.insert(name.to_string());
    }

    /// Total remote calls so far.
    pub fn call_count(&self) -> u32 {
        self.lock().calls.values().sum()
    }

    pub fn calls_to(&self, op: &str) -> u32 {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn tags_of(&self, resource_id: &str) -> Vec<(String, String)> {
        self.lock().tags.get(resource_id).cloned().unwrap_or_default()
    }

    pub fn ingress_of(&self, group_id: &str) -> Vec<IngressRule> {
        self.lock().ingress.get(group_id).cloned().unwrap_or_default()
    }

    /// Launched instances in launch order.
    pub fn instances(&self) -> Vec<(RunInstanceRequest, Instance)> {
        self.lock().instances.clone()
    }

    pub fn source_dest_disabled(&self, instance_id: &str) -> bool {
        self.lock().source_dest_disabled.contains(instance_id)
    }

    pub fn registered_with(&self, load_balancer: &str) -> Vec<String> {
        self.lock()
            .registrations
            .get(load_balancer)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CloudApi for SandboxCloud {
    async fn create_vpc(&self, _cidr: &str) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_vpc")?;
        Ok(inner.issue("vpc"))
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        _cidr: &str,
        _zone: &str,
        _kind: SubnetKind,
    ) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_subnet")?;
        inner.require(vpc_id)?;
        Ok(inner.issue("subnet"))
    }

    async fn create_route_table(&self, vpc_id: &str) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_route_table")?;
        inner.require(vpc_id)?;
        Ok(inner.issue("rtb"))
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("associate_route_table")?;
        inner.require(route_table_id)?;
        inner.require(subnet_id)?;
        Ok(inner.issue("rtbassoc"))
    }

    async fn create_internet_gateway(&self) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_internet_gateway")?;
        Ok(inner.issue("igw"))
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.enter("attach_internet_gateway")?;
        inner.require(gateway_id)?;
        inner.require(vpc_id)
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        _destination_cidr: &str,
        target: &RouteTarget,
    ) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.enter("create_route")?;
        inner.require(route_table_id)?;
        match target {
            RouteTarget::InternetGateway(id) | RouteTarget::NatGateway(id) => inner.require(id),
        }
    }

    async fn allocate_address(&self) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("allocate_address")?;
        Ok(inner.issue("eipalloc"))
    }

    async fn create_nat_gateway(&self, subnet_id: &str, allocation_id: &str) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_nat_gateway")?;
        inner.require(subnet_id)?;
        inner.require(allocation_id)?;
        Ok(inner.issue("nat"))
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        _name: &str,
        _description: &str,
    ) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_security_group")?;
        inner.require(vpc_id)?;
        Ok(inner.issue("sg"))
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.enter("authorize_ingress")?;
        inner.require(group_id)?;
        inner
            .ingress
            .entry(group_id.to_string())
            .or_default()
            .extend(rules.iter().cloned());
        Ok(())
    }

    async fn create_policy(&self, name: &str, _document: &str) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_policy")?;
        let arn = format!("arn:sandbox:iam::policy/{}", name);
        inner.known.insert(arn.clone());
        Ok(arn)
    }

    async fn create_role(&self, name: &str, _trust_document: &str) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_role")?;
        inner.known.insert(name.to_string());
        Ok(name.to_string())
    }

    async fn create_instance_profile(&self, name: &str) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_instance_profile")?;
        let arn = format!("arn:sandbox:iam::instance-profile/{}", name);
        inner.known.insert(arn.clone());
        Ok(arn)
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.enter("attach_role_policy")?;
        inner.require(role_name)?;
        inner.require(policy_arn)
    }

    async fn add_role_to_instance_profile(
        &self,
        profile_arn: &str,
        role_name: &str,
    ) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.enter("add_role_to_instance_profile")?;
        inner.require(profile_arn)?;
        inner.require(role_name)
    }

    async fn run_instance(&self, request: &RunInstanceRequest) -> CloudResult<Instance> {
        let mut inner = self.lock();
        inner.enter("run_instance")?;
        if let Some(existing) = inner.client_tokens.get(&request.client_token) {
            return Ok(existing.clone());
        }
        if inner.failing_instances.contains(&request.name) {
            return Err(CloudError::new(
                CloudErrorKind::LimitExceeded,
                format!("no capacity for {}", request.name),
            ));
        }
        if request.user_data.is_empty() {
            return Err(CloudError::new(
                CloudErrorKind::InvalidRequest,
                "user data is required",
            ));
        }
        inner.require(&request.subnet_id)?;
        inner.require(&request.instance_profile_arn)?;
        for group in &request.security_group_ids {
            inner.require(group)?;
        }

        let instance_id = inner.issue("i");
        let n = inner.counters.get("i").copied().unwrap_or(0);
        let instance = Instance {
            private_ip: format!("10.136.{}.{}", n / 250, n % 250 + 4),
            public_ip: request
                .public_ip
                .then(|| format!("203.0.113.{}", n % 250 + 1)),
            instance_id,
        };
        inner
            .client_tokens
            .insert(request.client_token.clone(), instance.clone());
        inner.instances.push((request.clone(), instance.clone()));
        Ok(instance)
    }

    async fn disable_source_dest_check(&self, instance_id: &str) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.enter("disable_source_dest_check")?;
        inner.require(instance_id)?;
        inner.source_dest_disabled.insert(instance_id.to_string());
        Ok(())
    }

    async fn create_tags(&self, resource_id: &str, tags: &[(String, String)]) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.enter("create_tags")?;
        inner.require(resource_id)?;
        inner
            .tags
            .entry(resource_id.to_string())
            .or_default()
            .extend(tags.iter().cloned());
        Ok(())
    }

    async fn create_load_balancer(&self, request: &LoadBalancerRequest) -> CloudResult<String> {
        let mut inner = self.lock();
        inner.enter("create_load_balancer")?;
        for id in request.subnet_ids.iter().chain(&request.security_group_ids) {
            inner.require(id)?;
        }
        inner.known.insert(request.name.clone());
        Ok(format!("{}.elb.sandbox.internal", request.name))
    }

    async fn register_instances(
        &self,
        load_balancer: &str,
        instance_ids: &[String],
    ) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.enter("register_instances")?;
        inner.require(load_balancer)?;
        for id in instance_ids {
            inner.require(id)?;
        }
        inner
            .registrations
            .entry(load_balancer.to_string())
            .or_default()
            .extend(instance_ids.iter().cloned());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DnsInner {
    zones: HashSet<String>,
    records: Vec<DnsRecord>,
    failing: bool,
    calls: u32,
}

/// In-memory [`DnsProvider`].
#[derive(Debug, Default)]
pub struct SandboxDns {
    inner: Mutex<DnsInner>,
}

impl SandboxDns {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DnsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn adopt_zone(&self, domain: &str) {
        self.lock().zones.insert(domain.to_string());
    }

    /// Makes every record publish fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.lock().records.clone()
    }

    pub fn has_zone(&self, domain: &str) -> bool {
        self.lock().zones.contains(domain)
    }

    pub fn call_count(&self) -> u32 {
        self.lock().calls
    }
}

#[async_trait]
impl DnsProvider for SandboxDns {
    async fn create_zone(&self, domain: &str) -> std::result::Result<String, DnsError> {
        let mut inner = self.lock();
        inner.calls += 1;
        if !inner.zones.insert(domain.to_string()) {
            return Err(DnsError::ZoneExists(domain.to_string()));
        }
        Ok(domain.to_string())
    }

    async fn add_record(&self, record: &DnsRecord) -> std::result::Result<(), DnsError> {
        let mut inner = self.lock();
        inner.calls += 1;
        if inner.failing {
            return Err(DnsError::Unavailable("sandbox dns is failing".to_string()));
        }
        if !inner.zones.contains(&record.zone) {
            return Err(DnsError::ZoneNotFound(record.zone.clone()));
        }
        inner.records.push(record.clone());
        Ok(())
    }
}

/// [`TokenSource`] that hands out a fixed token.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn acquire(&self, _size: u32) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// [`ImageCatalog`] that resolves every channel and region to one image.
#[derive(Debug, Clone)]
pub struct StaticImageCatalog {
    image_id: String,
}

impl StaticImageCatalog {
    pub fn new(image_id: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
        }
    }
}

#[async_trait]
impl ImageCatalog for StaticImageCatalog {
    async fn resolve(&self, _channel: &str, _region: &str) -> Result<String> {
        Ok(self.image_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{ensure_zone, RecordType};

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let cloud = SandboxCloud::new();
        let err = cloud
            .create_subnet("vpc-missing", "10.0.0.0/24", "z", SubnetKind::Internal)
            .await
            .unwrap_err();
        assert_eq!(err.kind, CloudErrorKind::ReferenceNotFound);

        let vpc = cloud.create_vpc("10.0.0.0/16").await.unwrap();
        assert!(cloud
            .create_subnet(&vpc, "10.0.0.0/24", "z", SubnetKind::Internal)
            .await
            .is_ok());
        assert_eq!(cloud.call_count(), 3);
    }

    #[tokio::test]
    async fn adopted_ids_are_known() {
        let cloud = SandboxCloud::new();
        cloud.adopt(vec!["vpc-from-last-run".to_string()]);
        assert!(cloud
            .create_security_group("vpc-from-last-run", "sg", "d")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn transient_failures_run_out() {
        let cloud = SandboxCloud::new();
        cloud.fail_transiently("create_vpc", 2);
        assert!(cloud.create_vpc("10.0.0.0/16").await.is_err());
        assert!(cloud.create_vpc("10.0.0.0/16").await.is_err());
        assert_eq!(cloud.create_vpc("10.0.0.0/16").await.unwrap(), "vpc-00000001");
    }

    #[tokio::test]
    async fn dns_zone_is_idempotent() {
        let dns = SandboxDns::new();
        ensure_zone(&dns, "cell-1.lan").await.unwrap();
        ensure_zone(&dns, "cell-1.lan").await.unwrap();
        assert!(dns.has_zone("cell-1.lan"));

        let record = DnsRecord {
            zone: "cell-1.lan".to_string(),
            name: "master-1.int.cell-1.lan".to_string(),
            record_type: RecordType::A,
            value: "10.136.0.5".to_string(),
        };
        dns.add_record(&record).await.unwrap();
        dns.set_failing(true);
        assert!(dns.add_record(&record).await.is_err());
        assert_eq!(dns.records().len(), 1);
    }
}
