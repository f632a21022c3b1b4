//! Create-or-reuse operations for every managed cloud resource.
//!
//! Each operation takes the state field that records the resource. A populated
//! field short-circuits with no remote call. Otherwise the cloud API is called
//! through the retry executor, the returned id is written into the field and the
//! resource is tagged. Lanes write ids as soon as they exist, so a lane that fails
//! halfway still leaves its finished resources in its group.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;

use crate::cloud::{
    CloudApi, CloudResult, Instance, Listener, LoadBalancerRequest, RouteTarget,
    RunInstanceRequest, SubnetKind,
};
use crate::error::Result;
use crate::firewall::{ingress_plan, load_balancer_plan, ANYWHERE};
use crate::retry::RetryExecutor;
use crate::services::Protocol;
use crate::state::{DeployParams, FirewallIds, IdentityIds, NetworkIds};
use crate::topology::Role;

pub const TAG_NAME: &str = "Name";
pub const TAG_CLUSTER: &str = "cirrus:cluster-id";
pub const TAG_COMPONENT: &str = "cirrus:component";

pub struct ResourceReconciler {
    cloud: Arc<dyn CloudApi>,
    retry: RetryExecutor,
    cluster_id: String,
}

impl ResourceReconciler {
    pub fn new(cloud: Arc<dyn CloudApi>, retry: RetryExecutor, cluster_id: impl Into<String>) -> Self {
        Self {
            cloud,
            retry,
            cluster_id: cluster_id.into(),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn resource_name(&self, component: &str) -> String {
        format!("{}-{}", self.cluster_id, component)
    }

    fn tags(&self, name: &str, component: &str) -> Vec<(String, String)> {
        vec![
            (TAG_NAME.to_string(), name.to_string()),
            (TAG_CLUSTER.to_string(), self.cluster_id.clone()),
            (TAG_COMPONENT.to_string(), component.to_string()),
        ]
    }

    async fn tag(&self, resource_id: &str, name: &str, component: &str) -> Result<()> {
        let tags = self.tags(name, component);
        let cloud = &self.cloud;
        self.retry
            .run("create tags", || cloud.create_tags(resource_id, &tags))
            .await
    }

    /// Taggable resource: reuse `slot` or create, store and tag.
    ///
    /// The id is stored before tagging so a tagging failure never leads to a second
    /// resource on the next run. Such a resource stays untagged: the reuse path makes
    /// no remote calls and does not re-apply tags.
    async fn ensure<F, Fut>(&self, slot: &mut String, component: &str, create: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CloudResult<String>>,
    {
        if !slot.is_empty() {
            tracing::info!("reusing {} {}", component, slot);
            return Ok(());
        }
        let op = format!("create {}", component);
        let id = self.retry.run(&op, create).await?;
        tracing::info!("created {} {}", component, id);
        *slot = id;
        self.tag(slot.as_str(), &self.resource_name(component), component).await
    }

    /// Relationship with no id of its own: reuse `slot` or perform and record `marker`.
    async fn ensure_link<F, Fut>(&self, slot: &mut String, what: &str, marker: String, link: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CloudResult<()>>,
    {
        if !slot.is_empty() {
            tracing::info!("reusing {} {}", what, slot);
            return Ok(());
        }
        self.retry.run(what, link).await?;
        tracing::info!("{} {}", what, marker);
        *slot = marker;
        Ok(())
    }

    /// Network container every other network and firewall resource lives in.
    pub async fn ensure_vpc(&self, params: &DeployParams, net: &mut NetworkIds) -> Result<String> {
        let cloud = &self.cloud;
        self.ensure(&mut net.vpc_id, "vpc", || cloud.create_vpc(&params.vpc_cidr))
            .await?;
        Ok(net.vpc_id.clone())
    }

    /// Network container, subnets, routing, internet and NAT gateways, in dependency order.
    pub async fn network_lane(&self, params: &DeployParams, net: &mut NetworkIds) -> Result<()> {
        let cloud = &self.cloud;
        let vpc_id = self.ensure_vpc(params, net).await?;

        self.ensure(&mut net.internal_subnet_id, "internal-subnet", || {
            cloud.create_subnet(
                &vpc_id,
                &params.internal_subnet_cidr,
                &params.zone,
                SubnetKind::Internal,
            )
        })
        .await?;
        self.ensure(&mut net.external_subnet_id, "external-subnet", || {
            cloud.create_subnet(
                &vpc_id,
                &params.external_subnet_cidr,
                &params.zone,
                SubnetKind::External,
            )
        })
        .await?;
        let internal_subnet = net.internal_subnet_id.clone();
        let external_subnet = net.external_subnet_id.clone();

        self.ensure(&mut net.public_route_table_id, "public-route-table", || {
            cloud.create_route_table(&vpc_id)
        })
        .await?;
        let public_rtb = net.public_route_table_id.clone();

        if net.public_association_id.is_empty() {
            let assoc = self
                .retry
                .run("associate route table", || {
                    cloud.associate_route_table(&public_rtb, &external_subnet)
                })
                .await?;
            tracing::info!("associated {} with {}", public_rtb, external_subnet);
            net.public_association_id = assoc;
        } else {
            tracing::info!("reusing route table association {}", net.public_association_id);
        }

        self.ensure(&mut net.internet_gateway_id, "internet-gateway", || {
            cloud.create_internet_gateway()
        })
        .await?;
        let igw = net.internet_gateway_id.clone();

        self.ensure_link(
            &mut net.gateway_attachment,
            "attach internet gateway",
            format!("{}:{}", igw, vpc_id),
            || cloud.attach_internet_gateway(&igw, &vpc_id),
        )
        .await?;

        let igw_target = RouteTarget::InternetGateway(igw.clone());
        self.ensure_link(
            &mut net.default_route,
            "create default route",
            format!("{}:{}->{}", public_rtb, ANYWHERE, igw),
            || cloud.create_route(&public_rtb, ANYWHERE, &igw_target),
        )
        .await?;

        self.ensure(&mut net.allocation_id, "nat-address", || cloud.allocate_address())
            .await?;
        let allocation = net.allocation_id.clone();

        self.ensure(&mut net.nat_gateway_id, "nat-gateway", || {
            cloud.create_nat_gateway(&external_subnet, &allocation)
        })
        .await?;
        let nat = net.nat_gateway_id.clone();

        self.ensure(&mut net.private_route_table_id, "private-route-table", || {
            cloud.create_route_table(&vpc_id)
        })
        .await?;
        let private_rtb = net.private_route_table_id.clone();

        if net.private_association_id.is_empty() {
            let assoc = self
                .retry
                .run("associate route table", || {
                    cloud.associate_route_table(&private_rtb, &internal_subnet)
                })
                .await?;
            tracing::info!("associated {} with {}", private_rtb, internal_subnet);
            net.private_association_id = assoc;
        } else {
            tracing::info!("reusing route table association {}", net.private_association_id);
        }

        let nat_target = RouteTarget::NatGateway(nat.clone());
        self.ensure_link(
            &mut net.nat_route,
            "create nat route",
            format!("{}:{}->{}", private_rtb, ANYWHERE, nat),
            || cloud.create_route(&private_rtb, ANYWHERE, &nat_target),
        )
        .await?;

        Ok(())
    }

    /// Policy, role and instance profile nodes run under.
    pub async fn identity_lane(&self, ident: &mut IdentityIds) -> Result<()> {
        let cloud = &self.cloud;
        let policy_name = self.resource_name("node-policy");
        let role_name = self.resource_name("node-role");
        let profile_name = self.resource_name("node-profile");
        let policy_document = node_policy_document();
        let trust_document = node_trust_document();

        self.ensure(&mut ident.policy_arn, "node-policy", || {
            cloud.create_policy(&policy_name, &policy_document)
        })
        .await?;
        self.ensure(&mut ident.role_name, "node-role", || {
            cloud.create_role(&role_name, &trust_document)
        })
        .await?;
        self.ensure(&mut ident.instance_profile_arn, "node-profile", || {
            cloud.create_instance_profile(&profile_name)
        })
        .await?;

        let role = ident.role_name.clone();
        let policy = ident.policy_arn.clone();
        let profile = ident.instance_profile_arn.clone();

        self.ensure_link(
            &mut ident.policy_attachment,
            "attach role policy",
            format!("{}:{}", role, policy),
            || cloud.attach_role_policy(&role, &policy),
        )
        .await?;
        self.ensure_link(
            &mut ident.profile_role,
            "add role to instance profile",
            format!("{}:{}", profile, role),
            || cloud.add_role_to_instance_profile(&profile, &role),
        )
        .await?;

        Ok(())
    }

    /// One security group per role plus the load balancer's, each with its ingress rules.
    pub async fn firewall_lane(
        &self,
        params: &DeployParams,
        vpc_id: &str,
        fw: &mut FirewallIds,
    ) -> Result<()> {
        let cloud = &self.cloud;

        for role in Role::ALL {
            let component = format!("{}-sg", role);
            let name = self.resource_name(&component);
            let description = format!("{} nodes of {}", role, self.cluster_id);
            self.ensure(fw.sg_id_mut(role), &component, || {
                cloud.create_security_group(vpc_id, &name, &description)
            })
            .await?;
        }
        let elb_name = self.resource_name("elb-sg");
        let elb_description = format!("load balancer of {}", self.cluster_id);
        self.ensure(&mut fw.elb_sg_id, "elb-sg", || {
            cloud.create_security_group(vpc_id, &elb_name, &elb_description)
        })
        .await?;

        for role in Role::ALL {
            let group = fw.sg_id(role).to_string();
            let rules = ingress_plan(role, &params.features, &params.vpc_cidr);
            tracing::debug!("{} ingress rules for {}", rules.len(), group);
            self.ensure_link(
                fw.ingress_mut(role),
                "authorize ingress",
                format!("{}:{}", group, rules.len()),
                || cloud.authorize_ingress(&group, &rules),
            )
            .await?;
        }
        let elb_group = fw.elb_sg_id.clone();
        let elb_rules = load_balancer_plan();
        self.ensure_link(
            &mut fw.elb_ingress,
            "authorize ingress",
            format!("{}:{}", elb_group, elb_rules.len()),
            || cloud.authorize_ingress(&elb_group, &elb_rules),
        )
        .await?;

        Ok(())
    }

    /// Load balancer over the external subnet, fronting masters on 80 and 443.
    pub async fn ensure_load_balancer(&self, net: &mut NetworkIds, fw: &FirewallIds) -> Result<()> {
        if !net.load_balancer_dns.is_empty() {
            tracing::info!("reusing load balancer {}", net.load_balancer_name);
            return Ok(());
        }
        let request = LoadBalancerRequest {
            name: self.resource_name("lb"),
            subnet_ids: vec![net.external_subnet_id.clone()],
            security_group_ids: vec![fw.elb_sg_id.clone()],
            listeners: [80u16, 443]
                .into_iter()
                .map(|port| Listener {
                    protocol: Protocol::Tcp,
                    port,
                    instance_port: port,
                })
                .collect(),
        };
        let cloud = &self.cloud;
        let dns_name = self
            .retry
            .run("create load balancer", || cloud.create_load_balancer(&request))
            .await?;
        tracing::info!("created load balancer {} ({})", request.name, dns_name);
        net.load_balancer_name = request.name.clone();
        net.load_balancer_dns = dns_name;
        self.tag(&request.name, &request.name, "lb").await
    }

    /// Launches and tags one instance. Instances are not recorded in cluster state.
    pub async fn launch_instance(&self, request: &RunInstanceRequest) -> Result<Instance> {
        let cloud = &self.cloud;
        let instance = self
            .retry
            .run("run instance", || cloud.run_instance(request))
            .await?;
        tracing::info!(
            "launched {} as {} ({})",
            request.name,
            instance.instance_id,
            instance.private_ip
        );
        self.tag(&instance.instance_id, &request.name, "node").await?;
        Ok(instance)
    }

    pub async fn disable_source_dest_check(&self, instance_id: &str) -> Result<()> {
        let cloud = &self.cloud;
        self.retry
            .run("disable source/dest check", || {
                cloud.disable_source_dest_check(instance_id)
            })
            .await
    }

    pub async fn register_with_load_balancer(&self, load_balancer: &str, instance_id: &str) -> Result<()> {
        let cloud = &self.cloud;
        let ids = vec![instance_id.to_string()];
        self.retry
            .run("register instances", || cloud.register_instances(load_balancer, &ids))
            .await?;
        tracing::info!("registered {} with {}", instance_id, load_balancer);
        Ok(())
    }
}

fn node_policy_document() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": [
                "ec2:Describe*",
                "ec2:CreateTags",
                "elasticloadbalancing:Describe*",
                "ecr:GetAuthorizationToken",
                "ecr:BatchGetImage",
                "ecr:GetDownloadUrlForLayer"
            ],
            "Resource": "*"
        }]
    })
    .to_string()
}

fn node_trust_document() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": "ec2.amazonaws.com"},
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use crate::sandbox::SandboxCloud;
    use std::time::Duration;

    fn params() -> DeployParams {
        DeployParams {
            cluster_id: "cell-1".to_string(),
            zone: "eu-west-1a".to_string(),
            vpc_cidr: "10.136.0.0/16".to_string(),
            internal_subnet_cidr: "10.136.0.0/18".to_string(),
            external_subnet_cidr: "10.136.64.0/18".to_string(),
            features: vec!["base".to_string()],
            ..DeployParams::default()
        }
    }

    fn reconciler(cloud: &Arc<SandboxCloud>) -> ResourceReconciler {
        let retry = RetryExecutor::new(RetryConfig {
            max_attempts: 5,
            delay: Duration::from_millis(1),
        });
        ResourceReconciler::new(cloud.clone(), retry, "cell-1")
    }

    #[tokio::test]
    async fn network_lane_fills_group_and_tags() {
        let cloud = Arc::new(SandboxCloud::new());
        let mut net = NetworkIds::default();
        reconciler(&cloud).network_lane(&params(), &mut net).await.unwrap();

        assert!(net.is_complete());
        assert!(!net.gateway_attachment.is_empty());
        assert!(!net.private_association_id.is_empty());
        let tags = cloud.tags_of(&net.vpc_id);
        assert!(tags.contains(&(TAG_NAME.to_string(), "cell-1-vpc".to_string())));
        assert!(tags.contains(&(TAG_CLUSTER.to_string(), "cell-1".to_string())));
        assert!(tags.contains(&(TAG_COMPONENT.to_string(), "vpc".to_string())));
    }

    #[tokio::test]
    async fn populated_fields_are_reused_without_calls() {
        let cloud = Arc::new(SandboxCloud::new());
        let reconciler = reconciler(&cloud);
        let mut net = NetworkIds::default();
        let mut ident = IdentityIds::default();
        reconciler.network_lane(&params(), &mut net).await.unwrap();
        reconciler.identity_lane(&mut ident).await.unwrap();
        let calls = cloud.call_count();

        let mut net_again = net.clone();
        let mut ident_again = ident.clone();
        reconciler.network_lane(&params(), &mut net_again).await.unwrap();
        reconciler.identity_lane(&mut ident_again).await.unwrap();

        assert_eq!(cloud.call_count(), calls);
        assert_eq!(net_again, net);
        assert_eq!(ident_again, ident);
    }

    #[tokio::test]
    async fn failed_lane_keeps_partial_progress() {
        let cloud = Arc::new(SandboxCloud::new());
        cloud.fail_always("create_nat_gateway");
        let mut net = NetworkIds::default();

        let err = reconciler(&cloud)
            .network_lane(&params(), &mut net)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("create nat-gateway"));
        assert!(!net.vpc_id.is_empty());
        assert!(!net.allocation_id.is_empty());
        assert!(net.nat_gateway_id.is_empty());
    }

    #[tokio::test]
    async fn firewall_lane_authors_every_group() {
        let cloud = Arc::new(SandboxCloud::new());
        let reconciler = reconciler(&cloud);
        let mut net = NetworkIds::default();
        reconciler.network_lane(&params(), &mut net).await.unwrap();

        let mut fw = FirewallIds::default();
        reconciler
            .firewall_lane(&params(), &net.vpc_id, &mut fw)
            .await
            .unwrap();

        assert!(fw.is_complete());
        let border_rules = cloud.ingress_of(&fw.border_sg_id);
        assert!(border_rules
            .iter()
            .any(|r| r.cidr == ANYWHERE && r.from_port == 443));
        assert_eq!(cloud.ingress_of(&fw.elb_sg_id).len(), 2);
    }

    #[tokio::test]
    async fn transient_reference_errors_are_retried() {
        let cloud = Arc::new(SandboxCloud::new());
        cloud.fail_transiently("add_role_to_instance_profile", 4);
        let mut ident = IdentityIds::default();
        reconciler(&cloud).identity_lane(&mut ident).await.unwrap();
        assert!(ident.is_complete());
    }

    #[tokio::test]
    async fn load_balancer_is_created_once() {
        let cloud = Arc::new(SandboxCloud::new());
        let reconciler = reconciler(&cloud);
        let mut net = NetworkIds::default();
        let mut fw = FirewallIds::default();
        reconciler.network_lane(&params(), &mut net).await.unwrap();
        reconciler
            .firewall_lane(&params(), &net.vpc_id, &mut fw)
            .await
            .unwrap();

        reconciler.ensure_load_balancer(&mut net, &fw).await.unwrap();
        reconciler.ensure_load_balancer(&mut net, &fw).await.unwrap();

        assert_eq!(net.load_balancer_name, "cell-1-lb");
        assert_eq!(cloud.calls_to("create_load_balancer"), 1);
        let tags = cloud.tags_of("cell-1-lb");
        assert!(tags.contains(&(TAG_NAME.to_string(), "cell-1-lb".to_string())));
        assert!(tags.contains(&(TAG_COMPONENT.to_string(), "lb".to_string())));
    }

    #[tokio::test]
    async fn identity_lane_tags_every_resource() {
        let cloud = Arc::new(SandboxCloud::new());
        let mut ident = IdentityIds::default();
        reconciler(&cloud).identity_lane(&mut ident).await.unwrap();

        assert!(ident.is_complete());
        for (id, component) in [
            (&ident.policy_arn, "node-policy"),
            (&ident.role_name, "node-role"),
            (&ident.instance_profile_arn, "node-profile"),
        ] {
            let tags = cloud.tags_of(id);
            assert!(tags.contains(&(TAG_NAME.to_string(), format!("cell-1-{}", component))));
            assert!(tags.contains(&(TAG_CLUSTER.to_string(), "cell-1".to_string())));
            assert!(tags.contains(&(TAG_COMPONENT.to_string(), component.to_string())));
        }
    }

    #[tokio::test]
    async fn tagging_failure_keeps_the_id_and_never_recreates() {
        let cloud = Arc::new(SandboxCloud::new());
        cloud.fail_always("create_tags");
        let reconciler = reconciler(&cloud);
        let mut net = NetworkIds::default();

        assert!(reconciler.ensure_vpc(&params(), &mut net).await.is_err());
        assert!(!net.vpc_id.is_empty());

        cloud.clear_failures();
        let vpc_id = reconciler.ensure_vpc(&params(), &mut net).await.unwrap();
        assert_eq!(vpc_id, net.vpc_id);
        assert_eq!(cloud.calls_to("create_vpc"), 1);
        assert!(cloud.tags_of(&vpc_id).is_empty());
    }
}
