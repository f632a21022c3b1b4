use anyhow::{bail, Context, Result};
use cirrus_bootcfg::{BootConfigComposer, ClusterStateFlag, Iaas};
use cirrus_provision::{
    ClusterConfig, ClusterState, ClusterStateStore, Collaborators, DeploymentOrchestrator,
    HttpImageCatalog, HttpTokenSource, ImageCatalog, NodeOutcome, NodeRequest, Role,
    SandboxCloud, SandboxDns, StaticImageCatalog, StaticTokenSource, TokenSource, Topology,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cirrus")]
#[command(about = "Multi-role cluster provisioning", long_about = None)]
pub struct Cli {
    /// Cluster configuration file (.toml or .json); flags override its values.
    #[arg(long, global = true, env = "CIRRUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding one state document per cluster [default: ~/.cirrus/clusters]
    #[arg(long, global = true, env = "CIRRUS_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, global = true, value_enum, env = "CIRRUS_BACKEND", default_value = "sandbox")]
    pub backend: Backend,

    #[command(subcommand)]
    pub command: Command,
}

/// Cloud and DNS implementation to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-memory cloud and DNS, for dry runs.
    Sandbox,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or reuse the cluster environment.
    Setup {
        #[command(flatten)]
        cluster: ClusterArgs,
        /// Node batches as count:instanceType:hostName:roles.
        #[arg(env = "CIRRUS_TOPOLOGY", value_delimiter = ' ')]
        quadruplets: Vec<String>,
    },
    /// Set up the environment and add every node batch.
    Deploy {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[arg(required = true, env = "CIRRUS_TOPOLOGY", value_delimiter = ' ')]
        quadruplets: Vec<String>,
    },
    /// Add one node to an existing cluster.
    Add {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Add one node booted with a prepared configuration.
    Run {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        node: NodeArgs,
        #[arg(long, env = "CIRRUS_USER_DATA")]
        user_data: PathBuf,
    },
    /// Print the boot configuration a node would get.
    Udata {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        node: NodeArgs,
        #[arg(long, value_enum, env = "CIRRUS_CLUSTER_STATE", default_value = "existing")]
        cluster_state: ClusterStateArg,
        #[arg(short, long, env = "CIRRUS_OUTPUT")]
        output: Option<PathBuf>,
    },
    /// Print a stored cluster state, or list stored clusters.
    State {
        #[arg(env = "CIRRUS_CLUSTER_ID")]
        cluster_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClusterStateArg {
    New,
    Existing,
}

impl From<ClusterStateArg> for ClusterStateFlag {
    fn from(arg: ClusterStateArg) -> Self {
        match arg {
            ClusterStateArg::New => ClusterStateFlag::New,
            ClusterStateArg::Existing => ClusterStateFlag::Existing,
        }
    }
}

/// Cluster-wide settings. Unset flags keep the configuration file's values.
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    #[arg(long, env = "CIRRUS_CLUSTER_ID")]
    pub cluster_id: Option<String>,
    #[arg(long, env = "CIRRUS_DOMAIN")]
    pub domain: Option<String>,
    #[arg(long, env = "CIRRUS_REGION")]
    pub region: Option<String>,
    #[arg(long, env = "CIRRUS_ZONE")]
    pub zone: Option<String>,
    #[arg(long, env = "CIRRUS_IAAS", value_parser = parse_iaas)]
    pub iaas: Option<Iaas>,
    #[arg(long, env = "CIRRUS_CHANNEL")]
    pub image_channel: Option<String>,
    #[arg(long, env = "CIRRUS_KEY_PAIR")]
    pub key_pair: Option<String>,
    #[arg(long, env = "CIRRUS_VPC_CIDR")]
    pub vpc_cidr: Option<String>,
    #[arg(long, env = "CIRRUS_INTERNAL_SUBNET_CIDR")]
    pub internal_subnet_cidr: Option<String>,
    #[arg(long, env = "CIRRUS_EXTERNAL_SUBNET_CIDR")]
    pub external_subnet_cidr: Option<String>,
    #[arg(long, env = "CIRRUS_DNS_PROVIDER")]
    pub dns_provider: Option<String>,
    #[arg(long, env = "CIRRUS_DNS_API_KEY", hide_env_values = true)]
    pub dns_api_key: Option<String>,
    #[arg(long, env = "CIRRUS_FEATURES", value_delimiter = ',')]
    pub features: Vec<String>,
    #[arg(long, env = "CIRRUS_CA_CERT")]
    pub ca_cert: Option<PathBuf>,
    #[arg(long, env = "CIRRUS_PROMETHEUS")]
    pub prometheus: bool,
    #[arg(long, env = "CIRRUS_ALERTMANAGER")]
    pub alertmanager: bool,
    #[arg(long, env = "CIRRUS_NO_GZIP")]
    pub no_gzip: bool,
    #[arg(long, env = "CIRRUS_DISCOVERY_ENDPOINT")]
    pub discovery_endpoint: Option<String>,
    #[arg(long, env = "CIRRUS_IMAGE_CATALOG")]
    pub image_catalog_url: Option<String>,
    /// Use a fixed bootstrap token and image id instead of the HTTP services.
    #[arg(long, env = "CIRRUS_OFFLINE")]
    pub offline: bool,
}

impl ClusterArgs {
    pub fn apply(&self, config: &mut ClusterConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        set(&mut config.cluster_id, &self.cluster_id);
        set(&mut config.domain, &self.domain);
        set(&mut config.region, &self.region);
        set(&mut config.zone, &self.zone);
        set(&mut config.iaas, &self.iaas);
        set(&mut config.image_channel, &self.image_channel);
        set(&mut config.key_pair, &self.key_pair);
        set(&mut config.vpc_cidr, &self.vpc_cidr);
        set(&mut config.internal_subnet_cidr, &self.internal_subnet_cidr);
        set(&mut config.external_subnet_cidr, &self.external_subnet_cidr);
        set(&mut config.dns_provider, &self.dns_provider);
        set(&mut config.dns_api_key, &self.dns_api_key);
        set(&mut config.discovery_endpoint, &self.discovery_endpoint);
        set(&mut config.image_catalog_url, &self.image_catalog_url);
        if self.ca_cert.is_some() {
            config.ca_cert_path = self.ca_cert.clone();
        }
        if !self.features.is_empty() {
            config.features = self.features.clone();
        }
        config.prometheus |= self.prometheus;
        config.alertmanager |= self.alertmanager;
        if self.no_gzip {
            config.compress_user_data = false;
        }
    }
}

/// One node's identity and shape.
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    #[arg(long, required = true, env = "CIRRUS_ROLES", value_delimiter = ',')]
    pub roles: Vec<Role>,
    #[arg(long, env = "CIRRUS_HOST_NAME")]
    pub host_name: String,
    #[arg(long, env = "CIRRUS_HOST_ID", default_value = "1")]
    pub host_id: u32,
    #[arg(long, env = "CIRRUS_INSTANCE_TYPE", default_value = "large")]
    pub instance_type: String,
    #[arg(long, env = "CIRRUS_PLACEMENT", default_value = "")]
    pub placement: String,
}

impl NodeArgs {
    /// Validates the node shape the same way a topology quadruplet is validated.
    pub fn to_request(&self) -> Result<NodeRequest> {
        let roles: Vec<&str> = self.roles.iter().map(Role::as_str).collect();
        let descriptor = format!("1:{}:{}:{}", self.instance_type, self.host_name, roles.join(","));
        let batch = Topology::parse(&[descriptor])?
            .batches
            .pop()
            .context("node descriptor produced no batch")?;
        let mut request = NodeRequest::from_batch(&batch, self.host_id);
        request.placement = self.placement.clone();
        Ok(request)
    }
}

fn parse_iaas(s: &str) -> std::result::Result<Iaas, String> {
    match s {
        "ec2" => Ok(Iaas::Ec2),
        "packet" => Ok(Iaas::Packet),
        "sandbox" => Ok(Iaas::Sandbox),
        other => Err(format!("unknown iaas '{}', expected ec2, packet or sandbox", other)),
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match &self.command {
            Command::Setup {
                cluster,
                quadruplets,
            } => self.setup(cluster, quadruplets).await,
            Command::Deploy {
                cluster,
                quadruplets,
            } => self.deploy(cluster, quadruplets).await,
            Command::Add { cluster, node } => self.add(cluster, node).await,
            Command::Run {
                cluster,
                node,
                user_data,
            } => self.run_node(cluster, node, user_data).await,
            Command::Udata {
                cluster,
                node,
                cluster_state,
                output,
            } => self.udata(cluster, node, *cluster_state, output.as_deref()),
            Command::State { cluster_id } => self.state(cluster_id.as_deref()),
        }
    }

    /// File values, then flag and environment overrides, then validation.
    pub fn load_config(&self, cluster: &ClusterArgs) -> Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClusterConfig::default(),
        };
        cluster.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn store(&self) -> Result<ClusterStateStore> {
        let dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => ClusterStateStore::default_dir()?,
        };
        Ok(ClusterStateStore::new(dir))
    }

    fn orchestrator(&self, cluster: &ClusterArgs) -> Result<DeploymentOrchestrator> {
        let config = self.load_config(cluster)?;
        let store = self.store()?;

        let cloud = Arc::new(SandboxCloud::new());
        let dns = Arc::new(SandboxDns::new());
        match store.load(&config.cluster_id) {
            Ok(state) => {
                cloud.adopt(state.resource_ids());
                if !state.deploy.dns_zone_id.is_empty() {
                    dns.adopt_zone(&state.deploy.dns_zone_id);
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let (tokens, images): (Arc<dyn TokenSource>, Arc<dyn ImageCatalog>) = if cluster.offline {
            (
                Arc::new(StaticTokenSource::new(format!("offline-{}", config.cluster_id))),
                Arc::new(StaticImageCatalog::new("ami-sandbox")),
            )
        } else {
            (
                Arc::new(HttpTokenSource::new(&config.discovery_endpoint, &config.http)?),
                Arc::new(HttpImageCatalog::new(&config.image_catalog_url, &config.http)?),
            )
        };
        let composer = BootConfigComposer::default().with_compression(config.compress_user_data);

        tracing::debug!("using {:?} backend for {}", self.backend, config.cluster_id);
        let collaborators = Collaborators {
            cloud,
            dns,
            tokens,
            images,
            composer: Arc::new(composer),
        };
        Ok(DeploymentOrchestrator::new(config, store, collaborators))
    }

    async fn setup(&self, cluster: &ClusterArgs, quadruplets: &[String]) -> Result<()> {
        let topology = Topology::parse(quadruplets)?;
        let orchestrator = self.orchestrator(cluster)?;
        let state = orchestrator.setup(&topology).await?;
        print_environment(&state);
        Ok(())
    }

    async fn deploy(&self, cluster: &ClusterArgs, quadruplets: &[String]) -> Result<()> {
        let topology = Topology::parse(quadruplets)?;
        let orchestrator = self.orchestrator(cluster)?;
        let outcomes = orchestrator.deploy(&topology).await?;
        for outcome in &outcomes {
            print_node(outcome);
        }
        println!("Deployed {} node(s)", outcomes.len());
        Ok(())
    }

    async fn add(&self, cluster: &ClusterArgs, node: &NodeArgs) -> Result<()> {
        let request = node.to_request()?;
        let outcome = self.orchestrator(cluster)?.add(&request).await?;
        print_node(&outcome);
        Ok(())
    }

    async fn run_node(&self, cluster: &ClusterArgs, node: &NodeArgs, user_data: &Path) -> Result<()> {
        let request = node.to_request()?;
        let data = std::fs::read(user_data)
            .with_context(|| format!("reading {}", user_data.display()))?;
        if data.is_empty() {
            bail!("{} is empty", user_data.display());
        }
        let outcome = self.orchestrator(cluster)?.run(&request, data).await?;
        print_node(&outcome);
        Ok(())
    }

    fn udata(
        &self,
        cluster: &ClusterArgs,
        node: &NodeArgs,
        cluster_state: ClusterStateArg,
        output: Option<&Path>,
    ) -> Result<()> {
        let request = node.to_request()?;
        let orchestrator = self.orchestrator(cluster)?;
        let state = orchestrator.store().load(&orchestrator.config().cluster_id)?;
        let boot = orchestrator.compose(&state, &request, cluster_state.into())?;

        match output {
            Some(path) => {
                std::fs::write(path, &boot.data)
                    .with_context(|| format!("writing {}", path.display()))?;
                eprintln!("Wrote {} bytes to {}", boot.len(), path.display());
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&boot.data)?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    fn state(&self, cluster_id: Option<&str>) -> Result<()> {
        let store = self.store()?;
        match cluster_id {
            Some(id) => {
                let state: ClusterState = store.load(id)?;
                println!("{}", serde_json::to_string_pretty(&state)?);
            }
            None => {
                let ids = store.list()?;
                if ids.is_empty() {
                    println!("No clusters in {}", store.dir().display());
                }
                for id in ids {
                    println!("{}", id);
                }
            }
        }
        Ok(())
    }
}

fn print_environment(state: &ClusterState) {
    println!("Cluster: {}", state.deploy.cluster_id);
    println!("VPC: {}", state.network.vpc_id);
    println!("Internal subnet: {}", state.network.internal_subnet_id);
    println!("External subnet: {}", state.network.external_subnet_id);
    println!("Instance profile: {}", state.identity.instance_profile_arn);
    println!("Load balancer: {}", state.network.load_balancer_dns);
    println!("Image: {}", state.deploy.image_id);
}

fn print_node(outcome: &NodeOutcome) {
    let public = outcome.public_ip.as_deref().unwrap_or("-");
    println!(
        "{}\t{}\t{}\t{}",
        outcome.host, outcome.instance_id, outcome.private_ip, public
    );
    for warning in &outcome.dns_warnings {
        println!("  warning: {}", warning);
    }
}
