//! Foundation stack builder.
//!
//! Builds the resources shared by every application stack and publishes the
//! output contract. Physical names derive from `(org, stack)` only, so
//! rebuilding a stack upserts the same resources.

use keel_config::{NameContext, ProjectConfig};
use keel_core::contract::{OutputContract, OutputKey, OutputValue, Outputs};
use keel_core::resource::{
    NodeId, OutputRef, PropertyValue, ResourceKind, ResourceSpec, TemplatePart,
};
use keel_core::stack::{Stack, StackKind};
use keel_core::state::StateStore;
use keel_core::{Error, Result};
use keel_engine::{ApplyEvent, ApplyReport, ConvergenceEngine, ResourceGraph};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::apply::{EventSink, apply_stack, destroy_stack};

const SSM_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore";
const ANYWHERE: &str = "0.0.0.0/0";

/// Nodes whose attributes become published outputs.
#[derive(Debug, Clone)]
pub struct FoundationNodes {
    pub vpc: NodeId,
    pub private_subnets: Vec<NodeId>,
    pub app_security_group: NodeId,
    pub db_security_group: NodeId,
    pub database: NodeId,
    pub connection_string: NodeId,
    pub registry: NodeId,
    pub cluster: NodeId,
    pub load_balancer: NodeId,
    pub listener: NodeId,
    pub media_bucket: NodeId,
    pub bastion: Option<NodeId>,
}

/// The desired resources of one foundation stack.
#[derive(Debug, Clone)]
pub struct FoundationPlan {
    pub stack: Stack,
    pub graph: ResourceGraph,
    pub nodes: FoundationNodes,
}

/// Builds, inspects and destroys foundation stacks.
pub struct FoundationBuilder {
    config: ProjectConfig,
    engine: ConvergenceEngine,
    store: Arc<dyn StateStore>,
    events: EventSink,
}

impl FoundationBuilder {
    pub fn new(config: ProjectConfig, engine: ConvergenceEngine, store: Arc<dyn StateStore>) -> Self {
        Self {
            config,
            engine,
            store,
            events: None,
        }
    }

    /// Forward apply events to `tx` while building.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ApplyEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Declare the foundation's resources without touching anything.
    pub fn plan(&self, stack_name: &str, org: &str) -> Result<FoundationPlan> {
        let stack = Stack::foundation(stack_name)?;
        let ctx = NameContext::new(org, &self.config.project, &stack.name);
        let name = |template: &str| ctx.resource_name(template);
        let foundation = &self.config.foundation;
        let db = &foundation.database;
        let container_port = self.config.application.container.port;
        let mut graph = ResourceGraph::new();

        // Network
        let vpc = graph.add(
            ResourceSpec::new(ResourceKind::Vpc, "vpc", name("${org}-foundation-${stack}-vpc"))
                .with("cidrBlock", "10.0.0.0/16")
                .with("enableDnsHostnames", true),
        )?;
        let mut private_subnets = Vec::new();
        let mut public_subnets = Vec::new();
        for az in 0..foundation.availability_zones {
            private_subnets.push(graph.add(
                ResourceSpec::new(
                    ResourceKind::Subnet,
                    format!("privateSubnet{}", az),
                    name(&format!("${{org}}-foundation-${{stack}}-private-{}", az)),
                )
                .with("vpcId", PropertyValue::output(vpc, "id"))
                .with("cidrBlock", format!("10.0.{}.0/24", az))
                .with("availabilityZoneIndex", u32::from(az))
                .with("mapPublicIpOnLaunch", false),
            )?);
            public_subnets.push(graph.add(
                ResourceSpec::new(
                    ResourceKind::Subnet,
                    format!("publicSubnet{}", az),
                    name(&format!("${{org}}-foundation-${{stack}}-public-{}", az)),
                )
                .with("vpcId", PropertyValue::output(vpc, "id"))
                .with("cidrBlock", format!("10.0.{}.0/24", 100 + u32::from(az)))
                .with("availabilityZoneIndex", u32::from(az))
                .with("mapPublicIpOnLaunch", true),
            )?);
        }
        let subnet_ids = |nodes: &[NodeId]| {
            PropertyValue::List(nodes.iter().map(|n| PropertyValue::output(*n, "id")).collect())
        };
        let db_subnet_group = graph.add(
            ResourceSpec::new(
                ResourceKind::DbSubnetGroup,
                "dbSubnetGroup",
                name("${org}-foundation-${stack}-db-subnets"),
            )
            .with("subnetIds", subnet_ids(&private_subnets)),
        )?;

        // Security groups
        let lb_sg = graph.add(
            security_group("lbSecurityGroup", name("${org}-foundation-${stack}-lb-sg"), vpc)
                .with("ingress", PropertyValue::list([ingress_from_cidr(foundation.listener_port)]))
                .with("egress", PropertyValue::list([egress_all()])),
        )?;
        let bastion_sg = if foundation.bastion.enabled {
            Some(graph.add(
                security_group(
                    "bastionSecurityGroup",
                    name("${org}-foundation-${stack}-bastion-sg"),
                    vpc,
                )
                .with("egress", PropertyValue::list([egress_all()])),
            )?)
        } else {
            None
        };
        let app_sg = graph.add(
            security_group("appSecurityGroup", name("${org}-foundation-${stack}-app-sg"), vpc)
                .with(
                    "ingress",
                    PropertyValue::list([ingress_from_group(container_port, lb_sg)]),
                )
                .with("egress", PropertyValue::list([egress_all()])),
        )?;
        let mut db_ingress = vec![ingress_from_group(db.port, app_sg)];
        if let Some(bastion_sg) = bastion_sg {
            db_ingress.push(ingress_from_group(db.port, bastion_sg));
        }
        let db_sg = graph.add(
            security_group("dbSecurityGroup", name("${org}-foundation-${stack}-db-sg"), vpc)
                .with("ingress", PropertyValue::List(db_ingress))
                .with("egress", PropertyValue::list([egress_all()])),
        )?;
        graph.add(
            ResourceSpec::new(
                ResourceKind::SecurityGroupRule,
                "dbSecurityGroupSelfRule",
                name("${org}-foundation-${stack}-db-sg-self"),
            )
            .with("type", "ingress")
            .with("protocol", "tcp")
            .with("fromPort", db.port)
            .with("toPort", db.port)
            .with("securityGroupId", PropertyValue::output(db_sg, "id"))
            .with("sourceSecurityGroupId", PropertyValue::output(db_sg, "id")),
        )?;

        // Database and its credential
        let password = graph.add(
            ResourceSpec::new(
                ResourceKind::RandomPassword,
                "dbPassword",
                name("${org}-foundation-${stack}-db-password"),
            )
            .with("length", db.password_length)
            .with("special", false),
        )?;
        let database = graph.add(
            ResourceSpec::new(
                ResourceKind::DatabaseCluster,
                "database",
                name("${org}-foundation-${stack}-db"),
            )
            .with("engine", db.engine.as_str())
            .with("engineMode", "provisioned")
            .with("databaseName", db.name.as_str())
            .with("masterUsername", db.username.as_str())
            .with(
                "masterPassword",
                PropertyValue::secret(PropertyValue::output(password, "result")),
            )
            .with("port", db.port)
            .with(
                "serverlessScaling",
                PropertyValue::map([
                    ("minCapacity", db.min_capacity),
                    ("maxCapacity", db.max_capacity),
                ]),
            )
            .with("dbSubnetGroupName", PropertyValue::output(db_subnet_group, "name"))
            .with(
                "vpcSecurityGroupIds",
                PropertyValue::list([PropertyValue::output(db_sg, "id")]),
            )
            .with("skipFinalSnapshot", true),
        )?;
        let connection_string = graph.add(ResourceSpec::new(
            ResourceKind::Secret,
            "connectionString",
            ctx.interpolate("${org}/foundation/${stack}/connectionString"),
        ))?;
        graph.add(
            ResourceSpec::new(
                ResourceKind::SecretVersion,
                "connectionStringVersion",
                name("${org}-foundation-${stack}-connection-string-version"),
            )
            .with("secretId", PropertyValue::output(connection_string, "arn"))
            .with(
                "secretString",
                PropertyValue::secret(PropertyValue::Template(vec![
                    literal(format!("postgresql://{}:", db.username)),
                    reference(password, "result"),
                    literal("@"),
                    reference(database, "endpoint"),
                    literal(":"),
                    reference(database, "port"),
                    literal(format!("/{}", db.name)),
                ])),
            ),
        )?;

        // Registry and compute cluster, independent of the network chain
        let registry = graph.add(
            ResourceSpec::new(
                ResourceKind::ContainerRegistry,
                "registry",
                name("${org}-foundation-${stack}"),
            )
            .with("forceDelete", true),
        )?;
        let cluster = graph.add(ResourceSpec::new(
            ResourceKind::ComputeCluster,
            "cluster",
            name("${org}-foundation-${stack}"),
        ))?;

        // Bastion
        let bastion = match bastion_sg {
            Some(bastion_sg) => {
                let role = graph.add(
                    ResourceSpec::new(
                        ResourceKind::IamRole,
                        "bastionRole",
                        name("${org}-foundation-${stack}-bastion-role"),
                    )
                    .with("assumeRolePolicy", assume_role_policy("ec2.amazonaws.com")),
                )?;
                graph.add(
                    ResourceSpec::new(
                        ResourceKind::RolePolicyAttachment,
                        "bastionSsmPolicy",
                        name("${org}-foundation-${stack}-bastion-ssm"),
                    )
                    .with("role", PropertyValue::output(role, "name"))
                    .with("policyArn", SSM_POLICY_ARN),
                )?;
                let profile = graph.add(
                    ResourceSpec::new(
                        ResourceKind::InstanceProfile,
                        "bastionProfile",
                        name("${org}-foundation-${stack}-bastion-profile"),
                    )
                    .with("role", PropertyValue::output(role, "name")),
                )?;
                let subnet = private_subnets
                    .first()
                    .copied()
                    .ok_or_else(|| Error::InvalidInput("no private subnet for bastion".to_string()))?;
                Some(graph.add(
                    ResourceSpec::new(
                        ResourceKind::Instance,
                        "bastion",
                        name("${org}-foundation-${stack}-bastion"),
                    )
                    .with("ami", foundation.bastion.ami.as_str())
                    .with("instanceType", foundation.bastion.instance_type.as_str())
                    .with("subnetId", PropertyValue::output(subnet, "id"))
                    .with(
                        "vpcSecurityGroupIds",
                        PropertyValue::list([PropertyValue::output(bastion_sg, "id")]),
                    )
                    .with("iamInstanceProfile", PropertyValue::output(profile, "name")),
                )?)
            }
            None => None,
        };

        // Shared load balancer
        let load_balancer = graph.add(
            ResourceSpec::new(
                ResourceKind::LoadBalancer,
                "loadBalancer",
                name("${org}-foundation-${stack}-lb"),
            )
            .with("loadBalancerType", "application")
            .with("internal", false)
            .with("vpcId", PropertyValue::output(vpc, "id"))
            .with("subnets", subnet_ids(&public_subnets))
            .with(
                "securityGroups",
                PropertyValue::list([PropertyValue::output(lb_sg, "id")]),
            ),
        )?;
        let listener = graph.add(
            ResourceSpec::new(
                ResourceKind::Listener,
                "listener",
                name("${org}-foundation-${stack}-lb-listener"),
            )
            .with("loadBalancerArn", PropertyValue::output(load_balancer, "arn"))
            .with("port", foundation.listener_port)
            .with("protocol", "HTTP")
            .with(
                "defaultAction",
                PropertyValue::map([
                    ("type", PropertyValue::from("fixed-response")),
                    ("statusCode", PropertyValue::from(404u32)),
                ]),
            ),
        )?;

        // Media bucket
        let media_bucket = graph.add(
            ResourceSpec::new(
                ResourceKind::Bucket,
                "mediaBucket",
                name("${org}-${project}-foundation-${stack}-media"),
            )
            .with("forceDestroy", true),
        )?;
        let ownership = graph.add(
            ResourceSpec::new(
                ResourceKind::BucketOwnershipControls,
                "mediaOwnershipControls",
                name("${org}-${project}-foundation-${stack}-media-ownership"),
            )
            .with("bucket", PropertyValue::output(media_bucket, "bucket"))
            .with("objectOwnership", "BucketOwnerPreferred"),
        )?;
        let public_access = graph.add(
            ResourceSpec::new(
                ResourceKind::BucketPublicAccessBlock,
                "mediaPublicAccessBlock",
                name("${org}-${project}-foundation-${stack}-media-access"),
            )
            .with("bucket", PropertyValue::output(media_bucket, "bucket"))
            .with("blockPublicAcls", !foundation.media_bucket_public)
            .with("blockPublicPolicy", !foundation.media_bucket_public)
            .with("ignorePublicAcls", !foundation.media_bucket_public)
            .with("restrictPublicBuckets", !foundation.media_bucket_public),
        )?;
        graph.add(
            ResourceSpec::new(
                ResourceKind::BucketAcl,
                "mediaBucketAcl",
                name("${org}-${project}-foundation-${stack}-media-acl"),
            )
            .with("bucket", PropertyValue::output(media_bucket, "bucket"))
            .with(
                "acl",
                if foundation.media_bucket_public {
                    "public-read"
                } else {
                    "private"
                },
            )
            .after(ownership)
            .after(public_access),
        )?;

        Ok(FoundationPlan {
            stack,
            graph,
            nodes: FoundationNodes {
                vpc,
                private_subnets,
                app_security_group: app_sg,
                db_security_group: db_sg,
                database,
                connection_string,
                registry,
                cluster,
                load_balancer,
                listener,
                media_bucket,
                bastion,
            },
        })
    }

    /// Build (or rebuild) a foundation stack and publish its outputs.
    pub async fn build(&self, stack_name: &str, org: &str) -> Result<OutputContract> {
        let plan = self.plan(stack_name, org)?;
        info!(stack = %plan.stack, org = %org, resources = plan.graph.len(), "Building foundation");

        let FoundationPlan { stack, graph, nodes } = plan;
        let names = OutputNames::from_graph(&graph, &nodes)?;
        let (report, mut state) =
            apply_stack(&self.engine, self.store.as_ref(), &self.events, &stack, graph).await?;

        let outputs = publish(&report, &names)?;
        let contract = OutputContract::from_outputs(&stack.name, &outputs)?;
        state.outputs = outputs;
        self.store.save(&state).await?;

        info!(stack = %stack, listener = %contract.listener_id, "Foundation ready");
        Ok(contract)
    }

    /// Published outputs of a foundation stack, if it has been built.
    pub async fn outputs(&self, stack_name: &str) -> Result<Option<Outputs>> {
        let stack = Stack::foundation(stack_name)?;
        Ok(self
            .store
            .load(StackKind::Foundation, &stack.name)
            .await?
            .map(|state| state.outputs))
    }

    /// Destroy a foundation stack. Refused while application stacks still bind to it.
    pub async fn destroy(&self, stack_name: &str) -> Result<ApplyReport> {
        let stack = Stack::foundation(stack_name)?;
        let bound: Vec<String> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|s| s.kind == StackKind::Application)
            .filter(|s| s.foundation.as_deref() == Some(stack.name.as_str()))
            .map(|s| s.name)
            .collect();
        if !bound.is_empty() {
            return Err(Error::InvalidInput(format!(
                "foundation '{}' is still used by application stacks: {}",
                stack.name,
                bound.join(", ")
            )));
        }

        info!(stack = %stack, "Destroying foundation");
        destroy_stack(&self.engine, self.store.as_ref(), &self.events, &stack).await
    }
}

/// Logical names of the resources outputs are read from.
struct OutputNames {
    vpc: String,
    private_subnets: Vec<String>,
    app_security_group: String,
    db_security_group: String,
    database: String,
    connection_string: String,
    registry: String,
    cluster: String,
    load_balancer: String,
    listener: String,
    media_bucket: String,
    bastion: Option<String>,
}

impl OutputNames {
    fn from_graph(graph: &ResourceGraph, nodes: &FoundationNodes) -> Result<Self> {
        let name = |id: NodeId| -> Result<String> {
            graph
                .node(id)
                .map(|n| n.logical_name.clone())
                .ok_or_else(|| Error::Internal(format!("node {} missing from plan", id)))
        };
        Ok(Self {
            vpc: name(nodes.vpc)?,
            private_subnets: nodes
                .private_subnets
                .iter()
                .map(|id| name(*id))
                .collect::<Result<_>>()?,
            app_security_group: name(nodes.app_security_group)?,
            db_security_group: name(nodes.db_security_group)?,
            database: name(nodes.database)?,
            connection_string: name(nodes.connection_string)?,
            registry: name(nodes.registry)?,
            cluster: name(nodes.cluster)?,
            load_balancer: name(nodes.load_balancer)?,
            listener: name(nodes.listener)?,
            media_bucket: name(nodes.media_bucket)?,
            bastion: nodes.bastion.map(name).transpose()?,
        })
    }
}

fn publish(report: &ApplyReport, names: &OutputNames) -> Result<Outputs> {
    let attr = |resource: &str, attribute: &str| -> Result<String> {
        report
            .converged(resource)
            .and_then(|s| s.str_attribute(attribute))
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "converged resource '{}' has no '{}'",
                    resource, attribute
                ))
            })
    };
    let handle = |resource: &str| -> Result<String> {
        report
            .converged(resource)
            .map(|s| s.handle.clone())
            .ok_or_else(|| Error::Internal(format!("resource '{}' did not converge", resource)))
    };

    let mut outputs = Outputs::new();
    let mut text = |key: OutputKey, value: String| {
        outputs.insert(key.as_str().to_string(), OutputValue::Text(value));
    };
    text(OutputKey::ConnectionStringHandle, handle(&names.connection_string)?);
    text(OutputKey::RegistryUrl, attr(&names.registry, "repositoryUrl")?);
    text(OutputKey::ClusterId, handle(&names.cluster)?);
    text(OutputKey::ListenerId, handle(&names.listener)?);
    text(OutputKey::LoadBalancerVpcId, attr(&names.vpc, "id")?);
    text(OutputKey::AppSecurityGroupId, attr(&names.app_security_group, "id")?);
    text(OutputKey::DbEndpoint, attr(&names.database, "endpoint")?);
    text(
        OutputKey::AppUrl,
        format!("http://{}", attr(&names.load_balancer, "dnsName")?),
    );
    text(OutputKey::MediaBucketName, attr(&names.media_bucket, "bucket")?);
    text(OutputKey::DbSecurityGroupId, attr(&names.db_security_group, "id")?);
    if let Some(bastion) = &names.bastion {
        text(OutputKey::BastionInstanceId, attr(bastion, "id")?);
    }

    let subnets = names
        .private_subnets
        .iter()
        .map(|s| attr(s, "id"))
        .collect::<Result<Vec<_>>>()?;
    outputs.insert(
        OutputKey::PrivateSubnetIds.as_str().to_string(),
        OutputValue::List(subnets),
    );
    Ok(outputs)
}

fn security_group(logical: &str, physical: String, vpc: NodeId) -> ResourceSpec {
    ResourceSpec::new(ResourceKind::SecurityGroup, logical, physical)
        .with("vpcId", PropertyValue::output(vpc, "id"))
}

fn ingress_from_cidr(port: u16) -> PropertyValue {
    PropertyValue::map([
        ("protocol", PropertyValue::from("tcp")),
        ("fromPort", PropertyValue::from(port)),
        ("toPort", PropertyValue::from(port)),
        ("cidrBlocks", PropertyValue::list([ANYWHERE])),
    ])
}

fn ingress_from_group(port: u16, group: NodeId) -> PropertyValue {
    PropertyValue::map([
        ("protocol", PropertyValue::from("tcp")),
        ("fromPort", PropertyValue::from(port)),
        ("toPort", PropertyValue::from(port)),
        ("securityGroups", PropertyValue::list([PropertyValue::output(group, "id")])),
    ])
}

fn egress_all() -> PropertyValue {
    PropertyValue::map([
        ("protocol", PropertyValue::from("-1")),
        ("fromPort", PropertyValue::from(0u16)),
        ("toPort", PropertyValue::from(0u16)),
        ("cidrBlocks", PropertyValue::list([ANYWHERE])),
    ])
}

pub(crate) fn assume_role_policy(service: &str) -> PropertyValue {
    PropertyValue::from_json(&json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    }))
}

fn literal(s: impl Into<String>) -> TemplatePart {
    TemplatePart::Literal(s.into())
}

fn reference(node: NodeId, attribute: &str) -> TemplatePart {
    TemplatePart::Ref(OutputRef {
        node,
        attribute: attribute.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_backend::{MemoryCloud, MemoryStateStore};
    use keel_core::stack::StackStatus;

    fn builder(cloud: Arc<MemoryCloud>, store: Arc<MemoryStateStore>) -> FoundationBuilder {
        let mut config = ProjectConfig::default();
        config.project = "blog".to_string();
        FoundationBuilder::new(config, ConvergenceEngine::new(cloud), store)
    }

    #[test]
    fn test_plan_orders_network_before_database() {
        let builder = builder(Arc::new(MemoryCloud::new()), Arc::new(MemoryStateStore::new()));
        let plan = builder.plan("foundation-prod", "acme").unwrap();
        let waves = plan.graph.waves().unwrap();
        let wave_of = |id: NodeId| waves.iter().position(|w| w.contains(&id)).unwrap();

        assert!(wave_of(plan.nodes.vpc) < wave_of(plan.nodes.db_security_group));
        assert!(wave_of(plan.nodes.db_security_group) < wave_of(plan.nodes.database));
        // Registry and cluster do not wait for the network.
        assert_eq!(wave_of(plan.nodes.registry), 0);
        assert_eq!(wave_of(plan.nodes.cluster), 0);
    }

    #[test]
    fn test_plan_names_are_deterministic() {
        let builder = builder(Arc::new(MemoryCloud::new()), Arc::new(MemoryStateStore::new()));
        let a = builder.plan("foundation-prod", "acme").unwrap();
        let b = builder.plan("foundation-prod", "acme").unwrap();
        let names = |p: &FoundationPlan| {
            p.graph
                .nodes()
                .map(|(_, n)| n.physical_name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&a), names(&b));

        let lb = a.graph.node(a.nodes.load_balancer).unwrap();
        assert_eq!(lb.physical_name, "acme-foundation-foundation-prod-lb");
        let secret = a.graph.node(a.nodes.connection_string).unwrap();
        assert_eq!(
            secret.physical_name,
            "acme/foundation/foundation-prod/connectionString"
        );
    }

    #[test]
    fn test_bastion_is_optional() {
        let mut config = ProjectConfig::default();
        config.foundation.bastion.enabled = false;
        let builder = FoundationBuilder::new(
            config,
            ConvergenceEngine::new(Arc::new(MemoryCloud::new())),
            Arc::new(MemoryStateStore::new()),
        );
        let plan = builder.plan("f", "acme").unwrap();
        assert!(plan.nodes.bastion.is_none());
        assert!(plan.graph.find("bastionSecurityGroup").is_none());
    }

    #[tokio::test]
    async fn test_build_publishes_every_output() {
        let cloud = Arc::new(MemoryCloud::new());
        let store = Arc::new(MemoryStateStore::new());
        let builder = builder(cloud.clone(), store.clone());

        let contract = builder.build("foundation-prod", "acme").await.unwrap();
        let outputs = builder.outputs("foundation-prod").await.unwrap().unwrap();

        for key in OutputKey::REQUIRED {
            assert!(!outputs[key.as_str()].is_empty(), "missing {}", key);
        }
        for key in ["dbEndpoint", "appUrl", "mediaBucketName", "dbSecurityGroupId", "bastionInstanceId"] {
            assert!(outputs.contains_key(key), "missing {}", key);
        }
        assert_eq!(contract.private_subnet_ids.len(), 2);

        let state = store
            .load(StackKind::Foundation, "foundation-prod")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, StackStatus::Ready);
    }

    #[tokio::test]
    async fn test_connection_string_is_only_published_by_handle() {
        let cloud = Arc::new(MemoryCloud::new());
        let store = Arc::new(MemoryStateStore::new());
        let contract = builder(cloud.clone(), store.clone())
            .build("foundation-prod", "acme")
            .await
            .unwrap();

        let url = cloud
            .secret_value(contract.connection_string_handle.as_str())
            .unwrap()
            .unwrap();
        assert!(url.starts_with("postgresql://postgres:"));
        assert!(url.ends_with(":5432/app"));

        let state = store
            .load(StackKind::Foundation, "foundation-prod")
            .await
            .unwrap()
            .unwrap();
        let persisted = serde_json::to_string(&state).unwrap();
        assert!(!persisted.contains(&url));
    }

    #[tokio::test]
    async fn test_failed_resource_keeps_partial_state_and_rebuild_recovers() {
        let cloud = Arc::new(MemoryCloud::new());
        let store = Arc::new(MemoryStateStore::new());
        let builder = builder(cloud.clone(), store.clone());

        cloud.fail_on("acme-foundation-foundation-prod-db").unwrap();
        let err = builder.build("foundation-prod", "acme").await.unwrap_err();
        match &err {
            Error::ConvergenceFailed { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].resource, "database");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let partial = store
            .load(StackKind::Foundation, "foundation-prod")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(partial.status, StackStatus::Partial);
        assert!(partial.resource("registry").is_some());
        assert!(partial.resource("database").is_none());
        assert!(partial.outputs.is_empty());

        cloud.clear_faults().unwrap();
        builder.build("foundation-prod", "acme").await.unwrap();
        let healed = store
            .load(StackKind::Foundation, "foundation-prod")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(healed.status, StackStatus::Ready);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let cloud = Arc::new(MemoryCloud::new());
        let store = Arc::new(MemoryStateStore::new());
        let builder = builder(cloud.clone(), store.clone());
        builder.build("foundation-prod", "acme").await.unwrap();

        let report = builder.destroy("foundation-prod").await.unwrap();
        assert!(report.success());
        assert_eq!(cloud.resource_count().unwrap(), 0);
        assert!(builder.outputs("foundation-prod").await.unwrap().is_none());
        assert!(matches!(
            builder.destroy("foundation-prod").await,
            Err(Error::NotFound(_))
        ));
    }
}
