//! Application stack builder.
//!
//! An application stack owns a container image, a target group, one rule on
//! the foundation's shared listener, an execution role and a compute service.
//! Everything it knows about the foundation comes from the output contract.

use keel_config::{NameContext, ProjectConfig};
use keel_core::contract::OutputContract;
use keel_core::resource::{NodeId, PropertyValue, ResourceKind, ResourceSpec};
use keel_core::routing::RoutingRule;
use keel_core::stack::{Stack, StackKind};
use keel_core::state::StateStore;
use keel_core::{Error, Result};
use keel_engine::{ApplyEvent, ApplyReport, ConvergenceEngine, ResourceGraph};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::apply::{EventSink, apply_stack, destroy_stack};
use crate::foundation::assume_role_policy;
use crate::resolver::StackResolver;
use crate::routing::RuleGenerator;

const TASK_EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";

/// A deployed application stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub stack: String,
    pub service_handle: String,
    pub target_group_ref: String,
    pub image_uri: String,
    /// The rule registered on the foundation's listener.
    pub rule: RoutingRule,
}

/// Node ids of the resources a deployment reports on.
#[derive(Debug, Clone, Copy)]
struct ApplicationNodes {
    image: NodeId,
    target_group: NodeId,
    service: NodeId,
}

/// Deploys and destroys application stacks.
pub struct ApplicationBuilder {
    config: ProjectConfig,
    engine: ConvergenceEngine,
    store: Arc<dyn StateStore>,
    resolver: StackResolver,
    rules: RuleGenerator,
    events: EventSink,
}

impl ApplicationBuilder {
    pub fn new(config: ProjectConfig, engine: ConvergenceEngine, store: Arc<dyn StateStore>) -> Self {
        let rules = RuleGenerator::new(config.production_stack.clone());
        Self {
            config,
            engine,
            resolver: StackResolver::new(store.clone()),
            store,
            rules,
            events: None,
        }
    }

    /// Forward apply events to `tx` while deploying.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ApplyEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn rules(&self) -> &RuleGenerator {
        &self.rules
    }

    /// Resolve `foundation`'s outputs, then deploy. Nothing is created if resolution fails.
    pub async fn deploy_from(&self, stack_name: &str, foundation: &str) -> Result<Deployment> {
        let contract = self.resolver.resolve_contract(foundation).await?;
        self.deploy(stack_name, &contract).await
    }

    /// Deploy (or redeploy) `stack_name` against a resolved foundation contract.
    pub async fn deploy(&self, stack_name: &str, contract: &OutputContract) -> Result<Deployment> {
        let stack = Stack::application(stack_name, &contract.stack)?;
        let (graph, nodes) = self.plan(&stack, contract)?;
        info!(stack = %stack, foundation = %contract.stack, resources = graph.len(), "Deploying application");

        let names = [nodes.image, nodes.target_group, nodes.service].map(|id| {
            graph
                .node(id)
                .map(|n| n.logical_name.clone())
                .unwrap_or_default()
        });
        let (report, state) =
            apply_stack(&self.engine, self.store.as_ref(), &self.events, &stack, graph).await?;
        self.store.save(&state).await?;

        let converged = |name: &str| {
            report
                .converged(name)
                .ok_or_else(|| Error::Internal(format!("resource '{}' did not converge", name)))
        };
        let [image, target_group, service] = &names;
        let image_uri = converged(image.as_str())?
            .str_attribute("imageUri")
            .unwrap_or_default()
            .to_string();
        let target_group_ref = converged(target_group.as_str())?.handle.clone();
        let service_handle = converged(service.as_str())?.handle.clone();

        let deployment = Deployment {
            stack: stack.name.clone(),
            rule: self.rules.rule_for(&stack.name, target_group_ref.clone()),
            service_handle,
            target_group_ref,
            image_uri,
        };
        info!(stack = %stack, service = %deployment.service_handle, rule = %deployment.rule.condition, "Application deployed");
        Ok(deployment)
    }

    /// Remove every resource of an application stack, its routing rule included.
    pub async fn destroy(&self, stack_name: &str) -> Result<ApplyReport> {
        let Some(state) = self
            .store
            .load(StackKind::Application, stack_name)
            .await?
        else {
            return Err(Error::NotFound(format!("application stack '{}'", stack_name)));
        };
        info!(stack = %state.stack, "Destroying application");
        destroy_stack(&self.engine, self.store.as_ref(), &self.events, &state.stack).await
    }

    fn plan(&self, stack: &Stack, contract: &OutputContract) -> Result<(ResourceGraph, ApplicationNodes)> {
        let ctx = NameContext::new(
            self.config.org.clone().unwrap_or_default(),
            &self.config.project,
            &stack.name,
        )
        .with_foundation(&contract.stack);
        let name = |template: &str| ctx.resource_name(template);
        let app = &self.config.application;
        let container = &app.container;
        let health = &app.health_check;
        let mut graph = ResourceGraph::new();

        let image = graph.add(
            ResourceSpec::new(ResourceKind::ContainerImage, "image", name("${project}-${stack}"))
                .with("repositoryUrl", contract.registry_url.as_str())
                .with("context", app.image.context.as_str())
                .with("platform", app.image.platform.as_str())
                .with("tag", app.image.tag.as_str()),
        )?;

        let target_group = graph.add(
            ResourceSpec::new(
                ResourceKind::TargetGroup,
                "targetGroup",
                name("${project}-${stack}-tg"),
            )
            .with("port", container.port)
            .with("protocol", "HTTP")
            .with("targetType", "ip")
            .with("vpcId", contract.load_balancer_vpc_id.as_str())
            .with(
                "healthCheck",
                PropertyValue::map([
                    ("path", PropertyValue::from(health.path.as_str())),
                    ("interval", PropertyValue::from(health.interval_seconds)),
                    ("timeout", PropertyValue::from(health.timeout_seconds)),
                    ("healthyThreshold", PropertyValue::from(health.healthy_threshold)),
                    ("unhealthyThreshold", PropertyValue::from(health.unhealthy_threshold)),
                ]),
            ),
        )?;

        // The target group handle is only known once it converges.
        let rule = self.rules.rule_for(&stack.name, String::new());
        let mut listener_rule = ResourceSpec::new(
            ResourceKind::ListenerRule,
            "listenerRule",
            name("${project}-${stack}-rule"),
        )
        .with("listenerArn", contract.listener_id.as_str());
        for (key, value) in rule.to_properties() {
            listener_rule = listener_rule.with(key, PropertyValue::from_json(&value));
        }
        let listener_rule = graph.add(
            listener_rule.with("targetGroupArn", PropertyValue::output(target_group, "arn")),
        )?;

        let role = graph.add(
            ResourceSpec::new(
                ResourceKind::IamRole,
                "executionRole",
                name("${project}-${stack}-app-execution-role"),
            )
            .with("assumeRolePolicy", assume_role_policy("ecs-tasks.amazonaws.com")),
        )?;
        let policy_attachment = graph.add(
            ResourceSpec::new(
                ResourceKind::RolePolicyAttachment,
                "executionRolePolicy",
                name("${project}-${stack}-app-execution-policy"),
            )
            .with("role", PropertyValue::output(role, "name"))
            .with("policyArn", TASK_EXECUTION_POLICY_ARN),
        )?;
        let secret_policy = graph.add(
            ResourceSpec::new(
                ResourceKind::RolePolicy,
                "secretAccessPolicy",
                name("${project}-${stack}-app-secret-access"),
            )
            .with("role", PropertyValue::output(role, "name"))
            .with("policy", secret_access_policy(contract)),
        )?;

        let environment: Vec<PropertyValue> = app
            .env
            .iter()
            .map(|(k, v)| {
                PropertyValue::map([
                    ("name", PropertyValue::from(k.as_str())),
                    ("value", PropertyValue::from(v.as_str())),
                ])
            })
            .collect();

        let container_definition = PropertyValue::map([
            ("name", PropertyValue::from(container.name.as_str())),
            ("image", PropertyValue::output(image, "imageUri")),
            ("essential", PropertyValue::from(true)),
            (
                "portMappings",
                PropertyValue::list([PropertyValue::map([
                    ("containerPort", PropertyValue::from(container.port)),
                    ("targetGroupArn", PropertyValue::output(target_group, "arn")),
                ])]),
            ),
            ("environment", PropertyValue::List(environment)),
            (
                "secrets",
                PropertyValue::list([PropertyValue::map([
                    ("name", PropertyValue::from(app.connection_string_env.as_str())),
                    (
                        "valueFrom",
                        PropertyValue::from(contract.connection_string_handle.as_str()),
                    ),
                ])]),
            ),
        ]);

        let service = graph.add(
            ResourceSpec::new(
                ResourceKind::ComputeService,
                "service",
                name("${project}-app-${stack}"),
            )
            .with("cluster", contract.cluster_id.as_str())
            .with("launchType", "FARGATE")
            .with("desiredCount", container.desired_count)
            .with(
                "networkConfiguration",
                PropertyValue::map([
                    (
                        "subnets",
                        PropertyValue::list(contract.private_subnet_ids.iter().map(String::as_str)),
                    ),
                    (
                        "securityGroups",
                        PropertyValue::list([contract.app_security_group_id.as_str()]),
                    ),
                    ("assignPublicIp", PropertyValue::from(false)),
                ]),
            )
            .with(
                "taskDefinition",
                PropertyValue::map([
                    ("cpu", PropertyValue::from(container.cpu)),
                    ("memory", PropertyValue::from(container.memory)),
                    ("executionRoleArn", PropertyValue::output(role, "arn")),
                    ("containers", PropertyValue::list([container_definition])),
                ]),
            )
            .after(listener_rule)
            .after(policy_attachment)
            .after(secret_policy),
        )?;

        Ok((
            graph,
            ApplicationNodes {
                image,
                target_group,
                service,
            },
        ))
    }
}

/// Read access to exactly the foundation's connection-string secret.
fn secret_access_policy(contract: &OutputContract) -> PropertyValue {
    PropertyValue::from_json(&json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["secretsmanager:GetSecretValue"],
            "Resource": [contract.connection_string_handle.as_str()],
        }],
    }))
}
