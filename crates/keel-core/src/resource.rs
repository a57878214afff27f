//! Resource specifications and converged resource states.
//!
//! A [`ResourceSpec`] is a desired resource whose properties may refer to
//! outputs of other resources in the same graph. Once every reference has
//! been satisfied it becomes a [`ResolvedResource`], which a backend turns
//! into a [`ResourceState`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The resource types Keel knows how to declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    DbSubnetGroup,
    SecurityGroup,
    SecurityGroupRule,
    RandomPassword,
    DatabaseCluster,
    Secret,
    SecretVersion,
    ContainerRegistry,
    ComputeCluster,
    IamRole,
    RolePolicyAttachment,
    RolePolicy,
    InstanceProfile,
    Instance,
    LoadBalancer,
    Listener,
    Bucket,
    BucketOwnershipControls,
    BucketPublicAccessBlock,
    BucketAcl,
    ContainerImage,
    TargetGroup,
    ListenerRule,
    ComputeService,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::DbSubnetGroup => "db_subnet_group",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::SecurityGroupRule => "security_group_rule",
            ResourceKind::RandomPassword => "random_password",
            ResourceKind::DatabaseCluster => "database_cluster",
            ResourceKind::Secret => "secret",
            ResourceKind::SecretVersion => "secret_version",
            ResourceKind::ContainerRegistry => "container_registry",
            ResourceKind::ComputeCluster => "compute_cluster",
            ResourceKind::IamRole => "iam_role",
            ResourceKind::RolePolicyAttachment => "role_policy_attachment",
            ResourceKind::RolePolicy => "role_policy",
            ResourceKind::InstanceProfile => "instance_profile",
            ResourceKind::Instance => "instance",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::Listener => "listener",
            ResourceKind::Bucket => "bucket",
            ResourceKind::BucketOwnershipControls => "bucket_ownership_controls",
            ResourceKind::BucketPublicAccessBlock => "bucket_public_access_block",
            ResourceKind::BucketAcl => "bucket_acl",
            ResourceKind::ContainerImage => "container_image",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::ListenerRule => "listener_rule",
            ResourceKind::ComputeService => "compute_service",
        }
    }

    /// Service segment used when deriving ARN-like handles.
    pub fn service(&self) -> &'static str {
        match self {
            ResourceKind::Vpc
            | ResourceKind::Subnet
            | ResourceKind::SecurityGroup
            | ResourceKind::SecurityGroupRule
            | ResourceKind::Instance => "ec2",
            ResourceKind::DbSubnetGroup | ResourceKind::DatabaseCluster => "rds",
            ResourceKind::RandomPassword => "random",
            ResourceKind::Secret | ResourceKind::SecretVersion => "secretsmanager",
            ResourceKind::ContainerRegistry | ResourceKind::ContainerImage => "ecr",
            ResourceKind::ComputeCluster | ResourceKind::ComputeService => "ecs",
            ResourceKind::IamRole
            | ResourceKind::RolePolicyAttachment
            | ResourceKind::RolePolicy
            | ResourceKind::InstanceProfile => "iam",
            ResourceKind::LoadBalancer
            | ResourceKind::Listener
            | ResourceKind::TargetGroup
            | ResourceKind::ListenerRule => "elasticloadbalancing",
            ResourceKind::Bucket
            | ResourceKind::BucketOwnershipControls
            | ResourceKind::BucketPublicAccessBlock
            | ResourceKind::BucketAcl => "s3",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a node inside a resource graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to an attribute published by another resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub attribute: String,
}

/// A piece of a string template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplatePart {
    Literal(String),
    Ref(OutputRef),
}

/// Desired value of a resource property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Bool(bool),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    Ref(OutputRef),
    Template(Vec<TemplatePart>),
    /// Marks the wrapped value as secret material.
    Secret(Box<PropertyValue>),
}

impl PropertyValue {
    pub fn output(node: NodeId, attribute: impl Into<String>) -> Self {
        PropertyValue::Ref(OutputRef {
            node,
            attribute: attribute.into(),
        })
    }

    pub fn secret(value: PropertyValue) -> Self {
        PropertyValue::Secret(Box::new(value))
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<PropertyValue>,
    {
        PropertyValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<PropertyValue>,
    {
        PropertyValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// All nodes this value refers to, in order of appearance.
    pub fn refs(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs(&self, out: &mut Vec<NodeId>) {
        match self {
            PropertyValue::Ref(r) => out.push(r.node),
            PropertyValue::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Ref(r) = part {
                        out.push(r.node);
                    }
                }
            }
            PropertyValue::List(items) => items.iter().for_each(|i| i.collect_refs(out)),
            PropertyValue::Map(entries) => entries.values().for_each(|v| v.collect_refs(out)),
            PropertyValue::Secret(inner) => inner.collect_refs(out),
            PropertyValue::String(_) | PropertyValue::Integer(_) | PropertyValue::Bool(_) => {}
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, PropertyValue::Secret(_))
    }

    /// Convert literal JSON. Nulls become empty strings, non-integer numbers become strings.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => PropertyValue::String(String::new()),
            Value::Bool(b) => PropertyValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Integer(i),
                None => PropertyValue::String(n.to_string()),
            },
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::Array(items) => PropertyValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(entries) => PropertyValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Integer(n)
    }
}

impl From<u16> for PropertyValue {
    fn from(n: u16) -> Self {
        PropertyValue::Integer(i64::from(n))
    }
}

impl From<u32> for PropertyValue {
    fn from(n: u32) -> Self {
        PropertyValue::Integer(i64::from(n))
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

/// A desired resource in a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    /// Name of the resource inside its stack.
    pub logical_name: String,
    /// Name of the resource in the cloud, derived from org and stack.
    pub physical_name: String,
    pub properties: BTreeMap<String, PropertyValue>,
    /// Ordering constraints not expressed through property references.
    pub depends_on: Vec<NodeId>,
}

impl ResourceSpec {
    pub fn new(
        kind: ResourceKind,
        logical_name: impl Into<String>,
        physical_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
            physical_name: physical_name.into(),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn after(mut self, node: NodeId) -> Self {
        if !self.depends_on.contains(&node) {
            self.depends_on.push(node);
        }
        self
    }

    /// Every node this spec depends on, through references or explicit ordering.
    pub fn dependencies(&self) -> Vec<NodeId> {
        let mut deps = self.depends_on.clone();
        for value in self.properties.values() {
            for node in value.refs() {
                if !deps.contains(&node) {
                    deps.push(node);
                }
            }
        }
        deps
    }
}

/// A property value with every reference replaced by a concrete value.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "visibility", content = "value", rename_all = "lowercase")]
pub enum ResolvedValue {
    Plain(Value),
    Secret(Value),
}

impl ResolvedValue {
    pub fn value(&self) -> &Value {
        match self {
            ResolvedValue::Plain(v) | ResolvedValue::Secret(v) => v,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value().as_str()
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, ResolvedValue::Secret(_))
    }
}

impl std::fmt::Debug for ResolvedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedValue::Plain(v) => write!(f, "{}", v),
            ResolvedValue::Secret(_) => write!(f, "[secret]"),
        }
    }
}

/// A resource ready to be handed to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResource {
    pub kind: ResourceKind,
    pub logical_name: String,
    pub physical_name: String,
    pub properties: BTreeMap<String, ResolvedValue>,
    /// Logical names of the resources this one depends on.
    pub depends_on: Vec<String>,
}

impl ResolvedResource {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).map(|v| v.value())
    }

    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(|v| v.as_str())
    }
}

/// A resource as it exists after converging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub logical_name: String,
    pub physical_name: String,
    /// Opaque ARN-like handle assigned by the backend.
    pub handle: String,
    /// Attributes other resources may reference.
    pub attributes: BTreeMap<String, Value>,
    /// Secret attributes. Never persisted; backends hand them back on upsert.
    #[serde(skip)]
    pub sensitive: BTreeMap<String, Value>,
    /// Logical names of the resources this one depends on.
    pub depends_on: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    /// Look up an attribute, including sensitive ones.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes
            .get(name)
            .or_else(|| self.sensitive.get(name))
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        !self.attributes.contains_key(name) && self.sensitive.contains_key(name)
    }

    pub fn str_attribute(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(|v| v.as_str())
    }
}
