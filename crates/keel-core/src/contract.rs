//! The output contract between foundation and application stacks.
//!
//! A foundation stack publishes a flat mapping of output names to values.
//! Application stacks consume it through [`OutputContract`], which only
//! exists once every required key is present and non-empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::secret::SecretHandle;
use crate::{Error, Result};

/// Outputs a foundation stack publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputKey {
    ConnectionStringHandle,
    RegistryUrl,
    ClusterId,
    ListenerId,
    LoadBalancerVpcId,
    AppSecurityGroupId,
    PrivateSubnetIds,
    DbEndpoint,
    AppUrl,
    MediaBucketName,
    DbSecurityGroupId,
    BastionInstanceId,
}

impl OutputKey {
    /// Keys an application stack needs, in resolution order.
    pub const REQUIRED: [OutputKey; 7] = [
        OutputKey::ConnectionStringHandle,
        OutputKey::RegistryUrl,
        OutputKey::ClusterId,
        OutputKey::ListenerId,
        OutputKey::LoadBalancerVpcId,
        OutputKey::AppSecurityGroupId,
        OutputKey::PrivateSubnetIds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKey::ConnectionStringHandle => "connectionStringHandle",
            OutputKey::RegistryUrl => "registryUrl",
            OutputKey::ClusterId => "clusterId",
            OutputKey::ListenerId => "listenerId",
            OutputKey::LoadBalancerVpcId => "loadBalancerVpcId",
            OutputKey::AppSecurityGroupId => "appSecurityGroupId",
            OutputKey::PrivateSubnetIds => "privateSubnetIds",
            OutputKey::DbEndpoint => "dbEndpoint",
            OutputKey::AppUrl => "appUrl",
            OutputKey::MediaBucketName => "mediaBucketName",
            OutputKey::DbSecurityGroupId => "dbSecurityGroupId",
            OutputKey::BastionInstanceId => "bastionInstanceId",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, OutputKey::PrivateSubnetIds)
    }
}

impl std::fmt::Display for OutputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published output value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Text(String),
    List(Vec<String>),
}

impl OutputValue {
    /// Empty strings, empty lists and lists containing an empty string all count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            OutputValue::Text(s) => s.trim().is_empty(),
            OutputValue::List(items) => {
                items.is_empty() || items.iter().any(|s| s.trim().is_empty())
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutputValue::Text(s) => Some(s),
            OutputValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            OutputValue::List(items) => Some(items),
            OutputValue::Text(_) => None,
        }
    }
}

impl std::fmt::Display for OutputValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputValue::Text(s) => f.write_str(s),
            OutputValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

/// Published outputs of a stack, keyed by output name.
pub type Outputs = BTreeMap<String, OutputValue>;

/// Check that every key is present and non-empty, failing on the first that is not.
pub fn require_keys(stack: &str, outputs: &Outputs, keys: &[OutputKey]) -> Result<()> {
    for key in keys {
        match outputs.get(key.as_str()) {
            Some(value) if !value.is_empty() => {}
            _ => return Err(Error::missing_output(stack, key.as_str())),
        }
    }
    Ok(())
}

/// The validated set of foundation outputs an application stack binds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputContract {
    /// Name of the foundation stack that published these values.
    pub stack: String,
    pub connection_string_handle: SecretHandle,
    pub registry_url: String,
    pub cluster_id: String,
    pub listener_id: String,
    pub load_balancer_vpc_id: String,
    pub app_security_group_id: String,
    pub private_subnet_ids: Vec<String>,
}

impl OutputContract {
    /// Build a contract from raw outputs. Partial contracts are rejected.
    pub fn from_outputs(stack: &str, outputs: &Outputs) -> Result<Self> {
        require_keys(stack, outputs, &OutputKey::REQUIRED)?;

        let text = |key: OutputKey| -> Result<String> {
            outputs
                .get(key.as_str())
                .and_then(|v| v.as_text())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "output '{}' of stack '{}' must be a single value",
                        key, stack
                    ))
                })
        };

        let private_subnet_ids = outputs
            .get(OutputKey::PrivateSubnetIds.as_str())
            .and_then(|v| v.as_list())
            .map(<[String]>::to_vec)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "output '{}' of stack '{}' must be a list",
                    OutputKey::PrivateSubnetIds,
                    stack
                ))
            })?;

        Ok(Self {
            stack: stack.to_string(),
            connection_string_handle: SecretHandle::parse(text(
                OutputKey::ConnectionStringHandle,
            )?)?,
            registry_url: text(OutputKey::RegistryUrl)?,
            cluster_id: text(OutputKey::ClusterId)?,
            listener_id: text(OutputKey::ListenerId)?,
            load_balancer_vpc_id: text(OutputKey::LoadBalancerVpcId)?,
            app_security_group_id: text(OutputKey::AppSecurityGroupId)?,
            private_subnet_ids,
        })
    }

    pub fn to_outputs(&self) -> Outputs {
        let mut outputs = Outputs::new();
        let mut put = |key: OutputKey, value: &str| {
            outputs.insert(key.as_str().to_string(), OutputValue::Text(value.to_string()));
        };
        put(
            OutputKey::ConnectionStringHandle,
            self.connection_string_handle.as_str(),
        );
        put(OutputKey::RegistryUrl, &self.registry_url);
        put(OutputKey::ClusterId, &self.cluster_id);
        put(OutputKey::ListenerId, &self.listener_id);
        put(OutputKey::LoadBalancerVpcId, &self.load_balancer_vpc_id);
        put(OutputKey::AppSecurityGroupId, &self.app_security_group_id);
        outputs.insert(
            OutputKey::PrivateSubnetIds.as_str().to_string(),
            OutputValue::List(self.private_subnet_ids.clone()),
        );
        outputs
    }
}
