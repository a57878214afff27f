//! In-memory cloud backend.
//!
//! Resources are keyed by kind and physical name, so repeated upserts land on
//! the same object. Handles, endpoints and URLs are derived from SHA-256 of
//! that key and are stable across runs and processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::backend::CloudBackend;
use keel_core::resource::{ResolvedResource, ResourceKind, ResourceState};
use keel_core::routing::{RoutingRule, validate_listener};
use keel_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const REGION: &str = "local-1";
const DEFAULT_PASSWORD_LENGTH: usize = 24;
const FIRST_AUTO_PRIORITY: u32 = 1000;

/// A resource held by the in-memory cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CloudObject {
    kind: ResourceKind,
    physical_name: String,
    handle: String,
    attributes: BTreeMap<String, Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inventory {
    objects: BTreeMap<String, CloudObject>,
    /// Secret values keyed by secret handle.
    vault: BTreeMap<String, String>,
    /// Generated passwords keyed by object key.
    passwords: BTreeMap<String, String>,
    #[serde(skip)]
    faults: BTreeSet<String>,
}

/// Deterministic in-process cloud.
#[derive(Debug, Default)]
pub struct MemoryCloud {
    inner: Mutex<Inventory>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`MemoryCloud::save`]. A missing file yields an empty cloud.
    pub async fn load(path: &Path) -> Result<Self> {
        let inventory = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Inventory::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            inner: Mutex::new(inventory),
        })
    }

    /// Write a JSON snapshot of the whole cloud.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = {
            let inventory = self.inventory()?;
            serde_json::to_vec_pretty(&*inventory)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Make every upsert and delete of `physical_name` fail.
    pub fn fail_on(&self, physical_name: impl Into<String>) -> Result<()> {
        self.inventory()?.faults.insert(physical_name.into());
        Ok(())
    }

    pub fn clear_faults(&self) -> Result<()> {
        self.inventory()?.faults.clear();
        Ok(())
    }

    pub fn contains(&self, kind: ResourceKind, physical_name: &str) -> Result<bool> {
        Ok(self
            .inventory()?
            .objects
            .contains_key(&object_key(kind, physical_name)))
    }

    pub fn resource_count(&self) -> Result<usize> {
        Ok(self.inventory()?.objects.len())
    }

    /// Read a secret the way a running workload would, by handle.
    pub fn secret_value(&self, handle: &str) -> Result<Option<String>> {
        Ok(self.inventory()?.vault.get(handle).cloned())
    }

    fn inventory(&self) -> Result<MutexGuard<'_, Inventory>> {
        self.inner
            .lock()
            .map_err(|_| Error::Internal("memory cloud lock poisoned".to_string()))
    }

    fn upsert_locked(
        &self,
        inventory: &mut Inventory,
        resource: &ResolvedResource,
        prior: Option<&ResourceState>,
    ) -> Result<ResourceState> {
        let key = object_key(resource.kind, &resource.physical_name);
        if inventory.faults.contains(&resource.physical_name) {
            return Err(Error::ResourceConvergence {
                resource: resource.logical_name.clone(),
                message: format!("injected fault for {}", resource.physical_name),
            });
        }

        let handle = handle_for(resource.kind, &resource.physical_name);
        let mut attributes: BTreeMap<String, Value> = resource
            .properties
            .iter()
            .filter(|(_, v)| !v.is_secret())
            .map(|(k, v)| (k.clone(), v.value().clone()))
            .collect();
        attributes.insert("id".to_string(), json!(id_for(resource.kind, &resource.physical_name)));
        attributes.insert("arn".to_string(), json!(handle));
        attributes.insert("name".to_string(), json!(resource.physical_name));

        let mut sensitive = BTreeMap::new();
        let digest = digest(&key);

        match resource.kind {
            ResourceKind::RandomPassword => {
                let length = resource
                    .property("length")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_PASSWORD_LENGTH);
                let password = inventory
                    .passwords
                    .entry(key.clone())
                    .or_insert_with(|| generate_password(length))
                    .clone();
                sensitive.insert("result".to_string(), json!(password));
            }
            ResourceKind::DatabaseCluster => {
                for required in ["masterUsername", "masterPassword", "databaseName"] {
                    if resource.property(required).is_none() {
                        return Err(invalid(resource, format!("missing '{}'", required)));
                    }
                }
                if resource
                    .properties
                    .get("masterPassword")
                    .is_some_and(|v| !v.is_secret())
                {
                    return Err(invalid(resource, "master password must be secret".to_string()));
                }
                let port = resource.property("port").and_then(Value::as_u64).unwrap_or(5432);
                attributes.insert(
                    "endpoint".to_string(),
                    json!(format!(
                        "{}.cluster-{}.{}.rds.keel.internal",
                        resource.physical_name,
                        &digest[..12],
                        REGION
                    )),
                );
                attributes.insert("port".to_string(), json!(port));
            }
            ResourceKind::SecretVersion => {
                let secret_id = resource
                    .str_property("secretId")
                    .ok_or_else(|| invalid(resource, "missing 'secretId'".to_string()))?
                    .to_string();
                let exists = inventory
                    .objects
                    .values()
                    .any(|o| o.kind == ResourceKind::Secret && o.handle == secret_id);
                if !exists {
                    return Err(invalid(resource, format!("secret {} does not exist", secret_id)));
                }
                let value = resource
                    .properties
                    .get("secretString")
                    .ok_or_else(|| invalid(resource, "missing 'secretString'".to_string()))?;
                let text = match value.value() {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                inventory.vault.insert(secret_id.clone(), text);
                attributes.insert("versionId".to_string(), json!(&digest[..16]));
            }
            ResourceKind::ContainerRegistry => {
                attributes.insert(
                    "repositoryUrl".to_string(),
                    json!(format!(
                        "{}.dkr.ecr.{}.keel.internal/{}",
                        &digest[..12],
                        REGION,
                        resource.physical_name
                    )),
                );
            }
            ResourceKind::ContainerImage => {
                let repository = resource
                    .str_property("repositoryUrl")
                    .ok_or_else(|| invalid(resource, "missing 'repositoryUrl'".to_string()))?;
                let tag = resource.str_property("tag").unwrap_or("latest");
                let context = resource.str_property("context").unwrap_or(".");
                let image_digest = self::digest(&format!("{}:{}:{}", repository, context, tag));
                attributes.insert("imageUri".to_string(), json!(format!("{}:{}", repository, tag)));
                attributes.insert("digest".to_string(), json!(format!("sha256:{}", image_digest)));
            }
            ResourceKind::LoadBalancer => {
                attributes.insert(
                    "dnsName".to_string(),
                    json!(format!(
                        "{}-{}.{}.elb.keel.internal",
                        resource.physical_name,
                        &digest[..8],
                        REGION
                    )),
                );
            }
            ResourceKind::Bucket => {
                attributes.insert("bucket".to_string(), json!(resource.physical_name));
                attributes.insert(
                    "bucketDomainName".to_string(),
                    json!(format!("{}.s3.amazonaws.com", resource.physical_name)),
                );
            }
            ResourceKind::BucketAcl => {
                let bucket = resource
                    .str_property("bucket")
                    .ok_or_else(|| invalid(resource, "missing 'bucket'".to_string()))?;
                if resource.str_property("acl") == Some("public-read") {
                    for prerequisite in [
                        ResourceKind::BucketOwnershipControls,
                        ResourceKind::BucketPublicAccessBlock,
                    ] {
                        let present = inventory.objects.values().any(|o| {
                            o.kind == prerequisite
                                && o.attributes.get("bucket").and_then(Value::as_str) == Some(bucket)
                        });
                        if !present {
                            return Err(invalid(
                                resource,
                                format!("public ACL on {} requires {} first", bucket, prerequisite),
                            ));
                        }
                    }
                }
            }
            ResourceKind::Instance => {
                let octets = hex::decode(&digest[..4]).unwrap_or_default();
                let (a, b) = (
                    octets.first().copied().unwrap_or(0),
                    octets.get(1).copied().unwrap_or(0),
                );
                attributes.insert("privateIp".to_string(), json!(format!("10.0.{}.{}", a, b)));
            }
            ResourceKind::ListenerRule => {
                let listener = resource
                    .str_property("listenerArn")
                    .ok_or_else(|| invalid(resource, "missing 'listenerArn'".to_string()))?
                    .to_string();
                let rule = RoutingRule::from_properties(&attributes)?;
                let existing: Vec<(String, RoutingRule)> = rules_on(inventory, &listener)
                    .into_iter()
                    .filter(|(physical, _)| physical != &resource.physical_name)
                    .collect();
                let existing_rules: Vec<RoutingRule> =
                    existing.iter().map(|(_, r)| r.clone()).collect();
                validate_listener(&listener, &existing_rules, &rule)?;

                let assigned = match rule.priority {
                    Some(p) => p,
                    None => {
                        let current = inventory
                            .objects
                            .get(&key)
                            .and_then(|o| o.attributes.get("assignedPriority"))
                            .and_then(Value::as_u64)
                            .and_then(|p| u32::try_from(p).ok());
                        let taken: BTreeSet<u32> = existing
                            .iter()
                            .filter_map(|(physical, _)| {
                                inventory
                                    .objects
                                    .get(&object_key(ResourceKind::ListenerRule, physical))
                                    .and_then(|o| o.attributes.get("assignedPriority"))
                                    .and_then(Value::as_u64)
                                    .and_then(|p| u32::try_from(p).ok())
                            })
                            .collect();
                        match current {
                            Some(p) if !taken.contains(&p) => p,
                            _ => (FIRST_AUTO_PRIORITY..)
                                .find(|p| !taken.contains(p))
                                .unwrap_or(FIRST_AUTO_PRIORITY),
                        }
                    }
                };
                attributes.insert("assignedPriority".to_string(), json!(assigned));
            }
            _ => {}
        }

        let now = Utc::now();
        let created_at = inventory
            .objects
            .get(&key)
            .map(|o| o.created_at)
            .unwrap_or(now);
        inventory.objects.insert(
            key.clone(),
            CloudObject {
                kind: resource.kind,
                physical_name: resource.physical_name.clone(),
                handle: handle.clone(),
                attributes: attributes.clone(),
                created_at,
                updated_at: now,
            },
        );

        // A renamed resource replaces its old object, only once the new one exists.
        if let Some(prior) = prior {
            let prior_key = object_key(prior.kind, &prior.physical_name);
            if prior_key != key && inventory.objects.remove(&prior_key).is_some() {
                info!(resource = %resource.logical_name, old = %prior.physical_name, new = %resource.physical_name, "Replaced renamed resource");
                inventory.passwords.remove(&prior_key);
            }
        }

        Ok(ResourceState {
            kind: resource.kind,
            logical_name: resource.logical_name.clone(),
            physical_name: resource.physical_name.clone(),
            handle,
            attributes,
            sensitive,
            depends_on: resource.depends_on.clone(),
            updated_at: now,
        })
    }
}

#[async_trait]
impl CloudBackend for MemoryCloud {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(
        &self,
        resource: &ResolvedResource,
        prior: Option<&ResourceState>,
    ) -> Result<ResourceState> {
        debug!(kind = %resource.kind, name = %resource.physical_name, "Upserting resource");
        let mut inventory = self.inventory()?;
        self.upsert_locked(&mut inventory, resource, prior)
    }

    async fn delete(&self, state: &ResourceState) -> Result<()> {
        let mut inventory = self.inventory()?;
        if inventory.faults.contains(&state.physical_name) {
            return Err(Error::ResourceConvergence {
                resource: state.logical_name.clone(),
                message: format!("injected fault for {}", state.physical_name),
            });
        }

        let key = object_key(state.kind, &state.physical_name);
        let Some(object) = inventory.objects.remove(&key) else {
            debug!(kind = %state.kind, name = %state.physical_name, "Resource already gone");
            return Ok(());
        };
        inventory.passwords.remove(&key);
        if object.kind == ResourceKind::SecretVersion {
            if let Some(secret_id) = object.attributes.get("secretId").and_then(Value::as_str) {
                inventory.vault.remove(secret_id);
            }
        }
        debug!(kind = %state.kind, name = %state.physical_name, "Deleted resource");
        Ok(())
    }

    async fn listener_rules(&self, listener_id: &str) -> Result<Vec<RoutingRule>> {
        let inventory = self.inventory()?;
        Ok(rules_on(&inventory, listener_id)
            .into_iter()
            .map(|(_, rule)| rule)
            .collect())
    }
}

/// Rules attached to `listener`, with the physical name of each rule resource.
fn rules_on(inventory: &Inventory, listener: &str) -> Vec<(String, RoutingRule)> {
    inventory
        .objects
        .values()
        .filter(|o| o.kind == ResourceKind::ListenerRule)
        .filter(|o| o.attributes.get("listenerArn").and_then(Value::as_str) == Some(listener))
        .filter_map(|o| {
            RoutingRule::from_properties(&o.attributes)
                .ok()
                .map(|rule| (o.physical_name.clone(), rule))
        })
        .collect()
}

fn object_key(kind: ResourceKind, physical_name: &str) -> String {
    format!("{}/{}", kind, physical_name)
}

fn handle_for(kind: ResourceKind, physical_name: &str) -> String {
    format!("arn:keel:{}:{}::{}/{}", kind.service(), REGION, kind, physical_name)
}

fn id_for(kind: ResourceKind, physical_name: &str) -> String {
    let suffix = &digest(&object_key(kind, physical_name))[..17];
    match kind {
        ResourceKind::Vpc => format!("vpc-{}", suffix),
        ResourceKind::Subnet => format!("subnet-{}", suffix),
        ResourceKind::SecurityGroup => format!("sg-{}", suffix),
        ResourceKind::SecurityGroupRule => format!("sgr-{}", suffix),
        ResourceKind::Instance => format!("i-{}", suffix),
        _ => physical_name.to_string(),
    }
}

fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Alphanumeric password, no special characters.
fn generate_password(length: usize) -> String {
    let mut password = String::with_capacity(length);
    while password.len() < length {
        let chunk = uuid::Uuid::new_v4().simple().to_string();
        // Mix case so the result is not plain hex.
        for (i, c) in chunk.chars().enumerate() {
            password.push(if i % 3 == 0 { c.to_ascii_uppercase() } else { c });
        }
    }
    password.truncate(length);
    password
}

fn invalid(resource: &ResolvedResource, message: String) -> Error {
    Error::ResourceConvergence {
        resource: resource.logical_name.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::resource::ResolvedValue;
    use keel_core::routing::{MatchCondition, STACK_QUERY_KEY};

    fn resource(kind: ResourceKind, name: &str) -> ResolvedResource {
        ResolvedResource {
            kind,
            logical_name: name.to_string(),
            physical_name: format!("acme-{}", name),
            properties: BTreeMap::new(),
            depends_on: vec![],
        }
    }

    fn with(mut r: ResolvedResource, key: &str, value: Value) -> ResolvedResource {
        r.properties.insert(key.to_string(), ResolvedValue::Plain(value));
        r
    }

    fn with_secret(mut r: ResolvedResource, key: &str, value: Value) -> ResolvedResource {
        r.properties.insert(key.to_string(), ResolvedValue::Secret(value));
        r
    }

    fn rule(name: &str, stack: &str, condition: MatchCondition, priority: Option<u32>) -> ResolvedResource {
        let rule = RoutingRule {
            stack: stack.to_string(),
            condition,
            priority,
            target_group: format!("tg-{}", stack),
        };
        let mut r = with(resource(ResourceKind::ListenerRule, name), "listenerArn", json!("listener-1"));
        for (k, v) in rule.to_properties() {
            r = with(r, &k, v);
        }
        r
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_deterministic() {
        let cloud = MemoryCloud::new();
        let vpc = resource(ResourceKind::Vpc, "vpc");
        let first = cloud.upsert(&vpc, None).await.unwrap();
        let second = cloud.upsert(&vpc, Some(&first)).await.unwrap();

        assert_eq!(first.handle, second.handle);
        assert_eq!(first.attributes["id"], second.attributes["id"]);
        assert!(first.str_attribute("id").unwrap().starts_with("vpc-"));
        assert_eq!(cloud.resource_count().unwrap(), 1);

        let other = MemoryCloud::new();
        assert_eq!(other.upsert(&vpc, None).await.unwrap().handle, first.handle);
    }

    #[tokio::test]
    async fn test_password_is_generated_once_and_kept_secret() {
        let cloud = MemoryCloud::new();
        let pw = with(resource(ResourceKind::RandomPassword, "dbPassword"), "length", json!(24));
        let first = cloud.upsert(&pw, None).await.unwrap();
        let second = cloud.upsert(&pw, None).await.unwrap();

        let value = first.str_attribute("result").unwrap().to_string();
        assert_eq!(value.len(), 24);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(second.str_attribute("result"), Some(value.as_str()));
        assert!(first.is_sensitive("result"));
    }

    #[tokio::test]
    async fn test_secret_version_goes_to_the_vault() {
        let cloud = MemoryCloud::new();
        let secret = cloud
            .upsert(&resource(ResourceKind::Secret, "connectionString"), None)
            .await
            .unwrap();
        let version = with_secret(
            with(resource(ResourceKind::SecretVersion, "connectionStringVersion"), "secretId", json!(secret.handle)),
            "secretString",
            json!("postgresql://postgres:pw@db:5432/app"),
        );
        let state = cloud.upsert(&version, None).await.unwrap();

        assert!(state.attribute("secretString").is_none());
        assert_eq!(
            cloud.secret_value(&secret.handle).unwrap().as_deref(),
            Some("postgresql://postgres:pw@db:5432/app")
        );

        cloud.delete(&state).await.unwrap();
        assert!(cloud.secret_value(&secret.handle).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secret_version_requires_existing_secret() {
        let cloud = MemoryCloud::new();
        let version = with_secret(
            with(resource(ResourceKind::SecretVersion, "v"), "secretId", json!("arn:missing")),
            "secretString",
            json!("x"),
        );
        assert!(cloud.upsert(&version, None).await.is_err());
    }

    #[tokio::test]
    async fn test_database_requires_secret_password() {
        let cloud = MemoryCloud::new();
        let db = with(
            with(
                with(resource(ResourceKind::DatabaseCluster, "db"), "masterUsername", json!("postgres")),
                "databaseName",
                json!("app"),
            ),
            "masterPassword",
            json!("plain"),
        );
        assert!(cloud.upsert(&db, None).await.is_err());

        let db = with_secret(db, "masterPassword", json!("hidden"));
        let state = cloud.upsert(&db, None).await.unwrap();
        assert!(state.str_attribute("endpoint").unwrap().contains(".cluster-"));
        assert_eq!(state.attributes["port"], json!(5432));
        assert!(!serde_json::to_string(&state).unwrap().contains("hidden"));
    }

    #[tokio::test]
    async fn test_public_acl_requires_bucket_controls() {
        let cloud = MemoryCloud::new();
        let acl = with(
            with(resource(ResourceKind::BucketAcl, "mediaAcl"), "bucket", json!("media")),
            "acl",
            json!("public-read"),
        );
        assert!(cloud.upsert(&acl, None).await.is_err());

        for kind in [ResourceKind::BucketOwnershipControls, ResourceKind::BucketPublicAccessBlock] {
            let r = with(resource(kind, kind.as_str()), "bucket", json!("media"));
            cloud.upsert(&r, None).await.unwrap();
        }
        assert!(cloud.upsert(&acl, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_listener_rejects_second_catch_all() {
        let cloud = MemoryCloud::new();
        cloud
            .upsert(&rule("prodRule", "prod", MatchCondition::path("*"), Some(1)), None)
            .await
            .unwrap();

        let err = cloud
            .upsert(&rule("otherRule", "production", MatchCondition::path("*"), Some(2)), None)
            .await
            .unwrap_err();
        assert!(err.is_routing_collision());

        // Re-applying the owner's rule is fine.
        cloud
            .upsert(&rule("prodRule", "prod", MatchCondition::path("*"), Some(1)), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unprioritized_rules_get_distinct_priorities() {
        let cloud = MemoryCloud::new();
        let a = cloud
            .upsert(&rule("a", "preview-1", MatchCondition::query(STACK_QUERY_KEY, "preview-1"), None), None)
            .await
            .unwrap();
        let b = cloud
            .upsert(&rule("b", "preview-2", MatchCondition::query(STACK_QUERY_KEY, "preview-2"), None), None)
            .await
            .unwrap();
        let a_again = cloud
            .upsert(&rule("a", "preview-1", MatchCondition::query(STACK_QUERY_KEY, "preview-1"), None), None)
            .await
            .unwrap();

        assert_eq!(a.attributes["assignedPriority"], json!(1000));
        assert_eq!(b.attributes["assignedPriority"], json!(1001));
        assert_eq!(a_again.attributes["assignedPriority"], json!(1000));
        assert_eq!(cloud.listener_rules("listener-1").await.unwrap().len(), 2);
        assert!(cloud.listener_rules("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_rename_keeps_the_old_rule() {
        let cloud = MemoryCloud::new();
        cloud
            .upsert(&rule("prodRule", "prod", MatchCondition::path("*"), Some(1)), None)
            .await
            .unwrap();
        let staging = MatchCondition::query(STACK_QUERY_KEY, "staging");
        let old = cloud
            .upsert(&rule("stagingRule", "staging", staging.clone(), None), None)
            .await
            .unwrap();

        let err = cloud
            .upsert(&rule("stagingRuleRenamed", "staging", staging.clone(), Some(1)), Some(&old))
            .await
            .unwrap_err();
        assert!(err.is_routing_collision());
        assert!(cloud.contains(ResourceKind::ListenerRule, "acme-stagingRule").unwrap());
        assert!(!cloud.contains(ResourceKind::ListenerRule, "acme-stagingRuleRenamed").unwrap());
        let stacks: Vec<String> = cloud
            .listener_rules("listener-1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.stack)
            .collect();
        assert_eq!(stacks.len(), 2);
        assert!(stacks.contains(&"staging".to_string()));

        // An accepted rename swaps the objects.
        cloud
            .upsert(&rule("stagingRuleRenamed", "staging", staging, None), Some(&old))
            .await
            .unwrap();
        assert!(!cloud.contains(ResourceKind::ListenerRule, "acme-stagingRule").unwrap());
        assert!(cloud.contains(ResourceKind::ListenerRule, "acme-stagingRuleRenamed").unwrap());
        assert_eq!(cloud.listener_rules("listener-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fault_injection_and_idempotent_delete() {
        let cloud = MemoryCloud::new();
        let vpc = resource(ResourceKind::Vpc, "vpc");
        let state = cloud.upsert(&vpc, None).await.unwrap();

        cloud.fail_on("acme-vpc").unwrap();
        assert!(cloud.upsert(&vpc, None).await.is_err());
        assert!(cloud.delete(&state).await.is_err());

        cloud.clear_faults().unwrap();
        cloud.delete(&state).await.unwrap();
        cloud.delete(&state).await.unwrap();
        assert!(!cloud.contains(ResourceKind::Vpc, "acme-vpc").unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.json");

        let cloud = MemoryCloud::new();
        let pw = resource(ResourceKind::RandomPassword, "dbPassword");
        let before = cloud.upsert(&pw, None).await.unwrap();
        cloud.save(&path).await.unwrap();

        let restored = MemoryCloud::load(&path).await.unwrap();
        let after = restored.upsert(&pw, None).await.unwrap();
        assert_eq!(before.attribute("result"), after.attribute("result"));

        let empty = MemoryCloud::load(&dir.path().join("missing.json")).await.unwrap();
        assert_eq!(empty.resource_count().unwrap(), 0);
    }
}
