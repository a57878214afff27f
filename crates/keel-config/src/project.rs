//! Project configuration parsing.
//!
//! ```kdl
//! project "blog"
//! org "acme"
//! production-stack "prod"
//!
//! foundation {
//!     database name="blog" username="postgres" port=5432 min-capacity=2 max-capacity=4
//!     load-balancer port=80
//!     media-bucket public=#true
//!     bastion enabled=#true instance-type="t2.micro"
//! }
//!
//! application {
//!     container name="blog" port=3000 cpu=256 memory=512
//!     health-check path="/" interval=30
//!     image context="../.." platform="linux/amd64"
//!     env {
//!         NODE_ENV "production"
//!     }
//! }
//! ```
//!
//! Every field has a default, so an empty document is a valid configuration.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: String,
    /// Organization prefix for resource names. Can also come from the CLI.
    pub org: Option<String>,
    /// The one stack name that owns the catch-all route.
    pub production_stack: String,
    pub foundation: FoundationConfig,
    pub application: ApplicationConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project: "app".to_string(),
            org: None,
            production_stack: "prod".to_string(),
            foundation: FoundationConfig::default(),
            application: ApplicationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundationConfig {
    pub database: DatabaseConfig,
    /// Port the shared listener accepts traffic on.
    pub listener_port: u16,
    /// Number of availability zones; one private and one public subnet each.
    pub availability_zones: u16,
    pub media_bucket_public: bool,
    pub bastion: BastionConfig,
}

impl Default for FoundationConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            listener_port: 80,
            availability_zones: 2,
            media_bucket_public: true,
            bastion: BastionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub engine: String,
    pub name: String,
    pub username: String,
    pub port: u16,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub password_length: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "aurora-postgresql".to_string(),
            name: "app".to_string(),
            username: "postgres".to_string(),
            port: 5432,
            min_capacity: 2,
            max_capacity: 4,
            password_length: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BastionConfig {
    pub enabled: bool,
    pub instance_type: String,
    pub ami: String,
}

impl Default for BastionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_type: "t2.micro".to_string(),
            ami: "ami-00dff3b01f99da94d".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub container: ContainerConfig,
    pub health_check: HealthCheckConfig,
    pub image: ImageConfig,
    /// Plain environment variables passed to the container.
    pub env: BTreeMap<String, String>,
    /// Environment variable the connection string secret is injected as.
    pub connection_string_env: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            container: ContainerConfig::default(),
            health_check: HealthCheckConfig::default(),
            image: ImageConfig::default(),
            env: BTreeMap::new(),
            connection_string_env: "POSTGRES_PRISMA_URL".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub port: u16,
    pub cpu: u32,
    pub memory: u32,
    pub desired_count: u32,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            port: 3000,
            cpu: 256,
            memory: 512,
            desired_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub path: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            interval_seconds: 30,
            timeout_seconds: 5,
            healthy_threshold: 3,
            unhealthy_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub context: String,
    pub platform: String,
    pub tag: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            context: "../..".to_string(),
            platform: "linux/amd64".to_string(),
            tag: "latest".to_string(),
        }
    }
}

/// Read and parse a project configuration file.
pub fn load_project_config(path: &Path) -> ConfigResult<ProjectConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_project_config(&content)
}

/// Subnet CIDRs are carved per zone out of one /16.
pub const MAX_AVAILABILITY_ZONES: u16 = 6;

/// Parse a project configuration from KDL text.
pub fn parse_project_config(kdl: &str) -> ConfigResult<ProjectConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = ProjectConfig::default();
    let mut seen_sections = Vec::new();

    for node in doc.nodes() {
        let name = node.name().value();
        match name {
            "project" => {
                config.project = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;
            }
            "org" => {
                config.org = Some(
                    get_first_string_arg(node)
                        .ok_or_else(|| ConfigError::MissingField("org name".to_string()))?,
                );
            }
            "production-stack" => {
                config.production_stack = get_first_string_arg(node).ok_or_else(|| {
                    ConfigError::MissingField("production-stack name".to_string())
                })?;
            }
            "foundation" | "application" => {
                if seen_sections.contains(&name) {
                    return Err(ConfigError::Duplicate(format!("{} block", name)));
                }
                seen_sections.push(name);
                if name == "foundation" {
                    parse_foundation(node, &mut config.foundation)?;
                } else {
                    parse_application(node, &mut config.application)?;
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if config.project.trim().is_empty() {
        return Err(ConfigError::invalid("project", "must not be empty"));
    }
    if config.production_stack.trim().is_empty() {
        return Err(ConfigError::invalid("production-stack", "must not be empty"));
    }
    let db = &config.foundation.database;
    if db.min_capacity > db.max_capacity {
        return Err(ConfigError::invalid(
            "database",
            format!(
                "min-capacity {} exceeds max-capacity {}",
                db.min_capacity, db.max_capacity
            ),
        ));
    }
    let zones = config.foundation.availability_zones;
    if !(1..=MAX_AVAILABILITY_ZONES).contains(&zones) {
        return Err(ConfigError::invalid(
            "availability-zones",
            format!("{} is outside 1..={}", zones, MAX_AVAILABILITY_ZONES),
        ));
    }

    Ok(config)
}

fn parse_foundation(node: &KdlNode, foundation: &mut FoundationConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "database" => {
                let db = &mut foundation.database;
                set_string(child, "engine", &mut db.engine);
                set_string(child, "name", &mut db.name);
                set_string(child, "username", &mut db.username);
                set_int(child, "port", &mut db.port)?;
                set_int(child, "min-capacity", &mut db.min_capacity)?;
                set_int(child, "max-capacity", &mut db.max_capacity)?;
                set_int(child, "password-length", &mut db.password_length)?;
            }
            "load-balancer" => {
                set_int(child, "port", &mut foundation.listener_port)?;
            }
            "network" => {
                set_int(
                    child,
                    "availability-zones",
                    &mut foundation.availability_zones,
                )?;
            }
            "media-bucket" => {
                set_bool(child, "public", &mut foundation.media_bucket_public);
            }
            "bastion" => {
                let bastion = &mut foundation.bastion;
                set_bool(child, "enabled", &mut bastion.enabled);
                set_string(child, "instance-type", &mut bastion.instance_type);
                set_string(child, "ami", &mut bastion.ami);
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_application(node: &KdlNode, app: &mut ApplicationConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "container" => {
                let c = &mut app.container;
                set_string(child, "name", &mut c.name);
                set_int(child, "port", &mut c.port)?;
                set_int(child, "cpu", &mut c.cpu)?;
                set_int(child, "memory", &mut c.memory)?;
                set_int(child, "desired-count", &mut c.desired_count)?;
            }
            "health-check" => {
                let hc = &mut app.health_check;
                set_string(child, "path", &mut hc.path);
                set_int(child, "interval", &mut hc.interval_seconds)?;
                set_int(child, "timeout", &mut hc.timeout_seconds)?;
                set_int(child, "healthy-threshold", &mut hc.healthy_threshold)?;
                set_int(child, "unhealthy-threshold", &mut hc.unhealthy_threshold)?;
            }
            "image" => {
                let image = &mut app.image;
                set_string(child, "context", &mut image.context);
                set_string(child, "platform", &mut image.platform);
                set_string(child, "tag", &mut image.tag);
            }
            "env" => {
                if let Some(grandchildren) = child.children() {
                    for gc in grandchildren.nodes() {
                        let key = gc.name().value().to_string();
                        if let Some(val) = get_first_string_arg(gc) {
                            app.env.insert(key, val);
                        }
                    }
                }
            }
            "connection-string-env" => {
                app.connection_string_env = get_first_string_arg(child).ok_or_else(|| {
                    ConfigError::MissingField("connection-string-env name".to_string())
                })?;
            }
            _ => {}
        }
    }

    if app.container.port == 0 {
        return Err(ConfigError::invalid("container port", "must not be 0"));
    }
    if !app.health_check.path.starts_with('/') {
        return Err(ConfigError::invalid(
            "health-check path",
            format!("'{}' must start with '/'", app.health_check.path),
        ));
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn set_string(node: &KdlNode, name: &str, target: &mut String) {
    if let Some(value) = node.get(name).and_then(|v| v.as_string()) {
        *target = value.to_string();
    }
}

fn set_bool(node: &KdlNode, name: &str, target: &mut bool) {
    if let Some(value) = node.get(name).and_then(|v| v.as_bool()) {
        *target = value;
    }
}

fn set_int<T: TryFrom<i128>>(node: &KdlNode, name: &str, target: &mut T) -> ConfigResult<()> {
    let Some(value) = node.get(name) else {
        return Ok(());
    };
    let n = value
        .as_integer()
        .ok_or_else(|| ConfigError::invalid(name, format!("expected an integer, got {}", value)))?;
    *target = T::try_from(n)
        .map_err(|_| ConfigError::invalid(name, format!("{} is out of range", n)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_project_config("").unwrap();
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.production_stack, "prod");
        assert_eq!(config.application.container.port, 3000);
    }

    #[test]
    fn test_parse_full_project() {
        let kdl = r#"
            project "blog"
            org "acme"
            production-stack "main"

            foundation {
                database name="blog" username="admin" port=5433 min-capacity=1 max-capacity=8
                load-balancer port=8080
                media-bucket public=#false
                bastion enabled=#false
            }

            application {
                container name="blog" port=3001 cpu=512 memory=1024
                health-check path="/healthz" interval=10
                image context="." tag="v1"
                env {
                    NODE_ENV "production"
                }
            }
        "#;

        let config = parse_project_config(kdl).unwrap();
        assert_eq!(config.project, "blog");
        assert_eq!(config.org.as_deref(), Some("acme"));
        assert_eq!(config.production_stack, "main");
        assert_eq!(config.foundation.database.username, "admin");
        assert_eq!(config.foundation.database.port, 5433);
        assert_eq!(config.foundation.listener_port, 8080);
        assert!(!config.foundation.media_bucket_public);
        assert!(!config.foundation.bastion.enabled);
        assert_eq!(config.application.container.memory, 1024);
        assert_eq!(config.application.health_check.path, "/healthz");
        assert_eq!(config.application.health_check.timeout_seconds, 5);
        assert_eq!(config.application.image.tag, "v1");
        assert_eq!(
            config.application.env.get("NODE_ENV").map(String::as_str),
            Some("production")
        );
    }

    #[test]
    fn test_rejects_inverted_capacity() {
        let kdl = r#"
            foundation {
                database min-capacity=8 max-capacity=2
            }
        "#;
        let err = parse_project_config(kdl).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_rejects_out_of_range_port() {
        let kdl = r#"
            application {
                container port=70000
            }
        "#;
        assert!(matches!(
            parse_project_config(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_availability_zones_are_bounded() {
        let zones = |n: u32| format!("foundation {{\n network availability-zones={}\n}}", n);
        assert_eq!(
            parse_project_config(&zones(6)).unwrap().foundation.availability_zones,
            6
        );
        for n in [0, 7, 200] {
            assert!(matches!(
                parse_project_config(&zones(n)).unwrap_err(),
                ConfigError::InvalidValue { .. }
            ));
        }
    }

    #[test]
    fn test_rejects_non_integer_value() {
        let kdl = r#"
            application {
                container cpu="lots"
            }
        "#;
        assert!(parse_project_config(kdl).is_err());
    }

    #[test]
    fn test_rejects_duplicate_sections() {
        let kdl = r#"
            foundation {}
            foundation {}
        "#;
        assert!(matches!(
            parse_project_config(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }
}
