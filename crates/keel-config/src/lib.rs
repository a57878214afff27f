//! Configuration for Keel.
//!
//! This crate handles:
//! - Project configuration (keel.kdl)
//! - Resource name templates and interpolation
//! - Media storage configuration from the environment

pub mod error;
pub mod media;
pub mod naming;
pub mod project;

pub use error::{ConfigError, ConfigResult};
pub use media::{MediaBackendConfig, MediaConfig};
pub use naming::NameContext;
pub use project::{
    ApplicationConfig, BastionConfig, ContainerConfig, DatabaseConfig, FoundationConfig,
    HealthCheckConfig, ImageConfig, ProjectConfig, load_project_config, parse_project_config,
};
