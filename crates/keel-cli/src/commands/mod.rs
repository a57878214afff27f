//! CLI command implementations.

pub mod app;
pub mod foundation;
pub mod media;
pub mod rules;

use anyhow::{Context, Result};
use keel_backend::{FileStateStore, MemoryCloud};
use keel_config::{ProjectConfig, load_project_config, parse_project_config};
use keel_engine::{ApplyEvent, ConvergenceEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CLOUD_SNAPSHOT: &str = "cloud.json";

/// Configuration, state store and simulated cloud for one invocation.
pub struct Workspace {
    pub config: ProjectConfig,
    pub store: Arc<FileStateStore>,
    pub cloud: Arc<MemoryCloud>,
    cloud_path: PathBuf,
}

impl Workspace {
    pub async fn open(config_path: &Path, state_dir: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            load_project_config(config_path).with_context(|| {
                format!("Failed to load config file: {}", config_path.display())
            })?
        } else {
            warn!(path = %config_path.display(), "Config file not found, using defaults");
            ProjectConfig::default()
        };

        let cloud_path = state_dir.join(CLOUD_SNAPSHOT);
        let cloud = MemoryCloud::load(&cloud_path)
            .await
            .with_context(|| format!("Failed to load cloud snapshot: {}", cloud_path.display()))?;

        Ok(Self {
            config,
            store: Arc::new(FileStateStore::new(state_dir.join("stacks"))),
            cloud: Arc::new(cloud),
            cloud_path,
        })
    }

    /// An engine that stops scheduling new waves on Ctrl-C.
    pub fn engine(&self) -> ConvergenceEngine {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing the current wave");
                let _ = cancel_tx.send(true);
            }
        });
        ConvergenceEngine::with_cancellation(self.cloud.clone(), cancel_rx)
    }

    /// Write the cloud snapshot back to the state directory.
    pub async fn persist(&self) -> Result<()> {
        self.cloud
            .save(&self.cloud_path)
            .await
            .with_context(|| format!("Failed to save cloud snapshot: {}", self.cloud_path.display()))?;
        info!(path = %self.cloud_path.display(), "Saved cloud snapshot");
        Ok(())
    }
}

/// Print apply events as they arrive. The task ends once every sender is dropped.
pub fn spawn_printer() -> (mpsc::UnboundedSender<ApplyEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ApplyEvent::ResourceStarted { resource, kind } => {
                    println!("▶ {} ({})", resource, kind);
                }
                ApplyEvent::ResourceConverged { resource, handle } => {
                    println!("✓ {} {}", resource, handle);
                }
                ApplyEvent::ResourceDeleted { resource } => {
                    println!("✗ {} deleted", resource);
                }
                ApplyEvent::ResourceFailed { resource, message } => {
                    println!("✗ {} failed: {}", resource, message);
                }
                ApplyEvent::ResourceSkipped { resource, reason } => {
                    println!("⊘ {} skipped: {}", resource, reason);
                }
                ApplyEvent::ApplyCompleted { success } => {
                    if success {
                        println!("--- Apply completed successfully ---");
                    } else {
                        println!("--- Apply finished with failures ---");
                    }
                }
            }
        }
    });
    (tx, handle)
}

pub fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    match parse_project_config(&content) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  project: {}", config.project);
            println!("  production stack: {}", config.production_stack);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
