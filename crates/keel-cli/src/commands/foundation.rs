//! Foundation stack commands.

use anyhow::{Context, Result};
use keel_core::contract::{OutputValue, Outputs};
use keel_core::stack::{StackKind, StackStatus};
use keel_core::state::StateStore;
use keel_stacks::FoundationBuilder;

use super::{Workspace, spawn_printer};

/// Build or update a foundation stack.
pub async fn up(workspace: &Workspace, stack: &str, org: Option<String>) -> Result<()> {
    let org = org
        .or_else(|| workspace.config.org.clone())
        .context("No organization given; pass --org, set KEEL_ORG or add `org` to the config")?;

    println!("Building foundation: {} (org {})", stack, org);
    let (tx, printer) = spawn_printer();
    let builder = FoundationBuilder::new(
        workspace.config.clone(),
        workspace.engine(),
        workspace.store.clone(),
    )
    .with_events(tx);

    let result = builder.build(stack, &org).await;
    drop(builder);
    let _ = printer.await;
    workspace.persist().await?;

    let contract = result.with_context(|| format!("Failed to build foundation {}", stack))?;
    println!("\n✓ Foundation '{}' is ready", stack);
    println!("  listener: {}", contract.listener_id);
    println!("  registry: {}", contract.registry_url);
    println!("  cluster:  {}", contract.cluster_id);
    Ok(())
}

/// Print the outputs a foundation stack publishes.
pub async fn outputs(workspace: &Workspace, stack: &str) -> Result<()> {
    let outputs = published_outputs(workspace, stack).await?;

    println!("Outputs of {}:", stack);
    for (key, value) in &outputs {
        match value {
            OutputValue::Text(text) => println!("  {} = {}", key, text),
            OutputValue::List(items) => println!("  {} = [{}]", key, items.join(", ")),
        }
    }
    Ok(())
}

/// Outputs recorded in the state store. Nothing is applied, so no engine is needed.
async fn published_outputs(workspace: &Workspace, stack: &str) -> Result<Outputs> {
    let state = workspace
        .store
        .load(StackKind::Foundation, stack)
        .await
        .with_context(|| format!("Failed to load state of foundation {}", stack))?;
    match state {
        Some(state) if state.status != StackStatus::Destroyed => Ok(state.outputs),
        _ => anyhow::bail!("Foundation '{}' has not been built", stack),
    }
}

/// Destroy a foundation stack once no application stack binds to it.
pub async fn destroy(workspace: &Workspace, stack: &str) -> Result<()> {
    println!("Destroying foundation: {}", stack);
    let (tx, printer) = spawn_printer();
    let builder = FoundationBuilder::new(
        workspace.config.clone(),
        workspace.engine(),
        workspace.store.clone(),
    )
    .with_events(tx);

    let result = builder.destroy(stack).await;
    drop(builder);
    let _ = printer.await;
    workspace.persist().await?;

    let report = result.with_context(|| format!("Failed to destroy foundation {}", stack))?;
    println!("\n✓ Foundation '{}' destroyed ({} resources)", stack, report.outcomes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_engine::ConvergenceEngine;

    #[tokio::test]
    async fn test_published_outputs_come_from_state() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(&dir.path().join("keel.kdl"), dir.path())
            .await
            .unwrap();
        assert!(published_outputs(&workspace, "foundation-prod").await.is_err());

        FoundationBuilder::new(
            workspace.config.clone(),
            ConvergenceEngine::new(workspace.cloud.clone()),
            workspace.store.clone(),
        )
        .build("foundation-prod", "acme")
        .await
        .unwrap();

        let outputs = published_outputs(&workspace, "foundation-prod").await.unwrap();
        assert!(outputs.contains_key("listenerId"));
        assert!(outputs.contains_key("connectionStringHandle"));
    }
}
