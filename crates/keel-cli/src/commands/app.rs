//! Application stack commands.

use anyhow::{Context, Result};
use keel_stacks::ApplicationBuilder;

use super::{Workspace, spawn_printer};

/// Deploy an application stack bound to `foundation`.
pub async fn deploy(workspace: &Workspace, stack: &str, foundation: &str) -> Result<()> {
    println!("Deploying {} onto foundation {}", stack, foundation);
    let (tx, printer) = spawn_printer();
    let builder = ApplicationBuilder::new(
        workspace.config.clone(),
        workspace.engine(),
        workspace.store.clone(),
    )
    .with_events(tx);

    let result = builder.deploy_from(stack, foundation).await;
    drop(builder);
    let _ = printer.await;
    workspace.persist().await?;

    let deployment = result.with_context(|| format!("Failed to deploy {}", stack))?;
    println!("\n✓ Application '{}' deployed", stack);
    println!("  image:   {}", deployment.image_uri);
    println!("  service: {}", deployment.service_handle);
    match deployment.rule.priority {
        Some(priority) => println!("  route:   {} (priority {})", deployment.rule.condition, priority),
        None => println!("  route:   {}", deployment.rule.condition),
    }
    Ok(())
}

/// Destroy an application stack and its routing rule.
pub async fn destroy(workspace: &Workspace, stack: &str) -> Result<()> {
    println!("Destroying application: {}", stack);
    let (tx, printer) = spawn_printer();
    let builder = ApplicationBuilder::new(
        workspace.config.clone(),
        workspace.engine(),
        workspace.store.clone(),
    )
    .with_events(tx);

    let result = builder.destroy(stack).await;
    drop(builder);
    let _ = printer.await;
    workspace.persist().await?;

    result.with_context(|| format!("Failed to destroy {}", stack))?;
    println!("\n✓ Application '{}' destroyed", stack);
    Ok(())
}
