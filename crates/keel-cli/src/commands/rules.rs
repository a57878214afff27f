//! Listener rule listing.

use anyhow::{Context, Result};
use keel_core::backend::CloudBackend;
use keel_stacks::StackResolver;

use super::Workspace;

/// List the rules registered on a foundation's shared listener.
pub async fn list(workspace: &Workspace, foundation: &str) -> Result<()> {
    let contract = StackResolver::new(workspace.store.clone())
        .resolve_contract(foundation)
        .await
        .with_context(|| format!("Failed to resolve foundation {}", foundation))?;

    let mut rules = workspace.cloud.listener_rules(&contract.listener_id).await?;
    rules.sort_by_key(|r| (r.priority.is_none(), r.priority, r.stack.clone()));

    println!("Rules on {}:", contract.listener_id);
    if rules.is_empty() {
        println!("  (none)");
    }
    for rule in &rules {
        let priority = rule
            .priority
            .map(|p| p.to_string())
            .unwrap_or_else(|| "auto".to_string());
        println!("  {:>5}  {:<24} {}", priority, rule.stack, rule.condition);
    }
    Ok(())
}
