//! Applying a stack graph and recording the result.

use chrono::Utc;
use keel_core::contract::Outputs;
use keel_core::stack::{Stack, StackStatus};
use keel_core::state::{StackState, StateStore};
use keel_core::{Error, Result};
use keel_engine::{ApplyEvent, ApplyReport, ConvergenceEngine, ResourceGraph};
use tokio::sync::mpsc;
use tracing::info;

pub(crate) type EventSink = Option<mpsc::UnboundedSender<ApplyEvent>>;

/// Converge `graph` for `stack`, then persist what exists afterwards.
///
/// On failure the partial state is saved with the previous outputs left in
/// place and the aggregated failure is returned. On success the state is
/// returned unsaved so the caller can publish outputs first.
pub(crate) async fn apply_stack(
    engine: &ConvergenceEngine,
    store: &dyn StateStore,
    events: &EventSink,
    stack: &Stack,
    graph: ResourceGraph,
) -> Result<(ApplyReport, StackState)> {
    let prior = store.load(stack.kind, &stack.name).await?;
    let mut state = prior.unwrap_or_else(|| StackState::new(stack.clone()));
    state.stack = stack.clone();

    let (mut rx, handle) = engine.converge(&stack.to_string(), graph, state.resources.clone())?;
    forward(&mut rx, events).await;
    let report = handle
        .await
        .map_err(|e| Error::Internal(format!("apply task failed: {}", e)))?;

    state.resources = report.resulting_states(&state.resources);
    state.updated_at = Utc::now();

    if report.success() {
        state.status = StackStatus::Ready;
        return Ok((report, state));
    }

    state.status = if report.cancelled {
        StackStatus::Cancelled
    } else {
        StackStatus::Partial
    };
    store.save(&state).await?;
    info!(stack = %stack, status = %state.status, "Saved partial stack state");
    report.into_result().map(|report| (report, state))
}

/// Delete every resource recorded for `stack` and drop its state.
pub(crate) async fn destroy_stack(
    engine: &ConvergenceEngine,
    store: &dyn StateStore,
    events: &EventSink,
    stack: &Stack,
) -> Result<ApplyReport> {
    let Some(mut state) = store.load(stack.kind, &stack.name).await? else {
        return Err(Error::NotFound(format!("stack {}", stack)));
    };

    let (mut rx, handle) = engine.destroy(&stack.to_string(), state.resources.clone());
    forward(&mut rx, events).await;
    let report = handle
        .await
        .map_err(|e| Error::Internal(format!("destroy task failed: {}", e)))?;

    if report.success() {
        store.delete(stack.kind, &stack.name).await?;
        info!(stack = %stack, "Stack destroyed");
        return Ok(report);
    }

    state.resources = report.resulting_states(&state.resources);
    state.status = if report.cancelled {
        StackStatus::Cancelled
    } else {
        StackStatus::Partial
    };
    state.outputs = Outputs::new();
    state.updated_at = Utc::now();
    store.save(&state).await?;
    report.into_result()
}

async fn forward(rx: &mut mpsc::Receiver<ApplyEvent>, events: &EventSink) {
    while let Some(event) = rx.recv().await {
        if let Some(tx) = events {
            let _ = tx.send(event);
        }
    }
}
