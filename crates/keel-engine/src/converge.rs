//! Convergence engine - applies a resource graph against a backend.
//!
//! Resources are applied in topological waves. Every resource in a wave is
//! upserted concurrently. A resource whose dependency did not converge is
//! skipped, while independent branches keep going. Failures are collected
//! per resource and never abort the rest of the apply.
//!
//! An interrupted apply keeps whatever already converged; re-running the
//! same graph reconciles the remainder.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use keel_core::backend::CloudBackend;
use keel_core::resource::{
    NodeId, PropertyValue, ResolvedResource, ResolvedValue, ResourceSpec, ResourceState,
    TemplatePart,
};
use keel_core::{Error, ResourceFailure, RunId, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::graph::ResourceGraph;

/// Outcome of a single resource during an apply or destroy.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Converged(ResourceState),
    Deleted,
    Failed(ResourceFailure),
    Skipped { reason: String },
    Cancelled,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Converged(_) | NodeOutcome::Deleted)
    }
}

/// Event emitted during an apply.
#[derive(Debug, Clone)]
pub enum ApplyEvent {
    ResourceStarted { resource: String, kind: String },
    ResourceConverged { resource: String, handle: String },
    ResourceDeleted { resource: String },
    ResourceFailed { resource: String, message: String },
    ResourceSkipped { resource: String, reason: String },
    ApplyCompleted { success: bool },
}

/// Result of an apply or destroy.
#[derive(Debug)]
pub struct ApplyReport {
    pub run_id: RunId,
    pub stack: String,
    pub outcomes: BTreeMap<String, NodeOutcome>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ApplyReport {
    fn new(stack: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: RunId::new(),
            stack: stack.to_string(),
            outcomes: BTreeMap::new(),
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn success(&self) -> bool {
        !self.cancelled && self.outcomes.values().all(NodeOutcome::is_success)
    }

    pub fn converged(&self, resource: &str) -> Option<&ResourceState> {
        match self.outcomes.get(resource) {
            Some(NodeOutcome::Converged(state)) => Some(state),
            _ => None,
        }
    }

    pub fn failures(&self) -> Vec<ResourceFailure> {
        self.outcomes
            .values()
            .filter_map(|o| match o {
                NodeOutcome::Failed(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    /// The resources that exist after this run.
    ///
    /// Converged resources replace their prior record. Resources that failed,
    /// were skipped or cancelled keep their prior record, since the previously
    /// converged object is still out there.
    pub fn resulting_states(
        &self,
        prior: &BTreeMap<String, ResourceState>,
    ) -> BTreeMap<String, ResourceState> {
        let names: BTreeSet<&String> = prior.keys().chain(self.outcomes.keys()).collect();
        let mut states = BTreeMap::new();
        for name in names {
            match self.outcomes.get(name) {
                Some(NodeOutcome::Converged(state)) => {
                    states.insert(name.clone(), state.clone());
                }
                Some(NodeOutcome::Deleted) => {}
                _ => {
                    if let Some(state) = prior.get(name) {
                        states.insert(name.clone(), state.clone());
                    }
                }
            }
        }
        states
    }

    /// Turn a failed report into a `ConvergenceFailed` error.
    pub fn into_result(self) -> Result<Self> {
        if self.cancelled {
            return Err(Error::Cancelled);
        }
        let failures = self.failures();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::ConvergenceFailed {
                stack: self.stack,
                failures,
            })
        }
    }
}

/// Applies resource graphs against a cloud backend.
#[derive(Clone)]
pub struct ConvergenceEngine {
    backend: Arc<dyn CloudBackend>,
    cancel: Option<watch::Receiver<bool>>,
}

impl ConvergenceEngine {
    pub fn new(backend: Arc<dyn CloudBackend>) -> Self {
        Self {
            backend,
            cancel: None,
        }
    }

    /// Stop scheduling new waves once `cancel` turns true.
    pub fn with_cancellation(backend: Arc<dyn CloudBackend>, cancel: watch::Receiver<bool>) -> Self {
        Self {
            backend,
            cancel: Some(cancel),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CloudBackend> {
        &self.backend
    }

    /// Converge `graph`, returning a channel of events and a handle to get the final report.
    ///
    /// `prior` is the state recorded by the previous apply of this stack. Prior
    /// resources no longer in the graph are deleted once everything else converged.
    pub fn converge(
        &self,
        stack: &str,
        graph: ResourceGraph,
        prior: BTreeMap<String, ResourceState>,
    ) -> Result<(
        mpsc::Receiver<ApplyEvent>,
        tokio::task::JoinHandle<ApplyReport>,
    )> {
        let waves = graph.waves()?;
        let (tx, rx) = mpsc::channel(100);
        let engine = self.clone();
        let stack = stack.to_string();

        let handle = tokio::spawn(async move {
            engine
                .converge_inner(stack, graph, waves, prior, tx)
                .await
        });

        Ok((rx, handle))
    }

    /// Converge and wait for the report, discarding events.
    pub async fn apply(
        &self,
        stack: &str,
        graph: ResourceGraph,
        prior: BTreeMap<String, ResourceState>,
    ) -> Result<ApplyReport> {
        let (rx, handle) = self.converge(stack, graph, prior)?;
        drop(rx);
        handle
            .await
            .map_err(|e| Error::Internal(format!("apply task failed: {}", e)))
    }

    /// Delete every resource in `prior`, dependents before their dependencies.
    pub fn destroy(
        &self,
        stack: &str,
        prior: BTreeMap<String, ResourceState>,
    ) -> (
        mpsc::Receiver<ApplyEvent>,
        tokio::task::JoinHandle<ApplyReport>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let engine = self.clone();
        let stack = stack.to_string();

        let handle = tokio::spawn(async move {
            let mut report = ApplyReport::new(&stack);
            let targets: BTreeSet<String> = prior.keys().cloned().collect();
            engine.delete_states(&prior, targets, &mut report, &tx).await;
            report.finished_at = Utc::now();
            let success = report.success();
            info!(stack = %stack, success, "Destroy completed");
            let _ = tx.send(ApplyEvent::ApplyCompleted { success }).await;
            report
        });

        (rx, handle)
    }

    /// Destroy and wait for the report.
    pub async fn destroy_all(
        &self,
        stack: &str,
        prior: BTreeMap<String, ResourceState>,
    ) -> Result<ApplyReport> {
        let (rx, handle) = self.destroy(stack, prior);
        drop(rx);
        handle
            .await
            .map_err(|e| Error::Internal(format!("destroy task failed: {}", e)))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn converge_inner(
        &self,
        stack: String,
        graph: ResourceGraph,
        waves: Vec<Vec<NodeId>>,
        prior: BTreeMap<String, ResourceState>,
        tx: mpsc::Sender<ApplyEvent>,
    ) -> ApplyReport {
        let mut report = ApplyReport::new(&stack);
        let mut converged: HashMap<NodeId, ResourceState> = HashMap::new();

        info!(stack = %stack, resources = graph.len(), waves = waves.len(), "Starting apply");

        for (wave_idx, wave) in waves.iter().enumerate() {
            if self.is_cancelled() {
                warn!(stack = %stack, wave = wave_idx, "Apply cancelled, leaving remaining resources untouched");
                report.cancelled = true;
                for id in waves[wave_idx..].iter().flatten() {
                    if let Some(spec) = graph.node(*id) {
                        report
                            .outcomes
                            .insert(spec.logical_name.clone(), NodeOutcome::Cancelled);
                    }
                }
                break;
            }

            let mut ready = Vec::new();
            for id in wave {
                let Some(spec) = graph.node(*id) else {
                    continue;
                };

                let failed_deps: Vec<String> = graph
                    .dependencies(*id)
                    .into_iter()
                    .filter(|dep| !converged.contains_key(dep))
                    .filter_map(|dep| graph.node(dep).map(|s| s.logical_name.clone()))
                    .collect();

                if !failed_deps.is_empty() {
                    let reason = format!("dependencies did not converge: {}", failed_deps.join(", "));
                    info!(stack = %stack, resource = %spec.logical_name, ?failed_deps, "Skipping resource due to failed dependencies");
                    let _ = tx
                        .send(ApplyEvent::ResourceSkipped {
                            resource: spec.logical_name.clone(),
                            reason: reason.clone(),
                        })
                        .await;
                    report
                        .outcomes
                        .insert(spec.logical_name.clone(), NodeOutcome::Skipped { reason });
                    continue;
                }

                match resolve_spec(&graph, spec, &converged) {
                    Ok(resolved) => ready.push((*id, resolved)),
                    Err(e) => {
                        self.record_failure(&stack, &spec.logical_name, &e, &mut report, &tx)
                            .await;
                    }
                }
            }

            for (_, resolved) in &ready {
                debug!(stack = %stack, resource = %resolved.logical_name, kind = %resolved.kind, "Converging resource");
                let _ = tx
                    .send(ApplyEvent::ResourceStarted {
                        resource: resolved.logical_name.clone(),
                        kind: resolved.kind.to_string(),
                    })
                    .await;
            }

            let results = join_all(ready.into_iter().map(|(id, resolved)| {
                let backend = self.backend.clone();
                let prior_state = prior.get(&resolved.logical_name).cloned();
                async move {
                    let result = backend.upsert(&resolved, prior_state.as_ref()).await;
                    (id, resolved.logical_name, result)
                }
            }))
            .await;

            for (id, name, result) in results {
                match result {
                    Ok(state) => {
                        info!(stack = %stack, resource = %name, handle = %state.handle, "Resource converged");
                        let _ = tx
                            .send(ApplyEvent::ResourceConverged {
                                resource: name.clone(),
                                handle: state.handle.clone(),
                            })
                            .await;
                        converged.insert(id, state.clone());
                        report.outcomes.insert(name, NodeOutcome::Converged(state));
                    }
                    Err(e) => {
                        self.record_failure(&stack, &name, &e, &mut report, &tx).await;
                    }
                }
            }
        }

        // Only prune once the desired state fully converged.
        if report.success() {
            let orphans: BTreeSet<String> = prior
                .keys()
                .filter(|name| graph.find(name).is_none())
                .cloned()
                .collect();
            if !orphans.is_empty() {
                info!(stack = %stack, count = orphans.len(), "Deleting resources no longer declared");
                self.delete_states(&prior, orphans, &mut report, &tx).await;
            }
        }

        report.finished_at = Utc::now();
        let success = report.success();
        info!(stack = %stack, success, "Apply completed");
        let _ = tx.send(ApplyEvent::ApplyCompleted { success }).await;
        report
    }

    async fn record_failure(
        &self,
        stack: &str,
        resource: &str,
        e: &Error,
        report: &mut ApplyReport,
        tx: &mpsc::Sender<ApplyEvent>,
    ) {
        error!(stack = %stack, resource = %resource, error = %e, "Resource failed to converge");
        let _ = tx
            .send(ApplyEvent::ResourceFailed {
                resource: resource.to_string(),
                message: e.to_string(),
            })
            .await;
        report.outcomes.insert(
            resource.to_string(),
            NodeOutcome::Failed(ResourceFailure::from_error(resource, e)),
        );
    }

    /// Delete `targets`, level by level, never deleting a resource while
    /// something that depends on it is still in place.
    async fn delete_states(
        &self,
        states: &BTreeMap<String, ResourceState>,
        mut targets: BTreeSet<String>,
        report: &mut ApplyReport,
        tx: &mpsc::Sender<ApplyEvent>,
    ) {
        let stack = report.stack.clone();

        while !targets.is_empty() {
            if self.is_cancelled() {
                report.cancelled = true;
                for name in &targets {
                    report.outcomes.insert(name.clone(), NodeOutcome::Cancelled);
                }
                return;
            }

            // A target is deletable once no remaining target depends on it.
            let blocked: BTreeSet<&str> = targets
                .iter()
                .filter_map(|name| states.get(name))
                .flat_map(|s| s.depends_on.iter().map(String::as_str))
                .collect();
            let mut level: Vec<String> = targets
                .iter()
                .filter(|name| !blocked.contains(name.as_str()))
                .cloned()
                .collect();
            if level.is_empty() {
                // Recorded dependencies form a cycle; delete the rest together.
                level = targets.iter().cloned().collect();
            }

            let results = join_all(level.iter().filter_map(|name| states.get(name)).map(|state| {
                let backend = self.backend.clone();
                async move { (state.logical_name.clone(), backend.delete(state).await) }
            }))
            .await;

            let mut failed = Vec::new();
            for (name, result) in results {
                targets.remove(&name);
                match result {
                    Ok(()) => {
                        info!(stack = %stack, resource = %name, "Resource deleted");
                        let _ = tx
                            .send(ApplyEvent::ResourceDeleted {
                                resource: name.clone(),
                            })
                            .await;
                        report.outcomes.insert(name, NodeOutcome::Deleted);
                    }
                    Err(e) => {
                        self.record_failure(&stack, &name, &e, report, tx).await;
                        failed.push(name);
                    }
                }
            }
            for name in level {
                targets.remove(&name);
            }

            if !failed.is_empty() {
                // Whatever the failed resources depend on has to stay.
                let mut keep: Vec<String> = failed;
                while let Some(name) = keep.pop() {
                    let Some(state) = states.get(&name) else {
                        continue;
                    };
                    for dep in &state.depends_on {
                        if targets.remove(dep) {
                            let reason = format!("dependent '{}' could not be deleted", name);
                            let _ = tx
                                .send(ApplyEvent::ResourceSkipped {
                                    resource: dep.clone(),
                                    reason: reason.clone(),
                                })
                                .await;
                            report
                                .outcomes
                                .insert(dep.clone(), NodeOutcome::Skipped { reason });
                            keep.push(dep.clone());
                        }
                    }
                }
            }
        }
    }
}

/// Replace every reference in `spec` with the converged value it points to.
fn resolve_spec(
    graph: &ResourceGraph,
    spec: &ResourceSpec,
    converged: &HashMap<NodeId, ResourceState>,
) -> Result<ResolvedResource> {
    let mut properties = BTreeMap::new();
    for (key, value) in &spec.properties {
        let (resolved, secret) = resolve_value(graph, value, converged)?;
        let resolved = if secret {
            ResolvedValue::Secret(resolved)
        } else {
            ResolvedValue::Plain(resolved)
        };
        properties.insert(key.clone(), resolved);
    }

    let depends_on = spec
        .dependencies()
        .into_iter()
        .filter_map(|id| graph.node(id).map(|n| n.logical_name.clone()))
        .collect();

    Ok(ResolvedResource {
        kind: spec.kind,
        logical_name: spec.logical_name.clone(),
        physical_name: spec.physical_name.clone(),
        properties,
        depends_on,
    })
}

/// Resolve a value. The flag is true when the value is, or was derived from, secret material.
fn resolve_value(
    graph: &ResourceGraph,
    value: &PropertyValue,
    converged: &HashMap<NodeId, ResourceState>,
) -> Result<(Value, bool)> {
    Ok(match value {
        PropertyValue::String(s) => (Value::String(s.clone()), false),
        PropertyValue::Integer(n) => (Value::from(*n), false),
        PropertyValue::Bool(b) => (Value::Bool(*b), false),
        PropertyValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            let mut secret = false;
            for item in items {
                let (v, s) = resolve_value(graph, item, converged)?;
                secret |= s;
                out.push(v);
            }
            (Value::Array(out), secret)
        }
        PropertyValue::Map(entries) => {
            let mut out = serde_json::Map::new();
            let mut secret = false;
            for (k, item) in entries {
                let (v, s) = resolve_value(graph, item, converged)?;
                secret |= s;
                out.insert(k.clone(), v);
            }
            (Value::Object(out), secret)
        }
        PropertyValue::Ref(r) => lookup(graph, r.node, &r.attribute, converged)?,
        PropertyValue::Template(parts) => {
            let mut out = String::new();
            let mut secret = false;
            for part in parts {
                match part {
                    TemplatePart::Literal(s) => out.push_str(s),
                    TemplatePart::Ref(r) => {
                        let (v, s) = lookup(graph, r.node, &r.attribute, converged)?;
                        secret |= s;
                        match v {
                            Value::String(s) => out.push_str(&s),
                            other => out.push_str(&other.to_string()),
                        }
                    }
                }
            }
            (Value::String(out), secret)
        }
        PropertyValue::Secret(inner) => (resolve_value(graph, inner, converged)?.0, true),
    })
}

fn lookup(
    graph: &ResourceGraph,
    node: NodeId,
    attribute: &str,
    converged: &HashMap<NodeId, ResourceState>,
) -> Result<(Value, bool)> {
    let name = graph
        .node(node)
        .map(|n| n.logical_name.as_str())
        .unwrap_or("<unknown>");
    let state = converged.get(&node).ok_or_else(|| Error::ResourceConvergence {
        resource: name.to_string(),
        message: "referenced before it converged".to_string(),
    })?;
    let value = state
        .attribute(attribute)
        .ok_or_else(|| Error::ResourceConvergence {
            resource: name.to_string(),
            message: format!("has no attribute '{}'", attribute),
        })?;
    Ok((value.clone(), state.is_sensitive(attribute)))
}
