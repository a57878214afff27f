//! Explicit resource dependency graph.
//!
//! Nodes live in an arena indexed by [`NodeId`]; edges are an explicit list
//! of `(dependency, dependent)` pairs derived from property references and
//! `depends_on` ordering.

use keel_core::resource::{NodeId, ResourceSpec};
use keel_core::{Error, Result};
use std::collections::{BTreeSet, HashMap};

/// A DAG of desired resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceSpec>,
    /// `(dependency, dependent)` pairs.
    edges: Vec<(NodeId, NodeId)>,
    by_name: HashMap<String, NodeId>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource. Every node it refers to must already be in the graph.
    pub fn add(&mut self, spec: ResourceSpec) -> Result<NodeId> {
        if self.by_name.contains_key(&spec.logical_name) {
            return Err(Error::InvalidInput(format!(
                "duplicate resource '{}' in graph",
                spec.logical_name
            )));
        }

        let id = NodeId(self.nodes.len());
        for dep in spec.dependencies() {
            if dep.0 >= self.nodes.len() {
                return Err(Error::InvalidInput(format!(
                    "resource '{}' refers to unknown node {}",
                    spec.logical_name, dep
                )));
            }
            self.push_edge(dep, id);
        }

        self.by_name.insert(spec.logical_name.clone(), id);
        self.nodes.push(spec);
        Ok(id)
    }

    /// Add an ordering constraint between two existing nodes.
    pub fn add_dependency(&mut self, dependency: NodeId, dependent: NodeId) -> Result<()> {
        for id in [dependency, dependent] {
            if id.0 >= self.nodes.len() {
                return Err(Error::InvalidInput(format!("unknown node {}", id)));
            }
        }
        if dependency == dependent {
            return Err(Error::CycleDetected(format!(
                "{} depends on itself",
                self.nodes[dependency.0].logical_name
            )));
        }
        self.push_edge(dependency, dependent);
        Ok(())
    }

    fn push_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if !self.edges.contains(&(dependency, dependent)) {
            self.edges.push((dependency, dependent));
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&ResourceSpec> {
        self.nodes.get(id.0)
    }

    pub fn find(&self, logical_name: &str) -> Option<NodeId> {
        self.by_name.get(logical_name).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &ResourceSpec)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn edges(&self) -> &[(NodeId, NodeId)] {
        &self.edges
    }

    /// Nodes `id` depends on directly.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(_, to)| *to == id)
            .map(|(from, _)| *from)
            .collect()
    }

    /// Nodes that depend on `id` directly.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(from, _)| *from == id)
            .map(|(_, to)| *to)
            .collect()
    }

    /// Topological levels: every node appears after all of its dependencies,
    /// and nodes within one level are independent of each other.
    pub fn waves(&self) -> Result<Vec<Vec<NodeId>>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for (_, to) in &self.edges {
            in_degree[to.0] += 1;
        }

        let mut current: Vec<NodeId> = (0..self.nodes.len())
            .filter(|i| in_degree[*i] == 0)
            .map(NodeId)
            .collect();
        let mut waves = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next = BTreeSet::new();
            for id in &current {
                for dependent in self.dependents(*id) {
                    in_degree[dependent.0] -= 1;
                    if in_degree[dependent.0] == 0 {
                        next.insert(dependent);
                    }
                }
            }
            waves.push(std::mem::take(&mut current));
            current = next.into_iter().collect();
        }

        if placed != self.nodes.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| self.nodes[i].logical_name.as_str())
                .collect();
            return Err(Error::CycleDetected(stuck.join(" -> ")));
        }

        Ok(waves)
    }
}
