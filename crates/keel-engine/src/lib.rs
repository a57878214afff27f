//! Resource graph and convergence engine for Keel.
//!
//! Desired resources are declared into an explicit dependency graph and
//! applied against a cloud backend wave by wave. Independent resources in a
//! wave converge concurrently; a failed resource only stops its dependents.

pub mod converge;
pub mod graph;

pub use converge::{ApplyEvent, ApplyReport, ConvergenceEngine, NodeOutcome};
pub use graph::ResourceGraph;
