//! Stack builders for Keel.
//!
//! A foundation stack holds the shared resources (network, database, secret,
//! registry, cluster, load balancer). Application stacks resolve its outputs
//! through [`StackResolver`] and attach themselves to the shared listener
//! with a rule from [`RuleGenerator`].

pub mod application;
mod apply;
pub mod foundation;
pub mod resolver;
pub mod routing;

pub use application::{ApplicationBuilder, Deployment};
pub use foundation::{FoundationBuilder, FoundationPlan};
pub use resolver::StackResolver;
pub use routing::{RoutingPolicy, RuleGenerator};
