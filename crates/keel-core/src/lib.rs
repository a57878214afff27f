//! Core domain types and traits for Keel.
//!
//! This crate contains:
//! - Resource identifiers and common types
//! - Stack identity and persisted stack state
//! - Resource specs, resolved resources and converged states
//! - The foundation output contract
//! - Routing rules and listener validation
//! - Backend, state store and media storage abstractions

pub mod backend;
pub mod contract;
pub mod error;
pub mod id;
pub mod resource;
pub mod routing;
pub mod secret;
pub mod stack;
pub mod state;
pub mod storage;

pub use error::{Error, ResourceFailure, Result};
pub use id::RunId;
