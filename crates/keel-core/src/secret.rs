//! Secret handles.
//!
//! The foundation stack writes the database connection string into a secret
//! store. Everything downstream sees only the handle, never the value.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Opaque ARN-like reference to a stored secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHandle(String);

impl SecretHandle {
    pub fn parse(handle: impl Into<String>) -> Result<Self> {
        let handle = handle.into();
        if handle.trim().is_empty() {
            return Err(Error::InvalidInput("secret handle must not be empty".to_string()));
        }
        Ok(Self(handle))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SecretHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
