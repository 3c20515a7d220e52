use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

const BUNDLED_ROLES: &str = include_str!("../config/roles.yaml");

#[derive(Debug, Clone, Deserialize)]
struct Role {
    prompt: String,
}

/// Persona instructions keyed by persona name
#[derive(Debug, Clone)]
pub struct PersonaBook {
    roles: BTreeMap<String, Role>,
}

impl PersonaBook {
    /// The personas shipped with the binary
    pub fn bundled() -> Result<Self> {
        Self::from_yaml(BUNDLED_ROLES)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let roles: BTreeMap<String, Role> = serde_yaml::from_str(yaml)?;
        Ok(Self { roles })
    }

    /// Persona names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.roles.keys().map(String::as_str).collect()
    }

    /// Instructions for `name`
    pub fn prompt(&self, name: &str) -> Result<&str> {
        self.roles
            .get(name)
            .map(|role| role.prompt.trim())
            .ok_or_else(|| {
                anyhow!(
                    "Invalid persona: {} (available: {})",
                    name,
                    self.names().join(", ")
                )
            })
    }
}
