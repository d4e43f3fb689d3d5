//! Server configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file at all) yields a working local setup.

use std::path::Path;

use anyhow::{bail, Context};
use common::PrizeTiers;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    /// Capacity of every manager work queue.
    pub queue_capacity: usize,
    /// Profile created with the admin role on startup, if missing.
    pub bootstrap_admin: Option<String>,
    pub database: DatabaseConfig,
    pub pool: PoolRules,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:6379".to_string(),
            queue_capacity: 32,
            bootstrap_admin: Some("admin".to_string()),
            database: DatabaseConfig::default(),
            pool: PoolRules::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `ws://host:port` for a SurrealDB server, `mem://` for a throwaway store.
    pub address: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            address: "ws://127.0.0.1:8000".to_string(),
            namespace: "bolao".to_string(),
            database: "bolao".to_string(),
            username: Some("root".to_string()),
            password: Some("root".to_string()),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            address: "mem://".to_string(),
            username: None,
            password: None,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PoolRules {
    pub prize_tiers: PrizeTiers,
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be greater than zero");
        }
        if self.database.address.is_empty() {
            bail!("database.address must not be empty");
        }
        if self.database.username.is_some() != self.database.password.is_some() {
            bail!("database.username and database.password must be set together");
        }
        Ok(())
    }
}
