//! Configuration management for the mapper.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`OGM__` prefix, `__` separated: `OGM__NEO4J__URI`)
//! 2. Config file (`ogm.toml`, optional)
//! 3. Defaults

use serde::Deserialize;

use crate::error::OgmError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OgmConfig {
    #[serde(default)]
    pub neo4j: Neo4jSettings,
    #[serde(default)]
    pub persist: PersistSettings,
}

impl OgmConfig {
    /// Load from `<file_prefix>.{toml,json,...}` and `OGM__*` variables.
    pub fn load(file_prefix: &str) -> Result<Self, OgmError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("OGM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| OgmError::Config(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| OgmError::Config(e.to_string()))
    }
}

/// Connection settings for the Neo4j store.
#[derive(Debug, Clone, Deserialize)]
pub struct Neo4jSettings {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

/// Save behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistSettings {
    /// What to do when two instances of one identity carry different attributes.
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Place a relationship in the same batch as its later endpoint.
    /// When false it goes into the following batch.
    #[serde(default = "default_true")]
    pub relationships_in_node_batch: bool,
}

impl Default for PersistSettings {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            relationships_in_node_batch: true,
        }
    }
}

/// Resolution of instances sharing an identity but not their attributes.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first-encountered instance's attributes.
    #[default]
    FirstWins,
    /// Abort the save with `ConflictingEntityState`.
    Fail,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "secret".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OgmConfig::default();
        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
        assert_eq!(config.neo4j.max_connections, 16);
        assert_eq!(config.persist.duplicate_policy, DuplicatePolicy::FirstWins);
        assert!(config.persist.relationships_in_node_batch);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = OgmConfig::load("does-not-exist/ogm-test").unwrap();
        assert_eq!(config.neo4j.user, "neo4j");
        assert_eq!(config.neo4j.fetch_size, 256);
    }

    #[test]
    fn test_persist_section_from_json() {
        let json = r#"{ "persist": { "duplicate_policy": "fail", "relationships_in_node_batch": false } }"#;
        let config: OgmConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.persist.duplicate_policy, DuplicatePolicy::Fail);
        assert!(!config.persist.relationships_in_node_batch);
        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
    }
}
