//! RBAC core configuration loading and validation

use crate::cache::CacheConfig;
use crate::tree::ValidationMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding the grant cache TTL (seconds)
pub const ENV_GRANT_CACHE_TTL_SECS: &str = "RBAC_GRANT_CACHE_TTL_SECS";
/// Environment variable overriding the grant cache capacity
pub const ENV_GRANT_CACHE_CAPACITY: &str = "RBAC_GRANT_CACHE_CAPACITY";
/// Environment variable overriding the catalog cache TTL (seconds)
pub const ENV_CATALOG_CACHE_TTL_SECS: &str = "RBAC_CATALOG_CACHE_TTL_SECS";
/// Environment variable toggling strict parent validation on writes
pub const ENV_STRICT_PARENTS: &str = "RBAC_STRICT_PARENTS";

/// Complete RBAC configuration
///
/// ```toml
/// [grant_cache]
/// capacity = 10000
/// ttl_secs = 300
///
/// [catalog_cache]
/// capacity = 1
/// ttl_secs = 60
///
/// [validation]
/// strict_parents = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RbacConfig {
    /// Per-role grant cache
    #[serde(default)]
    pub grant_cache: CacheConfig,

    /// Full-catalog cache
    #[serde(default = "default_catalog_cache")]
    pub catalog_cache: CacheConfig,

    /// Write-path validation
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValidationConfig {
    /// Reject parents that are not part of the catalog
    #[serde(default = "default_true")]
    pub strict_parents: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_parents: default_true(),
        }
    }
}

impl ValidationConfig {
    /// Validator mode for store writes
    pub fn mode(&self) -> ValidationMode {
        if self.strict_parents {
            ValidationMode::Strict
        } else {
            ValidationMode::Lenient
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_catalog_cache() -> CacheConfig { CacheConfig::new(1, 60) }

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            grant_cache: CacheConfig::default(),
            catalog_cache: default_catalog_cache(),
            validation: ValidationConfig::default(),
        }
    }
}

impl RbacConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: RbacConfig = toml::from_str(contents)
            .context("Failed to parse RBAC configuration")?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        Self::from_toml_str(&contents)
    }

    /// Apply `RBAC_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_GRANT_CACHE_TTL_SECS) {
            self.grant_cache.ttl_secs = parse_var(ENV_GRANT_CACHE_TTL_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_GRANT_CACHE_CAPACITY) {
            self.grant_cache.capacity = parse_var(ENV_GRANT_CACHE_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_CATALOG_CACHE_TTL_SECS) {
            self.catalog_cache.ttl_secs = parse_var(ENV_CATALOG_CACHE_TTL_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_STRICT_PARENTS) {
            self.validation.strict_parents = parse_var(ENV_STRICT_PARENTS, &value)?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.grant_cache.capacity == 0 {
            anyhow::bail!("grant_cache.capacity must be greater than 0");
        }

        if self.catalog_cache.capacity == 0 {
            anyhow::bail!("catalog_cache.capacity must be greater than 0");
        }

        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value '{}' for {}", value, name))
}
