use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::{Endpoints, DEFAULT_TIMEOUT};
use crate::bucket::{BucketConfig, BucketRegistry};

pub const ACCESS_KEY_ENV: &str = "QINIU_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "QINIU_SECRET_KEY";

const DRIVERS: &[&str] = &["qiniu", "memory"];

/// One storage profile ("disk") as read from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DiskConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// Ordered; the first entry is the default bucket.
    #[serde(default)]
    pub buckets: Vec<BucketEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketEntry {
    pub alias: String,
    pub name: String,
    pub domain: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointsConfig {
    pub rs: Option<String>,
    pub rsf: Option<String>,
    pub up: Option<String>,
}

fn default_driver() -> String {
    "qiniu".to_string()
}

impl DiskConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let mut config: DiskConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Fill empty credentials from the environment.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.access_key.is_empty() {
            if let Some(key) = lookup(ACCESS_KEY_ENV) {
                self.access_key = key;
            }
        }
        if self.secret_key.is_empty() {
            if let Some(key) = lookup(SECRET_KEY_ENV) {
                self.secret_key = key;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !DRIVERS.contains(&self.driver.as_str()) {
            anyhow::bail!("Unknown storage driver: {}", self.driver);
        }
        if self.buckets.is_empty() {
            anyhow::bail!("buckets must contain at least one bucket");
        }
        for (i, bucket) in self.buckets.iter().enumerate() {
            if bucket.alias.is_empty() {
                anyhow::bail!("bucket #{} has an empty alias", i + 1);
            }
            if bucket.name.is_empty() {
                anyhow::bail!("bucket '{}' has an empty name", bucket.alias);
            }
            if bucket.domain.is_empty() {
                anyhow::bail!("bucket '{}' has an empty domain", bucket.alias);
            }
            if self.buckets[..i].iter().any(|b| b.alias == bucket.alias) {
                anyhow::bail!("bucket alias '{}' is defined twice", bucket.alias);
            }
        }
        if self.driver == "qiniu" {
            if self.access_key.is_empty() {
                anyhow::bail!("access_key must not be empty (or set {})", ACCESS_KEY_ENV);
            }
            if self.secret_key.is_empty() {
                anyhow::bail!("secret_key must not be empty (or set {})", SECRET_KEY_ENV);
            }
        }
        Ok(())
    }

    pub fn registry(&self) -> anyhow::Result<BucketRegistry> {
        let mut registry = BucketRegistry::new();
        for bucket in &self.buckets {
            registry.insert(
                bucket.alias.clone(),
                BucketConfig::new(bucket.name.clone(), bucket.domain.clone()),
            )?;
        }
        Ok(registry)
    }

    pub fn endpoints(&self) -> Endpoints {
        let defaults = Endpoints::default();
        Endpoints {
            rs: self.endpoints.rs.clone().unwrap_or(defaults.rs),
            rsf: self.endpoints.rsf.clone().unwrap_or(defaults.rsf),
            up: self.endpoints.up.clone().unwrap_or(defaults.up),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}
