use serde::{Deserialize, Serialize};

use kodofs_common::storage::StorageError;

/// One configured bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketConfig {
    /// Backend bucket identifier.
    pub name: String,
    /// Base URL objects are served from; `http://` is assumed when the
    /// scheme is omitted.
    pub domain: String,
}

impl BucketConfig {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Domain as a URL prefix ending in exactly one `/`.
    pub fn path_prefix(&self) -> String {
        let domain = self.domain.trim().trim_end_matches('/');
        if domain.starts_with("http://") || domain.starts_with("https://") {
            format!("{}/", domain)
        } else {
            format!("http://{}/", domain)
        }
    }

    /// `host[:port]` of the domain.
    pub fn host(&self) -> &str {
        let domain = self.domain.trim();
        let without_scheme = domain
            .strip_prefix("https://")
            .or_else(|| domain.strip_prefix("http://"))
            .unwrap_or(domain);
        without_scheme.split('/').next().unwrap_or(without_scheme)
    }
}

/// Buckets keyed by alias, in registration order. The first entry is the
/// default bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketRegistry {
    entries: Vec<(String, BucketConfig)>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias`; rejects a duplicate alias.
    pub fn insert(
        &mut self,
        alias: impl Into<String>,
        bucket: BucketConfig,
    ) -> Result<(), StorageError> {
        let alias = alias.into();
        if self.get(&alias).is_some() {
            return Err(StorageError::Configuration(format!(
                "bucket alias '{}' is registered twice",
                alias
            )));
        }
        self.entries.push((alias, bucket));
        Ok(())
    }

    pub fn with(
        mut self,
        alias: impl Into<String>,
        bucket: BucketConfig,
    ) -> Result<Self, StorageError> {
        self.insert(alias, bucket)?;
        Ok(self)
    }

    pub fn get(&self, alias: &str) -> Option<&BucketConfig> {
        self.entries
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, bucket)| bucket)
    }

    /// First registered bucket with its alias.
    pub fn first(&self) -> Option<(&str, &BucketConfig)> {
        self.entries
            .first()
            .map(|(alias, bucket)| (alias.as_str(), bucket))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BucketConfig)> {
        self.entries
            .iter()
            .map(|(alias, bucket)| (alias.as_str(), bucket))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
