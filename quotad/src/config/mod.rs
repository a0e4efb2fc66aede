//! Service configuration model
//!
//! A service config is a JSON-shaped tree: an optional global default
//! bucket, plus namespaces that each carry statically configured buckets,
//! an optional namespace default, and an optional template for dynamic
//! bucket creation. The numeric contract of a single bucket lives in
//! [`BucketConfig`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod source;

pub use source::{ConfigSource, FileSource, MemorySource};

/// Default maximum tokens held by a bucket.
pub const DEFAULT_BUCKET_SIZE: i64 = 100;
/// Default fill rate in tokens per second.
pub const DEFAULT_FILL_RATE: i64 = 50;
/// Default ceiling on how long a caller may wait for tokens.
pub const DEFAULT_WAIT_TIMEOUT_MILLIS: i64 = 1000;
/// Default ceiling on projected debt.
pub const DEFAULT_MAX_DEBT_MILLIS: i64 = 10_000;

/// Errors produced while loading, persisting or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("namespace name is empty")]
    EmptyNamespaceName,

    #[error("namespace {0:?} already exists")]
    DuplicateNamespace(String),

    #[error("namespace key {key:?} does not match declared name {name:?}")]
    NamespaceNameMismatch { key: String, name: String },

    #[error("bucket name is empty in namespace {0:?}")]
    EmptyBucketName(String),

    #[error("bucket {namespace}:{bucket}: {reason}")]
    InvalidBucket {
        namespace: String,
        bucket: String,
        reason: String,
    },

    #[error("namespace {namespace}: max_dynamic_buckets must be >= 0, got {value}")]
    InvalidDynamicCap { namespace: String, value: i64 },

    #[error("malformed config document: {0}")]
    Malformed(String),

    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// The full numeric contract of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Maximum tokens held.
    pub size: i64,
    /// Tokens generated per second.
    pub fill_rate: i64,
    /// Maximum time a caller may wait for tokens.
    pub wait_timeout_millis: i64,
    /// Quiet period after which a dynamic bucket is reaped. -1 disables
    /// reaping for buckets built from this config.
    pub max_idle_millis: i64,
    /// Upper bound on the future projection of accumulated debt.
    pub max_debt_millis: i64,
    /// Per-request token ceiling. 0 means unbounded.
    pub max_tokens_per_request: i64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        BucketConfig {
            size: DEFAULT_BUCKET_SIZE,
            fill_rate: DEFAULT_FILL_RATE,
            wait_timeout_millis: DEFAULT_WAIT_TIMEOUT_MILLIS,
            max_idle_millis: -1,
            max_debt_millis: DEFAULT_MAX_DEBT_MILLIS,
            max_tokens_per_request: 0,
        }
    }
}

impl BucketConfig {
    /// Check the numeric bounds of this config. Returns the reason a bound
    /// is violated; context (namespace, bucket name) is attached by
    /// [`ServiceConfig::validate`].
    fn check(&self) -> Result<(), String> {
        if self.size < 0 {
            return Err(format!("size must be >= 0, got {}", self.size));
        }
        if self.fill_rate <= 0 {
            return Err(format!("fill_rate must be > 0, got {}", self.fill_rate));
        }
        if self.wait_timeout_millis < 0 {
            return Err(format!(
                "wait_timeout_millis must be >= 0, got {}",
                self.wait_timeout_millis
            ));
        }
        if self.max_debt_millis < 0 {
            return Err(format!(
                "max_debt_millis must be >= 0, got {}",
                self.max_debt_millis
            ));
        }
        if self.max_tokens_per_request < 0 {
            return Err(format!(
                "max_tokens_per_request must be >= 0, got {}",
                self.max_tokens_per_request
            ));
        }
        Ok(())
    }
}

/// A grouping of buckets sharing defaults and dynamic-creation policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    pub name: String,
    /// Served when a bucket name cannot be resolved and dynamic creation
    /// does not apply.
    pub default_bucket: Option<BucketConfig>,
    /// If present, unknown bucket names in this namespace are materialised
    /// from this template, subject to `max_dynamic_buckets`.
    pub dynamic_bucket_template: Option<BucketConfig>,
    /// Cap on live dynamic buckets. 0 disables dynamic creation even when a
    /// template is present.
    pub max_dynamic_buckets: i64,
    /// Statically configured buckets, keyed by bucket name.
    pub buckets: HashMap<String, BucketConfig>,
}

impl NamespaceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        NamespaceConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a statically configured bucket.
    pub fn add_bucket(
        &mut self,
        name: impl Into<String>,
        cfg: BucketConfig,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyBucketName(self.name.clone()));
        }
        self.buckets.insert(name, cfg);
        Ok(())
    }

    pub fn set_dynamic_bucket_template(&mut self, template: BucketConfig) {
        self.dynamic_bucket_template = Some(template);
    }
}

/// Root configuration: one revision of the full bucket topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Monotonically increasing revision number, stamped by the config
    /// watcher on each successful commit.
    pub version: u64,
    pub global_default_bucket: Option<BucketConfig>,
    pub namespaces: HashMap<String, NamespaceConfig>,
}

impl ServiceConfig {
    pub fn new() -> Self {
        ServiceConfig::default()
    }

    /// Add a namespace, keyed by its declared name.
    pub fn add_namespace(&mut self, ns: NamespaceConfig) -> Result<(), ConfigError> {
        if ns.name.is_empty() {
            return Err(ConfigError::EmptyNamespaceName);
        }
        if self.namespaces.contains_key(&ns.name) {
            return Err(ConfigError::DuplicateNamespace(ns.name));
        }
        self.namespaces.insert(ns.name.clone(), ns);
        Ok(())
    }

    pub fn namespace(&self, name: &str) -> Option<&NamespaceConfig> {
        self.namespaces.get(name)
    }

    /// Fill in namespace names left empty in a hand-written document: the
    /// map key is canonical.
    pub fn normalize(&mut self) {
        for (key, ns) in &mut self.namespaces {
            if ns.name.is_empty() {
                ns.name = key.clone();
            }
        }
    }

    /// Validate the whole tree: non-empty unique names, numeric bounds on
    /// every bucket config reachable from the root.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(global) = &self.global_default_bucket {
            global.check().map_err(|reason| ConfigError::InvalidBucket {
                namespace: String::new(),
                bucket: "<global default>".to_string(),
                reason,
            })?;
        }

        for (key, ns) in &self.namespaces {
            if key.is_empty() {
                return Err(ConfigError::EmptyNamespaceName);
            }
            if ns.name != *key {
                return Err(ConfigError::NamespaceNameMismatch {
                    key: key.clone(),
                    name: ns.name.clone(),
                });
            }
            if ns.max_dynamic_buckets < 0 {
                return Err(ConfigError::InvalidDynamicCap {
                    namespace: key.clone(),
                    value: ns.max_dynamic_buckets,
                });
            }

            let check = |bucket: &str, cfg: &BucketConfig| -> Result<(), ConfigError> {
                cfg.check().map_err(|reason| ConfigError::InvalidBucket {
                    namespace: key.clone(),
                    bucket: bucket.to_string(),
                    reason,
                })
            };

            if let Some(default) = &ns.default_bucket {
                check("<default>", default)?;
            }
            if let Some(template) = &ns.dynamic_bucket_template {
                check("<dynamic template>", template)?;
            }
            for (bucket_name, cfg) in &ns.buckets {
                if bucket_name.is_empty() {
                    return Err(ConfigError::EmptyBucketName(key.clone()));
                }
                check(bucket_name, cfg)?;
            }
        }

        Ok(())
    }
}
