//! Router configuration
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! - `ROUTER_AVAILABILITY_TTL_SECS`: availability cache lifetime (default 60)
//! - `ROUTER_PROBE_TIMEOUT_SECS`: per-probe bound (default 5)
//! - `ROUTER_INVOCATION_TIMEOUT_SECS`: per-call bound (default 30)
//!
//! Tables left out of the file fall back to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::{BackendRegistry, HttpBackend, HttpBackendConfig};
use crate::router::fallback::{ChainCycle, FallbackTable, TaskFallback};
use crate::router::selector::{SelectionTable, DEFAULT_BACKEND};
use crate::types::{BackendId, TaskType};

/// Errors loading or checking configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Problems that do not stop the router from running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// Walking this chain revisits a backend; dispatch treats it as exhausted
    FallbackCycle(ChainCycle),
    /// Task type routed to the default backend
    MissingRule(TaskType),
    /// Referenced in routing tables but absent from `[backends]`
    UnconfiguredBackend(BackendId),
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FallbackCycle(cycle) => write!(f, "fallback cycle ({cycle})"),
            Self::MissingRule(task) => write!(f, "no selection rule for {task}"),
            Self::UnconfiguredBackend(id) => write!(f, "{id} is referenced but not configured"),
        }
    }
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_invocation_timeout_secs() -> u64 {
    30
}

fn default_backend() -> BackendId {
    DEFAULT_BACKEND
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_ttl_secs")]
    pub availability_ttl_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
    /// Backend for task types without a rule
    #[serde(default = "default_backend")]
    pub default_backend: BackendId,
    #[serde(default)]
    pub rules: SelectionTable,
    #[serde(default)]
    pub fallbacks: BTreeMap<BackendId, Vec<BackendId>>,
    #[serde(default)]
    pub fallbacks_by_task: Vec<TaskFallback>,
    #[serde(default)]
    pub backends: BTreeMap<BackendId, HttpBackendConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            availability_ttl_secs: default_ttl_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            default_backend: default_backend(),
            rules: SelectionTable::new(),
            fallbacks: BTreeMap::new(),
            fallbacks_by_task: Vec::new(),
            backends: BTreeMap::new(),
        }
    }
}

impl RouterConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read, parse, apply environment overrides and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env();
        config.validate()?;
        debug!(path = %path.display(), backends = config.backends.len(), "Loaded router config");
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; unparseable values are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let secs = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        if let Some(v) = secs("ROUTER_AVAILABILITY_TTL_SECS") {
            self.availability_ttl_secs = v;
        }
        if let Some(v) = secs("ROUTER_PROBE_TIMEOUT_SECS") {
            self.probe_timeout_secs = v;
        }
        if let Some(v) = secs("ROUTER_INVOCATION_TIMEOUT_SECS") {
            self.invocation_timeout_secs = v;
        }
    }

    pub fn availability_ttl(&self) -> Duration {
        Duration::from_secs(self.availability_ttl_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    /// Configured rules, or the built-in table when none are given
    pub fn selection_table(&self) -> SelectionTable {
        if self.rules.is_empty() {
            SelectionTable::default_table()
        } else {
            self.rules.clone()
        }
    }

    /// Configured chains, or the built-in table when none are given
    pub fn fallback_table(&self) -> FallbackTable {
        if self.fallbacks.is_empty() && self.fallbacks_by_task.is_empty() {
            FallbackTable::default_table()
        } else {
            FallbackTable::from_parts(self.fallbacks.clone(), self.fallbacks_by_task.clone())
        }
    }

    /// Non-fatal problems with the routing tables
    pub fn issues(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if let Some(cycle) = self.fallback_table().find_cycle() {
            issues.push(ConfigIssue::FallbackCycle(cycle));
        }
        issues.extend(
            self.selection_table()
                .missing_rules()
                .into_iter()
                .map(ConfigIssue::MissingRule),
        );

        if !self.backends.is_empty() {
            let rules = self.selection_table();
            let mut referenced: Vec<BackendId> = vec![self.default_backend];
            referenced.extend(self.fallbacks.keys().copied());
            referenced.extend(self.fallbacks.values().flatten().copied());
            for tf in &self.fallbacks_by_task {
                referenced.push(tf.backend);
                referenced.extend(tf.chain.iter().copied());
            }
            for &task in TaskType::all() {
                if let Some(rule) = rules.get(task) {
                    referenced.push(rule.primary);
                    referenced.extend(rule.overrides.iter().map(|o| o.backend));
                }
            }
            referenced.sort();
            referenced.dedup();
            issues.extend(
                referenced
                    .into_iter()
                    .filter(|id| !self.backends.contains_key(id))
                    .map(ConfigIssue::UnconfiguredBackend),
            );
        }
        issues
    }

    /// Reject unusable values and log everything in [`Self::issues`]
    pub fn validate(&self) -> Result<Vec<ConfigIssue>, ConfigError> {
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid("probe_timeout_secs must be > 0".into()));
        }
        if self.invocation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "invocation_timeout_secs must be > 0".into(),
            ));
        }
        for (id, backend) in &self.backends {
            if backend.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{id} has an empty url")));
            }
        }

        let issues = self.issues();
        for issue in &issues {
            warn!(issue = %issue, "Router config issue");
        }
        Ok(issues)
    }

    /// HTTP clients for every `[backends.*]` entry
    pub fn build_registry(&self) -> Result<BackendRegistry, ConfigError> {
        let mut registry = BackendRegistry::new();
        for (&id, backend) in &self.backends {
            let client = HttpBackend::new(id, backend.clone())
                .map_err(|e| ConfigError::Invalid(format!("{id}: {e}")))?;
            registry.register(std::sync::Arc::new(client));
        }
        Ok(registry)
    }
}
