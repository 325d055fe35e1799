use crate::circuit_breaker::CircuitBreakerConfig;
use crate::dlq::DEFAULT_DLQ_CAPACITY;
use crate::providers::{ProviderOverrides, ProviderRegistry};
use crate::retry::ClassificationMode;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_USER_AGENT: &str = "Conductores-PWA-Webhook/1.0";
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherSettings {
    pub dlq_capacity: usize,
    pub user_agent: String,
    pub classification: ClassificationMode,
    /// Attempts allowed in flight at once; the rest wait their turn
    pub max_concurrent_deliveries: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            dlq_capacity: DEFAULT_DLQ_CAPACITY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            classification: ClassificationMode::Strict,
            max_concurrent_deliveries: DEFAULT_MAX_CONCURRENT_DELIVERIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            recovery_timeout_ms: defaults.recovery_timeout.as_millis() as u64,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
        }
    }
}

/// Settings loaded from `config.toml`; every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dispatcher: DispatcherSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    /// Extra providers, or overrides of the built-in ones, keyed by name
    pub providers: BTreeMap<String, ProviderOverrides>,
}

impl Config {
    /// Load `config.toml` from the working directory
    pub fn new() -> Result<Self> {
        Self::from_file(DEFAULT_CONFIG_PATH)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&config_str)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded webhook config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise `config.toml` when present, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::new(),
            None => Ok(Self::default()),
        }
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.dlq_capacity == 0 {
            bail!("dispatcher.dlq_capacity must be at least 1");
        }
        if self.dispatcher.user_agent.trim().is_empty() {
            bail!("dispatcher.user_agent must not be empty");
        }
        if self.dispatcher.max_concurrent_deliveries == 0 {
            bail!("dispatcher.max_concurrent_deliveries must be at least 1");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            bail!("circuit_breaker.failure_threshold must be at least 1");
        }
        if self.circuit_breaker.success_threshold == 0 {
            bail!("circuit_breaker.success_threshold must be at least 1");
        }
        self.provider_registry()?;
        Ok(())
    }

    /// Built-in provider table with this config's overrides applied
    pub fn provider_registry(&self) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for (name, overrides) in &self.providers {
            registry
                .register(name, overrides.clone())
                .with_context(|| format!("Invalid overrides for provider {}", name))?;
        }
        Ok(registry)
    }
}
