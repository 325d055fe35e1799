//! Named retry policies for the external integrations we deliver to.
//!
//! Each provider overrides a subset of [`RetryConfig`]; anything left unset
//! inherits the `DEFAULT` policy. Unknown names resolve to `DEFAULT`.

use crate::error::{WebhookError, WebhookResult};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const DEFAULT_PROVIDER: &str = "DEFAULT";

/// Partial retry configuration layered over `DEFAULT`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderOverrides {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<f64>,
    pub retryable_status_codes: Option<BTreeSet<u16>>,
    pub timeout_ms: Option<u64>,
}

impl ProviderOverrides {
    fn preset(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        retryable_status_codes: &[u16],
        timeout_ms: u64,
    ) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay_ms: Some(base_delay_ms),
            max_delay_ms: Some(max_delay_ms),
            retryable_status_codes: Some(retryable_status_codes.iter().copied().collect()),
            timeout_ms: Some(timeout_ms),
            ..Default::default()
        }
    }

    /// Apply these overrides on top of `base`.
    pub fn apply(&self, base: &RetryConfig) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_delay_ms: self.base_delay_ms.unwrap_or(base.base_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            jitter: self.jitter.unwrap_or(base.jitter),
            retryable_status_codes: self
                .retryable_status_codes
                .clone()
                .unwrap_or_else(|| base.retryable_status_codes.clone()),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
        }
    }

    /// Field-wise merge where `other` wins.
    pub fn merged_with(&self, other: &ProviderOverrides) -> ProviderOverrides {
        ProviderOverrides {
            max_attempts: other.max_attempts.or(self.max_attempts),
            base_delay_ms: other.base_delay_ms.or(self.base_delay_ms),
            max_delay_ms: other.max_delay_ms.or(self.max_delay_ms),
            backoff_multiplier: other.backoff_multiplier.or(self.backoff_multiplier),
            jitter: other.jitter.or(self.jitter),
            retryable_status_codes: other
                .retryable_status_codes
                .clone()
                .or_else(|| self.retryable_status_codes.clone()),
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
        }
    }
}

/// Lookup table from provider name to retry policy.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    default: RetryConfig,
    overrides: BTreeMap<String, ProviderOverrides>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry holding the built-in provider table
    pub fn new() -> Self {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "CONEKTA".to_string(),
            ProviderOverrides::preset(4, 1500, 25000, &[429, 500, 502, 503, 504], 20000),
        );
        overrides.insert(
            "MIFIEL".to_string(),
            ProviderOverrides::preset(5, 1000, 30000, &[429, 500, 502, 503, 504, 408], 25000),
        );
        overrides.insert(
            "WHATSAPP".to_string(),
            ProviderOverrides::preset(3, 2000, 15000, &[429, 500, 502, 503, 504, 408], 15000),
        );
        overrides.insert(
            "METAMAP".to_string(),
            ProviderOverrides::preset(3, 3000, 30000, &[429, 500, 502, 503, 504, 408], 30000),
        );
        overrides.insert(
            "ODOO".to_string(),
            ProviderOverrides::preset(3, 2000, 20000, &[429, 500, 502, 503, 504], 18000),
        );
        overrides.insert(
            "GNV".to_string(),
            ProviderOverrides::preset(4, 1000, 20000, &[429, 500, 502, 503, 504], 15000),
        );

        Self {
            default: RetryConfig::default(),
            overrides,
        }
    }

    /// Registry with no named providers; every name resolves to `default`
    pub fn empty(default: RetryConfig) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Register or extend a provider. Fields set in `overrides` replace
    /// the ones already registered under the same name.
    pub fn register(&mut self, name: &str, overrides: ProviderOverrides) -> WebhookResult<()> {
        let key = normalize(name);
        if key.is_empty() {
            return Err(WebhookError::InvalidConfig(
                "provider name must not be empty".to_string(),
            ));
        }
        if key == DEFAULT_PROVIDER {
            let config = overrides.apply(&self.default);
            config.validate()?;
            self.default = config;
            return Ok(());
        }

        let merged = match self.overrides.get(&key) {
            Some(existing) => existing.merged_with(&overrides),
            None => overrides,
        };
        merged.apply(&self.default).validate()?;
        self.overrides.insert(key, merged);
        Ok(())
    }

    /// Resolve a provider name to `(canonical name, config)`.
    pub fn resolve(&self, name: &str) -> (String, RetryConfig) {
        let key = normalize(name);
        match self.overrides.get(&key) {
            Some(overrides) => (key, overrides.apply(&self.default)),
            None => {
                if key != DEFAULT_PROVIDER {
                    debug!("Unknown provider '{}', falling back to {}", name, DEFAULT_PROVIDER);
                }
                (DEFAULT_PROVIDER.to_string(), self.default.clone())
            }
        }
    }

    pub fn config_for(&self, name: &str) -> RetryConfig {
        self.resolve(name).1
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = normalize(name);
        key == DEFAULT_PROVIDER || self.overrides.contains_key(&key)
    }

    /// All resolved policies, `DEFAULT` first
    pub fn entries(&self) -> Vec<(String, RetryConfig)> {
        let mut entries = vec![(DEFAULT_PROVIDER.to_string(), self.default.clone())];
        entries.extend(
            self.overrides
                .iter()
                .map(|(name, o)| (name.clone(), o.apply(&self.default))),
        );
        entries
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}
