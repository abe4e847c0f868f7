//! payee-resolver configuration
//!
//! One TOML file, every key optional:
//!
//! ```toml
//! database_path = "/var/lib/payee-resolver/resolution.db"
//! supplier_snapshot = "/var/lib/payee-resolver/suppliers.json"
//!
//! [logging]
//! level = "info"
//!
//! [provider]
//! base_url = "https://api.example.com/payee-search/v1"
//! client_id = "payee-resolver"
//! requests_per_second = 20
//! page_size = 25
//!
//! [resolution]
//! poll_interval_ms = 5000
//! job_ceiling_ms = 600000
//! precedence = ["external", "cache", "ai"]
//! denylist_patterns = ["^PAYROLL\\b"]
//! ```
//!
//! Provider secrets resolve ENV → TOML (see [`ProviderConfig::credentials`]).

use crate::bulk_search::RetryPolicy;
use crate::error::{ResolutionError, ResolutionResult};
use crate::types::{PayeeType, SignalSource};
use payee_common::config::{resolve_secret, LoggingConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the provider consumer key
pub const CONSUMER_KEY_ENV: &str = "PAYEE_PROVIDER_CONSUMER_KEY";

/// Environment variable holding the provider signing secret
pub const SIGNING_SECRET_ENV: &str = "PAYEE_PROVIDER_SIGNING_SECRET";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub resolution: ResolutionSettings,
    /// SQLite file for searches and classifications (in-memory when absent)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Supplier snapshot JSON written by the directory sync
    #[serde(default)]
    pub supplier_snapshot: Option<PathBuf>,
}

/// `[provider]` table: bulk search provider endpoint and client behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub consumer_key: Option<String>,
    pub signing_secret: Option<String>,
    /// Sent as `X-Client-Id` on every request
    pub client_id: String,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Result page size used when draining a search
    pub page_size: usize,
    /// Provider cap on search items per bulk job
    pub max_items_per_job: usize,
    /// How long a submitted payee set is remembered for reuse
    pub submission_ttl_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.example.com/payee-search/v1".to_string(),
            consumer_key: None,
            signing_secret: None,
            client_id: "payee-resolver".to_string(),
            requests_per_second: 20,
            timeout_secs: 30,
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            page_size: 25,
            max_items_per_job: 3_000,
            submission_ttl_secs: 3_600,
        }
    }
}

/// Resolved provider secrets
#[derive(Clone)]
pub struct ProviderCredentials {
    pub consumer_key: String,
    pub signing_secret: String,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("consumer_key", &self.consumer_key)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn submission_ttl(&self) -> Duration {
        Duration::from_secs(self.submission_ttl_secs)
    }

    /// Resolve consumer key and signing secret (ENV → TOML)
    pub fn credentials(&self) -> ResolutionResult<ProviderCredentials> {
        let consumer_key = resolve_secret(
            "Provider consumer key",
            CONSUMER_KEY_ENV,
            self.consumer_key.as_deref(),
        );
        let signing_secret = resolve_secret(
            "Provider signing secret",
            SIGNING_SECRET_ENV,
            self.signing_secret.as_deref(),
        );

        match (consumer_key, signing_secret) {
            (Some(consumer_key), Some(signing_secret)) => Ok(ProviderCredentials {
                consumer_key,
                signing_secret,
            }),
            _ => Err(ResolutionError::Config(format!(
                "Provider credentials not configured. Set {} and {}, or consumer_key and \
                 signing_secret in the [provider] table",
                CONSUMER_KEY_ENV, SIGNING_SECRET_ENV
            ))),
        }
    }

    pub fn validate(&self) -> ResolutionResult<()> {
        url::Url::parse(&self.base_url)
            .map_err(|e| ResolutionError::Config(format!("provider.base_url invalid: {}", e)))?;
        if self.requests_per_second == 0 {
            return Err(ResolutionError::Config(
                "provider.requests_per_second must be positive".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(ResolutionError::Config("provider.page_size must be positive".to_string()));
        }
        if self.max_items_per_job == 0 {
            return Err(ResolutionError::Config(
                "provider.max_items_per_job must be positive".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(ResolutionError::Config("provider.client_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// `[resolution]` table: orchestrator thresholds and timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolutionSettings {
    /// Send payees to external search when enabled
    pub enable_external_search: bool,
    /// Cache confidence at or above which a payee needs no external search
    pub completeness_threshold: f64,
    /// Minimum external match confidence to accept its identity
    pub external_acceptance_threshold: f64,
    /// Minimum cache confidence to accept its identity
    pub cache_floor: f64,
    /// Minimum AI confidence for the AI signal to count
    pub ai_floor: f64,
    /// External confidence must exceed AI confidence by this much to override the AI type
    pub type_override_margin: f64,
    /// AI payee types eligible for external search
    pub search_payee_types: Vec<PayeeType>,
    /// Identity precedence, highest first
    pub precedence: Vec<SignalSource>,
    /// Regular expressions matched against the normalized name
    pub denylist_patterns: Vec<String>,
    pub poll_interval_ms: u64,
    /// Wall-clock ceiling per job, measured from submission
    pub job_ceiling_ms: u64,
    /// Re-submissions of a FAILED job's unresolved payees
    pub max_resubmissions: u32,
    /// Concurrent AI classifier calls
    pub classifier_concurrency: usize,
    /// Progress event channel capacity
    pub event_capacity: usize,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            enable_external_search: true,
            completeness_threshold: 0.95,
            external_acceptance_threshold: 0.80,
            cache_floor: 0.70,
            ai_floor: 0.50,
            type_override_margin: 0.15,
            search_payee_types: vec![PayeeType::Business],
            precedence: vec![SignalSource::External, SignalSource::Cache, SignalSource::Ai],
            denylist_patterns: Vec::new(),
            poll_interval_ms: 5_000,
            job_ceiling_ms: 600_000,
            max_resubmissions: 2,
            classifier_concurrency: 8,
            event_capacity: 256,
        }
    }
}

impl ResolutionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_ceiling(&self) -> Duration {
        Duration::from_millis(self.job_ceiling_ms)
    }

    pub fn validate(&self) -> ResolutionResult<()> {
        for (name, value) in [
            ("completeness_threshold", self.completeness_threshold),
            ("external_acceptance_threshold", self.external_acceptance_threshold),
            ("cache_floor", self.cache_floor),
            ("ai_floor", self.ai_floor),
            ("type_override_margin", self.type_override_margin),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ResolutionError::Config(format!(
                    "resolution.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(ResolutionError::Config(
                "resolution.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.job_ceiling_ms == 0 {
            return Err(ResolutionError::Config(
                "resolution.job_ceiling_ms must be positive".to_string(),
            ));
        }
        if self.classifier_concurrency == 0 {
            return Err(ResolutionError::Config(
                "resolution.classifier_concurrency must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ResolutionError::Config(
                "resolution.event_capacity must be positive".to_string(),
            ));
        }
        if self.precedence.is_empty() {
            return Err(ResolutionError::Config(
                "resolution.precedence must name at least one signal".to_string(),
            ));
        }
        for (i, source) in self.precedence.iter().enumerate() {
            if self.precedence[..i].contains(source) {
                return Err(ResolutionError::Config(format!(
                    "resolution.precedence lists {:?} twice",
                    source
                )));
            }
        }
        for pattern in &self.denylist_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ResolutionError::Config(format!("Invalid denylist pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> ResolutionResult<()> {
        self.provider.validate()?;
        self.resolution.validate()
    }
}
