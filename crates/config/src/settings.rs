//! Main settings module

use std::collections::HashMap;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// AI provider identifier. The provider/model registry is enum-keyed and
/// validated at configuration-load time, not at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Claude (Anthropic Messages API)
    Claude,
    /// OpenAI chat completions
    OpenAi,
    /// Ollama - local models
    Ollama,
}

impl ProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "claude" | "anthropic" => Some(ProviderKind::Claude),
            "openai" | "gpt" => Some(ProviderKind::OpenAi),
            "ollama" | "local" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-queue scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Max simultaneously active jobs
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts before a job goes terminally failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry backoff; doubles each attempt
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Backoff cap
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Active-job lease; an expired lease returns the job to waiting
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_lease_timeout_ms() -> u64 {
    120_000
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            lease_timeout_ms: default_lease_timeout_ms(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Interval between periodic expiry sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Orchestrator timeout, circuit breaker and provider-priority settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Hard per-provider call timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive failures before a provider's circuit opens
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Cool-down before an open circuit admits a half-open probe
    #[serde(default = "default_circuit_cooldown_ms")]
    pub circuit_cooldown_ms: u64,

    /// Static provider priority for candidate ordering
    #[serde(default = "default_priority")]
    pub priority: Vec<ProviderKind>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_cooldown_ms() -> u64 {
    60_000
}

fn default_priority() -> Vec<ProviderKind> {
    vec![ProviderKind::Claude, ProviderKind::OpenAi, ProviderKind::Ollama]
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cooldown_ms: default_circuit_cooldown_ms(),
            priority: default_priority(),
        }
    }
}

/// One configured provider backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,

    /// Model name or deployment id
    pub model: String,

    /// API endpoint override (required for Ollama)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key; falls back to the provider's conventional env var
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> usize {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Per-queue overrides keyed by queue name; unlisted queues use defaults
    #[serde(default)]
    pub queues: HashMap<String, QueueSettings>,

    /// Configured providers, in no particular order
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
            providers: Vec::new(),
            cache: CacheSettings::default(),
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl Settings {
    /// Queue settings for a named queue, falling back to defaults.
    pub fn queue(&self, name: &str) -> QueueSettings {
        self.queues.get(name).cloned().unwrap_or_default()
    }

    /// Validate settings. Rejects values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, queue) in &self.queues {
            if queue.concurrency == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("queues.{}.concurrency", name),
                    message: "Concurrency must be at least 1".to_string(),
                });
            }
            if queue.max_attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("queues.{}.max_attempts", name),
                    message: "At least one attempt is required".to_string(),
                });
            }
            if queue.base_backoff_ms > queue.max_backoff_ms {
                return Err(ConfigError::InvalidValue {
                    field: format!("queues.{}.base_backoff_ms", name),
                    message: format!(
                        "Base backoff {}ms exceeds cap {}ms",
                        queue.base_backoff_ms, queue.max_backoff_ms
                    ),
                });
            }
        }

        if self.orchestrator.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.timeout_ms".to_string(),
                message: "Timeout must be positive".to_string(),
            });
        }

        if self.orchestrator.circuit_failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.circuit_failure_threshold".to_string(),
                message: "Circuit threshold must be at least 1".to_string(),
            });
        }

        let mut seen = Vec::new();
        for provider in &self.providers {
            if seen.contains(&provider.kind) {
                return Err(ConfigError::InvalidValue {
                    field: "providers".to_string(),
                    message: format!("Duplicate provider: {}", provider.kind),
                });
            }
            seen.push(provider.kind);

            if provider.model.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("providers.{}.model", provider.kind),
                    message: "Model must not be empty".to_string(),
                });
            }
        }

        // Priority entries must refer to configured providers
        for kind in &self.orchestrator.priority {
            if !self.providers.is_empty() && !seen.contains(kind) {
                return Err(ConfigError::InvalidValue {
                    field: "orchestrator.priority".to_string(),
                    message: format!("Provider {} is not configured", kind),
                });
            }
        }

        Ok(())
    }
}

/// Load settings from config files and environment variables.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("LEADPIPE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
