//! Backend construction from validated provider settings.

use std::sync::Arc;
use std::time::Duration;

use leadpipe_config::{ProviderKind, ProviderSettings};

use crate::backend::{OllamaBackend, OllamaConfig, OpenAiBackend, OpenAiConfig, ProviderBackend};
use crate::claude::{ClaudeBackend, ClaudeConfig};
use crate::LlmError;

/// Build a backend for one configured provider.
///
/// API keys fall back to each vendor's conventional environment variable
/// when not set in config.
pub fn build_backend(settings: &ProviderSettings) -> Result<Arc<dyn ProviderBackend>, LlmError> {
    // Transport timeout is generous; the orchestrator enforces the real
    // per-call bound.
    let timeout = Duration::from_secs(120);

    match settings.kind {
        ProviderKind::Claude => {
            let config = ClaudeConfig {
                api_key: settings
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                    .unwrap_or_default(),
                model: settings.model.clone(),
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
                timeout,
                endpoint: settings
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            };
            Ok(Arc::new(ClaudeBackend::new(config)?))
        }
        ProviderKind::OpenAi => {
            let config = OpenAiConfig {
                api_key: settings
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                    .unwrap_or_default(),
                model: settings.model.clone(),
                endpoint: settings
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com".to_string()),
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
                timeout,
            };
            Ok(Arc::new(OpenAiBackend::new(config)?))
        }
        ProviderKind::Ollama => {
            let config = OllamaConfig {
                model: settings.model.clone(),
                endpoint: settings
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".to_string()),
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
                timeout,
            };
            Ok(Arc::new(OllamaBackend::new(config)?))
        }
    }
}
