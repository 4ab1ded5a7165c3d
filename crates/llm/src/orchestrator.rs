//! AI orchestrator
//!
//! Produces a generated response across possibly-unreliable providers
//! without callers knowing which one served them. Per call: consult the
//! cache, walk a health-aware candidate list under a hard timeout, record
//! health after every attempt, cache on success.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use leadpipe_config::{CacheSettings, OrchestratorSettings, ProviderKind};
use leadpipe_core::{Error, ProviderAttempt, Result};

use crate::backend::ProviderBackend;
use crate::cache::{fingerprint, ResponseCache};
use crate::health::HealthRegistry;
use crate::LlmError;

/// One generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    /// When set, output must parse as JSON and validate against this schema
    pub schema: Option<Value>,
    /// Tried first unless its circuit is open
    pub preferred: Option<ProviderKind>,
    /// Override of the configured per-call timeout
    pub timeout_ms: Option<u64>,
}

impl GenerateRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Normalized generation result.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub provider: ProviderKind,
    pub latency_ms: u64,
    pub cached: bool,
}

/// Provider selection, fallback, caching and circuit breaking.
pub struct Orchestrator {
    /// Static priority order, fixed at construction
    backends: Vec<Arc<dyn ProviderBackend>>,
    health: HealthRegistry,
    cache: Arc<ResponseCache>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        backends: Vec<Arc<dyn ProviderBackend>>,
        settings: OrchestratorSettings,
        cache_settings: &CacheSettings,
    ) -> Self {
        // Order the backends by the configured priority list; anything not
        // listed keeps its construction order at the end.
        let mut ordered: Vec<Arc<dyn ProviderBackend>> = Vec::with_capacity(backends.len());
        for kind in &settings.priority {
            if let Some(backend) = backends.iter().find(|b| b.kind() == *kind) {
                ordered.push(backend.clone());
            }
        }
        for backend in &backends {
            if !ordered.iter().any(|b| b.kind() == backend.kind()) {
                ordered.push(backend.clone());
            }
        }

        Self {
            backends: ordered,
            health: HealthRegistry::new(
                settings.circuit_failure_threshold,
                Duration::from_millis(settings.circuit_cooldown_ms),
            ),
            cache: Arc::new(ResponseCache::new(Duration::from_secs(cache_settings.ttl_secs))),
            settings,
        }
    }

    /// Generate a response, falling back across providers.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        if self.backends.is_empty() {
            return Err(Error::Config("no providers configured".to_string()));
        }

        if let Some(response) = self.cached_response(&request) {
            return Ok(response);
        }

        let timeout = Duration::from_millis(request.timeout_ms.unwrap_or(self.settings.timeout_ms));
        let candidates = self.candidates(request.preferred);
        if candidates.is_empty() {
            // Every configured provider is circuit-open
            let attempts = self
                .backends
                .iter()
                .map(|b| ProviderAttempt {
                    provider: b.kind().to_string(),
                    error: "circuit open".to_string(),
                    latency_ms: 0,
                })
                .collect();
            return Err(Error::AiGenerationFailed { attempts });
        }

        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        for backend in candidates {
            // Claim the attempt; for a half-open circuit only one caller
            // wins the probe and everyone else skips the provider
            if !self.health.begin_attempt(backend.kind()) {
                continue;
            }
            if let Some((text, latency_ms)) = self
                .try_backend(&backend, &request, timeout, &mut attempts)
                .await
            {
                // Keyed by the backend that actually served the response, so
                // the entry's model identity is never misattributed
                let fp = fingerprint(&request.prompt, backend.model(), &backend.options());
                self.cache.put(fp, text.clone(), backend.kind());
                return Ok(GenerateResponse {
                    text,
                    provider: backend.kind(),
                    latency_ms,
                    cached: false,
                });
            }
        }

        warn!(attempts = attempts.len(), "All candidate providers failed");
        Err(Error::AiGenerationFailed { attempts })
    }

    /// Check the cache under every backend's key, preferred backend first.
    /// Any backend this request could be served by may hold a matching
    /// entry; circuit state is ignored since a hit needs no provider call.
    fn cached_response(&self, request: &GenerateRequest) -> Option<GenerateResponse> {
        let mut order: Vec<&Arc<dyn ProviderBackend>> = Vec::with_capacity(self.backends.len());
        if let Some(kind) = request.preferred {
            if let Some(backend) = self.backends.iter().find(|b| b.kind() == kind) {
                order.push(backend);
            }
        }
        for backend in &self.backends {
            if order.iter().any(|b| b.kind() == backend.kind()) {
                continue;
            }
            order.push(backend);
        }

        for backend in order {
            let fp = fingerprint(&request.prompt, backend.model(), &backend.options());
            if let Some(entry) = self.cache.get(&fp) {
                debug!(provider = %entry.provider, "Cache hit, skipping provider call");
                return Some(GenerateResponse {
                    text: entry.response,
                    provider: entry.provider,
                    latency_ms: 0,
                    cached: true,
                });
            }
        }
        None
    }

    /// Ordered candidate list: preferred first when its circuit allows it,
    /// then the static priority list filtered of open circuits.
    fn candidates(&self, preferred: Option<ProviderKind>) -> Vec<Arc<dyn ProviderBackend>> {
        let mut out: Vec<Arc<dyn ProviderBackend>> = Vec::new();
        if let Some(kind) = preferred {
            if let Some(backend) = self.backends.iter().find(|b| b.kind() == kind) {
                if self.health.allows(kind) {
                    out.push(backend.clone());
                }
            }
        }
        for backend in &self.backends {
            if out.iter().any(|b| b.kind() == backend.kind()) {
                continue;
            }
            if self.health.allows(backend.kind()) {
                out.push(backend.clone());
            }
        }
        out
    }

    /// Run one candidate, including the single same-provider retry on a
    /// schema mismatch. Returns the accepted text, or None after recording
    /// the failed attempt(s).
    async fn try_backend(
        &self,
        backend: &Arc<dyn ProviderBackend>,
        request: &GenerateRequest,
        timeout: Duration,
        attempts: &mut Vec<ProviderAttempt>,
    ) -> Option<(String, u64)> {
        let kind = backend.kind();
        let mut schema_retry_used = false;

        loop {
            let started = Instant::now();
            let outcome = tokio::time::timeout(timeout, backend.complete(&request.prompt)).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let text = match outcome {
                Err(_) => {
                    // Abandon the in-flight call; a provider failure for
                    // circuit-breaking purposes.
                    self.health.record_failure(kind);
                    attempts.push(ProviderAttempt {
                        provider: kind.to_string(),
                        error: format!("timed out after {}ms", timeout.as_millis()),
                        latency_ms,
                    });
                    debug!(provider = %kind, timeout_ms = timeout.as_millis() as u64, "Provider timed out");
                    return None;
                }
                Ok(Err(err)) => {
                    self.health.record_failure(kind);
                    attempts.push(ProviderAttempt {
                        provider: kind.to_string(),
                        error: err.to_string(),
                        latency_ms,
                    });
                    debug!(provider = %kind, error = %err, "Provider call failed");
                    return None;
                }
                Ok(Ok(text)) => text,
            };

            if let Some(schema) = &request.schema {
                if let Err(message) = validate_structured(&text, schema) {
                    // A shape mismatch may be a formatting fluke rather than
                    // an outage: retry the same provider once.
                    self.health.record_failure(kind);
                    attempts.push(ProviderAttempt {
                        provider: kind.to_string(),
                        error: format!("malformed output: {}", message),
                        latency_ms,
                    });
                    if !schema_retry_used {
                        schema_retry_used = true;
                        debug!(provider = %kind, "Schema mismatch, retrying same provider once");
                        continue;
                    }
                    return None;
                }
            }

            self.health.record_success(kind);
            info!(provider = %kind, latency_ms, "Generation succeeded");
            return Some((text, latency_ms));
        }
    }

    /// Round-trip each configured provider and return the healthy subset.
    /// Startup-time check, never on the hot path.
    pub async fn validate_providers(&self) -> Vec<ProviderKind> {
        let mut healthy = Vec::new();
        for backend in &self.backends {
            if backend.is_available().await {
                healthy.push(backend.kind());
            }
        }
        info!(healthy = ?healthy, "Provider validation finished");
        healthy
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    pub fn reset_health(&self) {
        self.health.reset_all();
    }

    pub fn health_snapshot(&self, provider: ProviderKind) -> crate::health::ProviderHealthSnapshot {
        self.health.snapshot(provider)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Spawn the periodic cache expiry sweep.
    pub fn start_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }
}

/// Check structured output: must parse as JSON (markdown fences tolerated)
/// and validate against the schema.
fn validate_structured(text: &str, schema: &Value) -> std::result::Result<(), String> {
    let cleaned = strip_code_fences(text);
    let instance: Value =
        serde_json::from_str(cleaned).map_err(|e| format!("not valid JSON: {}", e))?;
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| format!("schema compile error: {}", e))?;
    if let Err(errors) = compiled.validate(&instance) {
        let first = errors
            .into_iter()
            .next()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown validation error".to_string());
        return Err(first);
    }
    Ok(())
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::CircuitState;
    use crate::mock::{MockBackend, MockBehavior};
    use serde_json::json;

    fn settings(timeout_ms: u64, threshold: u32) -> OrchestratorSettings {
        OrchestratorSettings {
            timeout_ms,
            circuit_failure_threshold: threshold,
            circuit_cooldown_ms: 60_000,
            priority: vec![ProviderKind::Claude, ProviderKind::OpenAi, ProviderKind::Ollama],
        }
    }

    fn cache_settings() -> CacheSettings {
        CacheSettings {
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }

    #[tokio::test]
    async fn test_fallback_to_third_provider() {
        let a = MockBackend::failing(ProviderKind::Claude, "unavailable");
        let b = MockBackend::failing(ProviderKind::OpenAi, "unavailable");
        let c = MockBackend::ok(ProviderKind::Ollama, "from c");
        let orch = Orchestrator::new(
            vec![a.clone(), b.clone(), c.clone()],
            settings(1_000, 5),
            &cache_settings(),
        );

        let response = orch.generate(GenerateRequest::text("hello")).await.unwrap();
        assert_eq!(response.text, "from c");
        assert_eq!(response.provider, ProviderKind::Ollama);
        assert!(!response.cached);

        // Exactly one failure recorded for A and B, zero for C
        assert_eq!(orch.health_snapshot(ProviderKind::Claude).consecutive_failures, 1);
        assert_eq!(orch.health_snapshot(ProviderKind::OpenAi).consecutive_failures, 1);
        assert_eq!(orch.health_snapshot(ProviderKind::Ollama).consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let a = MockBackend::failing(ProviderKind::Claude, "down");
        let b = MockBackend::failing(ProviderKind::OpenAi, "down");
        let orch = Orchestrator::new(vec![a, b], settings(1_000, 5), &cache_settings());

        let err = orch.generate(GenerateRequest::text("hello")).await.unwrap_err();
        match err {
            Error::AiGenerationFailed { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].provider, "claude");
                assert_eq!(attempts[1].provider, "openai");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers_and_health() {
        let a = MockBackend::ok(ProviderKind::Claude, "generated");
        let orch = Orchestrator::new(vec![a.clone()], settings(1_000, 5), &cache_settings());

        let first = orch.generate(GenerateRequest::text("same prompt")).await.unwrap();
        assert!(!first.cached);
        let second = orch.generate(GenerateRequest::text("same  prompt")).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.text, "generated");
        // Provider called exactly once; cache hit did not touch it
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_response_cached_under_serving_model() {
        let a = MockBackend::failing(ProviderKind::Claude, "down");
        let b = MockBackend::ok(ProviderKind::OpenAi, "from b");
        let orch = Orchestrator::new(vec![a.clone(), b.clone()], settings(1_000, 5), &cache_settings());

        let first = orch.generate(GenerateRequest::text("p")).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.provider, ProviderKind::OpenAi);

        // The entry is keyed by the fallback that served it, so the repeat
        // request hits the cache instead of re-walking the candidates
        let second = orch.generate(GenerateRequest::text("p")).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.provider, ProviderKind::OpenAi);
        assert_eq!(second.text, "from b");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_preferred_provider_tried_first() {
        let a = MockBackend::ok(ProviderKind::Claude, "from claude");
        let b = MockBackend::ok(ProviderKind::Ollama, "from ollama");
        let orch = Orchestrator::new(vec![a.clone(), b.clone()], settings(1_000, 5), &cache_settings());

        let request = GenerateRequest {
            prompt: "p".to_string(),
            preferred: Some(ProviderKind::Ollama),
            ..Default::default()
        };
        let response = orch.generate(request).await.unwrap();
        assert_eq!(response.provider, ProviderKind::Ollama);
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_circuit_excludes_provider_until_cooldown() {
        let a = MockBackend::failing(ProviderKind::Claude, "down");
        let b = MockBackend::ok(ProviderKind::OpenAi, "ok");
        let orch = Orchestrator::new(
            vec![a.clone(), b.clone()],
            settings(1_000, 2),
            &cache_settings(),
        );

        // Two failures open claude's circuit (threshold 2); use distinct
        // prompts to bypass the cache.
        orch.generate(GenerateRequest::text("p1")).await.unwrap();
        orch.generate(GenerateRequest::text("p2")).await.unwrap();
        assert_eq!(orch.health_snapshot(ProviderKind::Claude).state, CircuitState::Open);
        assert_eq!(a.calls(), 2);

        // Claude is excluded now; only openai serves
        orch.generate(GenerateRequest::text("p3")).await.unwrap();
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_provider_failure() {
        let a = MockBackend::hanging(ProviderKind::Claude, Duration::from_secs(5));
        let b = MockBackend::ok(ProviderKind::OpenAi, "fast");
        let orch = Orchestrator::new(vec![a, b], settings(50, 5), &cache_settings());

        let response = orch.generate(GenerateRequest::text("p")).await.unwrap();
        assert_eq!(response.provider, ProviderKind::OpenAi);
        assert_eq!(orch.health_snapshot(ProviderKind::Claude).consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_schema_mismatch_retries_same_provider_once() {
        let schema = json!({
            "type": "object",
            "properties": {"assessment": {"type": "string"}},
            "required": ["assessment"]
        });
        let a = MockBackend::scripted(
            ProviderKind::Claude,
            vec![MockBehavior::Respond("not json".to_string())],
            MockBehavior::Respond(r#"{"assessment": "solid lead"}"#.to_string()),
        );
        let orch = Orchestrator::new(vec![a.clone()], settings(1_000, 5), &cache_settings());

        let request = GenerateRequest {
            prompt: "p".to_string(),
            schema: Some(schema),
            ..Default::default()
        };
        let response = orch.generate(request).await.unwrap();
        assert_eq!(a.calls(), 2);
        assert!(response.text.contains("solid lead"));
        // The mismatch still counted against health
        assert_eq!(orch.health_snapshot(ProviderKind::Claude).consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_schema_mismatch_twice_falls_through() {
        let schema = json!({"type": "object"});
        let a = MockBackend::scripted(
            ProviderKind::Claude,
            vec![],
            MockBehavior::Respond("still not json".to_string()),
        );
        let b = MockBackend::ok(ProviderKind::OpenAi, r#"{}"#);
        let orch = Orchestrator::new(vec![a.clone(), b], settings(1_000, 5), &cache_settings());

        let request = GenerateRequest {
            prompt: "p".to_string(),
            schema: Some(schema),
            ..Default::default()
        };
        let response = orch.generate(request).await.unwrap();
        assert_eq!(response.provider, ProviderKind::OpenAi);
        assert_eq!(a.calls(), 2);
        assert_eq!(orch.health_snapshot(ProviderKind::Claude).consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_validate_providers_returns_healthy_subset() {
        let a = MockBackend::ok(ProviderKind::Claude, "x");
        let b = MockBackend::failing(ProviderKind::OpenAi, "down");
        let orch = Orchestrator::new(vec![a, b], settings(1_000, 5), &cache_settings());
        assert_eq!(orch.validate_providers().await, vec![ProviderKind::Claude]);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_regeneration() {
        let a = MockBackend::ok(ProviderKind::Claude, "v1");
        let orch = Orchestrator::new(vec![a.clone()], settings(1_000, 5), &cache_settings());
        orch.generate(GenerateRequest::text("p")).await.unwrap();
        assert_eq!(orch.cache_len(), 1);
        orch.clear_cache();
        assert_eq!(orch.cache_len(), 0);
        orch.generate(GenerateRequest::text("p")).await.unwrap();
        assert_eq!(a.calls(), 2);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
    }
}
