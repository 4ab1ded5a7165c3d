//! Per-provider health tracking and circuit breaking.
//!
//! Counters are shared, mutated-by-many state; updates happen under the map
//! entry lock and need no cross-operation transactional guarantee.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use leadpipe_config::ProviderKind;

/// Circuit breaker state for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Excluded from candidate selection until the deadline
    Open,
    /// Cool-down elapsed; a single probe attempt is in flight
    HalfOpen,
}

#[derive(Debug, Clone)]
struct ProviderHealth {
    consecutive_failures: u32,
    state: CircuitState,
    open_until: Option<Instant>,
    last_failure: Option<Instant>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            state: CircuitState::Closed,
            open_until: None,
            last_failure: None,
        }
    }
}

/// Read-only view of one provider's health, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderHealthSnapshot {
    pub consecutive_failures: u32,
    pub state: CircuitState,
}

/// Tracks failures per provider and drives candidate exclusion.
pub struct HealthRegistry {
    entries: DashMap<ProviderKind, ProviderHealth>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl HealthRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            failure_threshold,
            cooldown,
        }
    }

    /// Whether the provider is a dispatch candidate right now. Read-only;
    /// probe admission happens in `begin_attempt`. While a half-open probe
    /// is in flight the provider is not a candidate for anyone else.
    pub fn allows(&self, provider: ProviderKind) -> bool {
        let now = Instant::now();
        let entry = self.entries.entry(provider).or_default();
        match entry.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => entry.open_until.map(|t| now >= t).unwrap_or(true),
        }
    }

    /// Claim the right to call the provider. For an open circuit past its
    /// cool-down exactly one caller wins the half-open probe; a caller that
    /// loses the claim skips the provider for this request. The claim
    /// settles via `record_success` or `record_failure`.
    pub fn begin_attempt(&self, provider: ProviderKind) -> bool {
        let now = Instant::now();
        let mut entry = self.entries.entry(provider).or_default();
        match entry.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                if entry.open_until.map(|t| now >= t).unwrap_or(true) {
                    entry.state = CircuitState::HalfOpen;
                    info!(provider = %provider, "Circuit half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, provider: ProviderKind) {
        let mut entry = self.entries.entry(provider).or_default();
        if entry.state != CircuitState::Closed {
            info!(provider = %provider, "Circuit closed after successful call");
        }
        entry.consecutive_failures = 0;
        entry.state = CircuitState::Closed;
        entry.open_until = None;
    }

    pub fn record_failure(&self, provider: ProviderKind) {
        let now = Instant::now();
        let mut entry = self.entries.entry(provider).or_default();
        entry.consecutive_failures += 1;
        entry.last_failure = Some(now);

        let reopen_probe = entry.state == CircuitState::HalfOpen;
        if reopen_probe || entry.consecutive_failures >= self.failure_threshold {
            entry.state = CircuitState::Open;
            entry.open_until = Some(now + self.cooldown);
            warn!(
                provider = %provider,
                failures = entry.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    pub fn snapshot(&self, provider: ProviderKind) -> ProviderHealthSnapshot {
        let entry = self.entries.entry(provider).or_default();
        ProviderHealthSnapshot {
            consecutive_failures: entry.consecutive_failures,
            state: entry.state,
        }
    }

    /// Operational reset: forget all failure history.
    pub fn reset_all(&self) {
        self.entries.clear();
        info!("Provider health reset");
    }
}
