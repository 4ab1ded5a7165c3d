//! Response cache
//!
//! Deduplicates identical AI requests within a TTL window. Best-effort: a
//! miss is never an error, and entries are immutable once written (a new
//! fingerprint always produces a new entry). Expiry is lazy on read plus a
//! periodic sweep.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use leadpipe_config::ProviderKind;

use crate::backend::CompletionOptions;

/// Deterministic hash identifying one AI request.
///
/// The prompt is normalized (trimmed, inner whitespace collapsed) so
/// formatting differences do not defeat deduplication.
pub fn fingerprint(prompt: &str, model: &str, options: &CompletionOptions) -> String {
    let normalized: String = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"\n");
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(format!("{}:{:.3}", options.max_tokens, options.temperature).as_bytes());
    hex::encode(hasher.finalize())
}

/// One cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: String,
    /// Provider that originally served the response
    pub provider: ProviderKind,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// Concurrent fingerprint-keyed response cache.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    /// Look up a fingerprint; expired entries are evicted on read.
    pub fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let expired = match self.entries.get(fingerprint) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(fingerprint);
        }
        None
    }

    /// Insert-or-ignore: a concurrent writer that got there first wins and
    /// the entry stays immutable.
    pub fn put(&self, fingerprint: String, response: String, provider: ProviderKind) {
        self.entries.entry(fingerprint).or_insert_with(|| CacheEntry {
            response,
            provider,
            created_at: Instant::now(),
            ttl: self.default_ttl,
        });
    }

    /// Operational cache clear.
    pub fn invalidate_all(&self) {
        let evicted = self.entries.len();
        self.entries.clear();
        debug!(evicted, "Response cache cleared");
    }

    /// Drop expired entries. Driven by the orchestrator's periodic sweep.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
