//! Scriptable in-memory backend for tests and offline development.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use leadpipe_config::ProviderKind;

use crate::backend::{CompletionOptions, ProviderBackend};
use crate::LlmError;

/// One scripted response step.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Respond(String),
    Fail(String),
    /// Sleep past any orchestrator timeout, then answer anyway
    Hang(Duration),
}

pub struct MockBackend {
    kind: ProviderKind,
    model: String,
    script: Mutex<VecDeque<MockBehavior>>,
    fallback: MockBehavior,
    calls: AtomicUsize,
    available: bool,
}

impl MockBackend {
    pub fn ok(kind: ProviderKind, response: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            model: format!("mock-{}", kind),
            script: Mutex::new(VecDeque::new()),
            fallback: MockBehavior::Respond(response.into()),
            calls: AtomicUsize::new(0),
            available: true,
        })
    }

    pub fn failing(kind: ProviderKind, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            model: format!("mock-{}", kind),
            script: Mutex::new(VecDeque::new()),
            fallback: MockBehavior::Fail(message.into()),
            calls: AtomicUsize::new(0),
            available: false,
        })
    }

    pub fn hanging(kind: ProviderKind, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            model: format!("mock-{}", kind),
            script: Mutex::new(VecDeque::new()),
            fallback: MockBehavior::Hang(delay),
            calls: AtomicUsize::new(0),
            available: true,
        })
    }

    /// Play the scripted steps in order, then repeat the final fallback.
    pub fn scripted(
        kind: ProviderKind,
        steps: Vec<MockBehavior>,
        fallback: MockBehavior,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            model: format!("mock-{}", kind),
            script: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
            available: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderBackend for MockBackend {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions::default()
    }

    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            MockBehavior::Respond(text) => Ok(text),
            MockBehavior::Fail(message) => Err(LlmError::Api(message)),
            MockBehavior::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Ok("late response".to_string())
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}
