use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::providers::{CompletionError, ProviderError};
use crate::traits::ModelProvider;
use crate::types::{Message, MessageDocuments, StreamDelta};

/// Backoff schedule for transient completion failures: starts at `base_delay`
/// and doubles per attempt up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Resilient completion client: wraps a `ModelProvider` with classified
/// retries. Rate limits, 5xx server errors, and transient network failures
/// are retried with capped exponential backoff; everything else is fatal on
/// first occurrence.
pub struct CompletionClient {
    provider: Arc<dyn ModelProvider>,
    model: String,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn ModelProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send the full conversation log. Only the messages go over the wire;
    /// document pairings are stripped here.
    pub async fn send(
        &self,
        log: &[MessageDocuments],
        tools: Option<&[Value]>,
    ) -> Result<Message, CompletionError> {
        let messages: Vec<Message> = log.iter().map(|md| md.message.clone()).collect();
        let tools = tools.unwrap_or(&[]);
        let start = std::time::Instant::now();

        for attempt in 1..=self.retry.max_attempts {
            match self.provider.chat(&self.model, &messages, tools).await {
                Ok(message) => {
                    info!(
                        model = %self.model,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Completion succeeded"
                    );
                    return Ok(message);
                }
                Err(err) if err.is_retryable() => {
                    if attempt == self.retry.max_attempts {
                        error!(
                            kind = ?err.kind,
                            attempts = attempt,
                            "Completion retries exhausted: {}",
                            err
                        );
                        return Err(CompletionError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let wait = self.retry.delay(attempt);
                    warn!(
                        kind = ?err.kind,
                        attempt,
                        max = self.retry.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "Transient completion failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    error!(kind = ?err.kind, "Unrecoverable completion failure: {}", err);
                    return Err(CompletionError::Fatal(err));
                }
            }
        }

        // Only reachable with a zero retry budget; the loop returns on the
        // final attempt otherwise.
        Err(CompletionError::Fatal(ProviderError::malformed(
            "retry budget must allow at least one attempt",
        )))
    }

    /// Streaming variant. The connection is not retried: a failure to open
    /// the stream or a mid-stream error surfaces to the caller, which turns
    /// it into a terminal error event.
    pub async fn send_streaming(
        &self,
        log: &[MessageDocuments],
        tools: Option<&[Value]>,
    ) -> Result<mpsc::Receiver<Result<StreamDelta, ProviderError>>, CompletionError> {
        let messages: Vec<Message> = log.iter().map(|md| md.message.clone()).collect();
        let tools = tools.unwrap_or(&[]);
        self.provider
            .chat_stream(&self.model, &messages, tools)
            .await
            .map_err(CompletionError::Fatal)
    }
}
