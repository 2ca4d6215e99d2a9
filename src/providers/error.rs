use std::fmt;

/// Classified provider error — tells the caller *why* the completion call
/// failed so the retry layer can pick the right recovery strategy.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 — bad API key or permissions.
    Auth,
    /// 429 — rate limited.
    RateLimit,
    /// 404 — bad model name or endpoint path.
    NotFound,
    /// 400/422 — the endpoint rejected the request shape.
    BadRequest,
    /// Request timed out or the provider took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504 — provider-side outage.
    ServerError,
    /// Malformed response envelope (no choices, bad JSON).
    Malformed,
    /// Anything else.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            400 | 422 => ProviderErrorKind::BadRequest,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };

        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Malformed,
            status: None,
            message: detail.into(),
        }
    }

    /// Whether this error is worth retrying with the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimit
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::Network
                | ProviderErrorKind::ServerError
        )
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "Provider error ({}, {:?}): {}", status, self.kind, self.message)
        } else {
            write!(f, "Provider error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

fn truncate_body(body: &str) -> String {
    if body.len() > 300 {
        let mut end = 300;
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

/// How a completion call ultimately failed after the retry layer is done
/// with it. The engine converts either arm into a soft-fail assistant
/// message; nothing below the engine crashes the conversation.
#[derive(Debug)]
pub enum CompletionError {
    /// A retryable failure class persisted through the whole retry budget.
    Exhausted { attempts: u32, last: ProviderError },
    /// A non-retryable failure, surfaced on first occurrence.
    Fatal(ProviderError),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionError::Exhausted { attempts, last } => {
                write!(f, "LLM call failed after {} attempts: {}", attempts, last)
            }
            CompletionError::Fatal(err) => write!(f, "LLM call failed: {}", err),
        }
    }
}

impl std::error::Error for CompletionError {}
