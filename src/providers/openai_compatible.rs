use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::providers::ProviderError;
use crate::traits::ModelProvider;
use crate::types::{Message, StreamDelta, ToolCallDelta};

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Validate the base URL.
/// - HTTPS is required for remote URLs to protect API keys in transit
/// - HTTP is allowed only for localhost (local model servers)
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;

    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or("");

    match scheme {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'). \
                     Use HTTPS, or point at localhost for a local server.",
                    base_url
                ))
            }
        }
        _ => Err(format!(
            "Unsupported URL scheme '{}' in base_url '{}'. Only http and https are allowed.",
            scheme, base_url
        )),
    }
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, String> {
        validate_base_url(base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn build_body(model: &str, messages: &[Message], tools: &[Value], stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post_completions(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("HTTP request failed: {}", e);
                ProviderError::network(&e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, "Completion endpoint error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }
}

/// Reconstruct the normalized assistant message from the response envelope
/// (choice 0, message fields only). Tool-call ids and argument text come
/// through verbatim.
fn message_from_envelope(data: &Value) -> Result<Message, ProviderError> {
    let message = data["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| ProviderError::malformed("No choices in response"))?;

    serde_json::from_value(message.clone())
        .map_err(|e| ProviderError::malformed(format!("Unparseable choice message: {}", e)))
}

/// Parse one SSE `data:` payload into a normalized delta. `[DONE]` and
/// undecodable keep-alive noise both return None.
fn delta_from_chunk(payload: &str) -> Option<StreamDelta> {
    if payload.trim() == "[DONE]" {
        return None;
    }
    let data: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!("Skipping undecodable stream chunk: {}", e);
            return None;
        }
    };
    let choice = data["choices"].get(0)?;
    let delta = &choice["delta"];

    let tool_calls: Vec<ToolCallDelta> = delta
        .get("tool_calls")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    Some(StreamDelta {
        content: delta["content"].as_str().map(str::to_string),
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
    })
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<Message, ProviderError> {
        let body = Self::build_body(model, messages, tools, false);
        info!(model, tools = tools.len(), "Calling completion endpoint");
        let start = std::time::Instant::now();

        let resp = self.post_completions(&body).await?;
        let text = resp.text().await.map_err(|e| ProviderError::network(&e))?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Completion response received");

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::malformed(format!("Bad response JSON: {}", e)))?;
        message_from_envelope(&data)
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<mpsc::Receiver<Result<StreamDelta, ProviderError>>, ProviderError> {
        let body = Self::build_body(model, messages, tools, true);
        info!(model, tools = tools.len(), "Calling completion endpoint (streaming)");

        let resp = self.post_completions(&body).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::network(&e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE events are newline-delimited; payload lines carry "data: ".
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    if let Some(delta) = delta_from_chunk(payload.trim()) {
                        if tx.send(Ok(delta)).await.is_err() {
                            // Receiver gone: stop consuming the upstream stream.
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
