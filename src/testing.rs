//! Test doubles: a scripted completion provider and a scripted retriever,
//! shared by the unit tests and the end-to-end conversation tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};

use crate::providers::ProviderError;
use crate::retrieval::RetrievalError;
use crate::traits::{ModelProvider, Retriever};
use crate::types::{Message, MessageDocuments, RetrievedDocument, StreamDelta};

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// A recorded call to `MockProvider::chat()` or `chat_stream()`.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockChatCall {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Value>,
}

/// Completion provider that replays scripted results in FIFO order.
pub struct MockProvider {
    results: Mutex<VecDeque<Result<Message, ProviderError>>>,
    streams: Mutex<VecDeque<Vec<Result<StreamDelta, ProviderError>>>>,
    call_log: Mutex<Vec<MockChatCall>>,
}

impl MockProvider {
    /// A provider scripted for non-streaming calls.
    pub fn with_results(results: Vec<Result<Message, ProviderError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            streams: Mutex::new(VecDeque::new()),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// A provider scripted for streaming calls; each inner vec is one
    /// complete stream of deltas.
    pub fn with_streams(streams: Vec<Vec<Result<StreamDelta, ProviderError>>>) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            streams: Mutex::new(streams.into()),
            call_log: Mutex::new(Vec::new()),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }

    pub async fn calls(&self) -> Vec<MockChatCall> {
        self.call_log.lock().await.clone()
    }

    async fn record(&self, model: &str, messages: &[Message], tools: &[Value]) {
        self.call_log.lock().await.push(MockChatCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        });
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<Message, ProviderError> {
        self.record(model, messages, tools).await;
        self.results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::malformed("no scripted response left")))
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<mpsc::Receiver<Result<StreamDelta, ProviderError>>, ProviderError> {
        self.record(model, messages, tools).await;
        let script = self
            .streams
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ProviderError::malformed("no scripted stream left"))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for delta in script {
                if tx.send(delta).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// MockRetriever
// ---------------------------------------------------------------------------

/// Shared view onto a `MockRetriever`'s call log, usable after the retriever
/// has been moved into a dispatcher.
#[derive(Clone)]
pub struct RetrieverHandle {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RetrieverHandle {
    /// Recorded calls as (kind, collection) pairs, kind being "semantic"
    /// or "metadata".
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

/// Retriever that returns one canned document per query and records how it
/// was routed.
pub struct MockRetriever {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    fail_semantic: Option<String>,
}

impl MockRetriever {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_semantic: None,
        }
    }

    /// Make every semantic query fail with the given detail.
    pub fn fail_semantic(mut self, detail: &str) -> Self {
        self.fail_semantic = Some(detail.to_string());
        self
    }

    pub fn handle(&self) -> RetrieverHandle {
        RetrieverHandle {
            calls: self.calls.clone(),
        }
    }

    fn canned_result(collection: &str, tool_call_id: &str) -> MessageDocuments {
        let document = RetrievedDocument {
            id: format!("{}-doc-1", collection),
            document: format!("canned passage from {}", collection),
            metadata: Map::from_iter([("article".to_string(), json!(9))]),
        };
        let content = serde_json::to_string(&vec![document.clone()])
            .unwrap_or_else(|_| "[]".to_string());
        MessageDocuments::with_documents(Message::tool(tool_call_id, content), vec![document])
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn semantic_query(
        &self,
        _arguments: &Map<String, Value>,
        collection: &str,
        tool_call_id: &str,
    ) -> Result<MessageDocuments, RetrievalError> {
        self.calls
            .lock()
            .await
            .push(("semantic".to_string(), collection.to_string()));
        if let Some(detail) = &self.fail_semantic {
            return Err(RetrievalError::failed(detail));
        }
        Ok(Self::canned_result(collection, tool_call_id))
    }

    async fn metadata_query(
        &self,
        _arguments: &Map<String, Value>,
        collection: &str,
        tool_call_id: &str,
    ) -> Result<MessageDocuments, RetrievalError> {
        self.calls
            .lock()
            .await
            .push(("metadata".to_string(), collection.to_string()));
        Ok(Self::canned_result(collection, tool_call_id))
    }
}
