use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::providers::ProviderError;
use crate::retrieval::RetrievalError;
use crate::types::{Message, MessageDocuments, StreamDelta};

/// Model provider — sends the message log plus tool definitions to a
/// completion endpoint and hands back the normalized choice-0 message.
///
/// Implementations do a single attempt; retry classification lives in
/// `CompletionClient` so it can be exercised against a scripted mock.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<Message, ProviderError>;

    /// Streaming variant. The returned channel yields normalized deltas; a
    /// dropped receiver makes the provider stop consuming the upstream
    /// stream.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<mpsc::Receiver<Result<StreamDelta, ProviderError>>, ProviderError>;
}

/// Retrieval backend — the two entry points the tool dispatcher routes to.
/// Each returns a ready-to-append tool message correlated by `tool_call_id`.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Embed → vector query → rerank → filter to the rerank ordering.
    async fn semantic_query(
        &self,
        arguments: &Map<String, Value>,
        collection: &str,
        tool_call_id: &str,
    ) -> Result<MessageDocuments, RetrievalError>;

    /// Validate the metadata filter, then fetch all matching documents.
    /// No reranking step.
    async fn metadata_query(
        &self,
        arguments: &Map<String, Value>,
        collection: &str,
        tool_call_id: &str,
    ) -> Result<MessageDocuments, RetrievalError>;
}
