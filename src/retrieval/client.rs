use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::config::RetrievalConfig;
use crate::retrieval::{EmbeddingsClient, RerankResponse, RetrievalError, VectorStoreClient};
use crate::traits::Retriever;
use crate::types::{Message, MessageDocuments, RetrievedDocument};

const ALLOWED_FILTER_KEYS: [&str; 3] = ["article", "chapter", "section"];

/// The retrieval pipeline: embed → vector query → rerank → filter for
/// semantic queries, validate → get-by-metadata for filtered fetches.
pub struct RetrievalClient {
    embeddings: EmbeddingsClient,
    store: VectorStoreClient,
    top_n: usize,
}

impl RetrievalClient {
    pub fn new(config: &RetrievalConfig) -> anyhow::Result<Self> {
        Ok(Self {
            embeddings: EmbeddingsClient::new(&config.embeddings_url, config.rerank_top_n)?,
            store: VectorStoreClient::new(&config.vector_store_url)?,
            top_n: config.top_n,
        })
    }

    fn wrap(
        documents: Vec<RetrievedDocument>,
        tool_call_id: &str,
    ) -> Result<MessageDocuments, RetrievalError> {
        let json_str = serde_json::to_string(&documents).map_err(RetrievalError::failed)?;
        Ok(MessageDocuments::with_documents(
            Message::tool(tool_call_id, json_str),
            documents,
        ))
    }
}

/// Keep only documents the rerank service listed, in the rerank response's
/// order. Documents the reranker dropped are dropped here too; the scores
/// themselves are not consulted.
fn filter_results(
    results: &[RetrievedDocument],
    reranked: &RerankResponse,
) -> Vec<RetrievedDocument> {
    reranked
        .results
        .iter()
        .filter_map(|item| results.iter().find(|r| r.id == item.id))
        .cloned()
        .collect()
}

/// Validate a metadata filter: exactly one key from the allowed set, with an
/// integer value. Nothing is coerced or widened; any defect is reported as
/// the specific reason it was rejected.
fn validate_filter(arguments: &Map<String, Value>) -> Result<(String, i64), RetrievalError> {
    let raw = arguments
        .get("metadata_filter")
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| RetrievalError::InvalidFilter("no metadata filter provided".to_string()))?;

    if raw.len() != 1 {
        let keys: Vec<&str> = raw.keys().map(String::as_str).collect();
        return Err(RetrievalError::InvalidFilter(format!(
            "expected exactly one filter key, got {}: {:?}",
            raw.len(),
            keys
        )));
    }

    let (key, value) = raw.iter().next().expect("len checked above");
    if !ALLOWED_FILTER_KEYS.contains(&key.as_str()) {
        return Err(RetrievalError::InvalidFilter(format!(
            "unexpected metadata key '{}' (allowed: {:?})",
            key, ALLOWED_FILTER_KEYS
        )));
    }

    let value = value.as_i64().ok_or_else(|| {
        RetrievalError::InvalidFilter(format!("metadata value for '{}' must be an integer", key))
    })?;

    Ok((key.clone(), value))
}

#[async_trait]
impl Retriever for RetrievalClient {
    async fn semantic_query(
        &self,
        arguments: &Map<String, Value>,
        collection: &str,
        tool_call_id: &str,
    ) -> Result<MessageDocuments, RetrievalError> {
        let query = arguments
            .get("query_text")
            .and_then(Value::as_str)
            .unwrap_or("");

        let embedding = self.embeddings.embed(query).await.map_err(|e| {
            error!(collection, "Embedding call failed: {}", e);
            RetrievalError::failed(e)
        })?;
        if embedding.is_empty() {
            error!(collection, "Embedding service returned an empty vector");
            return Err(RetrievalError::Failed("empty embedding".to_string()));
        }

        let results = self
            .store
            .query(collection, &embedding, self.top_n)
            .await
            .map_err(|e| {
                error!(collection, "Vector query failed: {}", e);
                RetrievalError::failed(e)
            })?;

        let reranked = self.embeddings.rerank(query, &results).await.map_err(|e| {
            error!(collection, "Rerank call failed: {}", e);
            RetrievalError::failed(e)
        })?;

        let documents = filter_results(&results, &reranked);
        Self::wrap(documents, tool_call_id)
    }

    async fn metadata_query(
        &self,
        arguments: &Map<String, Value>,
        collection: &str,
        tool_call_id: &str,
    ) -> Result<MessageDocuments, RetrievalError> {
        let (key, value) = validate_filter(arguments).inspect_err(|e| {
            warn!(collection, "Rejected metadata filter: {}", e);
        })?;

        let documents = self
            .store
            .get_by_metadata(collection, &key, value)
            .await
            .map_err(|e| {
                error!(collection, key, value, "Metadata get failed: {}", e);
                RetrievalError::failed(e)
            })?;

        Self::wrap(documents, tool_call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::RerankResult;
    use serde_json::json;

    fn doc(id: &str) -> RetrievedDocument {
        RetrievedDocument {
            id: id.into(),
            document: format!("doc {}", id),
            metadata: Map::new(),
        }
    }

    fn rerank_of(ids: &[&str]) -> RerankResponse {
        RerankResponse {
            results: ids
                .iter()
                .map(|id| RerankResult {
                    id: id.to_string(),
                    score: 0.5,
                })
                .collect(),
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn filter_keeps_rerank_order_and_drops_unlisted() {
        let results = vec![doc("A"), doc("B"), doc("C")];
        let filtered = filter_results(&results, &rerank_of(&["C", "A"]));
        let ids: Vec<&str> = filtered.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A"]);
    }

    #[test]
    fn filter_ignores_rerank_ids_not_in_results() {
        let results = vec![doc("A")];
        let filtered = filter_results(&results, &rerank_of(&["Z", "A"]));
        let ids: Vec<&str> = filtered.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["A"]);
    }

    #[test]
    fn single_integer_filter_is_accepted() {
        let (key, value) =
            validate_filter(&args(json!({"metadata_filter": {"article": 9}}))).unwrap();
        assert_eq!(key, "article");
        assert_eq!(value, 9);
    }

    #[test]
    fn multiple_keys_are_rejected() {
        let err = validate_filter(&args(json!({"metadata_filter": {"article": 9, "chapter": 2}})))
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidFilter(_)));
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn non_integer_value_is_rejected() {
        let err =
            validate_filter(&args(json!({"metadata_filter": {"article": "nine"}}))).unwrap_err();
        assert!(err.to_string().contains("must be an integer"));

        let err =
            validate_filter(&args(json!({"metadata_filter": {"article": 9.5}}))).unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn missing_or_empty_filter_is_rejected() {
        let err = validate_filter(&args(json!({}))).unwrap_err();
        assert!(err.to_string().contains("no metadata filter"));

        let err = validate_filter(&args(json!({"metadata_filter": {}}))).unwrap_err();
        assert!(err.to_string().contains("no metadata filter"));
    }

    #[test]
    fn unknown_filter_key_is_rejected() {
        let err =
            validate_filter(&args(json!({"metadata_filter": {"recital": 4}}))).unwrap_err();
        assert!(err.to_string().contains("unexpected metadata key"));
    }
}
