use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::types::RetrievedDocument;

/// Client for the embedding/rerank HTTP service.
pub struct EmbeddingsClient {
    client: Client,
    base_url: String,
    rerank_top_n: usize,
}

#[derive(Debug, Serialize)]
pub struct RerankRequest {
    pub query: String,
    pub items: Vec<RerankItem>,
    pub top_n: usize,
}

#[derive(Debug, Serialize)]
pub struct RerankItem {
    pub id: String,
    pub text: String,
}

/// Results come back in descending relevance order; that order, not the
/// scores, is what downstream filtering consumes.
#[derive(Debug, Deserialize)]
pub struct RerankResponse {
    pub results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
pub struct RerankResult {
    pub id: String,
    #[allow(dead_code)]
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl EmbeddingsClient {
    pub fn new(base_url: &str, rerank_top_n: usize) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rerank_top_n,
        })
    }

    /// Embed a query string. An empty vector is the service's way of saying
    /// it produced nothing useful; callers treat that as a failure.
    pub async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let start = std::time::Instant::now();
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;

        let data: EmbeddingResponse = resp.json().await?;
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            dims = data.embedding.len(),
            "Fetched embedding"
        );
        Ok(data.embedding)
    }

    pub async fn rerank(
        &self,
        query_text: &str,
        results: &[RetrievedDocument],
    ) -> anyhow::Result<RerankResponse> {
        let request = RerankRequest {
            query: query_text.to_string(),
            items: results
                .iter()
                .map(|r| RerankItem {
                    id: r.id.clone(),
                    text: r.document.clone(),
                })
                .collect(),
            top_n: self.rerank_top_n,
        };

        let start = std::time::Instant::now();
        let resp = self
            .client
            .post(format!("{}/reranking", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let reranked: RerankResponse = resp.json().await?;
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            kept = reranked.results.len(),
            "Reranked query results"
        );
        Ok(reranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerank_request_serializes_expected_shape() {
        let request = RerankRequest {
            query: "minimization".into(),
            items: vec![RerankItem {
                id: "a".into(),
                text: "doc a".into(),
            }],
            top_n: 3,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["query"], "minimization");
        assert_eq!(value["items"][0]["id"], "a");
        assert_eq!(value["top_n"], 3);
    }

    #[test]
    fn rerank_response_parses_ordered_results() {
        let raw = r#"{"query": "q", "results": [{"id": "c", "score": 0.9}, {"id": "a", "score": 0.4}]}"#;
        let resp: RerankResponse = serde_json::from_str(raw).unwrap();
        let ids: Vec<&str> = resp.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }
}
