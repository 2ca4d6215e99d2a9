use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::types::RetrievedDocument;

/// Thin client for the vector store's HTTP API (Chroma wire shape).
///
/// Query responses use nested parallel arrays (one inner array per query
/// embedding); get-by-metadata responses use flat parallel arrays.
pub struct VectorStoreClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    documents: Vec<Vec<String>>,
    metadatas: Vec<Vec<Map<String, Value>>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    documents: Vec<String>,
    metadatas: Vec<Map<String, Value>>,
}

impl VectorStoreClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn collection_id(&self, name: &str) -> anyhow::Result<String> {
        let info: CollectionInfo = self
            .client
            .get(format!("{}/api/v1/collections/{}", self.base_url, name))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info.id)
    }

    /// Nearest-neighbor query. Returns at most `n_results` documents; fewer
    /// when the collection is smaller, which is not an error.
    pub async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> anyhow::Result<Vec<RetrievedDocument>> {
        let id = self.collection_id(collection).await?;
        let raw: QueryResponse = self
            .client
            .post(format!("{}/api/v1/collections/{}/query", self.base_url, id))
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": n_results,
                "include": ["documents", "metadatas"],
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let docs = flatten_query_response(raw)?;
        debug!(collection, count = docs.len(), "Vector query returned");
        Ok(docs)
    }

    /// Fetch all documents matching one metadata key/value pair.
    pub async fn get_by_metadata(
        &self,
        collection: &str,
        key: &str,
        value: i64,
    ) -> anyhow::Result<Vec<RetrievedDocument>> {
        let id = self.collection_id(collection).await?;
        let raw: GetResponse = self
            .client
            .post(format!("{}/api/v1/collections/{}/get", self.base_url, id))
            .json(&json!({
                "where": { key: value },
                "include": ["documents", "metadatas"],
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let docs = zip_get_response(raw)?;
        debug!(collection, key, value, count = docs.len(), "Metadata get returned");
        Ok(docs)
    }
}

fn flatten_query_response(raw: QueryResponse) -> anyhow::Result<Vec<RetrievedDocument>> {
    // One query embedding in, so exactly one inner array out.
    let (ids, documents, metadatas) = match (
        raw.ids.into_iter().next(),
        raw.documents.into_iter().next(),
        raw.metadatas.into_iter().next(),
    ) {
        (Some(i), Some(d), Some(m)) => (i, d, m),
        _ => return Ok(Vec::new()),
    };
    zip_arrays(ids, documents, metadatas)
}

fn zip_get_response(raw: GetResponse) -> anyhow::Result<Vec<RetrievedDocument>> {
    zip_arrays(raw.ids, raw.documents, raw.metadatas)
}

fn zip_arrays(
    ids: Vec<String>,
    documents: Vec<String>,
    metadatas: Vec<Map<String, Value>>,
) -> anyhow::Result<Vec<RetrievedDocument>> {
    if ids.len() != documents.len() || ids.len() != metadatas.len() {
        anyhow::bail!(
            "Vector store returned mismatched arrays: {} ids, {} documents, {} metadatas",
            ids.len(),
            documents.len(),
            metadatas.len()
        );
    }
    Ok(ids
        .into_iter()
        .zip(documents)
        .zip(metadatas)
        .map(|((id, document), metadata)| RetrievedDocument {
            id,
            document,
            metadata,
        })
        .collect())
}
