//! ChromaDB vector search client.
//!
//! The retrieval step of the conversational pipeline: semantic search over
//! the ingested profile descriptions, optionally narrowed by a metadata
//! [`Filter`](crate::filter::Filter). One page of results, no pagination;
//! documents come back in the store's relevance order and are never
//! re-sorted.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::ChromaConfig;
use crate::filter::Filter;

/// One retrieved document with its metadata and query distance.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub document: String,
    pub metadata: Map<String, Value>,
    pub distance: f64,
}

/// A semantic search service over the profile corpus.
#[async_trait]
pub trait VectorSearcher: Send + Sync {
    /// Retrieve up to `top_k` documents relevant to `text`, narrowed by
    /// `filter` when non-empty.
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: &Filter,
    ) -> Result<Vec<RetrievedDocument>>;
}

/// HTTP client for a Chroma server.
pub struct ChromaClient {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl ChromaClient {
    pub fn new(config: &ChromaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
        })
    }

    /// Resolve the collection name to its id.
    async fn collection_id(&self) -> Result<String> {
        let url = format!("{}/api/v1/collections/{}", self.base_url, self.collection);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Chroma collection '{}' lookup failed {}: {}",
                self.collection,
                status,
                body
            );
        }

        let json: Value = response.json().await?;
        json.get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Chroma response: collection id missing"))
    }
}

#[async_trait]
impl VectorSearcher for ChromaClient {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: &Filter,
    ) -> Result<Vec<RetrievedDocument>> {
        let collection_id = self.collection_id().await?;
        let url = format!(
            "{}/api/v1/collections/{}/query",
            self.base_url, collection_id
        );

        let mut body = serde_json::json!({
            "query_texts": [text],
            "n_results": top_k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(where_doc) = filter.to_where() {
            body["where"] = where_doc;
        }

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Chroma query failed {}: {}", status, body_text);
        }

        let json: Value = response.json().await?;
        parse_query_response(&json)
    }
}

/// Zip Chroma's parallel result arrays into per-document records,
/// preserving relevance order.
fn parse_query_response(json: &Value) -> Result<Vec<RetrievedDocument>> {
    // Results are nested one level per query text; we always send one.
    let documents = first_batch(json, "documents")?;
    let metadatas = first_batch(json, "metadatas")?;
    let distances = first_batch(json, "distances")?;

    let mut results = Vec::with_capacity(documents.len());
    for (i, doc) in documents.iter().enumerate() {
        let document = doc
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid Chroma response: non-string document"))?
            .to_string();
        let metadata = metadatas
            .get(i)
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_default();
        let distance = distances.get(i).and_then(|d| d.as_f64()).unwrap_or(0.0);

        results.push(RetrievedDocument {
            document,
            metadata,
            distance,
        });
    }

    Ok(results)
}

fn first_batch<'a>(json: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    json.get(key)
        .and_then(|v| v.as_array())
        .and_then(|v| v.first())
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Chroma response: missing {} array", key))
}
