//! HTTP client wrapper for the Pinecone data plane.

use super::VectorIndex;
use super::types::{
    DescribeIndexResponse, DescribeStatsResponse, IndexError, IndexRecord, IndexStats,
    QueryRequest, QueryResponse, ScoredRecord, TEXT_METADATA_KEY, UpsertRequest, UpsertResponse,
    UpsertVector,
};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};

/// Pinecone control plane used to resolve an index name to its data-plane host.
const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
/// Vectors per upsert request; keeps high-dimensional batches under the 2 MB request cap.
const UPSERT_BATCH_SIZE: usize = 50;

/// Lightweight HTTP client for a single Pinecone index.
pub struct PineconeIndex {
    client: Client,
    base_url: String,
    api_key: String,
    namespace: String,
}

impl PineconeIndex {
    /// Construct a client against a known data-plane host.
    pub fn new(host: &str, api_key: &str, namespace: &str) -> Result<Self, IndexError> {
        let client = build_client()?;
        let base_url = normalize_host(host)?;
        tracing::debug!(
            url = %base_url,
            namespace,
            has_api_key = !api_key.is_empty(),
            "Initialized Pinecone HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            namespace: namespace.to_string(),
        })
    }

    /// Construct a client from configuration, resolving the index host when it is not pinned.
    pub async fn connect(config: &Config) -> Result<Self, IndexError> {
        let host = match &config.pinecone_index_host {
            Some(host) => host.clone(),
            None => {
                resolve_index_host(
                    CONTROL_PLANE_URL,
                    &config.pinecone_api_key,
                    &config.pinecone_index_name,
                )
                .await?
            }
        };
        Self::new(
            &host,
            &config.pinecone_api_key,
            &config.pinecone_namespace,
        )
    }

    async fn upsert_batch(&self, records: &[IndexRecord]) -> Result<usize, IndexError> {
        let vectors = records
            .iter()
            .map(|record| {
                let mut metadata = record.metadata.clone();
                metadata.insert(
                    TEXT_METADATA_KEY.to_string(),
                    Value::String(record.text.clone()),
                );
                UpsertVector {
                    id: &record.id,
                    values: &record.values,
                    metadata,
                }
            })
            .collect();

        let response = self
            .request(Method::POST, "vectors/upsert")
            .json(&UpsertRequest {
                vectors,
                namespace: &self.namespace,
            })
            .send()
            .await?;
        let response = ensure_success(response, "upsert").await?;
        let UpsertResponse { upserted_count } = response.json().await?;
        Ok(upserted_count)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        self.client
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut upserted = 0;
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            upserted += self.upsert_batch(batch).await?;
        }
        tracing::debug!(
            namespace = %self.namespace,
            records = records.len(),
            upserted,
            "Vectors upserted"
        );
        Ok(upserted)
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        let response = self
            .request(Method::POST, "query")
            .json(&QueryRequest {
                vector,
                top_k,
                namespace: &self.namespace,
                include_metadata: true,
                include_values: false,
            })
            .send()
            .await?;
        let response = ensure_success(response, "query").await?;
        let payload: QueryResponse = response.json().await?;

        Ok(payload
            .matches
            .into_iter()
            .map(|hit| {
                let mut metadata = hit.metadata.unwrap_or_default();
                let text = match metadata.remove(TEXT_METADATA_KEY) {
                    Some(Value::String(text)) => Some(text),
                    Some(other) => {
                        metadata.insert(TEXT_METADATA_KEY.to_string(), other);
                        None
                    }
                    None => None,
                };
                ScoredRecord {
                    id: hit.id,
                    score: hit.score,
                    text,
                    metadata,
                }
            })
            .collect())
    }

    async fn describe_stats(&self) -> Result<IndexStats, IndexError> {
        let response = self
            .request(Method::POST, "describe_index_stats")
            .json(&json!({}))
            .send()
            .await?;
        let response = ensure_success(response, "describe_index_stats").await?;
        let payload: DescribeStatsResponse = response.json().await?;
        Ok(payload.into())
    }
}

/// Look up the data-plane host for `index_name` through the control plane.
pub(crate) async fn resolve_index_host(
    control_url: &str,
    api_key: &str,
    index_name: &str,
) -> Result<String, IndexError> {
    let client = build_client()?;
    let response = client
        .get(format_endpoint(control_url, &format!("indexes/{index_name}")))
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
        .send()
        .await?;
    let response = ensure_success(response, "describe_index").await?;
    let DescribeIndexResponse { host } = response.json().await?;
    if host.trim().is_empty() {
        return Err(IndexError::InvalidHost(format!(
            "index '{index_name}' reported an empty host"
        )));
    }
    tracing::debug!(index = index_name, host = %host, "Resolved index host");
    Ok(host)
}

fn build_client() -> Result<Client, IndexError> {
    Ok(Client::builder().user_agent("docsearch/0.1").build()?)
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, IndexError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let error = IndexError::UnexpectedStatus { status, body };
    tracing::error!(operation, error = %error, "Pinecone request failed");
    Err(error)
}

fn normalize_host(host: &str) -> Result<String, IndexError> {
    let trimmed = host.trim();
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed =
        reqwest::Url::parse(&with_scheme).map_err(|err| IndexError::InvalidHost(err.to_string()))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::Map;

    fn record(id: &str, text: &str) -> IndexRecord {
        let mut metadata = Map::new();
        metadata.insert("filename".into(), Value::String("notes.txt".into()));
        metadata.insert("file_type".into(), Value::String(".txt".into()));
        IndexRecord {
            id: id.into(),
            values: vec![0.5, 0.25],
            text: text.into(),
            metadata,
        }
    }

    #[test]
    fn normalize_host_adds_https_scheme() {
        let url = normalize_host("demo-abc.svc.pinecone.io").expect("host");
        assert_eq!(url, "https://demo-abc.svc.pinecone.io");
        let url = normalize_host("http://127.0.0.1:5080/").expect("host");
        assert_eq!(url, "http://127.0.0.1:5080");
    }

    #[tokio::test]
    async fn upsert_sends_text_in_metadata_and_namespace() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/vectors/upsert")
                    .header("Api-Key", "pc-key")
                    .body_contains("\"namespace\":\"docs\"")
                    .body_contains("\"id\":\"chunk-1\"")
                    .body_contains("\"text\":\"hello world\"")
                    .body_contains("\"filename\":\"notes.txt\"");
                then.status(200).json_body(json!({ "upsertedCount": 1 }));
            })
            .await;

        let index = PineconeIndex::new(&server.base_url(), "pc-key", "docs").expect("index");
        let upserted = index
            .upsert(vec![record("chunk-1", "hello world")])
            .await
            .expect("upsert");

        mock.assert_async().await;
        assert_eq!(upserted, 1);
    }

    #[tokio::test]
    async fn upsert_splits_large_batches() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/vectors/upsert");
                then.status(200).json_body(json!({ "upsertedCount": 50 }));
            })
            .await;

        let index = PineconeIndex::new(&server.base_url(), "pc-key", "").expect("index");
        let records = (0..120)
            .map(|i| record(&format!("chunk-{i}"), "text"))
            .collect();
        index.upsert(records).await.expect("upsert");

        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn empty_upsert_skips_network() {
        let index = PineconeIndex::new("http://127.0.0.1:9", "pc-key", "").expect("index");
        assert_eq!(index.upsert(Vec::new()).await.expect("noop"), 0);
    }

    #[tokio::test]
    async fn query_maps_matches_and_extracts_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/query")
                    .body_contains("\"topK\":3")
                    .body_contains("\"includeMetadata\":true");
                then.status(200).json_body(json!({
                    "namespace": "",
                    "matches": [
                        {
                            "id": "chunk-1",
                            "score": 0.75,
                            "metadata": {
                                "text": "hello world",
                                "filename": "notes.txt",
                                "file_type": ".txt"
                            }
                        },
                        { "id": "chunk-2", "score": 0.5 }
                    ]
                }));
            })
            .await;

        let index = PineconeIndex::new(&server.base_url(), "pc-key", "").expect("index");
        let hits = index.query(vec![0.1, 0.2], 3).await.expect("query");

        mock.assert_async().await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "chunk-1");
        assert_eq!(hits[0].text.as_deref(), Some("hello world"));
        assert_eq!(hits[0].metadata["filename"], "notes.txt");
        assert!(!hits[0].metadata.contains_key(TEXT_METADATA_KEY));
        assert!((hits[0].score - 0.75).abs() < f32::EPSILON);
        assert!(hits[1].text.is_none());
        assert!(hits[1].metadata.is_empty());
    }

    #[tokio::test]
    async fn describe_stats_normalizes_namespaces() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/describe_index_stats");
                then.status(200).json_body(json!({
                    "namespaces": {
                        "": { "vectorCount": 7 },
                        "archive": { "vectorCount": 3 }
                    },
                    "dimension": 768,
                    "indexFullness": 0.25,
                    "totalVectorCount": 10
                }));
            })
            .await;

        let index = PineconeIndex::new(&server.base_url(), "pc-key", "").expect("index");
        let stats = index.describe_stats().await.expect("stats");

        assert_eq!(stats.total_vector_count, 10);
        assert_eq!(stats.dimension, 768);
        assert!((stats.index_fullness - 0.25).abs() < f64::EPSILON);
        assert_eq!(stats.namespaces[""].vector_count, 7);
        assert_eq!(stats.namespaces["archive"].vector_count, 3);
    }

    #[tokio::test]
    async fn error_status_is_surfaced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/query");
                then.status(401).body("unauthorized");
            })
            .await;

        let index = PineconeIndex::new(&server.base_url(), "wrong", "").expect("index");
        let error = index.query(vec![0.1], 1).await.unwrap_err();
        match error {
            IndexError::UnexpectedStatus { status, body } => {
                assert_eq!(status.as_u16(), 401);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolves_host_through_control_plane() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/indexes/caseforai-embeddings")
                    .header("Api-Key", "pc-key");
                then.status(200).json_body(json!({
                    "name": "caseforai-embeddings",
                    "dimension": 3072,
                    "host": "caseforai-embeddings-abc123.svc.pinecone.io"
                }));
            })
            .await;

        let host = resolve_index_host(&server.base_url(), "pc-key", "caseforai-embeddings")
            .await
            .expect("host");
        assert_eq!(host, "caseforai-embeddings-abc123.svc.pinecone.io");
    }
}
