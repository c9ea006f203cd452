//! Shared types used by the vector index client.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Metadata key under which chunk text is stored alongside each vector.
pub const TEXT_METADATA_KEY: &str = "text";

/// Errors returned while interacting with the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Index host failed to parse or could not be resolved.
    #[error("Invalid index host: {0}")]
    InvalidHost(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The index responded with an unexpected status code.
    #[error("Unexpected index response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the index.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Vector plus chunk text and metadata, ready for insertion.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    /// Unique identifier assigned at indexing time.
    pub id: String,
    /// Embedding vector.
    pub values: Vec<f32>,
    /// Chunk text stored with the vector.
    pub text: String,
    /// Provenance metadata inherited from the source document.
    pub metadata: Map<String, Value>,
}

/// Record returned by a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    /// Identifier of the stored vector.
    pub id: String,
    /// Similarity score computed by the index.
    pub score: f32,
    /// Stored chunk text, when present in the metadata.
    pub text: Option<String>,
    /// Remaining stored metadata.
    pub metadata: Map<String, Value>,
}

/// Aggregate index statistics normalized for JSON responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    /// Total vectors across every namespace.
    pub total_vector_count: u64,
    /// Fraction of index capacity in use.
    pub index_fullness: f64,
    /// Configured vector dimension (0 when unreported).
    pub dimension: usize,
    /// Per-namespace vector counts, omitted from JSON when empty.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

/// Vector count for a single namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    /// Number of vectors stored in the namespace.
    pub vector_count: u64,
}

#[derive(Serialize)]
pub(crate) struct UpsertRequest<'a> {
    pub(crate) vectors: Vec<UpsertVector<'a>>,
    pub(crate) namespace: &'a str,
}

#[derive(Serialize)]
pub(crate) struct UpsertVector<'a> {
    pub(crate) id: &'a str,
    pub(crate) values: &'a [f32],
    pub(crate) metadata: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpsertResponse {
    #[serde(default)]
    pub(crate) upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryRequest<'a> {
    pub(crate) vector: Vec<f32>,
    pub(crate) top_k: usize,
    pub(crate) namespace: &'a str,
    pub(crate) include_metadata: bool,
    pub(crate) include_values: bool,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub(crate) matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
pub(crate) struct QueryMatch {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) metadata: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DescribeStatsResponse {
    #[serde(default)]
    pub(crate) namespaces: BTreeMap<String, NamespaceSummary>,
    #[serde(default)]
    pub(crate) dimension: usize,
    #[serde(default)]
    pub(crate) index_fullness: f64,
    #[serde(default)]
    pub(crate) total_vector_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NamespaceSummary {
    #[serde(default)]
    pub(crate) vector_count: u64,
}

#[derive(Deserialize)]
pub(crate) struct DescribeIndexResponse {
    pub(crate) host: String,
}

impl From<DescribeStatsResponse> for IndexStats {
    fn from(response: DescribeStatsResponse) -> Self {
        Self {
            total_vector_count: response.total_vector_count,
            index_fullness: response.index_fullness,
            dimension: response.dimension,
            namespaces: response
                .namespaces
                .into_iter()
                .map(|(name, summary)| {
                    (
                        name,
                        NamespaceStats {
                            vector_count: summary.vector_count,
                        },
                    )
                })
                .collect(),
        }
    }
}
