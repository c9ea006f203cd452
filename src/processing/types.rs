//! Core data types and error definitions for the processing pipeline.

use crate::{archive::ArchiveError, embedding::EmbeddingClientError, index::IndexError};
use serde_json::{Map, Value};
use thiserror::Error;

use super::extract::FileKind;

/// Metadata key recording the uploaded filename.
pub const FILENAME_KEY: &str = "filename";
/// Metadata key recording the resolved file extension (for example `.pdf`).
pub const FILE_TYPE_KEY: &str = "file_type";
/// Metadata key recording when the upload was ingested (RFC 3339).
pub const UPLOAD_TIMESTAMP_KEY: &str = "upload_timestamp";

/// File received from a client, alive only for the duration of one request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Declared filename, reduced to its final path component.
    pub filename: String,
    /// Declared MIME type, if the client sent one.
    pub content_type: Option<String>,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

/// Plain text extracted from a file together with its provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Extracted text.
    pub text: String,
    /// String or number metadata values keyed by name.
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Build a document without metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry, replacing any previous value under `key`.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Contiguous window of a document's text, carrying the document's metadata unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Window text.
    pub text: String,
    /// Metadata inherited from the source document.
    pub metadata: Map<String, Value>,
}

/// Rejection raised for extensions outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported file type '{extension}'. Supported: {}", FileKind::supported_list())]
pub struct UnsupportedFileType {
    /// Extension found on the uploaded filename (empty when there was none).
    pub extension: String,
}

/// Errors produced while turning a file into documents.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The file could not be read from disk.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    /// PDF parsing failed.
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    /// DOCX/XLSX container or XML parsing failed.
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    /// Plain text or Markdown was not valid UTF-8.
    #[error("file is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    /// Extraction worker stopped before producing a result.
    #[error("extraction task failed: {0}")]
    Interrupted(String),
}

/// Invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    /// A zero-length window can never make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave a positive stride between windows.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    InvalidOverlap {
        /// Requested overlap.
        overlap: usize,
        /// Requested chunk size.
        size: usize,
    },
}

/// Errors emitted by the ingestion and stats paths.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The uploaded file's extension is not supported.
    #[error(transparent)]
    UnsupportedFileType(#[from] UnsupportedFileType),
    /// Staging the upload on local disk failed.
    #[error("Failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),
    /// Text extraction failed.
    #[error("Failed to extract document: {0}")]
    Extraction(#[from] ExtractionError),
    /// Embedding provider failed to produce vectors for the chunks.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector index rejected the request.
    #[error("Vector index request failed: {0}")]
    Index(#[from] IndexError),
}

impl ProcessingError {
    /// Whether the failure was caused by the client's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnsupportedFileType(_))
    }
}

/// Errors emitted while orchestrating similarity searches.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Embedding provider failed to return vectors for the query text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector index query returned an error.
    #[error("Vector index request failed: {0}")]
    Index(#[from] IndexError),
    /// Embedding provider returned no vectors.
    #[error("Embedding provider returned no vectors for the query")]
    EmptyEmbedding,
}

/// Errors that prevent the service from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configured chunking parameters are invalid.
    #[error("Invalid chunking configuration: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding client could not be built or the probe embedding failed.
    #[error("Embedding provider unavailable: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector index could not be reached.
    #[error("Vector index unavailable: {0}")]
    Index(#[from] IndexError),
    /// Archive bucket could not be reached.
    #[error("Archive store unavailable: {0}")]
    Archive(#[from] ArchiveError),
    /// Embedding length disagrees with the index dimension.
    #[error(
        "Dimension mismatch: index expects {index} but the embedding model produces {embedding}"
    )]
    DimensionMismatch {
        /// Dimension reported by the index.
        index: usize,
        /// Length of the probe embedding.
        embedding: usize,
    },
}

/// Summary of a completed ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionOutcome {
    /// Uploaded filename.
    pub filename: String,
    /// Resolved extension, for example `.txt`.
    pub file_type: &'static str,
    /// Number of documents produced by extraction.
    pub documents_processed: usize,
    /// Number of chunks written to the index.
    pub chunks_created: usize,
    /// URL of the archived original, when archival succeeded.
    pub archive_url: Option<String>,
    /// Failure description when archival did not succeed.
    pub archive_error: Option<String>,
}

impl IngestionOutcome {
    /// Warning surfaced to clients when the original file could not be archived.
    pub fn warning(&self) -> Option<String> {
        self.archive_error.as_ref().map(|error| {
            format!("Document processed successfully but S3 upload failed: {error}")
        })
    }
}

/// Structured search hit returned to API consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Identifier assigned at indexing time.
    pub id: String,
    /// Stored chunk text.
    pub text: String,
    /// Similarity score reported by the index.
    pub score: f32,
    /// Provenance metadata stored with the chunk.
    pub metadata: Map<String, Value>,
}
