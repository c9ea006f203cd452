//! Document service coordinating extraction, chunking, embedding, indexing, and archival.

use crate::{
    archive::{ArchiveObject, ArchiveStore, S3ArchiveStore, archive_key},
    config::Config,
    embedding::{EmbeddingClient, EmbeddingClientError, EmbeddingTask, GeminiEmbeddingClient},
    index::{IndexRecord, IndexStats, PineconeIndex, VectorIndex},
    processing::{
        chunking::TextChunker,
        extract::FileKind,
        types::{
            Chunk, Document, ExtractionError, FILE_TYPE_KEY, FILENAME_KEY, IngestionOutcome,
            ProcessingError, SearchError, SearchHit, StartupError, UPLOAD_TIMESTAMP_KEY,
            UploadedFile,
        },
    },
};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

/// Largest number of hits a single query may request.
pub const MAX_QUERY_LIMIT: usize = 50;
/// Text embedded at startup to learn the embedding model's output length.
const DIMENSION_PROBE_TEXT: &str = "test";

/// Owns the long-lived collaborator handles shared by every request.
///
/// Construct once near process start (see [`DocumentService::connect`]) and share through an
/// `Arc`. Tests build it with [`DocumentService::new`] and substitute doubles.
pub struct DocumentService {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    archive: Arc<dyn ArchiveStore>,
    chunker: TextChunker,
    index_name: String,
}

/// Abstraction over the document pipeline used by the HTTP surface.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Extract, chunk, embed, index, and archive one uploaded file.
    async fn ingest(&self, file: UploadedFile) -> Result<IngestionOutcome, ProcessingError>;

    /// Return up to `limit` chunks most similar to `query`, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError>;

    /// Fetch the vector index statistics.
    async fn index_stats(&self) -> Result<IndexStats, ProcessingError>;

    /// Name of the vector index backing the service.
    fn index_name(&self) -> &str;
}

impl DocumentService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        archive: Arc<dyn ArchiveStore>,
        chunker: TextChunker,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            archive,
            chunker,
            index_name: index_name.into(),
        }
    }

    /// Build the production collaborators from configuration and validate them.
    pub async fn connect(config: &Config) -> Result<Self, StartupError> {
        let chunker = TextChunker::new(config.chunk_size, config.chunk_overlap)?;

        tracing::info!(model = %config.embedding_model, "Initializing embedding client");
        let embedder = GeminiEmbeddingClient::from_config(config)?;

        tracing::info!(index = %config.pinecone_index_name, "Connecting to Pinecone");
        let index = PineconeIndex::connect(config).await?;

        tracing::info!(bucket = %config.s3_bucket_name, "Checking S3 bucket");
        let archive = S3ArchiveStore::from_config(config)?;
        archive.check_bucket().await?;

        let service = Self::new(
            Arc::new(embedder),
            Arc::new(index),
            Arc::new(archive),
            chunker,
            config.pinecone_index_name.clone(),
        );
        service.validate_dimension().await?;
        Ok(service)
    }

    /// Refuse to run when the index dimension disagrees with the embedding length.
    pub async fn validate_dimension(&self) -> Result<(), StartupError> {
        let stats = self.index.describe_stats().await?;
        let probe = self
            .embedder
            .generate_embeddings(vec![DIMENSION_PROBE_TEXT.to_string()], EmbeddingTask::Document)
            .await?;
        let embedding = probe.first().map(Vec::len).unwrap_or(0);

        if stats.dimension > 0 && stats.dimension != embedding {
            tracing::error!(
                index_dimension = stats.dimension,
                embedding_dimension = embedding,
                "Embedding dimension does not match index"
            );
            return Err(StartupError::DimensionMismatch {
                index: stats.dimension,
                embedding,
            });
        }

        tracing::info!(
            index_dimension = stats.dimension,
            embedding_dimension = embedding,
            total_vectors = stats.total_vector_count,
            "Vector index ready"
        );
        Ok(())
    }

    /// Run the ingestion pipeline for one upload.
    pub async fn ingest(&self, file: UploadedFile) -> Result<IngestionOutcome, ProcessingError> {
        let UploadedFile {
            filename,
            content_type,
            bytes,
        } = file;
        let kind = FileKind::from_filename(&filename)?;
        tracing::info!(
            filename = %filename,
            file_type = kind.extension(),
            bytes = bytes.len(),
            "Processing upload"
        );

        let uploaded_at = OffsetDateTime::now_utc();
        let upload_timestamp = uploaded_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| uploaded_at.unix_timestamp().to_string());

        let (bytes, extracted) = tokio::task::spawn_blocking(move || {
            let extracted = stage_and_extract(kind, &bytes);
            (bytes, extracted)
        })
        .await
        .map_err(|err| ExtractionError::Interrupted(err.to_string()))?;

        let documents: Vec<Document> = extracted?
            .into_iter()
            .map(|document| {
                document
                    .with_metadata(FILENAME_KEY, filename.clone())
                    .with_metadata(FILE_TYPE_KEY, kind.extension())
                    .with_metadata(UPLOAD_TIMESTAMP_KEY, upload_timestamp.clone())
            })
            .collect();

        let chunks = self.chunker.chunk_documents(&documents);
        tracing::info!(
            filename = %filename,
            documents = documents.len(),
            chunks = chunks.len(),
            "Created chunks"
        );

        let chunks_created = self.index_chunks(chunks).await?;

        let object = ArchiveObject {
            key: archive_key(&filename, uploaded_at),
            bytes,
            content_type: content_type.unwrap_or_else(|| kind.default_content_type().to_string()),
            metadata: vec![
                ("original_filename".to_string(), filename.clone()),
                (UPLOAD_TIMESTAMP_KEY.to_string(), upload_timestamp),
            ],
        };
        let (archive_url, archive_error) = match self.archive.put_object(object).await {
            Ok(url) => {
                tracing::info!(filename = %filename, url = %url, "Archived upload");
                (Some(url), None)
            }
            Err(error) => {
                tracing::error!(
                    filename = %filename,
                    error = %error,
                    "Archive upload failed after indexing succeeded"
                );
                (None, Some(error.to_string()))
            }
        };

        tracing::info!(
            filename = %filename,
            documents = documents.len(),
            chunks = chunks_created,
            "Document indexed"
        );

        Ok(IngestionOutcome {
            filename,
            file_type: kind.extension(),
            documents_processed: documents.len(),
            chunks_created,
            archive_url,
            archive_error,
        })
    }

    async fn index_chunks(&self, chunks: Vec<Chunk>) -> Result<usize, ProcessingError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self
            .embedder
            .generate_embeddings(texts, EmbeddingTask::Document)
            .await?;
        if embeddings.len() != chunks.len() {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "expected {} embeddings, received {}",
                chunks.len(),
                embeddings.len()
            ))
            .into());
        }

        let records: Vec<IndexRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, values)| IndexRecord {
                id: Uuid::new_v4().to_string(),
                values,
                text: chunk.text,
                metadata: chunk.metadata,
            })
            .collect();
        let count = records.len();
        let upserted = self.index.upsert(records).await?;
        tracing::debug!(chunks = count, upserted, "Upserted chunk vectors");

        match self.index.describe_stats().await {
            Ok(stats) => tracing::info!(
                total_vectors = stats.total_vector_count,
                index_fullness = stats.index_fullness,
                "Index stats after insertion"
            ),
            Err(error) => tracing::warn!(error = %error, "Failed to read index stats after insertion"),
        }

        Ok(count)
    }

    /// Embed `query` and return the most similar chunks, best first.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let limit = limit.clamp(1, MAX_QUERY_LIMIT);
        tracing::debug!(limit, "Executing similarity search");

        let vector = self
            .embedder
            .generate_embeddings(vec![query.to_string()], EmbeddingTask::Query)
            .await?
            .into_iter()
            .next()
            .ok_or(SearchError::EmptyEmbedding)?;

        let mut hits: Vec<SearchHit> = self
            .index
            .query(vector, limit)
            .await?
            .into_iter()
            .map(|record| SearchHit {
                id: record.id,
                text: record.text.unwrap_or_default(),
                score: record.score,
                metadata: record.metadata,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);

        tracing::info!(limit, results = hits.len(), "Search completed");
        Ok(hits)
    }

    /// Fetch the vector index statistics.
    pub async fn index_stats(&self) -> Result<IndexStats, ProcessingError> {
        Ok(self.index.describe_stats().await?)
    }
}

/// Write the upload to a scoped temp file and extract it; the file is removed on return.
fn stage_and_extract(kind: FileKind, bytes: &[u8]) -> Result<Vec<Document>, ProcessingError> {
    let mut staged = tempfile::Builder::new()
        .prefix("docsearch-")
        .suffix(kind.extension())
        .tempfile()?;
    staged.write_all(bytes)?;
    staged.flush()?;
    Ok(kind.extract(staged.path())?)
}

#[async_trait]
impl DocumentApi for DocumentService {
    async fn ingest(&self, file: UploadedFile) -> Result<IngestionOutcome, ProcessingError> {
        DocumentService::ingest(self, file).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        DocumentService::search(self, query, limit).await
    }

    async fn index_stats(&self) -> Result<IndexStats, ProcessingError> {
        DocumentService::index_stats(self).await
    }

    fn index_name(&self) -> &str {
        &self.index_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveError;
    use crate::index::{IndexError, ScoredRecord};
    use reqwest::StatusCode;
    use serde_json::Map;
    use std::sync::Mutex;

    const DIMENSION: usize = 4;

    #[derive(Default)]
    struct FakeEmbedder {
        fail: bool,
        short_by: usize,
        calls: Mutex<Vec<(usize, EmbeddingTask)>>,
    }

    #[async_trait]
    impl EmbeddingClient for FakeEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
            task: EmbeddingTask,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.calls.lock().unwrap().push((texts.len(), task));
            if self.fail {
                return Err(EmbeddingClientError::GenerationFailed("quota".into()));
            }
            let count = texts.len().saturating_sub(self.short_by);
            Ok((0..count)
                .map(|i| vec![i as f32; DIMENSION])
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        fail_upsert: bool,
        dimension: usize,
        records: Mutex<Vec<IndexRecord>>,
        matches: Vec<ScoredRecord>,
        queried_top_k: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn upsert(&self, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
            if self.fail_upsert {
                return Err(IndexError::UnexpectedStatus {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: "down".into(),
                });
            }
            let count = records.len();
            self.records.lock().unwrap().extend(records);
            Ok(count)
        }

        async fn query(&self, _vector: Vec<f32>, top_k: usize) -> Result<Vec<ScoredRecord>, IndexError> {
            *self.queried_top_k.lock().unwrap() = Some(top_k);
            Ok(self.matches.clone())
        }

        async fn describe_stats(&self) -> Result<IndexStats, IndexError> {
            Ok(IndexStats {
                total_vector_count: self.records.lock().unwrap().len() as u64,
                dimension: self.dimension,
                ..IndexStats::default()
            })
        }
    }

    #[derive(Default)]
    struct FakeArchive {
        fail: bool,
        objects: Mutex<Vec<ArchiveObject>>,
    }

    #[async_trait]
    impl ArchiveStore for FakeArchive {
        async fn put_object(&self, object: ArchiveObject) -> Result<String, ArchiveError> {
            if self.fail {
                return Err(ArchiveError::UnexpectedStatus {
                    status: StatusCode::FORBIDDEN,
                    body: "AccessDenied".into(),
                });
            }
            let url = format!("https://bucket.s3.amazonaws.com/{}", object.key);
            self.objects.lock().unwrap().push(object);
            Ok(url)
        }
    }

    fn service(
        embedder: &Arc<FakeEmbedder>,
        index: &Arc<FakeIndex>,
        archive: &Arc<FakeArchive>,
    ) -> DocumentService {
        DocumentService::new(
            embedder.clone(),
            index.clone(),
            archive.clone(),
            TextChunker::new(1024, 200).expect("chunker"),
            "test-index",
        )
    }

    fn upload(filename: &str, contents: &str) -> UploadedFile {
        UploadedFile {
            filename: filename.to_string(),
            content_type: None,
            bytes: contents.as_bytes().to_vec(),
        }
    }

    fn scored(id: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            id: id.to_string(),
            score,
            text: Some(format!("text {id}")),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn ingests_plain_text_upload() {
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(FakeIndex::default());
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        let outcome = service
            .ingest(upload("notes.txt", "hello world"))
            .await
            .expect("ingest");

        assert_eq!(outcome.filename, "notes.txt");
        assert_eq!(outcome.file_type, ".txt");
        assert_eq!(outcome.documents_processed, 1);
        assert_eq!(outcome.chunks_created, 1);
        assert!(outcome.archive_url.is_some());
        assert_eq!(outcome.warning(), None);

        let records = index.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "hello world");
        assert_eq!(records[0].values.len(), DIMENSION);
        assert_eq!(records[0].metadata[FILENAME_KEY], "notes.txt");
        assert_eq!(records[0].metadata[FILE_TYPE_KEY], ".txt");
        assert!(records[0].metadata.contains_key(UPLOAD_TIMESTAMP_KEY));
        assert!(Uuid::parse_str(&records[0].id).is_ok());

        let objects = archive.objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        assert!(objects[0].key.starts_with("documents/"));
        assert!(objects[0].key.ends_with("_notes.txt"));
        assert_eq!(objects[0].bytes, b"hello world");
        assert_eq!(objects[0].content_type, "text/plain");
        assert!(
            objects[0]
                .metadata
                .contains(&("original_filename".to_string(), "notes.txt".to_string()))
        );

        let calls = embedder.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(1, EmbeddingTask::Document)]);
    }

    #[tokio::test]
    async fn unsupported_extension_touches_nothing() {
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(FakeIndex::default());
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        let error = service
            .ingest(upload("photo.png", "binary"))
            .await
            .unwrap_err();

        assert!(error.is_client_error());
        assert!(embedder.calls.lock().unwrap().is_empty());
        assert!(index.records.lock().unwrap().is_empty());
        assert!(archive.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_failure_is_reported_as_warning() {
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(FakeIndex::default());
        let archive = Arc::new(FakeArchive {
            fail: true,
            ..FakeArchive::default()
        });
        let service = service(&embedder, &index, &archive);

        let outcome = service
            .ingest(upload("notes.md", "# Title\nbody"))
            .await
            .expect("indexing still succeeds");

        assert_eq!(outcome.chunks_created, 1);
        assert_eq!(outcome.archive_url, None);
        let warning = outcome.warning().expect("warning");
        assert!(warning.starts_with("Document processed successfully but S3 upload failed:"));
        assert!(warning.contains("AccessDenied"));
        assert_eq!(index.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn index_failure_skips_archive() {
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(FakeIndex {
            fail_upsert: true,
            ..FakeIndex::default()
        });
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        let error = service
            .ingest(upload("notes.txt", "hello world"))
            .await
            .unwrap_err();

        assert!(matches!(error, ProcessingError::Index(_)));
        assert!(!error.is_client_error());
        assert!(archive.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_count_mismatch_is_an_error() {
        let embedder = Arc::new(FakeEmbedder {
            short_by: 1,
            ..FakeEmbedder::default()
        });
        let index = Arc::new(FakeIndex::default());
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        let error = service
            .ingest(upload("notes.txt", "hello world"))
            .await
            .unwrap_err();

        assert!(matches!(error, ProcessingError::Embedding(_)));
        assert!(index.records.lock().unwrap().is_empty());
        assert!(archive.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_is_a_processing_error() {
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(FakeIndex::default());
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        let error = service
            .ingest(UploadedFile {
                filename: "broken.txt".into(),
                content_type: None,
                bytes: vec![0xff, 0xfe, 0xfd],
            })
            .await
            .unwrap_err();

        assert!(matches!(error, ProcessingError::Extraction(_)));
        assert!(index.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_text_skips_embedding_but_archives() {
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(FakeIndex::default());
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        let outcome = service.ingest(upload("empty.txt", "")).await.expect("ingest");

        assert_eq!(outcome.documents_processed, 1);
        assert_eq!(outcome.chunks_created, 0);
        assert!(embedder.calls.lock().unwrap().is_empty());
        assert_eq!(archive.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_sorts_by_score_and_respects_limit() {
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(FakeIndex {
            matches: vec![scored("a", 0.2), scored("b", 0.9), scored("c", 0.5)],
            ..FakeIndex::default()
        });
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        let hits = service.search("hello", 2).await.expect("search");

        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(hits[0].text, "text b");
        assert_eq!(*index.queried_top_k.lock().unwrap(), Some(2));
        assert_eq!(
            embedder.calls.lock().unwrap().as_slice(),
            &[(1, EmbeddingTask::Query)]
        );
    }

    #[tokio::test]
    async fn search_clamps_limit() {
        let embedder = Arc::new(FakeEmbedder::default());
        let index = Arc::new(FakeIndex::default());
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        service.search("hello", 500).await.expect("search");
        assert_eq!(*index.queried_top_k.lock().unwrap(), Some(MAX_QUERY_LIMIT));

        service.search("hello", 0).await.expect("search");
        assert_eq!(*index.queried_top_k.lock().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn search_surfaces_embedding_failure() {
        let embedder = Arc::new(FakeEmbedder {
            fail: true,
            ..FakeEmbedder::default()
        });
        let index = Arc::new(FakeIndex::default());
        let archive = Arc::new(FakeArchive::default());
        let service = service(&embedder, &index, &archive);

        let error = service.search("hello", 5).await.unwrap_err();
        assert!(matches!(error, SearchError::Embedding(_)));
        assert_eq!(*index.queried_top_k.lock().unwrap(), None);
    }

    #[tokio::test]
    async fn dimension_validation() {
        let embedder = Arc::new(FakeEmbedder::default());
        let archive = Arc::new(FakeArchive::default());

        let matching = Arc::new(FakeIndex {
            dimension: DIMENSION,
            ..FakeIndex::default()
        });
        service(&embedder, &matching, &archive)
            .validate_dimension()
            .await
            .expect("dimensions agree");

        let empty = Arc::new(FakeIndex::default());
        service(&embedder, &empty, &archive)
            .validate_dimension()
            .await
            .expect("unknown dimension accepted");

        let mismatched = Arc::new(FakeIndex {
            dimension: 768,
            ..FakeIndex::default()
        });
        let error = service(&embedder, &mismatched, &archive)
            .validate_dimension()
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            StartupError::DimensionMismatch {
                index: 768,
                embedding: DIMENSION
            }
        ));
    }
}
