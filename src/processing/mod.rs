//! Document pipeline: extraction, chunking, and the service tying them to the collaborators.

pub mod chunking;
pub mod extract;
mod service;
pub mod types;

pub use chunking::TextChunker;
pub use extract::FileKind;
pub use service::{DocumentApi, DocumentService, MAX_QUERY_LIMIT};
pub use types::{
    Chunk, ChunkingError, Document, ExtractionError, IngestionOutcome, ProcessingError,
    SearchError, SearchHit, StartupError, UnsupportedFileType, UploadedFile,
};
