#![deny(missing_docs)]

//! Core library for the docsearch document ingestion and semantic search service.

/// HTTP routing and REST handlers.
pub mod api;
/// Archive storage for original uploads.
pub mod archive;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Vector index abstraction and the Pinecone client.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Document extraction, chunking, and the ingestion/search service.
pub mod processing;
