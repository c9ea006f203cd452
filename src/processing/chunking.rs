//! Fixed-window character chunking with overlap.
//!
//! Windows are measured in Unicode scalar values. Each window after the first starts
//! `chunk_size - chunk_overlap` characters after its predecessor, and the walk stops as soon
//! as a window reaches the end of the text, so the final window may be shorter.

use super::types::{Chunk, ChunkingError, Document};

/// Splits documents into overlapping character windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// Validate the window parameters and build a chunker.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkingError::InvalidOverlap {
                overlap: chunk_overlap,
                size: chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Window length in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by consecutive windows.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into windows. Empty text yields no windows.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        // Byte offset of every character boundary, including the end of the string.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = boundaries.len() - 1;
        let stride = self.chunk_size - self.chunk_overlap;

        let mut windows = Vec::new();
        let mut start = 0;
        while start < char_count {
            let end = (start + self.chunk_size).min(char_count);
            windows.push(text[boundaries[start]..boundaries[end]].to_string());
            if end == char_count {
                break;
            }
            start += stride;
        }
        windows
    }

    /// Chunk every document, copying its metadata onto each chunk.
    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|document| {
                self.split_text(&document.text)
                    .into_iter()
                    .map(|text| Chunk {
                        text,
                        metadata: document.metadata.clone(),
                    })
            })
            .collect()
    }
}
