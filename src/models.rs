//! Core data models for the knowledge pipeline.
//!
//! A [`Document`] is both what the loader produces (one per file) and what
//! the splitter produces (one per chunk). Chunks are ordinary documents
//! whose metadata additionally carries a `heading`.

use serde::Serialize;
use std::collections::BTreeMap;

/// Metadata key holding the path relative to the knowledge base directory.
pub const META_SOURCE: &str = "source";
/// Metadata key holding the file's base name.
pub const META_FILENAME: &str = "filename";
/// Metadata key holding the nearest preceding Markdown heading (chunks only).
pub const META_HEADING: &str = "heading";

/// Text plus string metadata. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get(META_SOURCE)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn heading(&self) -> Option<&str> {
        self.metadata.get(META_HEADING).map(String::as_str)
    }
}

/// A chunk returned from a knowledge search, ranked by cosine similarity.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    /// Cosine similarity in `[-1, 1]`; higher is closer.
    pub score: f32,
    /// Cosine distance, `1 - score`.
    pub distance: f32,
}

impl SearchHit {
    /// Heading the chunk was found under, or `""`.
    pub fn heading(&self) -> &str {
        self.metadata
            .get(META_HEADING)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Counts reported by a successful reindex.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReindexReport {
    pub documents_loaded: usize,
    pub chunks_created: usize,
    pub chunks_indexed: usize,
    pub paths: Vec<String>,
}
