//! SQLite-backed similarity index over embedded chunks.
//!
//! The store initializes lazily: the first operation that needs it opens
//! the database, creates the schema, and builds the embedder. The outcome
//! is recorded in [`StoreState`]. A failed initialization is kept as
//! `Failed(reason)` and never retried implicitly, so the original cause
//! stays visible in the status endpoint instead of being masked by
//! repeated attempts.
//!
//! Searches are brute-force cosine similarity over every stored vector,
//! which is fine for a personal knowledge base of a few thousand chunks.
//!
//! Replacing the indexed set deletes and inserts inside one transaction.
//! The reindex orchestrator also clears the index first, so a concurrent
//! search may briefly see an empty index; it never sees a mix of old and
//! new chunks.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{Config, EmbeddingConfig};
use crate::db;
use crate::embedding::{self, blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::{HearthError, Result};
use crate::migrate;
use crate::models::{Document, SearchHit, META_SOURCE};

/// Lifecycle of the lazily-opened index.
pub enum StoreState {
    Uninitialized,
    Ready(Arc<Backend>),
    Failed(String),
}

pub struct Backend {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

enum EmbedderSource {
    Configured(EmbeddingConfig),
    Provided(Arc<dyn Embedder>),
}

/// Snapshot reported by the knowledge status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub initialized: bool,
    pub error: Option<String>,
    pub embedding_model: String,
    pub index_path: String,
}

pub struct VectorStore {
    index_path: PathBuf,
    embedder_source: EmbedderSource,
    model_label: String,
    batch_size: usize,
    state: RwLock<StoreState>,
}

impl VectorStore {
    pub fn new(config: &Config) -> Self {
        let e = &config.embedding;
        let model_label = match (e.provider.as_str(), &e.model) {
            (_, Some(model)) => model.clone(),
            ("hash", None) => format!("hash-{}", e.dims.unwrap_or(256)),
            (provider, None) => provider.to_string(),
        };
        Self {
            index_path: config.knowledge.index_path.clone(),
            embedder_source: EmbedderSource::Configured(e.clone()),
            model_label,
            batch_size: e.batch_size.max(1),
            state: RwLock::new(StoreState::Uninitialized),
        }
    }

    /// Build a store around an already-constructed embedder.
    pub fn with_embedder(index_path: &Path, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            index_path: index_path.to_path_buf(),
            model_label: embedder.model_name().to_string(),
            embedder_source: EmbedderSource::Provided(embedder),
            batch_size: batch_size.max(1),
            state: RwLock::new(StoreState::Uninitialized),
        }
    }

    /// Initialize now instead of on first use. Returns whether the store is ready.
    pub async fn initialize(&self) -> bool {
        self.ready().await.is_ok()
    }

    pub async fn status(&self) -> StoreStatus {
        let (initialized, error) = match &*self.state.read().await {
            StoreState::Uninitialized => (false, None),
            StoreState::Ready(_) => (true, None),
            StoreState::Failed(reason) => (false, Some(reason.clone())),
        };
        StoreStatus {
            initialized,
            error,
            embedding_model: self.model_label.clone(),
            index_path: self.index_path.display().to_string(),
        }
    }

    async fn ready(&self) -> Result<Arc<Backend>> {
        match &*self.state.read().await {
            StoreState::Ready(backend) => return Ok(Arc::clone(backend)),
            StoreState::Failed(reason) => return Err(HearthError::StoreUnavailable(reason.clone())),
            StoreState::Uninitialized => {}
        }

        // re-check under the write lock; another caller may have won the race
        let mut state = self.state.write().await;
        match &*state {
            StoreState::Ready(backend) => return Ok(Arc::clone(backend)),
            StoreState::Failed(reason) => return Err(HearthError::StoreUnavailable(reason.clone())),
            StoreState::Uninitialized => {}
        }

        match self.open_backend().await {
            Ok(backend) => {
                info!(
                    index_path = %self.index_path.display(),
                    model = %self.model_label,
                    "vector store initialized"
                );
                let backend = Arc::new(backend);
                *state = StoreState::Ready(Arc::clone(&backend));
                Ok(backend)
            }
            Err(e) => {
                let reason = e.to_string();
                error!(error = %reason, "vector store initialization failed");
                *state = StoreState::Failed(reason.clone());
                Err(HearthError::StoreUnavailable(reason))
            }
        }
    }

    async fn open_backend(&self) -> Result<Backend> {
        let embedder = match &self.embedder_source {
            EmbedderSource::Provided(e) => Arc::clone(e),
            EmbedderSource::Configured(cfg) => {
                let cfg = cfg.clone();
                // local models load synchronously from disk
                tokio::task::spawn_blocking(move || embedding::create_embedder(&cfg)).await??
            }
        };
        let pool = db::connect(&self.index_path).await?;
        migrate::create_index_schema(&mut *pool.acquire().await?).await?;
        Ok(Backend { pool, embedder })
    }

    /// Replace everything in the index with `chunks`. Returns the number stored.
    pub async fn add_documents(&self, chunks: &[Document]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let backend = self.ready().await?;

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = backend.embedder.embed(&texts).await?;
            if embedded.len() != batch.len() {
                return Err(HearthError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }

        let model = backend.embedder.model_name().to_string();
        let mut tx = backend.pool.begin().await?;
        sqlx::query("DELETE FROM kb_chunks").execute(&mut *tx).await?;
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                "INSERT INTO kb_chunks (content, metadata_json, source, embedding, model, dims) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(chunk.source())
            .bind(vec_to_blob(vector))
            .bind(&model)
            .bind(vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(chunks = chunks.len(), "chunks indexed");
        Ok(chunks.len())
    }

    /// Up to `k` chunks nearest to `query`. Never fails: a blank query, an
    /// unavailable store, or an embedding error all yield an empty result.
    pub async fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        if query.trim().is_empty() || k == 0 {
            return Vec::new();
        }
        let backend = match self.ready().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "search skipped, store not initialized");
                return Vec::new();
            }
        };
        match search_backend(&backend, query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "search failed");
                Vec::new()
            }
        }
    }

    pub async fn count(&self) -> Result<i64> {
        let backend = self.ready().await?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kb_chunks")
            .fetch_one(&backend.pool)
            .await?;
        Ok(n)
    }

    /// Drop and recreate the index table in one transaction, so readers
    /// never observe a missing table. Idempotent.
    pub async fn clear(&self) -> Result<()> {
        let backend = self.ready().await?;
        let mut tx = backend.pool.begin().await?;
        migrate::drop_index_schema(&mut *tx).await?;
        migrate::create_index_schema(&mut *tx).await?;
        tx.commit().await?;
        debug!("vector index cleared");
        Ok(())
    }
}

async fn search_backend(backend: &Backend, query: &str, k: usize) -> Result<Vec<SearchHit>> {
    let query_vec = embedding::embed_query(backend.embedder.as_ref(), query).await?;

    let rows = sqlx::query("SELECT id, content, metadata_json, embedding FROM kb_chunks ORDER BY id")
        .fetch_all(&backend.pool)
        .await?;

    let mut scored: Vec<(f32, i64, SearchHit)> = Vec::with_capacity(rows.len());
    for row in &rows {
        let blob: Vec<u8> = row.get("embedding");
        let score = cosine_similarity(&query_vec, &blob_to_vec(&blob));
        let metadata_json: String = row.get("metadata_json");
        let metadata: BTreeMap<String, String> =
            serde_json::from_str(&metadata_json).unwrap_or_default();
        scored.push((
            score,
            row.get("id"),
            SearchHit {
                content: row.get("content"),
                metadata,
                score,
                distance: 1.0 - score,
            },
        ));
    }

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
    scored.truncate(k);

    Ok(scored.into_iter().map(|(_, _, hit)| hit).collect())
}

/// Source path recorded for a hit, or `""`.
pub fn hit_source(hit: &SearchHit) -> &str {
    hit.metadata
        .get(META_SOURCE)
        .map(String::as_str)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{META_FILENAME, META_HEADING};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn chunk(content: &str, source: &str, heading: Option<&str>) -> Document {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_SOURCE.to_string(), source.to_string());
        metadata.insert(
            META_FILENAME.to_string(),
            source.rsplit('/').next().unwrap_or(source).to_string(),
        );
        if let Some(h) = heading {
            metadata.insert(META_HEADING.to_string(), h.to_string());
        }
        Document::new(content, metadata)
    }

    fn store(tmp: &TempDir) -> VectorStore {
        VectorStore::with_embedder(
            &tmp.path().join("index.sqlite"),
            Arc::new(HashEmbedder::new(128)),
            2,
        )
    }

    /// Embedder that always fails, standing in for an unreachable provider.
    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(HearthError::Embedding("provider unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_add_search_count() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let chunks = vec![
            chunk("The thermostat schedule lowers heating at night.", "docs/climate.md", Some("Heating")),
            chunk("Pair new bulbs by holding the hub button.", "docs/lights.md", Some("Pairing")),
            chunk("Door locks report battery level weekly.", "docs/locks.md", None),
        ];
        assert_eq!(store.add_documents(&chunks).await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 3);

        let hits = store.search("thermostat heating schedule", 2).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hit_source(&hits[0]), "docs/climate.md");
        assert_eq!(hits[0].metadata.get(META_HEADING).map(String::as_str), Some("Heating"));
        assert_eq!(hits[0].content, chunks[0].content);
        assert!(hits[0].score >= hits[1].score);
        assert!((hits[0].distance - (1.0 - hits[0].score)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_add_replaces_previous_content() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store
            .add_documents(&[chunk("old one", "a.md", None), chunk("old two", "b.md", None)])
            .await
            .unwrap();
        store.add_documents(&[chunk("new only", "c.md", None)]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.search("old", 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hit_source(&hits[0]), "c.md");
    }

    #[tokio::test]
    async fn test_empty_add_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert_eq!(store.add_documents(&[]).await.unwrap(), 0);
        assert!(!store.status().await.initialized);
    }

    #[tokio::test]
    async fn test_blank_query_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.search("   ", 3).await.is_empty());
        store.add_documents(&[chunk("content", "a.md", None)]).await.unwrap();
        assert!(store.search("", 3).await.is_empty());
        assert!(store.search("\n\t", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.add_documents(&[chunk("content", "a.md", None)]).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_during_clear_never_sees_missing_table() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(store(&tmp));
        store.add_documents(&[chunk("content", "a.md", None)]).await.unwrap();

        let clearer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..20 {
                    store.clear().await.unwrap();
                }
            })
        };
        for _ in 0..20 {
            let n = store.count().await.unwrap();
            assert!(n == 0 || n == 1);
            tokio::task::yield_now().await;
        }
        clearer.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_init_degrades() {
        let tmp = TempDir::new().unwrap();
        // A directory where the database file should be cannot be opened.
        let index_path = tmp.path().join("index.sqlite");
        std::fs::create_dir_all(&index_path).unwrap();
        let store = VectorStore::with_embedder(&index_path, Arc::new(HashEmbedder::new(8)), 4);

        assert!(!store.initialize().await);
        let status = store.status().await;
        assert!(!status.initialized);
        assert!(status.error.is_some());

        assert!(store.search("anything", 3).await.is_empty());
        let err = store.count().await.unwrap_err();
        assert_eq!(err.code(), "store_unavailable");
        let err = store
            .add_documents(&[chunk("x", "a.md", None)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "store_unavailable");
    }

    #[tokio::test]
    async fn test_embedding_failure_is_reported() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::with_embedder(
            &tmp.path().join("index.sqlite"),
            Arc::new(FailingEmbedder),
            4,
        );
        let err = store
            .add_documents(&[chunk("x", "a.md", None)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "embedding_error");
        assert!(store.search("x", 3).await.is_empty());
        assert!(store.status().await.initialized);
    }

    #[tokio::test]
    async fn test_status_reports_model_and_path() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let status = store.status().await;
        assert_eq!(status.embedding_model, "hash-128");
        assert!(status.index_path.ends_with("index.sqlite"));
        assert!(store.initialize().await);
        assert!(store.status().await.initialized);
    }
}
