//! Knowledge base rebuild: load → split → clear → add.
//!
//! At most one reindex runs at a time. The busy flag is an atomic
//! compare-and-set from `Idle` to `Running`; the winner holds a
//! [`ReindexGuard`] that flips the flag back when dropped, so every exit
//! path (success, error, or a panic unwinding out of the body) releases it.
//! Losers are rejected immediately with [`HearthError::ReindexBusy`]; there
//! is no queueing.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{HearthError, Result};
use crate::loader;
use crate::models::ReindexReport;
use crate::splitter::TextSplitter;
use crate::vector_store::VectorStore;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexState {
    Idle,
    Running,
}

/// Final outcome of a reindex that was allowed to run.
///
/// Serializes as `{"ok": true, "documents_loaded": .., ..}` on success and
/// `{"ok": false, "error": "..", "code": ".."}` on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexResult {
    pub ok: bool,
    #[serde(flatten)]
    pub report: Option<ReindexReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ReindexResult {
    fn success(report: ReindexReport) -> Self {
        Self {
            ok: true,
            report: Some(report),
            error: None,
            code: None,
        }
    }

    fn failure(err: &HearthError) -> Self {
        Self {
            ok: false,
            report: None,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
        }
    }
}

/// Holds the `Running` flag; releases it on drop.
pub struct ReindexGuard {
    state: Arc<AtomicU8>,
}

impl Drop for ReindexGuard {
    fn drop(&mut self) {
        self.state.store(IDLE, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct ReindexOrchestrator {
    config: Arc<Config>,
    store: Arc<VectorStore>,
    state: Arc<AtomicU8>,
    #[cfg(test)]
    runs: Arc<std::sync::atomic::AtomicU64>,
}

impl ReindexOrchestrator {
    pub fn new(config: Arc<Config>, store: Arc<VectorStore>) -> Self {
        Self {
            config,
            store,
            state: Arc::new(AtomicU8::new(IDLE)),
            #[cfg(test)]
            runs: Arc::default(),
        }
    }

    pub fn state(&self) -> ReindexState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => ReindexState::Running,
            _ => ReindexState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ReindexState::Running
    }

    /// Number of reindex bodies that have started since construction.
    #[cfg(test)]
    fn runs_started(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    /// Move `Idle → Running`, or fail with `ReindexBusy` if already running.
    pub fn try_begin(&self) -> Result<ReindexGuard> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ReindexGuard {
                state: Arc::clone(&self.state),
            })
            .map_err(|_| {
                warn!("reindex rejected, another reindex is running");
                HearthError::ReindexBusy
            })
    }

    /// Run a full reindex and wait for it.
    ///
    /// Returns `Err(ReindexBusy)` when another reindex holds the flag; every
    /// other failure is folded into an `ok: false` result.
    pub async fn reindex_blocking(&self) -> Result<ReindexResult> {
        let guard = self.try_begin()?;
        Ok(self.run_guarded(guard).await)
    }

    /// Start a reindex in the background and return as soon as it holds the
    /// flag. Completion is only logged.
    pub fn reindex_background(&self) -> Result<()> {
        let guard = self.try_begin()?;
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.run_guarded(guard).await;
            if result.ok {
                info!("background reindex finished");
            } else {
                warn!(error = ?result.error, "background reindex failed");
            }
        });
        Ok(())
    }

    async fn run_guarded(&self, guard: ReindexGuard) -> ReindexResult {
        let _guard = guard;
        #[cfg(test)]
        self.runs.fetch_add(1, Ordering::AcqRel);
        info!(paths = ?self.config.knowledge.paths, "reindex started");

        match run_pipeline(&self.config, &self.store).await {
            Ok(report) => {
                info!(
                    documents = report.documents_loaded,
                    chunks = report.chunks_created,
                    indexed = report.chunks_indexed,
                    "reindex complete"
                );
                ReindexResult::success(report)
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "reindex failed");
                ReindexResult::failure(&e)
            }
        }
    }
}

async fn run_pipeline(config: &Arc<Config>, store: &VectorStore) -> Result<ReindexReport> {
    let splitter = TextSplitter::from_config(&config.knowledge)?;
    let paths: Vec<String> = config
        .knowledge
        .paths
        .iter()
        .map(|p| p.display().to_string())
        .collect();

    let load_config = Arc::clone(config);
    let documents =
        tokio::task::spawn_blocking(move || loader::load_from_config(&load_config)).await??;
    if documents.is_empty() {
        return Err(HearthError::NoDocuments);
    }
    let documents_loaded = documents.len();

    let chunks =
        tokio::task::spawn_blocking(move || splitter.split_documents(&documents)).await?;
    let chunks_created = chunks.len();

    store.clear().await?;
    let chunks_indexed = store.add_documents(&chunks).await?;

    Ok(ReindexReport {
        documents_loaded,
        chunks_created,
        chunks_indexed,
        paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup(with_docs: bool) -> (TempDir, ReindexOrchestrator, Arc<VectorStore>) {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        if with_docs {
            fs::write(
                docs.join("lights.md"),
                "# Lights\n\nSay \"turn on the kitchen lights\" to switch them on.\n\n## Scenes\n\nEvening scene dims every lamp to thirty percent.",
            )
            .unwrap();
            fs::write(docs.join("heating.md"), "# Heating\n\nThe thermostat follows a weekly schedule.").unwrap();
        }

        let mut config = Config::minimal();
        config.knowledge.base_dir = tmp.path().to_path_buf();
        config.knowledge.paths = vec![PathBuf::from("docs")];
        config.knowledge.chunk_size = 60;
        config.knowledge.chunk_overlap = 10;
        config.knowledge.index_path = tmp.path().join("index.sqlite");

        let store = Arc::new(VectorStore::with_embedder(
            &config.knowledge.index_path,
            Arc::new(HashEmbedder::new(64)),
            8,
        ));
        let orchestrator = ReindexOrchestrator::new(Arc::new(config), Arc::clone(&store));
        (tmp, orchestrator, store)
    }

    #[tokio::test]
    async fn test_blocking_reindex_reports_counts() {
        let (_tmp, orch, store) = setup(true);
        let result = orch.reindex_blocking().await.unwrap();
        assert!(result.ok, "{:?}", result.error);
        let report = result.report.unwrap();
        assert_eq!(report.documents_loaded, 2);
        assert!(report.chunks_created >= 3);
        assert_eq!(report.chunks_indexed, report.chunks_created);
        assert_eq!(report.paths, vec!["docs".to_string()]);
        assert_eq!(store.count().await.unwrap() as usize, report.chunks_indexed);
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn test_no_documents_is_failure_result() {
        let (_tmp, orch, _store) = setup(false);
        let result = orch.reindex_blocking().await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.code.as_deref(), Some("no_documents"));
        assert_eq!(result.error.as_deref(), Some("no documents found"));
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn test_busy_while_guard_held() {
        let (_tmp, orch, _store) = setup(true);
        let guard = orch.try_begin().unwrap();
        assert!(orch.is_running());
        let err = orch.reindex_blocking().await.unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert!(orch.reindex_background().is_err());
        drop(guard);
        assert!(!orch.is_running());
        assert!(orch.reindex_blocking().await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_concurrent_blocking_calls_run_body_once() {
        let (_tmp, orch, _store) = setup(true);
        let (a, b) = tokio::join!(orch.reindex_blocking(), orch.reindex_blocking());
        let busy = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(HearthError::ReindexBusy)))
            .count();
        let ran = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(busy, 1);
        assert_eq!(ran, 1);
        assert_eq!(orch.runs_started(), 1);
    }

    #[tokio::test]
    async fn test_background_reindex_releases_flag() {
        let (_tmp, orch, store) = setup(true);
        orch.reindex_background().unwrap();
        for _ in 0..200 {
            if !orch.is_running() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!orch.is_running());
        assert!(store.count().await.unwrap() > 0);
    }

    #[test]
    fn test_result_serialization_shape() {
        let ok = ReindexResult::success(ReindexReport {
            documents_loaded: 1,
            chunks_created: 2,
            chunks_indexed: 2,
            paths: vec!["docs".into()],
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["chunks_indexed"], 2);
        assert!(json.get("error").is_none());

        let failed = ReindexResult::failure(&HearthError::NoDocuments);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "no documents found");
        assert!(json.get("documents_loaded").is_none());
    }
}
