//
// background_indexer.rs
//
// Workspace indexing on a blocking worker with progress reporting
//

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::notification::Progress;
use tower_lsp::lsp_types::request::WorkDoneProgressCreate;
use tower_lsp::lsp_types::{
    MessageType, NumberOrString, ProgressParams, ProgressParamsValue, Url, WorkDoneProgress,
    WorkDoneProgressBegin, WorkDoneProgressCreateParams, WorkDoneProgressEnd, WorkDoneProgressReport,
};

use crate::config::IndexingConfig;
use crate::error::{panic_message, IndexError};
use crate::message::Outbox;
use crate::workspace_index::{discover_indexable_paths, IndexOutcome, IndexablePath, WorkspaceIndex};

/// Token correlating the begin/report/end notifications of a rebuild.
pub const PROGRESS_TOKEN: &str = "indexing-progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerStatus {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// One file event from the client's watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexChange {
    Created(IndexablePath),
    Changed(IndexablePath),
    Deleted(Url),
}

#[derive(Debug, Clone, Default)]
pub struct IndexerMetrics {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_cancelled: u64,
    pub runs_failed: u64,
    pub runs_refused: u64,
    pub reports_sent: u64,
    pub changes_applied: u64,
    pub changes_queued: u64,
}

struct IndexerState {
    status: IndexerStatus,
    /// Changes that arrived during a rebuild, applied in order afterwards
    pending: VecDeque<IndexChange>,
    metrics: IndexerMetrics,
    progress_enabled: bool,
    begin_sent: bool,
    last_outcome: Option<RunOutcome>,
}

/// Orchestrates the one-time workspace rebuild and incremental updates.
///
/// At most one rebuild runs at a time. While it runs, incremental changes
/// are queued instead of racing it.
#[derive(Clone)]
pub struct BackgroundIndexer {
    index: Arc<WorkspaceIndex>,
    outbox: Outbox,
    shutdown: CancellationToken,
    inner: Arc<Mutex<IndexerState>>,
    worker_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    compact_after_indexing: bool,
}

fn progress_token() -> NumberOrString {
    NumberOrString::String(PROGRESS_TOKEN.to_string())
}

impl BackgroundIndexer {
    pub fn new(
        index: Arc<WorkspaceIndex>,
        outbox: Outbox,
        shutdown: CancellationToken,
        compact_after_indexing: bool,
    ) -> Self {
        Self {
            index,
            outbox,
            shutdown,
            inner: Arc::new(Mutex::new(IndexerState {
                status: IndexerStatus::Idle,
                pending: VecDeque::new(),
                metrics: IndexerMetrics::default(),
                progress_enabled: false,
                begin_sent: false,
                last_outcome: None,
            })),
            worker_handle: Arc::new(Mutex::new(None)),
            compact_after_indexing,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn index(&self) -> &Arc<WorkspaceIndex> {
        &self.index
    }

    /// Whether the client accepts server-initiated work done progress.
    pub fn set_progress_enabled(&self, enabled: bool) {
        self.lock().progress_enabled = enabled;
    }

    pub fn status(&self) -> IndexerStatus {
        self.lock().status
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.lock().last_outcome.clone()
    }

    pub fn metrics(&self) -> IndexerMetrics {
        self.lock().metrics.clone()
    }

    /// Check polled between files: stop once the server is shutting down or
    /// nobody is left to receive progress.
    fn should_stop(&self) -> bool {
        self.outbox.is_closed() || self.shutdown.is_cancelled()
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Create the progress token and send `begin`. Sent at most once per run,
    /// so the client can show an indicator before indexing starts.
    pub fn begin_progress(&self) {
        {
            let mut state = self.lock();
            if !state.progress_enabled || state.begin_sent {
                return;
            }
            state.begin_sent = true;
        }
        self.outbox.request::<WorkDoneProgressCreate>(WorkDoneProgressCreateParams {
            token: progress_token(),
        });
        self.outbox.notify::<Progress>(ProgressParams {
            token: progress_token(),
            value: ProgressParamsValue::WorkDone(WorkDoneProgress::Begin(WorkDoneProgressBegin {
                title: "Ruby: indexing files".to_string(),
                cancellable: Some(false),
                message: Some("0%".to_string()),
                percentage: Some(0),
            })),
        });
    }

    fn report_progress(&self, percent: u8) {
        {
            let mut state = self.lock();
            if !state.begin_sent {
                return;
            }
            state.metrics.reports_sent += 1;
        }
        self.outbox.notify::<Progress>(ProgressParams {
            token: progress_token(),
            value: ProgressParamsValue::WorkDone(WorkDoneProgress::Report(WorkDoneProgressReport {
                cancellable: Some(false),
                message: Some(format!("{}%", percent)),
                percentage: Some(u32::from(percent)),
            })),
        });
    }

    fn end_progress(&self, message: &str) {
        {
            let mut state = self.lock();
            if !state.begin_sent {
                return;
            }
            state.begin_sent = false;
        }
        self.outbox.notify::<Progress>(ProgressParams {
            token: progress_token(),
            value: ProgressParamsValue::WorkDone(WorkDoneProgress::End(WorkDoneProgressEnd {
                message: Some(message.to_string()),
            })),
        });
    }

    // ========================================================================
    // Full Rebuild
    // ========================================================================

    /// Start the workspace rebuild. Returns false when one is already running.
    ///
    /// The worker runs on the blocking pool; without a runtime it runs inline.
    pub fn start(&self, root: PathBuf, config: IndexingConfig) -> bool {
        {
            let mut state = self.lock();
            if state.status == IndexerStatus::Running {
                state.metrics.runs_refused += 1;
                log::warn!("Workspace indexing already running, ignoring new request");
                return false;
            }
            state.status = IndexerStatus::Running;
            state.metrics.runs_started += 1;
        }
        self.begin_progress();
        log::info!("Indexing workspace at {}", root.display());

        let worker = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = runtime.spawn_blocking(move || worker.run(&root, &config));
                *self.worker_handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(_) => worker.run(&root, &config),
        }
        true
    }

    /// Wait for the running worker, if any.
    pub async fn join(&self) {
        let handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log::error!("Indexing worker did not finish: {}", err);
            }
        }
    }

    fn run(&self, root: &Path, config: &IndexingConfig) {
        let result = catch_unwind(AssertUnwindSafe(|| self.index_workspace(root, config)));
        let outcome = match result {
            Ok(Ok(IndexOutcome::Completed)) => RunOutcome::Completed,
            Ok(Ok(IndexOutcome::Cancelled)) => RunOutcome::Cancelled,
            Ok(Err(err)) => RunOutcome::Failed(err.to_string()),
            Err(payload) => RunOutcome::Failed(IndexError::Panicked(panic_message(&*payload)).to_string()),
        };
        self.finish(outcome);
    }

    fn index_workspace(&self, root: &Path, config: &IndexingConfig) -> Result<IndexOutcome, IndexError> {
        let paths = discover_indexable_paths(root, config)?;
        let mut last_percent = 0;
        let outcome = self.index.index_all(&paths, |percent| {
            if self.should_stop() {
                return false;
            }
            if percent != last_percent {
                last_percent = percent;
                self.report_progress(percent);
            }
            true
        });
        Ok(outcome)
    }

    fn finish(&self, outcome: RunOutcome) {
        match &outcome {
            RunOutcome::Completed => {
                log::info!("Workspace indexing completed ({} files)", self.index.file_count());
                if self.compact_after_indexing {
                    self.index.compact();
                }
                self.end_progress("Finished indexing");
            }
            RunOutcome::Cancelled => {
                log::info!("Workspace indexing stopped before completion");
                self.end_progress("Indexing stopped");
            }
            RunOutcome::Failed(message) => {
                log::error!("Workspace indexing failed: {}", message);
                self.outbox.show_message(
                    MessageType::ERROR,
                    format!("Error while indexing (please check your settings): {}", message),
                );
                self.end_progress("Indexing failed");
            }
        }
        {
            let mut state = self.lock();
            match outcome {
                RunOutcome::Completed => state.metrics.runs_completed += 1,
                RunOutcome::Cancelled => state.metrics.runs_cancelled += 1,
                RunOutcome::Failed(_) => state.metrics.runs_failed += 1,
            }
            state.last_outcome = Some(outcome);
        }
        self.drain_pending();
    }

    /// Apply queued changes, then go idle. Status stays running until the
    /// queue is observed empty so later changes keep their order.
    fn drain_pending(&self) {
        loop {
            let next = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(change) => change,
                    None => {
                        state.status = IndexerStatus::Idle;
                        return;
                    }
                }
            };
            self.apply(next);
        }
    }

    // ========================================================================
    // Incremental Updates
    // ========================================================================

    /// Apply a file change now, or queue it behind a running rebuild.
    /// Returns true when it was applied immediately.
    pub fn apply_change(&self, change: IndexChange) -> bool {
        {
            let mut state = self.lock();
            if state.status == IndexerStatus::Running {
                log::trace!("Queueing {:?} behind running rebuild", change);
                state.pending.push_back(change);
                state.metrics.changes_queued += 1;
                return false;
            }
        }
        self.apply(change);
        true
    }

    fn apply(&self, change: IndexChange) {
        let result = match &change {
            IndexChange::Created(path) => self.index.index_single(path),
            IndexChange::Changed(path) => self.index.handle_change(path),
            IndexChange::Deleted(uri) => {
                self.index.delete(uri);
                Ok(())
            }
        };
        if let Err(err) = result {
            log::warn!("Failed to apply {:?}: {}", change, err);
        }
        self.lock().metrics.changes_applied += 1;
    }
}
