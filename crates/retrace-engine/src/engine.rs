//! The engine facade.
//!
//! One [`Engine`] is owned by the control thread. Commands are turned into
//! jobs and run on blocking worker threads; their results come back over a
//! channel and are applied to engine state (undo stack, clipboard,
//! selection, status cache) only when the control thread drains events with
//! [`Engine::next_event`]. No engine state is shared with workers.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use retrace_core::{
    normalize_path, read_directory, Entry, EngineConfig, OpError, OpResult, StatusTag,
};
use retrace_ops::{
    path_occupied, validate_filename, ArchiveManager, ArchiveOptions, BulkOutcome, CreateKind,
    Inverse, OperationExecutor, OperationProgress, OperationRecord, ProgressSender, TrashStore,
    UndoEntry, UndoManager, OPERATION_CHANNEL_SIZE,
};
use retrace_status::{GitStatusProvider, NoStatus, StatusCache, StatusError, StatusMap, StatusProvider};

use crate::scheduler::{Claim, Scheduler};
use crate::selection::{Clipboard, ClipboardMode, SelectionSet};
use crate::task::{EngineEvent, Job, JobKind, TaskId, TaskReport};

/// Work ready to hand to a worker thread.
#[derive(Debug)]
enum Work {
    Create { path: PathBuf, kind: CreateKind },
    Rename { from: PathBuf, to: PathBuf },
    Delete { paths: Vec<PathBuf> },
    Copy { sources: Vec<PathBuf>, dest_dir: PathBuf },
    Move { sources: Vec<PathBuf>, dest_dir: PathBuf },
    CreateArchive { sources: Vec<PathBuf>, dest: PathBuf, options: ArchiveOptions },
    ExtractArchive { archive: PathBuf, dest_dir: PathBuf },
    /// Resolved to the top undo entry when the job starts.
    Undo,
    ApplyInverse { entry_id: u64, inverse: Inverse },
}

/// Clipboard state captured when a paste was submitted.
#[derive(Debug, Clone)]
struct PasteTicket {
    generation: u64,
    mode: ClipboardMode,
    payload: Vec<PathBuf>,
}

/// Bookkeeping for a submitted job.
#[derive(Debug)]
struct TaskState {
    kind: JobKind,
    cancel: CancellationToken,
    paste: Option<PasteTicket>,
}

/// What a worker hands back.
#[derive(Debug)]
enum JobOutput {
    Single(OpResult<OperationRecord>),
    Bulk(BulkOutcome),
    Undo { entry_id: u64, result: OpResult<()> },
}

/// Messages from background tasks to the control thread.
#[derive(Debug)]
enum WorkerMessage {
    Progress {
        task: TaskId,
        progress: OperationProgress,
    },
    Done {
        task: TaskId,
        output: JobOutput,
    },
    Status {
        dir: PathBuf,
        ticket: u64,
        result: Result<StatusMap, StatusError>,
    },
}

/// Reversible file operation engine.
pub struct Engine {
    config: EngineConfig,
    executor: OperationExecutor,
    archives: ArchiveManager,
    undo: UndoManager,
    selection: SelectionSet,
    clipboard: Clipboard,
    status: StatusCache,
    provider: Arc<dyn StatusProvider>,
    scheduler: Scheduler<Work>,
    tasks: HashMap<TaskId, TaskState>,
    next_task: u64,
    status_in_flight: usize,
    events: VecDeque<EngineEvent>,
    tx: mpsc::Sender<WorkerMessage>,
    rx: mpsc::Receiver<WorkerMessage>,
}

impl Engine {
    /// Create an engine, using git for status when enabled.
    pub fn new(config: EngineConfig) -> OpResult<Self> {
        let provider: Arc<dyn StatusProvider> = if config.status_enabled {
            Arc::new(GitStatusProvider::new())
        } else {
            Arc::new(NoStatus)
        };
        Self::with_provider(config, provider)
    }

    /// Create an engine with a custom status provider.
    pub fn with_provider(config: EngineConfig, provider: Arc<dyn StatusProvider>) -> OpResult<Self> {
        let trash = Arc::new(TrashStore::open(&config.trash_root)?);
        let executor = OperationExecutor::new(Arc::clone(&trash));
        let archives = ArchiveManager::new(executor.clone());
        let undo = UndoManager::new(config.undo_capacity, trash);
        let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);

        info!(
            trash_root = %config.trash_root.display(),
            undo_capacity = config.undo_capacity,
            "engine started"
        );

        Ok(Self {
            config,
            executor,
            archives,
            undo,
            selection: SelectionSet::new(),
            clipboard: Clipboard::new(),
            status: StatusCache::new(),
            provider,
            scheduler: Scheduler::new(),
            tasks: HashMap::new(),
            next_task: 1,
            status_in_flight: 0,
            events: VecDeque::new(),
            tx,
            rx,
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The trash store deletions go to.
    pub fn trash(&self) -> &TrashStore {
        self.executor.trash()
    }

    // ------------------------------------------------------------------
    // Selection and clipboard
    // ------------------------------------------------------------------

    /// Enter `dir`, clearing the selection if it belonged elsewhere.
    pub fn navigate(&mut self, dir: impl AsRef<Path>) {
        let dir = normalize_path(dir.as_ref());
        if self.selection.navigate(&dir) {
            debug!(dir = %dir.display(), "selection cleared on navigation");
        }
    }

    /// Flip the selection state of `path`.
    pub fn toggle_select(&mut self, path: impl AsRef<Path>) -> bool {
        self.selection.toggle(normalize_path(path.as_ref()))
    }

    /// Add `path` to the selection.
    pub fn select(&mut self, path: impl AsRef<Path>) {
        self.selection.select(normalize_path(path.as_ref()));
    }

    /// Deselect everything.
    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// The current selection.
    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Capture the selection for a copy-paste.
    pub fn copy_selection(&mut self) -> OpResult<usize> {
        self.capture(ClipboardMode::Copy)
    }

    /// Capture the selection for a cut-paste.
    pub fn cut_selection(&mut self) -> OpResult<usize> {
        self.capture(ClipboardMode::Cut)
    }

    fn capture(&mut self, mode: ClipboardMode) -> OpResult<usize> {
        let payload = self.selection.to_vec();
        let count = payload.len();
        self.clipboard.capture(mode, payload)?;
        debug!(%mode, count, "clipboard captured");
        Ok(count)
    }

    /// The clipboard.
    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Create an empty file or directory.
    pub fn create(&mut self, path: impl AsRef<Path>, kind: CreateKind) -> OpResult<TaskId> {
        self.submit(Job::Create {
            path: path.as_ref().to_path_buf(),
            kind,
        })
    }

    /// Rename `path` to `new_name` within its directory.
    pub fn rename(&mut self, path: impl AsRef<Path>, new_name: &str) -> OpResult<TaskId> {
        validate_filename(new_name)?;
        let from = normalize_path(path.as_ref());
        let to = match from.parent() {
            Some(parent) => parent.join(new_name),
            None => return Err(OpError::invalid_target(&from, "cannot rename the root")),
        };
        self.submit(Job::Rename { from, to })
    }

    /// Trash `paths`.
    pub fn delete(&mut self, paths: Vec<PathBuf>) -> OpResult<TaskId> {
        self.submit(Job::Delete { paths })
    }

    /// Trash the selection.
    pub fn delete_selection(&mut self) -> OpResult<TaskId> {
        let paths = self.selection.to_vec();
        self.submit(Job::Delete { paths })
    }

    /// Paste the clipboard into `dest_dir`.
    pub fn paste(&mut self, dest_dir: impl AsRef<Path>) -> OpResult<TaskId> {
        self.submit(Job::Paste {
            dest_dir: dest_dir.as_ref().to_path_buf(),
        })
    }

    /// Reverse the most recent operation.
    pub fn undo(&mut self) -> OpResult<TaskId> {
        self.submit(Job::Undo)
    }

    /// Pack `sources` into a zip archive at `dest`.
    pub fn create_archive(
        &mut self,
        sources: Vec<PathBuf>,
        dest: impl AsRef<Path>,
        overwrite: bool,
    ) -> OpResult<TaskId> {
        self.submit(Job::CreateArchive {
            sources,
            dest: dest.as_ref().to_path_buf(),
            overwrite,
        })
    }

    /// Unpack `archive` into `dest_dir`.
    pub fn extract_archive(
        &mut self,
        archive: impl AsRef<Path>,
        dest_dir: impl AsRef<Path>,
    ) -> OpResult<TaskId> {
        self.submit(Job::ExtractArchive {
            archive: archive.as_ref().to_path_buf(),
            dest_dir: dest_dir.as_ref().to_path_buf(),
        })
    }

    /// Submit a job.
    ///
    /// Fails synchronously only when there is nothing to act on; every
    /// filesystem outcome arrives later as [`EngineEvent::Finished`].
    pub fn submit(&mut self, job: Job) -> OpResult<TaskId> {
        let kind = job.kind();
        let mut paste = None;

        let (work, claim) = match job {
            Job::Create { path, kind } => {
                let path = normalize_path(&path);
                (Work::Create { path: path.clone(), kind }, Claim::paths(vec![path]))
            }
            Job::Rename { from, to } => {
                let (from, to) = (normalize_path(&from), normalize_path(&to));
                let claim = Claim::paths(vec![from.clone(), to.clone()]);
                (Work::Rename { from, to }, claim)
            }
            Job::Delete { paths } => {
                let paths = normalize_all(paths)?;
                (Work::Delete { paths: paths.clone() }, Claim::paths(paths))
            }
            Job::Copy { sources, dest_dir } => {
                let (sources, dest_dir) = (normalize_all(sources)?, normalize_path(&dest_dir));
                let claim = transfer_claim(&sources, &dest_dir);
                (Work::Copy { sources, dest_dir }, claim)
            }
            Job::Move { sources, dest_dir } => {
                let (sources, dest_dir) = (normalize_all(sources)?, normalize_path(&dest_dir));
                let claim = transfer_claim(&sources, &dest_dir);
                (Work::Move { sources, dest_dir }, claim)
            }
            Job::Paste { dest_dir } => {
                if self.clipboard.is_empty() {
                    return Err(OpError::ClipboardEmpty);
                }
                let ticket = PasteTicket {
                    generation: self.clipboard.generation(),
                    mode: self.clipboard.mode(),
                    payload: self.clipboard.payload().to_vec(),
                };
                let sources = ticket.payload.clone();
                let dest_dir = normalize_path(&dest_dir);
                let claim = transfer_claim(&sources, &dest_dir);
                let work = match ticket.mode {
                    ClipboardMode::Cut => Work::Move { sources, dest_dir },
                    _ => Work::Copy { sources, dest_dir },
                };
                paste = Some(ticket);
                (work, claim)
            }
            Job::CreateArchive {
                sources,
                dest,
                overwrite,
            } => {
                let (sources, dest) = (normalize_all(sources)?, normalize_path(&dest));
                let mut paths = sources.clone();
                paths.push(dest.clone());
                let options = ArchiveOptions {
                    overwrite,
                    compression_level: self.config.compression_level,
                };
                (
                    Work::CreateArchive {
                        sources,
                        dest,
                        options,
                    },
                    Claim::paths(paths),
                )
            }
            Job::ExtractArchive { archive, dest_dir } => {
                let (archive, dest_dir) = (normalize_path(&archive), normalize_path(&dest_dir));
                let claim = Claim::paths(vec![archive.clone(), dest_dir.clone()]);
                (Work::ExtractArchive { archive, dest_dir }, claim)
            }
            Job::Undo => (Work::Undo, Claim::exclusive()),
        };

        let task = TaskId(self.next_task);
        self.next_task += 1;
        self.tasks.insert(
            task,
            TaskState {
                kind,
                cancel: CancellationToken::new(),
                paste,
            },
        );

        debug!(%task, %kind, "job submitted");
        if let Some(work) = self.scheduler.submit(task, claim, work) {
            self.start(task, work);
        }
        Ok(task)
    }

    /// Cancel a job.
    ///
    /// A queued job finishes immediately as cancelled; a running job stops
    /// at the next entry boundary. Returns `false` for unknown tasks.
    pub fn cancel(&mut self, task: TaskId) -> bool {
        if self.scheduler.cancel_queued(task).is_some() {
            if let Some(state) = self.tasks.remove(&task) {
                info!(%task, "queued job cancelled");
                self.events.push_back(EngineEvent::Finished {
                    task,
                    report: TaskReport::cancelled(state.kind),
                });
            }
            return true;
        }

        match self.tasks.get(&task) {
            Some(state) => {
                info!(%task, "cancelling running job");
                state.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Check whether nothing is running, queued or awaiting delivery.
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty() && self.status_in_flight == 0 && self.events.is_empty()
    }

    /// Wait for the next event, applying finished work to engine state.
    ///
    /// Returns `None` once nothing is left in flight.
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if self.tasks.is_empty() && self.status_in_flight == 0 {
                return None;
            }

            let message = self.rx.recv().await?;
            self.handle(message);
        }
    }

    /// Drain events until nothing is left in flight.
    pub async fn run_until_idle(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// List `dir` with selection and cached status applied.
    ///
    /// Without a valid cached status a refresh is started, announced later by
    /// [`EngineEvent::StatusUpdated`].
    pub fn list_directory(&mut self, dir: impl AsRef<Path>) -> OpResult<Vec<Entry>> {
        let dir = normalize_path(dir.as_ref());
        let entries = read_directory(&dir, self.config.show_hidden)?;

        if self.config.status_enabled
            && self.status.get(&dir).is_none()
            && !self.status.is_pending(&dir)
        {
            self.refresh_status(&dir);
        }

        let status = self.status.get(&dir);
        Ok(entries
            .into_iter()
            .map(|entry| {
                let selected = self.selection.is_selected(&entry.path);
                let tag = status.map(|map| map.get(entry.name.as_str()).copied().unwrap_or(StatusTag::None));
                entry.with_selected(selected).with_status(tag)
            })
            .collect())
    }

    /// Query the status provider for `dir` in the background.
    pub fn refresh_status(&mut self, dir: impl AsRef<Path>) {
        let dir = normalize_path(dir.as_ref());
        let ticket = self.status.begin(&dir);
        self.status_in_flight += 1;

        let provider = Arc::clone(&self.provider);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let query_dir = dir.clone();
            let result = tokio::task::spawn_blocking(move || provider.status_of(&query_dir))
                .await
                .unwrap_or_else(|e| {
                    Err(StatusError::Io {
                        path: PathBuf::new(),
                        source: std::io::Error::other(e.to_string()),
                    })
                });
            let _ = tx.send(WorkerMessage::Status { dir, ticket, result }).await;
        });
    }

    /// Cached status for `dir`, if still valid.
    pub fn cached_status(&self, dir: impl AsRef<Path>) -> Option<&StatusMap> {
        self.status.get(&normalize_path(dir.as_ref()))
    }

    /// Undo descriptions, newest first.
    pub fn undo_history(&self) -> Vec<String> {
        self.undo.describe()
    }

    /// The undo stack.
    pub fn undo_stack(&self) -> &UndoManager {
        &self.undo
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn start(&mut self, task: TaskId, work: Work) {
        let work = match work {
            Work::Undo => match self.undo.peek() {
                Some(UndoEntry { id, record }) => Work::ApplyInverse {
                    entry_id: *id,
                    inverse: record.inverse.clone(),
                },
                None => {
                    self.complete(task, JobOutput::Single(Err(OpError::NothingToUndo)));
                    return;
                }
            },
            other => other,
        };

        let Some(state) = self.tasks.get(&task) else {
            return;
        };
        let cancel = state.cancel.clone();
        let executor = self.executor.clone();
        let archives = self.archives.clone();
        let tx = self.tx.clone();

        debug!(%task, "job started");
        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);
            let forward_tx = tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(progress) = progress_rx.recv().await {
                    if forward_tx
                        .send(WorkerMessage::Progress { task, progress })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });

            let progress = ProgressSender::new(progress_tx);
            let output = tokio::task::spawn_blocking(move || {
                run_work(&executor, &archives, work, &cancel, &progress)
            })
            .await
            .unwrap_or_else(|e| {
                JobOutput::Single(Err(OpError::Io {
                    path: PathBuf::new(),
                    source: std::io::Error::other(format!("worker failed: {e}")),
                }))
            });

            let _ = forwarder.await;
            let _ = tx.send(WorkerMessage::Done { task, output }).await;
        });
    }

    fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Progress { task, progress } => {
                self.events.push_back(EngineEvent::Progress { task, progress });
            }
            WorkerMessage::Done { task, output } => self.complete(task, output),
            WorkerMessage::Status { dir, ticket, result } => {
                self.status_in_flight = self.status_in_flight.saturating_sub(1);
                match result {
                    Ok(map) => {
                        if self.status.complete(&dir, ticket, map) {
                            self.events.push_back(EngineEvent::StatusUpdated { dir });
                        }
                    }
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "status query failed");
                        self.status.invalidate(&dir);
                    }
                }
            }
        }
    }

    /// Apply a finished job to engine state and queue its report.
    fn complete(&mut self, task: TaskId, output: JobOutput) {
        let state = self.tasks.remove(&task);
        let kind = state.as_ref().map(|s| s.kind).unwrap_or(JobKind::Undo);

        let report = match output {
            JobOutput::Single(result) => match result {
                Ok(record) => {
                    self.record(&record);
                    TaskReport::new(kind, vec![record], None)
                }
                Err(e) => TaskReport::new(kind, Vec::new(), Some(e)),
            },
            JobOutput::Bulk(outcome) => {
                let cancelled = outcome.cancelled;
                let (records, error) = outcome.into_parts();
                for record in &records {
                    self.record(record);
                }
                if let Some(ticket) = state.as_ref().and_then(|s| s.paste.as_ref()) {
                    self.settle_paste(ticket, &records);
                }
                let mut report = TaskReport::new(kind, records, error);
                report.cancelled = cancelled;
                report
            }
            JobOutput::Undo { entry_id, result } => match result {
                Ok(()) => match self.undo.finish_undo(entry_id) {
                    Some(entry) => {
                        self.touch(entry.record.inverse.touched_paths());
                        self.touch(entry.record.touched_paths());
                        TaskReport::new(kind, vec![entry.record], None)
                    }
                    None => TaskReport::new(kind, Vec::new(), None),
                },
                Err(e) => {
                    warn!(%task, error = %e, "undo failed; history unchanged");
                    TaskReport::new(kind, Vec::new(), Some(e))
                }
            },
        };

        info!(
            %task,
            %kind,
            records = report.records.len(),
            success = report.is_success(),
            "job finished"
        );
        self.events.push_back(EngineEvent::Finished { task, report });

        for (released, work) in self.scheduler.finish(task) {
            self.start(released, work);
        }
    }

    /// Push a record onto the undo stack and apply its side effects.
    fn record(&mut self, record: &OperationRecord) {
        for evicted in self.undo.push(record.clone()) {
            debug!(id = evicted.id, "undo entry evicted");
        }
        self.touch(record.touched_paths());
    }

    /// Invalidate status and forget selected paths that disappeared.
    fn touch(&mut self, paths: Vec<PathBuf>) {
        for path in &paths {
            self.status.invalidate_touching(path);
        }
        let gone: Vec<PathBuf> = paths.into_iter().filter(|p| !path_occupied(p)).collect();
        self.selection.forget(&gone);
    }

    /// Update the clipboard after a paste.
    ///
    /// A cut keeps only the paths that were not moved; a copy is retained.
    fn settle_paste(&mut self, ticket: &PasteTicket, records: &[OperationRecord]) {
        if ticket.mode != ClipboardMode::Cut {
            return;
        }

        let moved: Vec<&PathBuf> = records
            .iter()
            .flat_map(|record| record.pairs.iter().map(|(source, _)| source))
            .collect();
        let remaining: Vec<PathBuf> = ticket
            .payload
            .iter()
            .filter(|path| !moved.contains(path))
            .cloned()
            .collect();

        if !self.clipboard.settle(ticket.generation, remaining) {
            debug!("clipboard replaced during paste; leaving it alone");
        }
    }
}

/// Run one unit of work on a worker thread.
fn run_work(
    executor: &OperationExecutor,
    archives: &ArchiveManager,
    work: Work,
    cancel: &CancellationToken,
    progress: &ProgressSender,
) -> JobOutput {
    match work {
        Work::Create { path, kind } => JobOutput::Single(executor.create(&path, kind)),
        Work::Rename { from, to } => JobOutput::Single(executor.rename(&from, &to)),
        Work::Delete { paths } => JobOutput::Bulk(executor.delete_all(&paths, cancel, progress)),
        Work::Copy { sources, dest_dir } => {
            JobOutput::Bulk(executor.copy_all(&sources, &dest_dir, cancel, progress))
        }
        Work::Move { sources, dest_dir } => {
            JobOutput::Bulk(executor.move_all(&sources, &dest_dir, cancel, progress))
        }
        Work::CreateArchive {
            sources,
            dest,
            options,
        } => JobOutput::Bulk(archives.create_archive(&sources, &dest, &options, cancel, progress)),
        Work::ExtractArchive { archive, dest_dir } => {
            JobOutput::Bulk(archives.extract_archive(&archive, &dest_dir, cancel, progress))
        }
        Work::ApplyInverse { entry_id, inverse } => JobOutput::Undo {
            entry_id,
            result: executor.apply_inverse(&inverse),
        },
        Work::Undo => JobOutput::Single(Err(OpError::NothingToUndo)),
    }
}

fn normalize_all(paths: Vec<PathBuf>) -> OpResult<Vec<PathBuf>> {
    if paths.is_empty() {
        return Err(OpError::NothingSelected);
    }
    Ok(paths.iter().map(|p| normalize_path(p)).collect())
}

fn transfer_claim(sources: &[PathBuf], dest_dir: &Path) -> Claim {
    let mut paths = sources.to_vec();
    paths.push(dest_dir.to_path_buf());
    Claim::paths(paths)
}
