use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use snafu::{ensure, ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    archive::{self, ArchiveWriter},
    bundle::{Bundle, BundleStatus, BundleType},
    collector::{Collected, Collector, Error as CollectorError},
    node::NodeIdentity,
    store::{self, BundleStore},
};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BUNDLE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// How long stragglers get after cancellation before they are abandoned.
/// They cannot corrupt the archive once the writer has stopped receiving.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(transparent)]
    Store { source: store::Error },

    #[snafu(display("failed to create archive for bundle {id:?}"))]
    CreateArchive { source: archive::Error, id: String },

    #[snafu(display("bundle {id:?} has no readable archive"))]
    NoArchive { id: String },

    #[snafu(display("failed to open archive for bundle {id:?}"))]
    OpenArchive { source: std::io::Error, id: String },
}

#[derive(Clone, Debug)]
pub struct BuilderConfig {
    /// Concurrent collector tasks per bundle.
    pub workers: usize,
    /// Overall deadline for one bundle build.
    pub bundle_timeout: Duration,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            bundle_timeout: DEFAULT_BUNDLE_TIMEOUT,
        }
    }
}

/// Collector completion ratio, safe for concurrent reads. Monotonically
/// non-decreasing over a bundle's lifetime.
pub struct Progress {
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    total: usize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            total,
        }
    }

    fn complete_one(&self, succeeded: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed.load(Ordering::Relaxed) as f64 / self.total as f64
        }
    }

    fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }
}

struct RunHandle {
    cancel: CancellationToken,
    progress: Arc<Progress>,
    task: tokio::task::JoinHandle<()>,
}

struct CollectorOutcome {
    name: String,
    optional: bool,
    result: Result<Collected, CollectorError>,
}

/// Builds local diagnostics bundles.
///
/// `create` returns as soon as the bundle is reserved and its initial state
/// is persisted; the build itself runs on a spawned task: `workers` tasks
/// drain the collector queue and hand named streams to a single writer task
/// that owns the archive, while the creating task supervises the deadline.
pub struct BundleBuilder {
    store: BundleStore,
    node: NodeIdentity,
    config: BuilderConfig,
    running: Mutex<HashMap<String, RunHandle>>,
}

impl BundleBuilder {
    pub fn new(store: BundleStore, node: NodeIdentity, config: BuilderConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            node,
            config,
            running: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &BundleStore {
        &self.store
    }

    /// Reserves `id`, persists the Started record, creates the archive file
    /// and launches the build task. Conflicts if `id` already exists.
    ///
    /// Must be called within a tokio runtime.
    pub fn create(
        self: &Arc<Self>,
        id: &str,
        collectors: Vec<Box<dyn Collector>>,
    ) -> Result<Bundle, Error> {
        self.prune_finished();
        self.store.reserve(id)?;
        let bundle = Bundle::new(id, BundleType::Local);
        self.store.write_state(&bundle)?;
        // the archive exists from the very first observation, so a bundle
        // seen as Started is never demoted to Unknown
        let writer = ArchiveWriter::create(&self.store.archive_path(id), self.node.clone())
            .context(CreateArchiveSnafu { id })?;

        let cancel = CancellationToken::new();
        let progress = Arc::new(Progress::new(collectors.len()));
        let task = tokio::spawn(Arc::clone(self).run(
            bundle.clone(),
            writer,
            collectors,
            cancel.clone(),
            Arc::clone(&progress),
        ));
        self.running.lock().unwrap().insert(
            id.to_string(),
            RunHandle {
                cancel,
                progress,
                task,
            },
        );
        Ok(bundle)
    }

    pub fn get(&self, id: &str) -> Result<Bundle, Error> {
        Ok(self.store.get(id)?)
    }

    pub fn list(&self) -> Result<Vec<Bundle>, Error> {
        Ok(self.store.list()?)
    }

    /// Opens the archive for streaming. Only Done bundles have a readable
    /// archive.
    pub async fn open_archive(&self, id: &str) -> Result<(Bundle, tokio::fs::File), Error> {
        let bundle = self.store.get(id)?;
        ensure!(bundle.status == BundleStatus::Done, NoArchiveSnafu { id });
        let file = tokio::fs::File::open(self.store.archive_path(id))
            .await
            .context(OpenArchiveSnafu { id })?;
        Ok((bundle, file))
    }

    /// Deletes the bundle, canceling a still-running build first and
    /// waiting for it to wind down so the tombstone is written last. The
    /// bool is false when the bundle was already Canceled or Deleted and
    /// nothing changed. `force` additionally tombstones a Canceled record,
    /// for callers that just canceled a sibling build of the same id.
    pub async fn delete(&self, id: &str, force: bool) -> Result<(Bundle, bool), Error> {
        let handle = self.running.lock().unwrap().remove(id);
        // a stale handle for a finished task is not a running build
        let force = force || handle.as_ref().is_some_and(|handle| !handle.task.is_finished());
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle.task).await.is_err() {
                tracing::warn!(bundle.id = %id, "build task ignored cancellation");
            }
        }
        Ok(self.store.delete(id, force)?)
    }

    /// Signals a running build to stop; no-op for terminal bundles.
    pub fn cancel(&self, id: &str) {
        if let Some(handle) = self.running.lock().unwrap().get(id) {
            handle.cancel.cancel();
        }
    }

    /// Completion fraction of a currently running build.
    pub fn progress(&self, id: &str) -> Option<f64> {
        self.running
            .lock()
            .unwrap()
            .get(id)
            .map(|handle| handle.progress.fraction())
    }

    fn prune_finished(&self) {
        self.running
            .lock()
            .unwrap()
            .retain(|_, handle| !handle.task.is_finished());
    }

    async fn run(
        self: Arc<Self>,
        mut bundle: Bundle,
        writer: ArchiveWriter,
        collectors: Vec<Box<dyn Collector>>,
        cancel: CancellationToken,
        progress: Arc<Progress>,
    ) {
        let id = bundle.id.clone();
        bundle.status = BundleStatus::InProgress;
        self.persist(&bundle);

        let errors = Arc::new(Mutex::new(Vec::<String>::new()));
        let work = cancel.child_token();
        let queue = Arc::new(Mutex::new(VecDeque::from(collectors)));
        let (tx, rx) = mpsc::channel::<CollectorOutcome>(self.config.workers.max(1));

        for _ in 0..self.config.workers.max(1) {
            tokio::spawn(worker_loop(
                Arc::clone(&queue),
                tx.clone(),
                work.clone(),
            ));
        }
        drop(tx);

        let mut writer_task = tokio::spawn(write_loop(
            writer,
            rx,
            work.clone(),
            Arc::clone(&errors),
            Arc::clone(&progress),
        ));

        let mut timed_out = false;
        let mut was_canceled = false;
        let mut writer_done = None;
        tokio::select! {
            result = &mut writer_task => writer_done = Some(result),
            _ = tokio::time::sleep(self.config.bundle_timeout) => timed_out = true,
            _ = cancel.cancelled() => was_canceled = true,
        }
        let write_result = match writer_done {
            Some(result) => flatten_writer(result),
            None => {
                if timed_out {
                    errors.lock().unwrap().push(format!(
                        "bundle build timed out after {:?}",
                        self.config.bundle_timeout
                    ));
                }
                work.cancel();
                await_with_grace(&mut writer_task).await
            }
        };
        let writer_failed = if let Err(error) = write_result {
            tracing::error!(bundle.id = %id, error = %error, "archive writer failed");
            errors.lock().unwrap().push(error);
            true
        } else {
            false
        };

        let all_failed = progress.total > 0 && progress.succeeded() == 0;
        bundle.status = if was_canceled {
            BundleStatus::Canceled
        } else if timed_out || writer_failed || all_failed {
            BundleStatus::Failed
        } else {
            BundleStatus::Done
        };
        bundle.stopped_at = Utc::now();
        bundle.errors = errors.lock().unwrap().clone();
        if bundle.status == BundleStatus::Canceled {
            if let Err(error) = self.store.remove_archive(&id) {
                tracing::warn!(
                    bundle.id = %id,
                    error = &error as &dyn std::error::Error,
                    "failed to remove archive of canceled bundle"
                );
            }
            bundle.size = 0;
        } else {
            bundle.size = std::fs::metadata(self.store.archive_path(&id))
                .map(|meta| meta.len())
                .unwrap_or(0);
        }

        // a concurrent delete owns the terminal record
        match self.store.read_state(&id) {
            Ok(current) if current.status == BundleStatus::Deleted => {
                tracing::debug!(bundle.id = %id, "bundle was deleted mid-build");
            }
            _ => self.persist(&bundle),
        }
        tracing::info!(
            bundle.id = %id,
            bundle.status = %bundle.status,
            bundle.size = bundle.size,
            "bundle build finished"
        );
    }

    fn persist(&self, bundle: &Bundle) {
        if let Err(error) = self.store.write_state(bundle) {
            tracing::error!(
                bundle.id = %bundle.id,
                error = &error as &dyn std::error::Error,
                "failed to persist bundle state"
            );
        }
    }
}

async fn worker_loop(
    queue: Arc<Mutex<VecDeque<Box<dyn Collector>>>>,
    tx: mpsc::Sender<CollectorOutcome>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let collector = queue.lock().unwrap().pop_front();
        let Some(collector) = collector else { break };
        let outcome = CollectorOutcome {
            name: collector.name().to_string(),
            optional: collector.optional(),
            result: collector.collect(&cancel).await,
        };
        if tx.send(outcome).await.is_err() {
            // writer is gone, nothing left to produce for
            break;
        }
    }
}

async fn write_loop(
    mut writer: ArchiveWriter,
    mut rx: mpsc::Receiver<CollectorOutcome>,
    cancel: CancellationToken,
    errors: Arc<Mutex<Vec<String>>>,
    progress: Arc<Progress>,
) -> Result<(), archive::Error> {
    loop {
        let outcome = tokio::select! {
            outcome = rx.recv() => outcome,
            _ = cancel.cancelled() => break,
        };
        let Some(CollectorOutcome {
            name,
            optional,
            result,
        }) = outcome
        else {
            break;
        };
        match result {
            Ok(collected) => {
                match writer
                    .add_entry(&name, collected.gzip_encoded, collected.stream)
                    .await
                {
                    Ok(_) => progress.complete_one(true),
                    Err(error @ archive::Error::EntryStream { .. }) => {
                        record_failure(&errors, optional, &name, &error);
                        progress.complete_one(false);
                    }
                    // the archive itself is broken, give up on the bundle
                    Err(error) => return Err(error),
                }
            }
            Err(error) => {
                record_failure(&errors, optional, &name, &error);
                progress.complete_one(false);
            }
        }
    }
    // close the channel so stragglers lose their handle on the writer
    rx.close();
    let errors = errors.lock().unwrap().clone();
    writer.finish(&errors)
}

fn record_failure(
    errors: &Mutex<Vec<String>>,
    optional: bool,
    name: &str,
    error: &(dyn std::error::Error + 'static),
) {
    if optional {
        tracing::warn!(
            collector.name = %name,
            error,
            "optional collector failed"
        );
    } else {
        tracing::warn!(collector.name = %name, error, "collector failed");
        errors.lock().unwrap().push(format!("{name}: {error}"));
    }
}

fn flatten_writer(
    result: Result<Result<(), archive::Error>, tokio::task::JoinError>,
) -> Result<(), String> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(error.to_string()),
        Err(join_error) => Err(format!("archive writer panicked: {join_error}")),
    }
}

async fn await_with_grace(
    task: &mut tokio::task::JoinHandle<Result<(), archive::Error>>,
) -> Result<(), String> {
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut *task).await {
        Ok(result) => flatten_writer(result),
        Err(_) => {
            task.abort();
            Err("archive writer did not stop within the grace period".to_string())
        }
    }
}
