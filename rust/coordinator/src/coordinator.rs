use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use diagnostics_bundle::{
    archive::{self, ArchiveWriter},
    bundle::{Bundle, BundleStatus, BundleType},
    node::{self, NodeDescriptor, NodeIdentity, UrlBuilder},
    store::{self, BundleStore},
};
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{self, NodeClient};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_UNKNOWN_GRACE: Duration = Duration::from_secs(30);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(transparent)]
    Store { source: store::Error },

    #[snafu(display("failed to create archive for cluster bundle {id:?}"))]
    CreateArchive { source: archive::Error, id: String },
}

/// Why one peer ended up FAILED. The rendered chain lands in the cluster
/// bundle's error list.
#[derive(Debug, Snafu)]
enum PeerError {
    #[snafu(display("failed to resolve base url for {ip}"))]
    BaseUrl { source: node::Error, ip: IpAddr },

    #[snafu(display("failed to start bundle on {ip}"))]
    CreatePeer { source: client::Error, ip: IpAddr },

    #[snafu(display("bundle on {ip} ended as {status}"))]
    PeerTerminal { ip: IpAddr, status: BundleStatus },

    #[snafu(display("bundle on {ip} stayed unknown for {grace:?}"))]
    UnknownTimeout { ip: IpAddr, grace: Duration },

    #[snafu(display("bundle on {ip} did not finish within {deadline:?}"))]
    Deadline { ip: IpAddr, deadline: Duration },

    #[snafu(display("failed to create scratch file for {ip}"))]
    Scratch { source: std::io::Error, ip: IpAddr },

    #[snafu(display("failed to download bundle from {ip}"))]
    Download { source: client::Error, ip: IpAddr },

    #[snafu(display("collection from {ip} was canceled"))]
    PeerCanceled { ip: IpAddr },
}

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Interval between status polls against one peer.
    pub poll_interval: Duration,
    /// Overall deadline per peer, create through download.
    pub node_deadline: Duration,
    /// How long a peer may keep reporting Unknown before it is failed.
    pub unknown_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            node_deadline: diagnostics_bundle::builder::DEFAULT_BUNDLE_TIMEOUT,
            unknown_grace: DEFAULT_UNKNOWN_GRACE,
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

struct NodeOutcome {
    node: NodeDescriptor,
    prefix: String,
    result: Result<tempfile::NamedTempFile, PeerError>,
}

/// Drives per-node bundle builds across the cluster and merges the results.
///
/// One task per peer walks CREATE → poll STATUS → download; a single merge
/// task owns the cluster archive and grafts downloaded bundles under
/// `<ip>_<role>/` prefixes as they arrive.
pub struct ClusterCoordinator {
    store: BundleStore,
    client: NodeClient,
    urls: UrlBuilder,
    local: NodeIdentity,
    config: CoordinatorConfig,
    running: Mutex<HashMap<String, RunHandle>>,
}

impl ClusterCoordinator {
    pub fn new(
        store: BundleStore,
        client: NodeClient,
        urls: UrlBuilder,
        local: NodeIdentity,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            client,
            urls,
            local,
            config,
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Reserves `id`, persists the Started record and launches the cluster
    /// build across `nodes`. Conflicts if `id` already exists.
    ///
    /// Must be called within a tokio runtime.
    pub fn create_cluster(
        self: &Arc<Self>,
        id: &str,
        nodes: Vec<NodeDescriptor>,
    ) -> Result<Bundle, Error> {
        self.running
            .lock()
            .unwrap()
            .retain(|_, handle| !handle.task.is_finished());
        self.store.reserve(id)?;
        let bundle = Bundle::new(id, BundleType::Cluster);
        self.store.write_state(&bundle)?;
        let writer = ArchiveWriter::create(&self.store.archive_path(id), self.local.clone())
            .context(CreateArchiveSnafu { id })?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(
            bundle.clone(),
            writer,
            nodes,
            cancel.clone(),
        ));
        self.running
            .lock()
            .unwrap()
            .insert(id.to_string(), RunHandle { cancel, task });
        Ok(bundle)
    }

    /// Cancels a running cluster build and waits briefly for it to wind
    /// down. Returns whether a build was actually running.
    pub async fn stop(&self, id: &str) -> bool {
        let handle = self.running.lock().unwrap().remove(id);
        let Some(handle) = handle else {
            return false;
        };
        let was_running = !handle.task.is_finished();
        handle.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, handle.task)
            .await
            .is_err()
        {
            tracing::warn!(bundle.id = %id, "cluster build ignored cancellation");
        }
        was_running
    }

    async fn run(
        self: Arc<Self>,
        mut bundle: Bundle,
        writer: ArchiveWriter,
        nodes: Vec<NodeDescriptor>,
        cancel: CancellationToken,
    ) {
        let id = bundle.id.clone();
        bundle.status = BundleStatus::InProgress;
        self.persist(&bundle);

        let errors = Arc::new(Mutex::new(Vec::<String>::new()));
        let work = cancel.child_token();
        let (tx, rx) = mpsc::channel::<NodeOutcome>(nodes.len().max(1));

        let mut prefixes = HashMap::new();
        for node in &nodes {
            tokio::spawn(Arc::clone(&self).drive_node(
                node.clone(),
                unique_prefix(&mut prefixes, node.archive_prefix()),
                id.clone(),
                tx.clone(),
                work.clone(),
            ));
        }
        drop(tx);

        let mut merge_task = tokio::spawn(merge_loop(
            writer,
            rx,
            work.clone(),
            Arc::clone(&errors),
        ));

        let mut was_canceled = false;
        let mut merge_done = None;
        tokio::select! {
            result = &mut merge_task => merge_done = Some(result),
            _ = cancel.cancelled() => was_canceled = true,
        }
        let merge_result = match merge_done {
            Some(result) => flatten_merge(result),
            // the child token is canceled with its parent; the merge task
            // flushes summaries and returns on its own, within the grace
            None => match tokio::time::timeout(SHUTDOWN_GRACE, &mut merge_task).await {
                Ok(result) => flatten_merge(result),
                Err(_) => {
                    merge_task.abort();
                    Err("cluster merge did not stop within the grace period".to_string())
                }
            },
        };
        let merged = match merge_result {
            Ok(merged) => merged,
            Err(error) => {
                tracing::error!(bundle.id = %id, error = %error, "cluster merge failed");
                errors.lock().unwrap().push(error);
                0
            }
        };

        // reclaim the per-node bundles whatever the outcome
        futures::future::join_all(nodes.iter().map(|node| self.cleanup_peer(node, &id))).await;

        bundle.status = if was_canceled {
            BundleStatus::Canceled
        } else if merged > 0 {
            BundleStatus::Done
        } else {
            BundleStatus::Failed
        };
        bundle.stopped_at = Utc::now();
        bundle.errors = errors.lock().unwrap().clone();
        if bundle.status == BundleStatus::Canceled {
            if let Err(error) = self.store.remove_archive(&id) {
                tracing::warn!(
                    bundle.id = %id,
                    error = &error as &dyn std::error::Error,
                    "failed to remove archive of canceled cluster bundle"
                );
            }
            bundle.size = 0;
        } else {
            bundle.size = std::fs::metadata(self.store.archive_path(&id))
                .map(|meta| meta.len())
                .unwrap_or(0);
        }

        match self.store.read_state(&id) {
            Ok(current) if current.status == BundleStatus::Deleted => {
                tracing::debug!(bundle.id = %id, "cluster bundle was deleted mid-build");
            }
            _ => self.persist(&bundle),
        }
        tracing::info!(
            bundle.id = %id,
            bundle.status = %bundle.status,
            merged,
            nodes = nodes.len(),
            "cluster bundle finished"
        );
    }

    async fn drive_node(
        self: Arc<Self>,
        node: NodeDescriptor,
        prefix: String,
        id: String,
        tx: mpsc::Sender<NodeOutcome>,
        cancel: CancellationToken,
    ) {
        let result = self.drive_node_inner(&node, &id, &cancel).await;
        if let Err(error) = &result {
            tracing::warn!(node.ip = %node.ip, error = %error, "peer bundle failed");
        }
        let _ = tx.send(NodeOutcome {
            node,
            prefix,
            result,
        })
        .await;
    }

    /// CREATE → poll STATUS → download, all bounded by the per-node
    /// deadline and the cancellation token. CREATE is never retried; status
    /// polls that fail at transport level are retried by the next tick.
    ///
    /// The peer's local bundle uses a peer-scoped id: the coordinating node
    /// is an ordinary peer of its own cluster bundle, and both records may
    /// live in the same store.
    async fn drive_node_inner(
        &self,
        node: &NodeDescriptor,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<tempfile::NamedTempFile, PeerError> {
        let ip = node.ip;
        let peer_id = peer_bundle_id(id, node);
        let base = self
            .urls
            .base(ip, node.role)
            .context(BaseUrlSnafu { ip })?;
        self.client
            .create(&base, &peer_id, cancel)
            .await
            .context(CreatePeerSnafu { ip })?;

        let deadline = tokio::time::Instant::now() + self.config.node_deadline;
        let mut unknown_since: Option<tokio::time::Instant> = None;
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PeerCanceledSnafu { ip }.fail(),
                _ = poll.tick() => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return DeadlineSnafu {
                    ip,
                    deadline: self.config.node_deadline,
                }
                .fail();
            }
            match self.client.status(&base, &peer_id, cancel).await {
                Ok(observed) => match observed.status {
                    BundleStatus::Done => break,
                    BundleStatus::Started | BundleStatus::InProgress => {
                        unknown_since = None;
                    }
                    BundleStatus::Unknown => {
                        let since = *unknown_since
                            .get_or_insert_with(tokio::time::Instant::now);
                        if since.elapsed() >= self.config.unknown_grace {
                            return UnknownTimeoutSnafu {
                                ip,
                                grace: self.config.unknown_grace,
                            }
                            .fail();
                        }
                    }
                    status @ (BundleStatus::Canceled
                    | BundleStatus::Failed
                    | BundleStatus::Deleted) => {
                        return PeerTerminalSnafu { ip, status }.fail();
                    }
                },
                Err(error) => {
                    tracing::debug!(node.ip = %ip, error = %error, "status poll failed")
                }
            }
        }

        let scratch = tempfile::NamedTempFile::new_in(self.store.bundle_dir(id))
            .context(ScratchSnafu { ip })?;
        self.client
            .get_file(&base, &peer_id, scratch.path(), cancel)
            .await
            .context(DownloadSnafu { ip })?;
        Ok(scratch)
    }

    async fn cleanup_peer(&self, node: &NodeDescriptor, id: &str) {
        let Ok(base) = self.urls.base(node.ip, node.role) else {
            return;
        };
        let peer_id = peer_bundle_id(id, node);
        let cancel = CancellationToken::new();
        match tokio::time::timeout(
            CLEANUP_TIMEOUT,
            self.client.delete(&base, &peer_id, &cancel),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(
                node.ip = %node.ip,
                error = %error,
                "failed to delete bundle on peer"
            ),
            Err(_) => {
                tracing::warn!(node.ip = %node.ip, "timed out deleting bundle on peer")
            }
        }
    }

    fn persist(&self, bundle: &Bundle) {
        if let Err(error) = self.store.write_state(bundle) {
            tracing::error!(
                bundle.id = %bundle.id,
                error = &error as &dyn std::error::Error,
                "failed to persist cluster bundle state"
            );
        }
    }
}

/// Id of the local bundle driven on one peer, scoped by the peer's address
/// so it never collides with the cluster bundle of the same name in a
/// shared store (IPv6 colons are flattened to keep the id one safe path
/// segment).
fn peer_bundle_id(cluster_id: &str, node: &NodeDescriptor) -> String {
    format!("{cluster_id}-{}", node.ip.to_string().replace(':', "_"))
}

/// Two nodes sharing one ip (a configuration error) must not collide inside
/// the archive; the later one gets a numeric suffix.
fn unique_prefix(prefixes: &mut HashMap<String, u32>, prefix: String) -> String {
    match prefixes.get_mut(&prefix) {
        None => {
            prefixes.insert(prefix.clone(), 0);
            prefix
        }
        Some(n) => {
            *n += 1;
            format!("{prefix}-{n}")
        }
    }
}

async fn merge_loop(
    mut writer: ArchiveWriter,
    mut rx: mpsc::Receiver<NodeOutcome>,
    cancel: CancellationToken,
    errors: Arc<Mutex<Vec<String>>>,
) -> Result<usize, archive::Error> {
    let mut merged = 0usize;
    loop {
        let outcome = tokio::select! {
            outcome = rx.recv() => outcome,
            _ = cancel.cancelled() => break,
        };
        let Some(NodeOutcome {
            node,
            prefix,
            result,
        }) = outcome
        else {
            break;
        };
        match result {
            Ok(scratch) => match writer.graft(&prefix, scratch.path()) {
                Ok(entries) => {
                    merged += 1;
                    tracing::info!(node.ip = %node.ip, entries, "merged peer bundle");
                }
                // partial data already grafted stays in the archive
                Err(error) => errors.lock().unwrap().push(format!(
                    "failed to merge bundle from {}: {}",
                    node.ip,
                    error_chain(&error)
                )),
            },
            Err(error) => errors.lock().unwrap().push(error_chain(&error)),
        }
    }
    rx.close();
    let errors = errors.lock().unwrap().clone();
    writer.finish(&errors)?;
    Ok(merged)
}

fn flatten_merge(
    result: Result<Result<usize, archive::Error>, tokio::task::JoinError>,
) -> Result<usize, String> {
    match result {
        Ok(Ok(merged)) => Ok(merged),
        Ok(Err(error)) => Err(error_chain(&error)),
        Err(join_error) => Err(format!("cluster merge panicked: {join_error}")),
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    std::iter::successors(Some(error), |error| error.source())
        .map(|error| error.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
