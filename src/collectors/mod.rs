//! Host fan-out: one task per (role, host), bounded by `concurrency`, each
//! owning its own session. Results flow back to a single aggregator that is
//! the only writer of the [`SnapshotStore`].

pub mod ceph;
pub mod paths;

use crate::inventory::{HostRef, Role};
use crate::remote::{Connector, RemoteSession};
use crate::reporter::{ConnectionStatus, Reporter};
use crate::state::{ClusterMetadata, HostMetadata, SnapshotStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, OnceCell, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const INTERRUPTED: &str = "interrupted";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("all {attempted} configured hosts failed to connect, cannot run any checks")]
    AllHostsUnreachable { attempted: usize },
    #[error("collection was interrupted before any host could be collected")]
    Interrupted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub attempted: usize,
    pub collected: usize,
    pub failed: usize,
    pub interrupted: usize,
    pub elapsed: Duration,
    /// Whether a monitor returned cluster status.
    pub cluster_status: bool,
}

impl CollectionSummary {
    pub fn is_degraded(&self) -> bool {
        self.failed + self.interrupted > 0
    }
}

#[derive(Debug)]
enum HostOutcome {
    Collected {
        metadata: HostMetadata,
        cluster: Option<ClusterMetadata>,
    },
    Unreachable(String),
    Interrupted,
}

/// State shared by every host task of one collection.
struct HostContext {
    connector: Arc<dyn Connector>,
    session_timeout: Duration,
    cluster_name: OnceCell<String>,
    cluster_claimed: AtomicBool,
}

impl HostContext {
    /// True for exactly one caller per collection.
    fn claim_cluster(&self) -> bool {
        self.cluster_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct Collector {
    connector: Arc<dyn Connector>,
    concurrency: usize,
    session_timeout: Duration,
    cluster_name: Option<String>,
}

impl Collector {
    pub fn new(
        connector: Arc<dyn Connector>,
        concurrency: usize,
        session_timeout: Duration,
        cluster_name: Option<String>,
    ) -> Self {
        Self {
            connector,
            concurrency: concurrency.max(1),
            session_timeout,
            cluster_name,
        }
    }

    /// Contacts every host in `store.nodes` and merges what was gathered.
    ///
    /// Hosts that cannot be reached are pruned from the inventory and listed
    /// in `failed_hosts`. Only a collection where every attempted host failed
    /// is an error.
    pub async fn collect(
        &self,
        store: &mut SnapshotStore,
        reporter: &mut dyn Reporter,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CollectionSummary, CollectError> {
        let started = Instant::now();
        let context = Arc::new(HostContext {
            connector: Arc::clone(&self.connector),
            session_timeout: self.session_timeout,
            cluster_name: OnceCell::new_with(self.cluster_name.clone()),
            cluster_claimed: AtomicBool::new(false),
        });
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        reporter.raw("collecting remote node information");
        let mut pending: Vec<(Role, String, JoinHandle<HostOutcome>)> = Vec::new();
        for (role, hosts) in &store.nodes {
            for host in hosts {
                let handle = tokio::spawn(host_task(
                    Arc::clone(&context),
                    Arc::clone(&semaphore),
                    shutdown.clone(),
                    *role,
                    host.clone(),
                ));
                pending.push((*role, host.host.clone(), handle));
            }
        }

        let mut summary = CollectionSummary {
            attempted: pending.len(),
            ..CollectionSummary::default()
        };
        for (role, hostname, handle) in pending {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(host = %hostname, role = %role, error = %err, "collection task failed");
                    HostOutcome::Unreachable(format!("collection task failed: {err}"))
                }
            };
            match outcome {
                HostOutcome::Collected { metadata, cluster } => {
                    if let Some(cluster) = cluster {
                        if !store.set_cluster_if_empty(cluster) {
                            debug!(host = %hostname, "cluster data already present, discarding");
                        }
                    }
                    if store.insert_host(role, &hostname, metadata) {
                        reporter.host_connection(&hostname, ConnectionStatus::Connected);
                    } else {
                        debug!(host = %hostname, role = %role, "host failed under another role, dropping its metadata");
                    }
                }
                HostOutcome::Unreachable(reason) => {
                    summary.failed += 1;
                    reporter.host_connection(&hostname, ConnectionStatus::Failed(&reason));
                    store.record_failure(&hostname, reason);
                }
                HostOutcome::Interrupted => {
                    summary.interrupted += 1;
                    reporter.host_connection(&hostname, ConnectionStatus::Interrupted);
                    store.record_failure(&hostname, INTERRUPTED);
                }
            }
        }

        // A host collected under one role may have been pruned by a failure
        // under another, so count what actually survived.
        summary.collected = store.hosts.values().map(BTreeMap::len).sum();
        store.cluster_name = context
            .cluster_name
            .get()
            .cloned()
            .unwrap_or_else(|| ceph::DEFAULT_CLUSTER_NAME.to_string());
        summary.elapsed = started.elapsed();
        summary.cluster_status = store.cluster.is_some();
        if !summary.cluster_status && summary.collected > 0 {
            warn!("no monitor returned cluster status, cluster health checks have no data");
        }

        if summary.attempted > 0 && summary.collected == 0 {
            reporter.raw("Collection failed!");
            if summary.interrupted > 0 {
                return Err(CollectError::Interrupted);
            }
            return Err(CollectError::AllHostsUnreachable {
                attempted: summary.attempted,
            });
        }
        if summary.is_degraded() {
            warn!(
                failed = summary.failed,
                interrupted = summary.interrupted,
                "collection completed with some failed connections"
            );
            reporter.raw("Collection completed with some failed connections");
        } else {
            info!(
                hosts = summary.collected,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "collection completed"
            );
            reporter.raw("Collection completed!");
        }
        Ok(summary)
    }
}

async fn host_task(
    context: Arc<HostContext>,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    role: Role,
    host: HostRef,
) -> HostOutcome {
    let mut interrupt = shutdown.clone();
    let interrupted = async move {
        // A dropped sender means no interrupt will ever come.
        if interrupt.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(interrupted);

    let _permit = tokio::select! {
        permit = semaphore.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return HostOutcome::Interrupted,
        },
        _ = &mut interrupted => return skipped(role, &host),
    };
    if *shutdown.borrow() {
        return HostOutcome::Interrupted;
    }
    // Connecting and gathering share one budget.
    let deadline = tokio::time::Instant::now() + context.session_timeout;

    debug!(host = %host.host, role = %role, "attempting connection");
    let session = tokio::select! {
        connected = tokio::time::timeout_at(deadline, context.connector.connect(&host)) => match connected {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                warn!(host = %host.host, role = %role, error = %err, "connection failed");
                return HostOutcome::Unreachable(err.to_string());
            }
            Err(_) => return timed_out(&context, role, &host),
        },
        _ = &mut interrupted => return skipped(role, &host),
    };

    let outcome = tokio::select! {
        gathered = tokio::time::timeout_at(deadline, collect_host(&context, role, session.as_ref())) => {
            match gathered {
                Ok(outcome) => outcome,
                Err(_) => timed_out(&context, role, &host),
            }
        }
        _ = &mut interrupted => skipped(role, &host),
    };
    // The session is released on every path once connected, so no ssh
    // control master outlives the run.
    if tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await.is_err() {
        warn!(host = %host.host, role = %role, "releasing the session timed out");
    }
    outcome
}

fn timed_out(context: &HostContext, role: Role, host: &HostRef) -> HostOutcome {
    warn!(host = %host.host, role = %role, "host collection timed out");
    HostOutcome::Unreachable(format!(
        "timed out after {}",
        humantime::format_duration(context.session_timeout)
    ))
}

fn skipped(role: Role, host: &HostRef) -> HostOutcome {
    info!(host = %host.host, role = %role, "skipping host after interrupt");
    HostOutcome::Interrupted
}

async fn collect_host(context: &HostContext, role: Role, session: &dyn RemoteSession) -> HostOutcome {
    let cluster_name = context
        .cluster_name
        .get_or_init(|| ceph::resolve_cluster_name(session))
        .await
        .clone();

    let metadata = get_node_metadata(session, &cluster_name).await;
    // Monitors are the hosts most likely to hold admin credentials.
    let cluster = if role == Role::Mon && context.claim_cluster() {
        Some(ceph::collect_cluster(session, &cluster_name).await)
    } else {
        None
    };
    HostOutcome::Collected { metadata, cluster }
}

pub async fn get_node_metadata(session: &dyn RemoteSession, cluster_name: &str) -> HostMetadata {
    let host = session.hostname().to_string();
    debug!(host = %host, "collecting paths");
    let paths = paths::collect_paths(session).await;

    debug!(host = %host, "collecting ceph information");
    let mut ceph_info = ceph::collect_ceph_info(session).await;
    ceph_info.sockets = ceph::collect_socket_info(session, &paths).await;
    ceph_info.osd = ceph::collect_ceph_osd_info(session, cluster_name).await;

    HostMetadata {
        paths,
        network: BTreeMap::new(),
        devices: BTreeMap::new(),
        ceph: ceph_info,
    }
}
