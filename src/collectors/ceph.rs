use super::paths::VAR_RUN_CEPH;
use crate::remote::commands;
use crate::remote::RemoteSession;
use crate::state::{CephInfo, ClusterMetadata, OsdInfo, PathTree, SocketInfo};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const DEFAULT_CLUSTER_NAME: &str = "ceph";
const ADMIN_SOCKET_SUFFIX: &str = ".asok";

pub async fn collect_ceph_info(session: &dyn RemoteSession) -> CephInfo {
    CephInfo {
        version: commands::ceph_version(session).await,
        installed: commands::ceph_is_installed(session).await,
        ..CephInfo::default()
    }
}

/// Admin sockets found while walking `/var/run/ceph`.
pub fn admin_sockets(paths: &PathTree) -> Vec<&str> {
    paths
        .get(VAR_RUN_CEPH)
        .map(|run| {
            run.files
                .keys()
                .map(String::as_str)
                .filter(|path| path.ends_with(ADMIN_SOCKET_SUFFIX))
                .collect()
        })
        .unwrap_or_default()
}

pub async fn collect_socket_info(
    session: &dyn RemoteSession,
    paths: &PathTree,
) -> BTreeMap<String, SocketInfo> {
    let mut sockets = BTreeMap::new();
    for socket in admin_sockets(paths) {
        let info = SocketInfo {
            version: commands::ceph_socket_version(session, socket).await,
            config: commands::daemon_socket_config(session, socket).await,
        };
        sockets.insert(socket.to_string(), info);
    }
    sockets
}

pub async fn collect_ceph_osd_info(session: &dyn RemoteSession, cluster_name: &str) -> OsdInfo {
    OsdInfo {
        dump: commands::ceph_osd_dump(session, cluster_name).await,
    }
}

pub async fn collect_cluster(session: &dyn RemoteSession, cluster_name: &str) -> ClusterMetadata {
    debug!(host = %session.hostname(), cluster = cluster_name, "collecting cluster status");
    ClusterMetadata {
        status: commands::ceph_status(session, cluster_name).await,
    }
}

pub async fn resolve_cluster_name(session: &dyn RemoteSession) -> String {
    let entries = commands::list_etc_ceph(session).await;
    infer_cluster_name(&entries)
}

/// `ceph.conf` wins; otherwise the last `*.conf` in `/etc/ceph` names the
/// cluster.
pub fn infer_cluster_name(entries: &[String]) -> String {
    if entries.iter().any(|entry| entry == "ceph.conf") {
        return DEFAULT_CLUSTER_NAME.to_string();
    }
    warn!("/etc/ceph/ceph.conf was not found, will try to infer the cluster name");
    match entries.iter().rev().find_map(|entry| entry.strip_suffix(".conf")) {
        Some(name) if !name.is_empty() => {
            warn!(cluster = name, "inferred cluster name");
            name.to_string()
        }
        _ => DEFAULT_CLUSTER_NAME.to_string(),
    }
}
