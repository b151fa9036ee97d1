use crate::inventory::{HostRef, NodeInventory, Role};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything collected during one run. Built from the inventory, filled by
/// the collector and only read while checks execute.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    /// Hosts that should be contacted, per role. Hosts that failed to connect
    /// are pruned from every role.
    pub nodes: NodeInventory,
    /// Collected metadata, per role and hostname.
    pub hosts: BTreeMap<Role, BTreeMap<String, HostMetadata>>,
    pub failed_hosts: BTreeMap<String, String>,
    pub cluster: Option<ClusterMetadata>,
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HostMetadata {
    pub paths: PathTree,
    pub network: BTreeMap<String, Value>,
    pub devices: BTreeMap<String, Value>,
    pub ceph: CephInfo,
}

/// Root path of interest -> everything found beneath it.
pub type PathTree = BTreeMap<String, PathMetadata>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PathMetadata {
    pub dirs: BTreeMap<String, StatInfo>,
    pub files: BTreeMap<String, StatInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatInfo {
    Stat(FileStat),
    Exception(ExceptionInfo),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileStat {
    pub owner: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mode: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub contents: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionInfo {
    pub name: String,
    pub repr: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CephInfo {
    pub version: Option<String>,
    pub installed: bool,
    pub sockets: BTreeMap<String, SocketInfo>,
    pub osd: OsdInfo,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SocketInfo {
    pub version: Value,
    pub config: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OsdInfo {
    pub dump: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterMetadata {
    pub status: Value,
}

impl StatInfo {
    pub fn stat(&self) -> Option<&FileStat> {
        match self {
            StatInfo::Stat(stat) => Some(stat),
            StatInfo::Exception(_) => None,
        }
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        match self {
            StatInfo::Stat(_) => None,
            StatInfo::Exception(err) => Some(err),
        }
    }

    pub fn contents(&self) -> Option<&str> {
        self.stat().and_then(|s| s.contents.as_deref())
    }
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        self.mode & 0o170000 == 0o100000
    }
}

impl HostMetadata {
    /// Files collected under one of the roots of interest.
    pub fn files(&self, root: &str) -> Option<&BTreeMap<String, StatInfo>> {
        self.paths.get(root).map(|p| &p.files)
    }

    pub fn dirs(&self, root: &str) -> Option<&BTreeMap<String, StatInfo>> {
        self.paths.get(root).map(|p| &p.dirs)
    }
}

impl SnapshotStore {
    pub fn new(nodes: NodeInventory) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    /// Records collected metadata. A host that already failed under any role
    /// is never inserted.
    pub fn insert_host(&mut self, role: Role, hostname: &str, metadata: HostMetadata) -> bool {
        if self.failed_hosts.contains_key(hostname) {
            return false;
        }
        self.hosts
            .entry(role)
            .or_default()
            .insert(hostname.to_string(), metadata);
        true
    }

    /// Marks a host unreachable and prunes it from every role, so it can
    /// neither be checked nor counted.
    pub fn record_failure(&mut self, hostname: &str, reason: impl Into<String>) {
        for hosts in self.nodes.values_mut() {
            hosts.retain(|h| h.host != hostname);
        }
        for hosts in self.hosts.values_mut() {
            hosts.remove(hostname);
        }
        self.failed_hosts.insert(hostname.to_string(), reason.into());
    }

    /// Stores cluster data unless some earlier monitor already provided it.
    pub fn set_cluster_if_empty(&mut self, cluster: ClusterMetadata) -> bool {
        if self.cluster.is_some() {
            return false;
        }
        self.cluster = Some(cluster);
        true
    }

    pub fn role_hosts(&self, role: Role) -> Option<&BTreeMap<String, HostMetadata>> {
        self.hosts.get(&role).filter(|hosts| !hosts.is_empty())
    }

    pub fn host(&self, role: Role, hostname: &str) -> Option<&HostMetadata> {
        self.hosts.get(&role).and_then(|hosts| hosts.get(hostname))
    }

    pub fn collected_count(&self, role: Role) -> usize {
        self.hosts.get(&role).map_or(0, BTreeMap::len)
    }

    /// Every (role, host) pair in the inventory. A host acting as two roles
    /// counts twice, matching how checks run once per role.
    pub fn total_hosts(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    /// Each collected host alongside its metadata, walking `nodes` so that
    /// only hosts still in the inventory show up.
    pub fn collected_nodes(&self) -> impl Iterator<Item = (Role, &HostRef, &HostMetadata)> {
        self.nodes.iter().flat_map(move |(role, hosts)| {
            hosts
                .iter()
                .filter_map(move |h| self.host(*role, &h.host).map(|data| (*role, h, data)))
        })
    }

    pub fn cluster_conf_path(&self) -> String {
        format!("/etc/ceph/{}.conf", self.cluster_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(nodes: &[(Role, &[&str])]) -> SnapshotStore {
        let inventory = nodes
            .iter()
            .map(|(role, hosts)| (*role, hosts.iter().map(|h| HostRef::new(*h)).collect()))
            .collect();
        SnapshotStore::new(inventory)
    }

    #[test]
    fn failure_prunes_host_from_every_role() {
        let mut store = store_with(&[(Role::Mon, &["node1", "node2"]), (Role::Osd, &["node1"])]);
        store.insert_host(Role::Osd, "node1", HostMetadata::default());
        store.record_failure("node1", "connection refused");

        assert_eq!(store.total_hosts(), 1);
        assert!(store.host(Role::Osd, "node1").is_none());
        assert!(!store.insert_host(Role::Mon, "node1", HostMetadata::default()));
        assert_eq!(store.failed_hosts["node1"], "connection refused");
    }

    #[test]
    fn collocated_host_counts_once_per_role() {
        let store = store_with(&[(Role::Mon, &["node1"]), (Role::Osd, &["node1"])]);
        assert_eq!(store.total_hosts(), 2);
    }

    #[test]
    fn cluster_data_is_never_overwritten() {
        let mut store = SnapshotStore::default();
        assert!(store.set_cluster_if_empty(ClusterMetadata {
            status: serde_json::json!({"fsid": "a"}),
        }));
        assert!(!store.set_cluster_if_empty(ClusterMetadata {
            status: serde_json::json!({"fsid": "b"}),
        }));
        assert_eq!(store.cluster.unwrap().status["fsid"], "a");
    }

    #[test]
    fn regular_file_mode_is_detected() {
        let file = FileStat {
            mode: 0o100644,
            ..FileStat::default()
        };
        let dir = FileStat {
            mode: 0o040755,
            ..FileStat::default()
        };
        assert!(file.is_file());
        assert!(!dir.is_file());
    }
}
