use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Ceph daemon role a host is checked as.
///
/// The declaration order is the order roles are collected and checked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "mons")]
    Mon,
    #[serde(alias = "osds")]
    Osd,
    #[serde(alias = "mgrs")]
    Mgr,
    #[serde(alias = "mdss")]
    Mds,
    #[serde(alias = "rgws")]
    Rgw,
    #[serde(alias = "clients")]
    Client,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Mon,
        Role::Osd,
        Role::Mgr,
        Role::Mds,
        Role::Rgw,
        Role::Client,
    ];

    /// Inventory group name, as used by ceph-ansible.
    pub fn group_name(self) -> &'static str {
        match self {
            Role::Mon => "mons",
            Role::Osd => "osds",
            Role::Mgr => "mgrs",
            Role::Mds => "mdss",
            Role::Rgw => "rgws",
            Role::Client => "clients",
        }
    }

    pub fn readable_name(self) -> &'static str {
        match self {
            Role::Rgw => "rados gateways",
            Role::Mgr => "managers",
            other => other.group_name(),
        }
    }

    /// Accepts both the plural group name (`mons`) and the singular (`mon`).
    pub fn from_group(name: &str) -> Option<Role> {
        Role::ALL
            .into_iter()
            .find(|role| role.group_name() == name || role.group_name().strip_suffix('s') == Some(name))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRef {
    pub host: String,
    #[serde(default)]
    pub container: Option<String>,
}

impl HostRef {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: None,
        }
    }
}

pub type NodeInventory = BTreeMap<Role, Vec<HostRef>>;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("the given inventory path does not exist: {0}")]
    Missing(String),
    #[error("failed to read inventory file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to run `{command}`: {detail}")]
    Platform { command: String, detail: String },
    #[error("unable to parse pod listing from `{command}`: {source}")]
    PodListing {
        command: String,
        source: serde_json::Error,
    },
}

/// Turns raw group → hosts mappings into a typed inventory, dropping groups
/// that are not Ceph daemon roles.
pub fn from_groups(groups: BTreeMap<String, Vec<HostRef>>) -> NodeInventory {
    let mut nodes = NodeInventory::new();
    for (group, hosts) in groups {
        match Role::from_group(&group) {
            Some(role) => nodes.entry(role).or_default().extend(hosts),
            None => {
                for host in &hosts {
                    warn!(host = %host.host, group = %group, "skipping node from unknown host group");
                }
            }
        }
    }
    nodes
}

/// Looks for an Ansible hosts file: the explicit path first, then `hosts` in
/// the current directory, then `/etc/ansible/hosts`.
pub fn locate_hosts_file(explicit: Option<&Path>) -> Result<Option<std::path::PathBuf>, InventoryError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(InventoryError::Missing(path.display().to_string()));
        }
        return Ok(Some(path.to_path_buf()));
    }
    let cwd_hosts = Path::new("hosts");
    if cwd_hosts.is_file() {
        info!("found and loaded the hosts file from the current working directory");
        return Ok(Some(cwd_hosts.to_path_buf()));
    }
    let system_hosts = Path::new("/etc/ansible/hosts");
    if system_hosts.is_file() {
        return Ok(Some(system_hosts.to_path_buf()));
    }
    warn!("unable to find an Ansible hosts file to work with (tried ./hosts, /etc/ansible/hosts)");
    Ok(None)
}

pub fn load_hosts_file(path: &Path) -> Result<NodeInventory, InventoryError> {
    let text = fs::read_to_string(path).map_err(|source| InventoryError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(from_groups(parse_ansible_inventory(&text)))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Hosts,
    Children,
    Vars,
}

/// Parses the subset of Ansible's INI inventory format needed to map hosts
/// to groups: `[group]`, `[group:children]` (nested to any depth) and
/// `[group:vars]`, which is ignored. Host variables are dropped.
pub fn parse_ansible_inventory(text: &str) -> BTreeMap<String, Vec<HostRef>> {
    let mut direct: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut group = "ungrouped".to_string();
    let mut kind = SectionKind::Hosts;

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some((name, tag)) = parse_section(line) {
            group = name.to_string();
            kind = match tag {
                Some("children") => SectionKind::Children,
                Some("vars") => SectionKind::Vars,
                _ => SectionKind::Hosts,
            };
            direct.entry(group.clone()).or_default();
            continue;
        }
        match kind {
            SectionKind::Vars => {}
            SectionKind::Hosts => {
                if let Some(host) = parse_host_definition(line) {
                    direct.entry(group.clone()).or_default().push(host.to_string());
                }
            }
            SectionKind::Children => {
                if let Some(child) = parse_group_name(line) {
                    let members = children.entry(group.clone()).or_default();
                    if !members.iter().any(|c| c == child) {
                        members.push(child.to_string());
                    }
                }
            }
        }
    }

    let groups: BTreeSet<&String> = direct.keys().chain(children.keys()).collect();
    groups
        .into_iter()
        .map(|name| {
            let mut visited = BTreeSet::new();
            let mut hosts = Vec::new();
            expand_group(name, &direct, &children, &mut visited, &mut hosts);
            (name.clone(), hosts.into_iter().map(HostRef::new).collect())
        })
        .collect()
}

fn expand_group(
    name: &str,
    direct: &BTreeMap<String, Vec<String>>,
    children: &BTreeMap<String, Vec<String>>,
    visited: &mut BTreeSet<String>,
    out: &mut Vec<String>,
) {
    if !visited.insert(name.to_string()) {
        return;
    }
    for host in direct.get(name).into_iter().flatten() {
        if !out.contains(host) {
            out.push(host.clone());
        }
    }
    for child in children.get(name).into_iter().flatten() {
        expand_group(child, direct, children, visited, out);
    }
}

/// `[name]` or `[name:tag]`, optionally followed by a comment.
fn parse_section(line: &str) -> Option<(&str, Option<&str>)> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    let trailing = rest[end + 1..].trim_start();
    if !trailing.is_empty() && !trailing.starts_with('#') {
        return None;
    }
    let inner = &rest[..end];
    let (name, tag) = match inner.split_once(':') {
        Some((name, tag)) => (name, Some(tag)),
        None => (inner, None),
    };
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return None;
    }
    if let Some(tag) = tag {
        if tag.is_empty() || !tag.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
    }
    Some((name, tag))
}

/// `osd1:6789 docker=True` -> `osd1`
fn parse_host_definition(line: &str) -> Option<&str> {
    let first = line.split_whitespace().next()?;
    let host = first.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

fn parse_group_name(line: &str) -> Option<&str> {
    let name = line.split('#').next()?.trim();
    if name.is_empty() || name.contains(':') || name.contains(']') || name.contains(char::is_whitespace) {
        return None;
    }
    Some(name)
}

/// Maps Rook pod `app` labels to roles.
fn role_for_app_label(label: &str) -> Option<Role> {
    match label {
        "rook-ceph-mon" => Some(Role::Mon),
        "rook-ceph-osd" => Some(Role::Osd),
        "rook-ceph-mgr" => Some(Role::Mgr),
        "rook-ceph-mds" => Some(Role::Mds),
        "rook-ceph-rgw" => Some(Role::Rgw),
        "rook-ceph-client" => Some(Role::Client),
        _ => None,
    }
}

/// Builds an inventory from a `get pods -o json` listing. Every pod carrying a
/// known `app` label is included regardless of its phase.
pub fn inventory_from_pods(pods: &serde_json::Value) -> NodeInventory {
    let mut nodes = NodeInventory::new();
    let items = pods
        .get("items")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    for item in items {
        let metadata = &item["metadata"];
        let Some(role) = metadata["labels"]["app"].as_str().and_then(role_for_app_label) else {
            continue;
        };
        if let Some(name) = metadata["name"].as_str() {
            nodes.entry(role).or_default().push(HostRef::new(name));
        }
    }
    nodes
}

/// Queries a Kubernetes or OpenShift API (via `kubectl` / `oc`) for the pods
/// of a Rook namespace.
pub async fn load_from_platform(
    executable: &str,
    namespace: &str,
    context: Option<&str>,
) -> Result<NodeInventory, InventoryError> {
    let mut args: Vec<String> = Vec::new();
    if let Some(context) = context {
        args.extend(["--context".to_string(), context.to_string()]);
    }
    args.extend(
        ["--request-timeout=5", "get", "-n", namespace, "pods", "-o", "json"]
            .iter()
            .map(|s| s.to_string()),
    );
    let command = format!("{executable} {}", args.join(" "));

    let output = Command::new(executable)
        .args(&args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| InventoryError::Platform {
            command: command.clone(),
            detail: err.to_string(),
        })?;
    if !output.status.success() {
        return Err(InventoryError::Platform {
            command,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    let pods: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|source| InventoryError::PodListing { command, source })?;
    Ok(inventory_from_pods(&pods))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hosts_of(groups: &BTreeMap<String, Vec<HostRef>>, group: &str) -> Vec<String> {
        groups
            .get(group)
            .map(|hosts| hosts.iter().map(|h| h.host.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn flat_inventory_keeps_groups_apart() {
        let groups = parse_ansible_inventory("[mons]\nmon0\n[osds]\nosd0\n");
        assert_eq!(hosts_of(&groups, "mons"), vec!["mon0"]);
        assert_eq!(hosts_of(&groups, "osds"), vec!["osd0"]);
    }

    #[test]
    fn host_ports_and_variables_are_stripped() {
        let groups = parse_ansible_inventory("[osds]\nosd1:6789 docker=True\nosd3 docker=True\n");
        assert_eq!(hosts_of(&groups, "osds"), vec!["osd1", "osd3"]);
    }

    #[test]
    fn nested_children_are_expanded() {
        let text = "
            [mons:children]
            us

            [atlanta]
            mon0

            [us:children]
            atlanta
        ";
        let groups = parse_ansible_inventory(text);
        assert_eq!(hosts_of(&groups, "mons"), vec!["mon0"]);
    }

    #[test]
    fn vars_sections_and_comments_are_ignored() {
        let text = "# comment\n[mons]\nmon0\n[mons:vars]\nansible_user=root\n; other\n";
        let groups = parse_ansible_inventory(text);
        assert_eq!(hosts_of(&groups, "mons"), vec!["mon0"]);
    }

    #[test]
    fn cyclic_children_terminate() {
        let text = "[a:children]\nb\n[b:children]\na\n[b]\nnode1\n";
        let groups = parse_ansible_inventory(text);
        assert_eq!(hosts_of(&groups, "a"), vec!["node1"]);
    }

    #[test]
    fn unknown_groups_are_filtered_out() {
        let nodes = from_groups(parse_ansible_inventory("[mons]\nmon0\n[test]\nnode1\n"));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[&Role::Mon], vec![HostRef::new("mon0")]);
    }

    #[test]
    fn load_hosts_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mons]\nmon0\n[osds]\nosd0\nosd1").unwrap();
        let nodes = load_hosts_file(file.path()).unwrap();
        assert_eq!(nodes[&Role::Osd].len(), 2);
    }

    #[test]
    fn missing_explicit_hosts_file_is_an_error() {
        let err = locate_hosts_file(Some(Path::new("/fake/path"))).unwrap_err();
        assert!(matches!(err, InventoryError::Missing(_)));
    }

    #[test]
    fn pods_are_mapped_by_app_label() {
        let pods = serde_json::json!({
            "items": [
                {"metadata": {"name": "rook-ceph-mon-a", "labels": {"app": "rook-ceph-mon"}}},
                {"metadata": {"name": "rook-ceph-osd-0", "labels": {"app": "rook-ceph-osd"}}},
                {"metadata": {"name": "operator", "labels": {"app": "rook-ceph-operator"}}},
                {"metadata": {"name": "unlabeled"}}
            ]
        });
        let nodes = inventory_from_pods(&pods);
        assert_eq!(nodes[&Role::Mon], vec![HostRef::new("rook-ceph-mon-a")]);
        assert_eq!(nodes[&Role::Osd], vec![HostRef::new("rook-ceph-osd-0")]);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn roles_accept_singular_and_plural_names() {
        assert_eq!(Role::from_group("mons"), Some(Role::Mon));
        assert_eq!(Role::from_group("rgw"), Some(Role::Rgw));
        assert_eq!(Role::from_group("test"), None);
    }
}
