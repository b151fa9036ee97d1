//! Builds an Ansible hosts file from what a running monitor knows about the
//! cluster (`ceph report`), for use with the check command.

use crate::inventory::{HostRef, NodeInventory, Role};
use crate::remote::commands;
use crate::remote::{Connector, RemoteError};
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Connect(#[from] RemoteError),
    #[error("`ceph report` on {host} has no monitor map")]
    MissingMonmap { host: String },
    #[error("no hosts were found from remote monitor node: {0}")]
    NoHosts(String),
    #[error("failed to write hosts file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Monitors from `monmap.mons[].name`, OSD hosts from
/// `osd_metadata[].hostname`. Duplicate hostnames are listed once.
pub fn inventory_from_report(host: &str, report: &Value) -> Result<NodeInventory, GenerateError> {
    let mons = report
        .pointer("/monmap/mons")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerateError::MissingMonmap {
            host: host.to_string(),
        })?;
    let osds = report
        .get("osd_metadata")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut nodes = NodeInventory::new();
    for (role, entries, field) in [(Role::Mon, mons.as_slice(), "name"), (Role::Osd, osds, "hostname")] {
        let hosts = nodes.entry(role).or_default();
        for name in entries.iter().filter_map(|entry| entry.get(field)?.as_str()) {
            if !hosts.iter().any(|known| known.host == name) {
                hosts.push(HostRef::new(name));
            }
        }
    }
    nodes.retain(|_, hosts| !hosts.is_empty());
    if nodes.is_empty() {
        return Err(GenerateError::NoHosts(host.to_string()));
    }
    Ok(nodes)
}

/// `[group]` headers followed by one host per line, in role order.
pub fn render_hosts_file(nodes: &NodeInventory) -> String {
    let mut out = String::new();
    for (role, hosts) in nodes {
        out.push_str(&format!("[{}]\n", role.group_name()));
        for host in hosts {
            out.push_str(&host.host);
            out.push('\n');
        }
    }
    out
}

pub async fn generate(
    connector: &dyn Connector,
    monitor: &HostRef,
    cluster_name: &str,
) -> Result<NodeInventory, GenerateError> {
    debug!(host = %monitor.host, "requesting ceph report");
    let session = connector.connect(monitor).await?;
    let report = commands::ceph_report(session.as_ref(), cluster_name).await;
    session.close().await;

    let nodes = inventory_from_report(&monitor.host, &report)?;
    info!(
        host = %monitor.host,
        mons = nodes.get(&Role::Mon).map_or(0, Vec::len),
        osds = nodes.get(&Role::Osd).map_or(0, Vec::len),
        "generated inventory from monitor"
    );
    Ok(nodes)
}

pub fn write_hosts_file(path: &Path, contents: &str) -> Result<(), GenerateError> {
    fs::write(path, contents).map_err(|source| GenerateError::Write {
        path: path.display().to_string(),
        source,
    })
}
