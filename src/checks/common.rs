//! Checks that apply to every host, whatever its role.

use super::{CheckError, CheckResult, Finding, HostCheckFn, HostModule};
use crate::collectors::paths::{ETC_CEPH, VAR_LIB_CEPH};
use crate::state::{HostMetadata, SnapshotStore};
use std::collections::BTreeSet;
use std::path::Path;

pub fn module() -> HostModule {
    check_module!("common", HostCheckFn;
        check_ceph_conf_exists,
        check_ceph_executable_exists,
        check_var_lib_ceph_dir,
        check_var_lib_ceph_permissions,
        check_cluster_fsid,
        check_ceph_version_parity,
        check_ceph_socket_and_installed_version_parity,
        check_rgw_num_rados_handles,
        check_fsid_exists,
    )
}

/// The `fsid` set in the cluster configuration file, or `""` when the file
/// is missing or has none.
pub fn get_fsid(store: &SnapshotStore, data: &HostMetadata) -> String {
    let Some(contents) = data
        .files(ETC_CEPH)
        .and_then(|files| files.get(&store.cluster_conf_path()))
        .and_then(|conf| conf.contents())
    else {
        return String::new();
    };
    contents
        .lines()
        .find(|line| line.contains("fsid"))
        .and_then(|line| line.rsplit('=').next())
        .map(|fsid| fsid.trim().to_string())
        .unwrap_or_default()
}

/// `ceph version 12.2.1 (hash) luminous (stable)` -> `12.2.1`.
pub fn parse_version(version: &str) -> Option<&str> {
    let mut tokens = version.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some("ceph"), Some("version"), Some(number)) => Some(number),
        _ => None,
    }
}

/// Hosts of the inventory whose value differs from `current`. Hosts without
/// a value are left out of the comparison.
fn mismatched_hosts<F>(store: &SnapshotStore, current: &str, value_of: F) -> Vec<String>
where
    F: Fn(&HostMetadata) -> Option<String>,
{
    let mut mismatched = BTreeSet::new();
    for (_, host, data) in store.collected_nodes() {
        match value_of(data) {
            Some(value) if !value.is_empty() && value != current => {
                mismatched.insert(host.host.clone());
            }
            _ => {}
        }
    }
    mismatched.into_iter().collect()
}

pub fn check_ceph_conf_exists(store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let conf = store.cluster_conf_path();
    let exists = data.files(ETC_CEPH).is_some_and(|files| files.contains_key(&conf));
    if exists {
        return Ok(None);
    }
    Ok(Some(Finding::new("ECOM1", format!("{conf} does not exist"))))
}

pub fn check_ceph_executable_exists(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    if data.ceph.installed {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "ECOM2",
        "ceph executable was not found in common paths when running `which`",
    )))
}

pub fn check_var_lib_ceph_dir(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let root = data
        .dirs(VAR_LIB_CEPH)
        .and_then(|dirs| dirs.get(VAR_LIB_CEPH))
        .ok_or_else(|| CheckError::MissingMetadata(format!("{VAR_LIB_CEPH} was not collected")))?;
    Ok(root.exception().map(|err| {
        Finding::new(
            "ECOM3",
            format!("{VAR_LIB_CEPH} could not be parsed: {}", err.repr),
        )
    }))
}

pub fn check_var_lib_ceph_permissions(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    // A failed stat is reported by the ECOM3 check.
    let Some(stat) = data
        .dirs(VAR_LIB_CEPH)
        .and_then(|dirs| dirs.get(VAR_LIB_CEPH))
        .and_then(|root| root.stat())
    else {
        return Ok(None);
    };
    if stat.owner == "ceph" && stat.group == "ceph" {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "ECOM4",
        format!(
            "{VAR_LIB_CEPH} has invalid ownership: {}:{}, should be ceph:ceph",
            stat.owner, stat.group
        ),
    )))
}

pub fn check_cluster_fsid(store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let current = get_fsid(store, data);
    if current.is_empty() {
        return Ok(None);
    }
    let mismatched = mismatched_hosts(store, &current, |other| Some(get_fsid(store, other)));
    if mismatched.is_empty() {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "ECOM5",
        format!(
            "fsid \"{current}\" is different than host(s): {}",
            mismatched.join(",")
        ),
    )))
}

pub fn check_ceph_version_parity(store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let Some(current) = data.ceph.version.as_deref() else {
        return Ok(None);
    };
    let mismatched = mismatched_hosts(store, current, |other| other.ceph.version.clone());
    if mismatched.is_empty() {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "ECOM6",
        format!(
            "Ceph version \"{current}\" is different than host(s): {}",
            mismatched.join(",")
        ),
    )))
}

pub fn check_ceph_socket_and_installed_version_parity(
    _store: &SnapshotStore,
    _host: &str,
    data: &HostMetadata,
) -> CheckResult {
    let Some(installed) = data.ceph.version.as_deref().and_then(parse_version) else {
        return Ok(None);
    };
    let mut mismatched = Vec::new();
    for (socket, info) in &data.ceph.sockets {
        // Sockets that did not answer carry an empty object.
        let Some(running) = info.version.get("version") else {
            continue;
        };
        let running = running.as_str().ok_or_else(|| CheckError::InvalidValue {
            field: format!("{socket} version"),
            value: running.to_string(),
        })?;
        if running != installed {
            mismatched.push(socket.as_str());
        }
    }
    if mismatched.is_empty() {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "ECOM7",
        format!(
            "Ceph version \"{installed}\" is different than version from running socket(s): {}",
            mismatched.join(",")
        ),
    )))
}

pub fn check_rgw_num_rados_handles(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let mut offending = Vec::new();
    for (socket, info) in &data.ceph.sockets {
        let Some(value) = info.config.get("rgw_num_rados_handles") else {
            continue;
        };
        // `config show` reports every value as a string.
        let handles = match value {
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
            other => other.as_i64(),
        }
        .ok_or_else(|| CheckError::InvalidValue {
            field: "rgw_num_rados_handles".to_string(),
            value: value.to_string(),
        })?;
        if handles > 1 {
            let name = Path::new(socket)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(socket.as_str());
            offending.push(name);
        }
    }
    if offending.is_empty() {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "WCOM7",
        format!(
            "rgw_num_rados_handles shouldn't be larger than 1, can lead to memory leaks: {}",
            offending.join(", ")
        ),
    )))
}

pub fn check_fsid_exists(store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let conf = store.cluster_conf_path();
    let has_conf = data.files(ETC_CEPH).is_some_and(|files| files.contains_key(&conf));
    // A missing configuration file is reported by the ECOM1 check.
    if !has_conf || !get_fsid(store, data).is_empty() {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "ECOM8",
        format!("fsid is missing in the Ceph configuration file {conf}"),
    )))
}
