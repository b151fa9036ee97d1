use super::{CheckError, CheckResult, Finding, HostCheckFn, HostModule};
use crate::collectors::paths::VAR_LIB_CEPH;
use crate::state::{HostMetadata, SnapshotStore};
use std::collections::BTreeSet;

pub fn module() -> HostModule {
    check_module!("osds", HostCheckFn;
        check_osd_ceph_fsid,
        check_full_ratio,
        check_backfillfull_ratio,
        check_nearfull_ratio,
    )
}

/// Distinct values of every `ceph_fsid` file below `/var/lib/ceph`.
pub fn get_osd_ceph_fsids(data: &HostMetadata) -> BTreeSet<String> {
    data.files(VAR_LIB_CEPH)
        .into_iter()
        .flatten()
        .filter(|(path, _)| path.contains("ceph_fsid"))
        .filter_map(|(_, file)| file.contents())
        .map(|contents| contents.trim().to_string())
        .collect()
}

pub fn check_osd_ceph_fsid(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let fsids = get_osd_ceph_fsids(data);
    if fsids.len() <= 1 {
        return Ok(None);
    }
    let fsids: Vec<&str> = fsids.iter().map(String::as_str).collect();
    Ok(Some(Finding::new(
        "WOSD1",
        format!("Multiple ceph_fsid values found: {}", fsids.join(", ")),
    )))
}

/// Compares a ratio of the osd map with its default. An osd dump that could
/// not be collected has no ratios and passes.
fn ratio_check(data: &HostMetadata, field: &str, expected: f64, code: &str) -> CheckResult {
    let Some(value) = data.ceph.osd.dump.get(field) else {
        return Ok(None);
    };
    let ratio = value.as_f64().ok_or_else(|| CheckError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })?;
    if (ratio - expected).abs() < 1e-6 {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        code,
        format!("{field} in osd map is set to {ratio}, should be {expected}"),
    )))
}

pub fn check_full_ratio(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    ratio_check(data, "full_ratio", 0.95, "WOSD2")
}

pub fn check_backfillfull_ratio(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    ratio_check(data, "backfillfull_ratio", 0.90, "WOSD3")
}

pub fn check_nearfull_ratio(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    ratio_check(data, "nearfull_ratio", 0.85, "WOSD4")
}
