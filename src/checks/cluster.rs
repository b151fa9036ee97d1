//! Checks evaluated once per run against cluster-wide data.

use super::{CheckResult, ClusterCheckFn, ClusterModule, Finding};
use crate::inventory::Role;
use crate::state::SnapshotStore;

pub fn module() -> ClusterModule {
    check_module!("cluster", ClusterCheckFn;
        check_osds_exist,
        check_cluster_health_error,
        check_cluster_health_warning,
    )
}

/// Health status reported by `ceph -s`. Releases before luminous only carry
/// `overall_status`.
fn health_status(store: &SnapshotStore) -> Option<&str> {
    let health = store.cluster.as_ref()?.status.get("health")?;
    health
        .get("status")
        .or_else(|| health.get("overall_status"))
        .and_then(|status| status.as_str())
}

pub fn check_osds_exist(store: &SnapshotStore) -> CheckResult {
    if store.collected_count(Role::Osd) > 0 {
        return Ok(None);
    }
    Ok(Some(Finding::new("ECLS1", "There are no OSDs available")))
}

pub fn check_cluster_health_error(store: &SnapshotStore) -> CheckResult {
    if health_status(store) != Some("HEALTH_ERR") {
        return Ok(None);
    }
    Ok(Some(Finding::new("ECLS2", "cluster is in HEALTH_ERR state")))
}

pub fn check_cluster_health_warning(store: &SnapshotStore) -> CheckResult {
    if health_status(store) != Some("HEALTH_WARN") {
        return Ok(None);
    }
    Ok(Some(Finding::new("WCLS1", "cluster is in HEALTH_WARN state")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::fixtures::{host, store};
    use crate::state::ClusterMetadata;
    use serde_json::json;

    fn with_status(status: serde_json::Value) -> SnapshotStore {
        let mut store = store(vec![(Role::Osd, "osd0", host("aaa"))]);
        store.cluster = Some(ClusterMetadata { status });
        store
    }

    #[test]
    fn no_osds_is_an_error() {
        let store = store(vec![(Role::Mon, "mon0", host("aaa"))]);
        let finding = check_osds_exist(&store).unwrap().unwrap();
        assert_eq!(finding.code, "ECLS1");
        assert_eq!(finding.message, "There are no OSDs available");
    }

    #[test]
    fn health_is_classified() {
        let err = with_status(json!({"health": {"status": "HEALTH_ERR"}}));
        assert_eq!(check_cluster_health_error(&err).unwrap().unwrap().code, "ECLS2");
        assert!(check_cluster_health_warning(&err).unwrap().is_none());

        let warn = with_status(json!({"health": {"overall_status": "HEALTH_WARN"}}));
        assert_eq!(check_cluster_health_warning(&warn).unwrap().unwrap().code, "WCLS1");

        let ok = with_status(json!({"health": {"status": "HEALTH_OK"}}));
        assert!(check_cluster_health_error(&ok).unwrap().is_none());
        assert!(check_cluster_health_warning(&ok).unwrap().is_none());
        assert!(check_osds_exist(&ok).unwrap().is_none());
    }

    #[test]
    fn missing_cluster_data_passes() {
        let store = store(vec![(Role::Osd, "osd0", host("aaa"))]);
        assert!(check_cluster_health_error(&store).unwrap().is_none());
        assert!(check_cluster_health_warning(&with_status(json!({}))).unwrap().is_none());
    }
}
