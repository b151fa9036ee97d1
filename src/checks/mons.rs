use super::{CheckResult, Finding, HostCheckFn, HostModule};
use crate::collectors::paths::VAR_LIB_CEPH;
use crate::inventory::Role;
use crate::state::{HostMetadata, SnapshotStore, StatInfo};
use std::collections::{BTreeMap, BTreeSet};

const MON_DIR_PREFIX: &str = "/var/lib/ceph/mon/";
const OSD_DIR_PREFIX: &str = "/var/lib/ceph/osd/";
const RECOMMENDED_MONS: usize = 3;

pub fn module() -> HostModule {
    check_module!("mons", HostCheckFn;
        check_mon_secret,
        check_multiple_mon_dirs,
        check_mon_collocated_with_osd,
        check_mon_recommended_count,
        check_mon_count_is_odd,
        check_for_single_mon,
        check_min_pool_size,
    )
}

/// The key of the monitor keyring, e.g. `AQBvaBFZAAAAABAA9VHgwCg3rWn8fMaX8KL01A==`.
///
/// Keyring files look like:
///
/// ```text
/// [mon.]
///     key = AQBvaBFZAAAAABAA9VHgwCg3rWn8fMaX8KL01A==
///     caps mon = "allow *"
/// ```
pub fn get_secret(data: &HostMetadata) -> String {
    data.files(VAR_LIB_CEPH)
        .into_iter()
        .flatten()
        .find(|(path, _)| path.starts_with(MON_DIR_PREFIX) && path.ends_with("keyring"))
        .and_then(|(_, keyring)| keyring.contents())
        .and_then(|contents| contents.lines().find(|line| line.contains("key")))
        .and_then(|line| line.split(' ').next_back())
        .map(|key| key.trim().to_string())
        .unwrap_or_default()
}

/// Names of the directories directly below `prefix`. Nested directories are
/// reported in the same flat map, so only the first component counts.
fn daemon_dirs(dirs: Option<&BTreeMap<String, StatInfo>>, prefix: &str) -> BTreeSet<String> {
    dirs.into_iter()
        .flatten()
        .filter_map(|(path, _)| path.strip_prefix(prefix))
        .filter_map(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn get_monitor_dirs(data: &HostMetadata) -> BTreeSet<String> {
    daemon_dirs(data.dirs(VAR_LIB_CEPH), MON_DIR_PREFIX)
}

pub fn get_osd_dirs(data: &HostMetadata) -> BTreeSet<String> {
    daemon_dirs(data.dirs(VAR_LIB_CEPH), OSD_DIR_PREFIX)
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

pub fn check_mon_secret(store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let current = get_secret(data);
    if current.is_empty() {
        return Ok(None);
    }
    let mismatched: Vec<&str> = store
        .role_hosts(Role::Mon)
        .into_iter()
        .flatten()
        .filter(|(_, other)| {
            let secret = get_secret(other);
            !secret.is_empty() && secret != current
        })
        .map(|(name, _)| name.as_str())
        .collect();
    if mismatched.is_empty() {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "EMON1",
        format!(
            "secret key \"{current}\" is different than host(s): {}",
            mismatched.join(",")
        ),
    )))
}

pub fn check_multiple_mon_dirs(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let monitor_dirs = get_monitor_dirs(data);
    if monitor_dirs.len() <= 1 {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "WMON1",
        format!("multiple /var/lib/ceph/mon/* dirs found: {}", join(&monitor_dirs)),
    )))
}

pub fn check_mon_collocated_with_osd(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let osd_dirs = get_osd_dirs(data);
    if osd_dirs.is_empty() {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "WMON2",
        format!("collocated OSDs found: {}", join(&osd_dirs)),
    )))
}

pub fn check_mon_recommended_count(store: &SnapshotStore, _host: &str, _data: &HostMetadata) -> CheckResult {
    let count = store.collected_count(Role::Mon);
    if count >= RECOMMENDED_MONS {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "WMON3",
        format!("Recommended number of MONs ({RECOMMENDED_MONS}) not met: {count}"),
    )))
}

pub fn check_mon_count_is_odd(store: &SnapshotStore, _host: &str, _data: &HostMetadata) -> CheckResult {
    let count = store.collected_count(Role::Mon);
    if count % 2 == 1 {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "WMON4",
        format!("Number of MONs is not an odd number: {count}"),
    )))
}

pub fn check_for_single_mon(store: &SnapshotStore, host: &str, _data: &HostMetadata) -> CheckResult {
    if store.collected_count(Role::Mon) != 1 {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "WMON5",
        format!("A single monitor was detected: {host}"),
    )))
}

pub fn check_min_pool_size(_store: &SnapshotStore, _host: &str, data: &HostMetadata) -> CheckResult {
    let too_small = data.ceph.sockets.values().any(|socket| {
        match socket.config.get("osd_pool_default_min_size") {
            Some(serde_json::Value::String(size)) => size.trim() == "1",
            Some(size) => size.as_i64() == Some(1),
            None => false,
        }
    });
    if !too_small {
        return Ok(None);
    }
    Ok(Some(Finding::new(
        "WMON6",
        "osd_pool_default_min_size is set to 1, can potentially lose data",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::fixtures::{host, store, with_dir, with_file, with_socket};
    use serde_json::json;

    fn mon(secret: &str) -> HostMetadata {
        let mut data = host("aaa");
        with_file(
            &mut data,
            VAR_LIB_CEPH,
            "/var/lib/ceph/mon/ceph-mon0/keyring",
            &format!("[mon.]\n\tkey = {secret}\n\tcaps mon = \"allow *\"\n"),
        );
        data
    }

    fn mons(count: usize) -> SnapshotStore {
        let names = ["mon0", "mon1", "mon2", "mon3"];
        store(
            names[..count]
                .iter()
                .map(|name| (Role::Mon, *name, mon("AQB==")))
                .collect(),
        )
    }

    fn code(result: CheckResult) -> Option<String> {
        result.unwrap().map(|finding| finding.code)
    }

    #[test]
    fn secret_is_read_from_mon_keyring() {
        assert_eq!(get_secret(&mon("AQBvaBFZAAAAABAA9VHgwCg3rWn8fMaX8KL01A==")), "AQBvaBFZAAAAABAA9VHgwCg3rWn8fMaX8KL01A==");
        assert_eq!(get_secret(&host("aaa")), "");
    }

    #[test]
    fn differing_secrets_are_an_error() {
        let store = store(vec![(Role::Mon, "mon0", mon("AAA")), (Role::Mon, "mon1", mon("BBB"))]);
        let mon0 = store.host(Role::Mon, "mon0").unwrap();
        let finding = check_mon_secret(&store, "mon0", mon0).unwrap().unwrap();
        assert_eq!(finding.code, "EMON1");
        assert_eq!(finding.message, "secret key \"AAA\" is different than host(s): mon1");
    }

    #[test]
    fn matching_secrets_pass() {
        let store = mons(3);
        let mon0 = store.host(Role::Mon, "mon0").unwrap();
        assert_eq!(code(check_mon_secret(&store, "mon0", mon0)), None);
    }

    #[test]
    fn monitor_dirs_only_count_first_component() {
        let mut data = host("aaa");
        with_dir(&mut data, VAR_LIB_CEPH, "/var/lib/ceph/mon/ceph-mon0");
        with_dir(&mut data, VAR_LIB_CEPH, "/var/lib/ceph/mon/ceph-mon0/nested");
        assert_eq!(get_monitor_dirs(&data), BTreeSet::from(["ceph-mon0".to_string()]));
        assert_eq!(code(check_multiple_mon_dirs(&mons(1), "mon0", &data)), None);

        with_dir(&mut data, VAR_LIB_CEPH, "/var/lib/ceph/mon/ceph-mon1");
        let finding = check_multiple_mon_dirs(&mons(1), "mon0", &data).unwrap().unwrap();
        assert_eq!(finding.message, "multiple /var/lib/ceph/mon/* dirs found: ceph-mon0,ceph-mon1");
    }

    #[test]
    fn osd_dirs_on_monitor_are_a_warning() {
        let mut data = host("aaa");
        with_dir(&mut data, VAR_LIB_CEPH, "/var/lib/ceph/osd/ceph-0");
        with_dir(&mut data, VAR_LIB_CEPH, "/var/lib/ceph/osd/ceph-1");
        let finding = check_mon_collocated_with_osd(&mons(3), "mon0", &data).unwrap().unwrap();
        assert_eq!(finding.code, "WMON2");
        assert_eq!(finding.message, "collocated OSDs found: ceph-0,ceph-1");
    }

    #[test]
    fn monitor_count_warnings() {
        let data = host("aaa");
        let single = mons(1);
        assert_eq!(code(check_mon_recommended_count(&single, "mon0", &data)).as_deref(), Some("WMON3"));
        assert_eq!(code(check_mon_count_is_odd(&single, "mon0", &data)), None);
        let finding = check_for_single_mon(&single, "mon0", &data).unwrap().unwrap();
        assert_eq!(finding.message, "A single monitor was detected: mon0");

        let two = mons(2);
        let finding = check_mon_recommended_count(&two, "mon0", &data).unwrap().unwrap();
        assert_eq!(finding.message, "Recommended number of MONs (3) not met: 2");
        let finding = check_mon_count_is_odd(&two, "mon0", &data).unwrap().unwrap();
        assert_eq!(finding.message, "Number of MONs is not an odd number: 2");
        assert_eq!(code(check_for_single_mon(&two, "mon0", &data)), None);

        let three = mons(3);
        assert_eq!(code(check_mon_recommended_count(&three, "mon0", &data)), None);
        assert_eq!(code(check_mon_count_is_odd(&three, "mon0", &data)), None);
    }

    #[test]
    fn min_pool_size_of_one_is_a_warning() {
        let mut data = host("aaa");
        with_socket(
            &mut data,
            "/var/run/ceph/ceph-mon.mon0.asok",
            json!({}),
            json!({"osd_pool_default_min_size": "1"}),
        );
        assert_eq!(code(check_min_pool_size(&mons(3), "mon0", &data)).as_deref(), Some("WMON6"));

        let mut data = host("aaa");
        with_socket(
            &mut data,
            "/var/run/ceph/ceph-mon.mon0.asok",
            json!({}),
            json!({"osd_pool_default_min_size": "0"}),
        );
        assert_eq!(code(check_min_pool_size(&mons(3), "mon0", &data)), None);
    }
}
