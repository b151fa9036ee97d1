//! Filesystem introspection run on the remote side: listing a tree of paths
//! and stat'ing (and optionally reading) each of them.

use super::RemoteSession;
use crate::state::{ExceptionInfo, FileStat, StatInfo};
use std::path::Path;
use tracing::debug;

const STAT_FORMAT: &str = "%U\t%G\t%u\t%g\t%s\t%f\t%X\t%Y\t%Z";

/// Per-root collection options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOptions {
    pub get_contents: bool,
    /// Directory names pruned at any depth, along with everything below.
    pub skip_dirs: &'static [&'static str],
    /// File names skipped at any depth.
    pub skip_files: &'static [&'static str],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathListing {
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

pub async fn path_tree(session: &dyn RemoteSession, root: &str, options: &PathOptions) -> PathListing {
    let args = find_args(root, options);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match session.run(&args).await {
        Ok(output) => {
            if !output.success() {
                debug!(
                    host = %session.hostname(),
                    root,
                    stderr = %output.stderr.trim(),
                    "find reported errors, keeping partial listing"
                );
            }
            parse_tree(root, &output.stdout, options)
        }
        Err(err) => {
            debug!(host = %session.hostname(), root, error = %err, "unable to list path tree");
            PathListing::default()
        }
    }
}

pub async fn stat_path(session: &dyn RemoteSession, path: &str, get_contents: bool) -> StatInfo {
    let output = match session.run(&["stat", "-c", STAT_FORMAT, path]).await {
        Ok(output) => output,
        Err(err) => return exception("RemoteError", err.to_string()),
    };
    if !output.success() {
        return exception("StatError", failure_reason(&output.stderr, output.exit_code));
    }
    let mut stat = match output.stdout_lines().next().map(parse_stat) {
        Some(Ok(stat)) => stat,
        Some(Err(reason)) => return exception("ParseError", reason),
        None => return exception("ParseError", "stat returned no output".to_string()),
    };

    if get_contents && stat.is_file() {
        match session.run(&["cat", path]).await {
            Ok(output) if output.success() => stat.contents = Some(output.stdout),
            Ok(output) => {
                return exception("ReadError", failure_reason(&output.stderr, output.exit_code))
            }
            Err(err) => return exception("RemoteError", err.to_string()),
        }
    }
    StatInfo::Stat(stat)
}

fn exception(name: &str, repr: String) -> StatInfo {
    StatInfo::Exception(ExceptionInfo {
        name: name.to_string(),
        repr,
    })
}

fn failure_reason(stderr: &str, exit_code: i32) -> String {
    match stderr.trim() {
        "" => format!("exited with code {exit_code}"),
        stderr => stderr.to_string(),
    }
}

fn find_args(root: &str, options: &PathOptions) -> Vec<String> {
    let mut args: Vec<String> = ["find", root, "-mindepth", "1"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if !options.skip_dirs.is_empty() {
        args.extend(["(", "-type", "d", "("].iter().map(|s| s.to_string()));
        for (i, name) in options.skip_dirs.iter().enumerate() {
            if i > 0 {
                args.push("-o".to_string());
            }
            args.extend(["-name".to_string(), name.to_string()]);
        }
        args.extend([")", ")", "-prune", "-o"].iter().map(|s| s.to_string()));
    }
    args.extend(["-printf".to_string(), "%y\t%p\n".to_string()]);
    args
}

/// Parses `find -printf '%y\t%p\n'` output. Anything that is not a directory
/// (regular files, symlinks, admin sockets) is listed as a file.
pub fn parse_tree(root: &str, output: &str, options: &PathOptions) -> PathListing {
    let mut listing = PathListing::default();
    for line in output.lines() {
        let Some((kind, path)) = line.split_once('\t') else {
            continue;
        };
        let relative = Path::new(path).strip_prefix(root).unwrap_or(Path::new(path));
        let components: Vec<&str> = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        let Some((name, parents)) = components.split_last() else {
            continue;
        };
        if parents.iter().any(|p| options.skip_dirs.contains(p)) {
            continue;
        }
        if kind == "d" {
            if !options.skip_dirs.contains(name) {
                listing.dirs.push(path.to_string());
            }
        } else if !options.skip_files.contains(name) {
            listing.files.push(path.to_string());
        }
    }
    listing
}

/// Parses one line produced by `stat -c` with [`STAT_FORMAT`].
pub fn parse_stat(line: &str) -> Result<FileStat, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    let &[owner, group, uid, gid, size, mode, atime, mtime, ctime] = fields.as_slice() else {
        return Err(format!("unexpected stat output: {line:?}"));
    };
    let num = |name: &str, value: &str| -> Result<i64, String> {
        value
            .trim()
            .parse::<i64>()
            .map_err(|err| format!("invalid {name} {value:?}: {err}"))
    };
    Ok(FileStat {
        owner: owner.to_string(),
        group: group.to_string(),
        uid: num("uid", uid)? as u32,
        gid: num("gid", gid)? as u32,
        size: num("size", size)? as u64,
        mode: u32::from_str_radix(mode.trim(), 16)
            .map_err(|err| format!("invalid mode {mode:?}: {err}"))?,
        atime: num("atime", atime)?,
        mtime: num("mtime", mtime)?,
        ctime: num("ctime", ctime)?,
        contents: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAR_LIB: PathOptions = PathOptions {
        get_contents: true,
        skip_dirs: &["tmp", "current", "store.db"],
        skip_files: &["activate.monmap", "superblock"],
    };

    #[test]
    fn stat_line_is_parsed() {
        let stat = parse_stat("ceph\tceph\t167\t167\t650\t81a4\t1492721509\t1492721506\t1492721507")
            .unwrap();
        assert_eq!(stat.owner, "ceph");
        assert_eq!(stat.uid, 167);
        assert_eq!(stat.size, 650);
        assert_eq!(stat.mode, 0o100644);
        assert!(stat.is_file());
        assert_eq!(stat.mtime, 1492721506);
    }

    #[test]
    fn truncated_stat_line_is_rejected() {
        assert!(parse_stat("ceph\tceph\t167").is_err());
        assert!(parse_stat("ceph\tceph\tx\t167\t1\t81a4\t1\t1\t1").is_err());
    }

    #[test]
    fn tree_skips_pruned_dirs_and_files() {
        let output = "\
d\t/var/lib/ceph/mon
d\t/var/lib/ceph/mon/ceph-mon0
f\t/var/lib/ceph/mon/ceph-mon0/keyring
d\t/var/lib/ceph/mon/ceph-mon0/store.db
f\t/var/lib/ceph/mon/ceph-mon0/store.db/000001.log
f\t/var/lib/ceph/osd/ceph-0/superblock
s\t/var/lib/ceph/run.asok
";
        let listing = parse_tree("/var/lib/ceph", output, &VAR_LIB);
        assert_eq!(
            listing.dirs,
            vec!["/var/lib/ceph/mon", "/var/lib/ceph/mon/ceph-mon0"]
        );
        assert_eq!(
            listing.files,
            vec!["/var/lib/ceph/mon/ceph-mon0/keyring", "/var/lib/ceph/run.asok"]
        );
    }

    #[test]
    fn find_prunes_configured_dirs() {
        let args = find_args("/var/lib/ceph", &VAR_LIB);
        let joined = args.join(" ");
        assert!(joined.starts_with("find /var/lib/ceph -mindepth 1 ( -type d ( -name tmp -o -name current -o -name store.db ) ) -prune -o"));
        assert_eq!(args.last().unwrap(), "%y\t%p\n");
    }

    #[test]
    fn find_without_skips_only_prints() {
        let args = find_args("/etc/ceph", &PathOptions::default());
        assert_eq!(
            args,
            vec!["find", "/etc/ceph", "-mindepth", "1", "-printf", "%y\t%p\n"]
        );
    }
}
