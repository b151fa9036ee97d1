use crate::remote::functions::{path_tree, stat_path, PathOptions};
use crate::remote::RemoteSession;
use crate::state::{PathMetadata, PathTree};

pub const ETC_CEPH: &str = "/etc/ceph";
pub const VAR_LIB_CEPH: &str = "/var/lib/ceph";
pub const VAR_RUN_CEPH: &str = "/var/run/ceph";

/// Roots collected on every host. Contents are only captured where the
/// checks need to read files (configs, keyrings, fsids).
pub const PATHS_OF_INTEREST: [(&str, PathOptions); 3] = [
    (
        ETC_CEPH,
        PathOptions {
            get_contents: true,
            skip_dirs: &[],
            skip_files: &[],
        },
    ),
    (
        VAR_LIB_CEPH,
        PathOptions {
            get_contents: true,
            skip_dirs: &["tmp", "current", "store.db"],
            skip_files: &["activate.monmap", "superblock"],
        },
    ),
    (
        VAR_RUN_CEPH,
        PathOptions {
            get_contents: false,
            skip_dirs: &[],
            skip_files: &[],
        },
    ),
];

pub async fn collect_paths(session: &dyn RemoteSession) -> PathTree {
    let mut tree = PathTree::new();
    for (root, options) in PATHS_OF_INTEREST {
        tree.insert(root.to_string(), get_path_metadata(session, root, &options).await);
    }
    tree
}

/// Stats everything below `root`. The root itself always ends up in `dirs`,
/// so an empty or missing tree still records why it is empty.
pub async fn get_path_metadata(
    session: &dyn RemoteSession,
    root: &str,
    options: &PathOptions,
) -> PathMetadata {
    let listing = path_tree(session, root, options).await;
    let mut metadata = PathMetadata::default();
    for file in &listing.files {
        metadata
            .files
            .insert(file.clone(), stat_path(session, file, options.get_contents).await);
    }
    for dir in &listing.dirs {
        metadata.dirs.insert(dir.clone(), stat_path(session, dir, false).await);
    }
    metadata
        .dirs
        .insert(root.to_string(), stat_path(session, root, false).await);
    metadata
}
