//! Fixed ceph commands executed over a session. None of these fail: a
//! non-zero exit or unparseable output degrades to an empty value so the
//! checks can decide what a missing piece of data means.

use super::{CommandOutput, RemoteSession};
use serde_json::Value;
use tracing::{debug, warn};

async fn run(session: &dyn RemoteSession, args: &[&str]) -> Option<CommandOutput> {
    match session.run(args).await {
        Ok(output) => Some(output),
        Err(err) => {
            warn!(host = %session.hostname(), error = %err, "remote command could not be executed");
            None
        }
    }
}

/// Parses JSON command output, mapping every failure to an empty object.
fn json_or_empty(session: &dyn RemoteSession, args: &[&str], output: Option<CommandOutput>) -> Value {
    let empty = Value::Object(Default::default());
    let Some(output) = output else {
        return empty;
    };
    if !output.success() {
        debug!(
            host = %session.hostname(),
            command = %args.join(" "),
            exit_code = output.exit_code,
            stderr = %output.stderr.trim(),
            "command failed"
        );
        return empty;
    }
    match serde_json::from_str(&output.stdout) {
        Ok(value) => value,
        Err(err) => {
            debug!(host = %session.hostname(), command = %args.join(" "), error = %err, "invalid json output");
            empty
        }
    }
}

async fn json_command(session: &dyn RemoteSession, args: &[&str]) -> Value {
    let output = run(session, args).await;
    json_or_empty(session, args, output)
}

pub async fn ceph_version(session: &dyn RemoteSession) -> Option<String> {
    let output = run(session, &["ceph", "--version"]).await?;
    if !output.success() {
        return None;
    }
    let version = output.stdout_lines().next().map(|line| line.trim().to_string());
    version
}

pub async fn ceph_is_installed(session: &dyn RemoteSession) -> bool {
    run(session, &["which", "ceph"])
        .await
        .is_some_and(|output| output.success())
}

pub async fn ceph_socket_version(session: &dyn RemoteSession, socket: &str) -> Value {
    json_command(session, &["ceph", "--admin-daemon", socket, "--format", "json", "version"]).await
}

pub async fn daemon_socket_config(session: &dyn RemoteSession, socket: &str) -> Value {
    json_command(
        session,
        &["ceph", "--admin-daemon", socket, "config", "show", "--format", "json"],
    )
    .await
}

pub async fn ceph_osd_dump(session: &dyn RemoteSession, cluster_name: &str) -> Value {
    let cluster = format!("--cluster={cluster_name}");
    json_command(session, &["ceph", &cluster, "osd", "dump", "--format", "json"]).await
}

pub async fn ceph_status(session: &dyn RemoteSession, cluster_name: &str) -> Value {
    let cluster = format!("--cluster={cluster_name}");
    json_command(session, &["ceph", &cluster, "-s", "--format", "json"]).await
}

/// Monitor map, osd metadata and the rest of the cluster state in one dump.
pub async fn ceph_report(session: &dyn RemoteSession, cluster_name: &str) -> Value {
    let cluster = format!("--cluster={cluster_name}");
    json_command(session, &["ceph", &cluster, "report"]).await
}

/// Names of the entries directly under `/etc/ceph`.
pub async fn list_etc_ceph(session: &dyn RemoteSession) -> Vec<String> {
    let Some(output) = run(session, &["ls", "/etc/ceph/"]).await else {
        return Vec::new();
    };
    if !output.success() {
        return Vec::new();
    }
    let entries: Vec<String> = output.stdout_lines().map(str::to_string).collect();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use async_trait::async_trait;

    struct StubSession(CommandOutput);

    #[async_trait]
    impl RemoteSession for StubSession {
        fn hostname(&self) -> &str {
            "node1"
        }

        async fn run(&self, _args: &[&str]) -> Result<CommandOutput, RemoteError> {
            Ok(self.0.clone())
        }

        async fn close(&self) {}
    }

    fn stub(stdout: &str, exit_code: i32) -> StubSession {
        StubSession(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
        })
    }

    #[tokio::test]
    async fn socket_version_is_parsed() {
        let result = ceph_socket_version(&stub(r#"{"version":"12.2.0"}"#, 0), "/var/run/ceph/osd.asok").await;
        assert_eq!(result["version"], "12.2.0");
    }

    #[tokio::test]
    async fn invalid_json_becomes_empty() {
        let result = ceph_socket_version(&stub("version=12.2.0", 0), "/var/run/ceph/osd.asok").await;
        assert_eq!(result, serde_json::json!({}));
    }

    #[tokio::test]
    async fn non_zero_exit_becomes_empty() {
        let result = daemon_socket_config(&stub(r#"{"config": true}"#, 1), "/").await;
        assert_eq!(result, serde_json::json!({}));
    }

    #[tokio::test]
    async fn version_is_first_line() {
        let result = ceph_version(&stub("ceph version 14.1.1 (nautilus)\n\n", 0)).await;
        assert_eq!(result.as_deref(), Some("ceph version 14.1.1 (nautilus)"));
    }

    #[tokio::test]
    async fn version_is_none_on_failure() {
        assert_eq!(ceph_version(&stub("error mr. robinson", 1)).await, None);
    }

    #[tokio::test]
    async fn installed_follows_exit_code() {
        assert!(ceph_is_installed(&stub("/usr/bin/ceph", 0)).await);
        assert!(!ceph_is_installed(&stub("", 1)).await);
    }
}
