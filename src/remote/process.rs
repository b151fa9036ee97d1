use super::{CommandOutput, Connector, RemoteError, RemoteSession};
use crate::inventory::HostRef;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// How commands reach a host.
#[derive(Debug, Clone)]
pub enum Transport {
    /// OpenSSH with a shared control master per host, so every command after
    /// the first reuses one authenticated connection.
    Ssh {
        ssh_config: Option<PathBuf>,
        user: Option<String>,
        container_runtime: String,
    },
    /// `kubectl exec` / `oc exec` into pods, executed locally.
    Kubectl {
        executable: String,
        namespace: String,
        context: Option<String>,
    },
}

pub struct ProcessConnector {
    transport: Transport,
    control_dir: PathBuf,
}

impl ProcessConnector {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            control_dir: std::env::temp_dir(),
        }
    }

    fn session_for(&self, host: &HostRef) -> ProcessSession {
        match &self.transport {
            Transport::Ssh {
                ssh_config,
                user,
                container_runtime,
            } => {
                let target = match user {
                    Some(user) => format!("{user}@{}", host.host),
                    None => host.host.clone(),
                };
                let mut options = Vec::new();
                if let Some(cfg) = ssh_config {
                    options.extend(["-F".to_string(), cfg.display().to_string()]);
                }
                options.extend(
                    [
                        "-o",
                        "BatchMode=yes",
                        "-o",
                        "ControlMaster=auto",
                        "-o",
                        "ControlPersist=60",
                    ]
                    .iter()
                    .map(|s| s.to_string()),
                );
                options.extend([
                    "-o".to_string(),
                    format!(
                        "ControlPath={}/ceph-medic-%C",
                        self.control_dir.display()
                    ),
                ]);

                let mut prefix = vec!["ssh".to_string()];
                prefix.extend(options.iter().cloned());
                prefix.extend([target.clone(), "--".to_string()]);

                let mut close = vec!["ssh".to_string()];
                close.extend(options);
                close.extend(["-O".to_string(), "exit".to_string(), target]);

                let remote_prefix = match &host.container {
                    Some(container) => vec![
                        container_runtime.clone(),
                        "exec".to_string(),
                        container.clone(),
                    ],
                    None => Vec::new(),
                };
                ProcessSession {
                    host: host.host.clone(),
                    prefix,
                    remote_prefix,
                    quote_remote: true,
                    close_command: Some(close),
                }
            }
            Transport::Kubectl {
                executable,
                namespace,
                context,
            } => {
                let mut prefix = vec![executable.clone()];
                if let Some(context) = context {
                    prefix.extend(["--context".to_string(), context.clone()]);
                }
                prefix.extend([
                    "-n".to_string(),
                    namespace.clone(),
                    "exec".to_string(),
                    host.host.clone(),
                ]);
                if let Some(container) = &host.container {
                    prefix.extend(["-c".to_string(), container.clone()]);
                }
                prefix.push("--".to_string());
                ProcessSession {
                    host: host.host.clone(),
                    prefix,
                    remote_prefix: Vec::new(),
                    quote_remote: false,
                    close_command: None,
                }
            }
        }
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self, host: &HostRef) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let session = self.session_for(host);
        let handshake = session
            .run(&["true"])
            .await
            .map_err(|err| RemoteError::Unreachable {
                host: host.host.clone(),
                reason: err.to_string(),
            })?;
        if !handshake.success() {
            let reason = match handshake.stderr.trim() {
                "" => format!("connection check exited with code {}", handshake.exit_code),
                stderr => stderr.to_string(),
            };
            return Err(RemoteError::Unreachable {
                host: host.host.clone(),
                reason,
            });
        }
        Ok(Box::new(session))
    }
}

struct ProcessSession {
    host: String,
    prefix: Vec<String>,
    remote_prefix: Vec<String>,
    quote_remote: bool,
    close_command: Option<Vec<String>>,
}

impl ProcessSession {
    fn argv(&self, args: &[&str]) -> Vec<String> {
        let remote = self
            .remote_prefix
            .iter()
            .map(String::as_str)
            .chain(args.iter().copied());
        let mut argv = self.prefix.clone();
        if self.quote_remote {
            argv.extend(remote.map(shell_quote));
        } else {
            argv.extend(remote.map(str::to_string));
        }
        argv
    }
}

#[async_trait]
impl RemoteSession for ProcessSession {
    fn hostname(&self) -> &str {
        &self.host
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, RemoteError> {
        let argv = self.argv(args);
        debug!(host = %self.host, command = %args.join(" "), "running remote command");
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RemoteError::Spawn {
                host: self.host.clone(),
                command: args.join(" "),
                source,
            })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn close(&self) {
        let Some(close) = &self.close_command else {
            return;
        };
        let result = Command::new(&close[0])
            .args(&close[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        if let Err(err) = result {
            warn!(host = %self.host, error = %err, "failed to release ssh control master");
        }
    }
}

/// Quotes one argument for the remote POSIX shell ssh hands the command to.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_./=:,+@%-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
