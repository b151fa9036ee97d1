pub mod commands;
pub mod functions;
pub mod process;

use crate::inventory::HostRef;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("host {host} is unreachable: {reason}")]
    Unreachable { host: String, reason: String },
    #[error("failed to execute `{command}` on {host}: {source}")]
    Spawn {
        host: String,
        command: String,
        source: std::io::Error,
    },
}

/// An open channel to a single host (optionally scoped to a container) able
/// to run fixed commands.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn hostname(&self) -> &str;

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, RemoteError>;

    /// Releases the session. Must be safe to call after a failed command.
    async fn close(&self);
}

/// Opens sessions. Failing to connect is the one error the collector
/// recovers from by pruning the host.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &HostRef) -> Result<Box<dyn RemoteSession>, RemoteError>;
}
