//! Remote command execution over the OpenSSH client.
//!
//! Covers the one thing the lifecycle controller needs from a remote host:
//! run a command as a given user and hand back its output and exit status.
//! Commands travel as structured [`RemoteCommand`]s and are quoted here, at
//! the channel, never by callers.

mod types;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ssh client binary not found on PATH")]
    ClientNotFound,

    #[error("argument cannot be passed to a remote shell: {0}")]
    InvalidArgument(String),

    #[error("failed to spawn ssh client: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A channel that runs commands on one remote host as one user.
///
/// A non-zero exit status is not an error at this level: it comes back as
/// an [`ExecResult`] whose `success()` is false. `Err` is reserved for the
/// command never having been dispatched at all.
#[async_trait]
pub trait RemoteChannel: Send + Sync + 'static {
    async fn execute(&self, command: &RemoteCommand) -> Result<ExecResult>;

    /// `user@host` of the remote side, for logging.
    fn target(&self) -> &str;
}

/// SSH options shared by every invocation.
///
/// `BatchMode=yes` makes a missing key fail fast instead of prompting.
const SSH_OPTS: &[&str] = &[
    "-o", "BatchMode=yes",
    "-o", "StrictHostKeyChecking=accept-new",
    "-o", "LogLevel=ERROR",
];

/// [`RemoteChannel`] backed by the system `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshChannel {
    config: SshConfig,
    client: PathBuf,
    target: String,
}

impl SshChannel {
    /// Create a channel, failing if no `ssh` client is installed.
    pub fn new(config: SshConfig) -> Result<Self> {
        let client = find_client()?;
        tracing::debug!(client = %client.display(), "found ssh client");
        Ok(Self::with_client(config, client))
    }

    /// Create a channel using an explicit client binary.
    pub fn with_client(config: SshConfig, client: impl Into<PathBuf>) -> Self {
        let target = config.destination();
        Self {
            config,
            client: client.into(),
            target,
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn build_command(&self, line: &str) -> Command {
        let mut cmd = Command::new(&self.client);
        cmd.args(SSH_OPTS);
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs));
        cmd.arg("-p").arg(self.config.port.to_string());
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(&self.target).arg("--").arg(line);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn execute(&self, command: &RemoteCommand) -> Result<ExecResult> {
        let line = command.render(self.config.privilege.as_deref())?;
        tracing::debug!(remote = %self.target, command = %line, "ssh exec");

        let output = self
            .build_command(&line)
            .output()
            .await
            .map_err(Error::Spawn)?;

        let result = ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if !result.success() {
            tracing::debug!(
                remote = %self.target,
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim_end(),
                "ssh exec returned failure"
            );
        }

        Ok(result)
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// Resolve the `ssh` binary, honouring `PATH` first.
fn find_client() -> Result<PathBuf> {
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join("ssh");
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
    }

    const CANDIDATES: &[&str] = &["/usr/bin/ssh", "/usr/local/bin/ssh", "/bin/ssh"];
    CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| is_executable(p))
        .ok_or(Error::ClientNotFound)
}

fn is_executable(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
