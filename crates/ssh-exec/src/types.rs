use std::borrow::Cow;
use std::path::PathBuf;

use crate::{Error, Result};

// ── Commands ────────────────────────────────────────────────────────

/// A command to run on the remote host, kept as structured arguments.
///
/// Nothing in here is ever concatenated into a shell line unquoted: every
/// element of `argv` and of each `pipeline` stage is quoted by [`render`].
///
/// [`render`]: RemoteCommand::render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Run the first stage through the channel's privilege escalation program.
    pub privileged: bool,
    /// Feed `yes` into the first stage to answer confirmation prompts.
    pub confirm: bool,
    pub argv: Vec<String>,
    /// Post-processing stages piped after the first stage.
    pub pipeline: Vec<Vec<String>>,
}

impl RemoteCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            privileged: false,
            confirm: false,
            argv: argv.into_iter().map(Into::into).collect(),
            pipeline: Vec::new(),
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.confirm = true;
        self
    }

    pub fn pipe<I, S>(mut self, stage: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipeline.push(stage.into_iter().map(Into::into).collect());
        self
    }

    /// Short human-readable form for logs (`vm start web01`), unquoted.
    pub fn summary(&self) -> String {
        self.argv.join(" ")
    }

    /// Render the shell line the remote side will run.
    ///
    /// `privilege` is the escalation program (e.g. `sudo` or `doas -n`); it
    /// is only applied when the command is `privileged`.
    pub fn render(&self, privilege: Option<&str>) -> Result<String> {
        let mut first: Vec<Cow<'_, str>> = Vec::new();
        if self.privileged
            && let Some(program) = privilege
        {
            for word in program.split_whitespace() {
                first.push(quote(word)?);
            }
        }
        for arg in &self.argv {
            first.push(quote(arg)?);
        }

        let mut stages = Vec::with_capacity(self.pipeline.len() + 2);
        if self.confirm {
            stages.push("yes".to_string());
        }
        stages.push(first.join(" "));
        for stage in &self.pipeline {
            let quoted = stage
                .iter()
                .map(|arg| quote(arg))
                .collect::<Result<Vec<_>>>()?;
            stages.push(quoted.join(" "));
        }

        Ok(stages.join(" | "))
    }
}

fn quote(arg: &str) -> Result<Cow<'_, str>> {
    shlex::try_quote(arg).map_err(|_| Error::InvalidArgument(arg.escape_debug().to_string()))
}

// ── Results ─────────────────────────────────────────────────────────

/// Captured outcome of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ── Connection ──────────────────────────────────────────────────────

/// Connection settings for [`SshChannel`](crate::SshChannel).
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    /// Privilege escalation program for privileged commands.
    pub privilege: Option<String>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            privilege: Some("sudo".into()),
        }
    }

    /// `user@host` destination passed to the ssh client.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}
