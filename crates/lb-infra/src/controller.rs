//! Lifecycle controller for one vm-bhyve instance.
//!
//! Acquire runs provision → start → wait for `running`; release runs
//! poweroff → wait for `stopped` → destroy. The remote side offers no
//! notifications, so every transition is confirmed by polling `vm info`.

use std::time::Duration;

use ssh_exec::{ExecResult, RemoteChannel, RemoteCommand, SshChannel};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::commands::VmCommands;
use crate::config::WorkerConfig;
use crate::types::{PollPolicy, VmIdentity, VmStatus};
use crate::{Error, Result};

/// Drives a single VM through acquire and release.
///
/// One controller per VM, used once: the caller must not run two
/// operations on it at the same time. The cached status is written only by
/// [`refresh_status`](Self::refresh_status).
pub struct VmController {
    identity: VmIdentity,
    channel: Box<dyn RemoteChannel>,
    commands: VmCommands,
    policy: PollPolicy,
    status: VmStatus,
}

impl VmController {
    pub fn new(
        identity: VmIdentity,
        channel: Box<dyn RemoteChannel>,
        commands: VmCommands,
        policy: PollPolicy,
    ) -> Self {
        Self {
            identity,
            channel,
            commands,
            policy,
            status: VmStatus::Unknown,
        }
    }

    /// Build a controller that reaches the host over SSH.
    ///
    /// Fails with [`Error::Configuration`] when no ssh client is available.
    pub fn connect(config: &WorkerConfig) -> Result<Self> {
        let channel = SshChannel::new(config.ssh.clone())
            .map_err(|e| Error::Configuration(format!("remote execution unavailable: {e}")))?;

        info!(
            instance = config.identity.instance_name(),
            remote = channel.target(),
            "remote channel ready"
        );

        Ok(Self::new(
            config.identity.clone(),
            Box::new(channel),
            config.commands.clone(),
            config.policy,
        ))
    }

    pub fn identity(&self) -> &VmIdentity {
        &self.identity
    }

    pub(crate) fn status(&self) -> VmStatus {
        self.status
    }

    /// Provision and start the instance, returning once it is observed running.
    pub async fn acquire(&mut self) -> Result<()> {
        info!(
            instance = self.identity.instance_name(),
            image = self.identity.image(),
            host = self.identity.host(),
            "acquiring vm"
        );

        let provision = self.commands.provision(&self.identity);
        self.run_step("provision", &provision).await?;

        let start = self.commands.start(&self.identity);
        self.run_step("start", &start).await?;

        let timeout = self.policy.startup_timeout;
        if !self.wait_for(VmStatus::Running, Some(timeout)).await {
            return Err(Error::StartupTimeout {
                instance: self.identity.instance_name().to_string(),
                timeout,
            });
        }

        info!(instance = self.identity.instance_name(), "vm running");
        Ok(())
    }

    /// Power off, wait for the instance to stop, then destroy it.
    ///
    /// Best-effort: a failed poweroff or a shutdown timeout is logged and the
    /// destroy is still attempted. Only a failed destroy is returned.
    pub async fn release(&mut self) -> Result<()> {
        info!(
            instance = self.identity.instance_name(),
            host = self.identity.host(),
            last_status = %self.status(),
            "releasing vm"
        );

        let poweroff = self.commands.poweroff(&self.identity);
        if let Err(e) = self.run_step("poweroff", &poweroff).await {
            warn!(
                instance = self.identity.instance_name(),
                error = %e,
                "poweroff failed, continuing teardown"
            );
        }

        let timeout = self.policy.shutdown_timeout;
        if !self.wait_for(VmStatus::Stopped, timeout).await
            && let Some(timeout) = timeout
        {
            let e = Error::ShutdownTimeout {
                instance: self.identity.instance_name().to_string(),
                timeout,
            };
            warn!(error = %e, "destroying instance that was not observed stopped");
        }

        let destroy = self.commands.destroy(&self.identity);
        self.run_step("destroy", &destroy).await?;

        info!(instance = self.identity.instance_name(), "vm destroyed");
        Ok(())
    }

    /// Query the remote status, update the cached value and return it.
    ///
    /// Never fails: a failed query or unparseable output reads as `Unknown`.
    pub async fn refresh_status(&mut self) -> VmStatus {
        let query = self.commands.status(&self.identity);

        self.status = match self.channel.execute(&query).await {
            Ok(result) if result.success() => VmStatus::from_status_output(&result.stdout),
            Ok(result) => {
                debug!(
                    instance = self.identity.instance_name(),
                    exit_code = ?result.exit_code,
                    stderr = %result.stderr.trim_end(),
                    "status query failed"
                );
                VmStatus::Unknown
            }
            Err(e) => {
                warn!(
                    instance = self.identity.instance_name(),
                    error = %e,
                    "status query not dispatched"
                );
                VmStatus::Unknown
            }
        };

        self.status
    }

    /// Poll until `target` is observed.
    ///
    /// The status is queried once right away, rather than trusting the cached
    /// value, so a transition that finished before the first poll is seen
    /// without waiting an interval. After that poll `n` is scheduled at
    /// `n * interval` from the start, independent of how long each query
    /// takes, and only while that instant still falls within `timeout`.
    /// Returns `false` on timeout. Without a timeout this waits forever.
    async fn wait_for(&mut self, target: VmStatus, timeout: Option<Duration>) -> bool {
        let started = Instant::now();
        let interval = self.policy.interval;

        if self.refresh_status().await == target {
            return true;
        }

        let mut polls: u32 = 0;
        loop {
            let next = interval * (polls + 1);
            if let Some(limit) = timeout
                && next > limit
            {
                warn!(
                    instance = self.identity.instance_name(),
                    wanted = %target,
                    status = %self.status,
                    polls,
                    elapsed_secs = started.elapsed().as_secs(),
                    "gave up waiting for vm status"
                );
                return false;
            }

            tokio::time::sleep_until(started + next).await;
            polls += 1;

            let status = self.refresh_status().await;
            debug!(
                instance = self.identity.instance_name(),
                wanted = %target,
                status = %status,
                poll = polls,
                elapsed_secs = started.elapsed().as_secs(),
                "polled vm status"
            );

            if status == target {
                return true;
            }
        }
    }

    async fn run_step(&self, step: &'static str, command: &RemoteCommand) -> Result<()> {
        info!(
            instance = self.identity.instance_name(),
            step,
            command = %command.summary(),
            "running remote command"
        );

        let result = self
            .channel
            .execute(command)
            .await
            .map_err(|e| Error::RemoteCommandFailed {
                step,
                exit_code: None,
                detail: e.to_string(),
            })?;

        if !result.success() {
            return Err(Error::RemoteCommandFailed {
                step,
                exit_code: result.exit_code,
                detail: failure_detail(&result),
            });
        }

        Ok(())
    }
}

/// Prefer stderr, fall back to stdout; `vm` reports errors on either.
fn failure_detail(result: &ExecResult) -> String {
    let stderr = result.stderr.trim();
    if stderr.is_empty() {
        result.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}
