//! Scheduler-facing adapter around a [`VmController`].
//!
//! The scheduler asks for a worker with [`LatentVm::start_instance`] and
//! gives it back with [`LatentVm::stop_instance`]. Both run the controller
//! on a spawned task so the scheduler's own task is never stuck behind a
//! multi-minute remote sequence.
//!
//! Cancellation is local only. Dropping the future returned by
//! `start_instance`, or the handle returned by `stop_instance`, stops
//! waiting but does not stop the remote operation: the spawned task runs
//! the sequence to completion.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::controller::VmController;
use crate::types::{VmIdentity, VmStatus};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Acquiring,
    Acquired,
    AcquireFailed,
    Releasing,
    Released,
}

impl Phase {
    fn status(self) -> VmStatus {
        match self {
            Self::Idle | Self::AcquireFailed => VmStatus::Unknown,
            Self::Acquiring => VmStatus::Provisioning,
            Self::Acquired => VmStatus::Running,
            Self::Releasing => VmStatus::Stopping,
            Self::Released => VmStatus::Stopped,
        }
    }
}

/// One on-demand VM, acquired at most once and released at most once.
pub struct LatentVm {
    identity: VmIdentity,
    controller: Arc<tokio::sync::Mutex<VmController>>,
    phase: Arc<Mutex<Phase>>,
}

impl LatentVm {
    pub fn new(controller: VmController) -> Self {
        Self {
            identity: controller.identity().clone(),
            controller: Arc::new(tokio::sync::Mutex::new(controller)),
            phase: Arc::new(Mutex::new(Phase::Idle)),
        }
    }

    /// Build from configuration, failing if remote execution is unavailable.
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        Ok(Self::new(VmController::connect(config)?))
    }

    pub fn identity(&self) -> &VmIdentity {
        &self.identity
    }

    /// Where the VM is in its lifecycle, as seen by the scheduler.
    pub fn phase(&self) -> VmStatus {
        lock(&self.phase).status()
    }

    /// Provision and start the VM; `Ok` only once it is observed running.
    ///
    /// Only one acquire is allowed per `LatentVm`, successful or not.
    pub async fn start_instance(&self) -> Result<()> {
        {
            let mut phase = lock(&self.phase);
            if *phase != Phase::Idle {
                return Err(Error::InvalidPhase {
                    operation: "acquire",
                    phase: phase.status(),
                });
            }
            *phase = Phase::Acquiring;
        }

        let controller = Arc::clone(&self.controller);
        let outcome = tokio::spawn(async move { controller.lock().await.acquire().await })
            .await
            .unwrap_or_else(|e| Err(Error::TaskFailed(e.to_string())));

        let next = if outcome.is_ok() {
            Phase::Acquired
        } else {
            Phase::AcquireFailed
        };
        advance(&self.phase, Phase::Acquiring, next);

        if let Err(e) = &outcome {
            warn!(instance = self.identity.instance_name(), error = %e, "vm acquire failed");
        }
        outcome
    }

    /// Tear the VM down in the background.
    ///
    /// Returns immediately. The outcome is only logged; the handle lets a
    /// process that is about to exit wait for teardown. Safe to call after a
    /// failed or still-running acquire, in which case it runs once acquire
    /// has finished. Returns `None` if a release was already started.
    pub fn stop_instance(&self) -> Option<JoinHandle<()>> {
        {
            let mut phase = lock(&self.phase);
            if matches!(*phase, Phase::Releasing | Phase::Released) {
                warn!(
                    instance = self.identity.instance_name(),
                    "release already requested, ignoring"
                );
                return None;
            }
            *phase = Phase::Releasing;
        }

        let controller = Arc::clone(&self.controller);
        let phase = Arc::clone(&self.phase);
        let instance = self.identity.instance_name().to_string();

        Some(tokio::spawn(async move {
            match controller.lock().await.release().await {
                Ok(()) => info!(instance = %instance, "vm released"),
                Err(e) => error!(instance = %instance, error = %e, "vm release failed"),
            }
            *lock(&phase) = Phase::Released;
        }))
    }
}

fn lock(phase: &Mutex<Phase>) -> MutexGuard<'_, Phase> {
    phase.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Move `from` to `to` unless a release has taken over in the meantime.
fn advance(phase: &Mutex<Phase>, from: Phase, to: Phase) {
    let mut phase = lock(phase);
    if *phase == from {
        *phase = to;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::commands::VmCommands;
    use crate::testing::{Reply, ScriptedChannel};
    use crate::types::PollPolicy;

    fn latent(channel: &ScriptedChannel) -> LatentVm {
        let identity = VmIdentity::new("freebsd-14.1", "worker-1", "bhyve01", "buildbot").unwrap();
        LatentVm::new(VmController::new(
            identity,
            Box::new(channel.clone()),
            VmCommands::default(),
            PollPolicy::from_secs(20, 300),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn full_lifecycle_reports_phases() {
        let channel = ScriptedChannel::new().statuses(["", "running\n", "running\n", "stopped\n"]);
        let vm = latent(&channel);
        assert_eq!(vm.phase(), VmStatus::Unknown);

        vm.start_instance().await.unwrap();
        assert_eq!(vm.phase(), VmStatus::Running);

        let handle = vm.stop_instance().unwrap();
        assert_eq!(vm.phase(), VmStatus::Stopping);
        handle.await.unwrap();

        assert_eq!(vm.phase(), VmStatus::Stopped);
        assert_eq!(
            channel.steps(),
            ["image", "start", "info", "info", "poweroff", "info", "info", "destroy"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_runs_only_once() {
        let channel = ScriptedChannel::new().on("image", [Reply::Exit(1)]);
        let vm = latent(&channel);

        assert!(vm.start_instance().await.is_err());
        assert_eq!(vm.phase(), VmStatus::Unknown);

        let err = vm.start_instance().await.unwrap_err();
        assert!(matches!(err, Error::InvalidPhase { operation: "acquire", .. }));
        assert_eq!(channel.count("image"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn release_after_failed_acquire_still_tears_down() {
        let channel = ScriptedChannel::new()
            .on("start", [Reply::Exit(1)])
            .statuses(["stopped\n"]);
        let vm = latent(&channel);

        assert!(vm.start_instance().await.is_err());
        vm.stop_instance().unwrap().await.unwrap();

        assert_eq!(channel.count("poweroff"), 1);
        assert_eq!(channel.count("destroy"), 1);
        assert_eq!(vm.phase(), VmStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn release_failure_is_not_raised_to_caller() {
        let channel = ScriptedChannel::new()
            .on("poweroff", [Reply::Unreachable])
            .on("destroy", [Reply::Exit(1)])
            .statuses(["stopped\n"]);
        let vm = latent(&channel);

        let handle = vm.stop_instance().unwrap();
        handle.await.unwrap();

        assert_eq!(vm.phase(), VmStatus::Stopped);
        assert_eq!(channel.count("destroy"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_release_is_ignored() {
        let channel = ScriptedChannel::new().statuses(["stopped\n"]);
        let vm = latent(&channel);

        let first = vm.stop_instance();
        let second = vm.stop_instance();

        assert!(first.is_some());
        assert!(second.is_none());
        first.unwrap().await.unwrap();
        assert_eq!(channel.count("poweroff"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_does_not_block_the_caller() {
        let channel = ScriptedChannel::new().statuses(["running\n", "running\n", "stopped\n"]);
        let vm = latent(&channel);
        let started = tokio::time::Instant::now();

        let handle = vm.stop_instance().unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(vm.phase(), VmStatus::Stopping);

        handle.await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn release_during_acquire_waits_for_it() {
        let channel = ScriptedChannel::new().statuses(["", "running\n", "stopped\n"]);
        let vm = Arc::new(latent(&channel));

        let acquiring = {
            let vm = Arc::clone(&vm);
            tokio::spawn(async move { vm.start_instance().await })
        };
        while channel.count("info") == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(vm.phase(), VmStatus::Provisioning);

        let release = vm.stop_instance().unwrap();
        acquiring.await.unwrap().unwrap();
        release.await.unwrap();

        assert_eq!(vm.phase(), VmStatus::Stopped);
        assert_eq!(
            channel.steps(),
            ["image", "start", "info", "info", "poweroff", "info", "destroy"]
        );
    }
}
