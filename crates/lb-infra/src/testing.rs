//! Scripted in-memory channel for lifecycle tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh_exec::{ExecResult, RemoteChannel, RemoteCommand};
use tokio::time::Instant;

/// What the fake host answers for one invocation.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Ok(&'static str),
    Exit(i32),
    Unreachable,
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    /// vm-bhyve subcommand (`image`, `start`, `info`, `poweroff`, `destroy`).
    pub step: String,
    pub at: Duration,
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, VecDeque<Reply>>,
    calls: Vec<Call>,
}

/// Replays scripted replies keyed by vm-bhyve subcommand.
///
/// The last reply queued for a step repeats forever; steps with nothing
/// queued succeed with empty output.
#[derive(Clone)]
pub(crate) struct ScriptedChannel {
    script: Arc<Mutex<Script>>,
    started: Instant,
    latency: Duration,
    target: String,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self {
            script: Arc::default(),
            started: Instant::now(),
            latency: Duration::ZERO,
            target: "buildbot@bhyve01".into(),
        }
    }

    /// Make every call take `latency` of (virtual) time after it is dispatched.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Time since the channel was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn on(self, step: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.lock()
            .replies
            .insert(step.to_string(), replies.into_iter().collect());
        self
    }

    /// Status query answers, one per poll.
    pub fn statuses(self, outputs: impl IntoIterator<Item = &'static str>) -> Self {
        self.on("info", outputs.into_iter().map(Reply::Ok))
    }

    pub fn steps(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.step.clone()).collect()
    }

    pub fn count(&self, step: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.step == step).count()
    }

    /// Offsets from channel creation at which `step` ran.
    pub fn times(&self, step: &str) -> Vec<Duration> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.step == step)
            .map(|c| c.at)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl RemoteChannel for ScriptedChannel {
    async fn execute(&self, command: &RemoteCommand) -> ssh_exec::Result<ExecResult> {
        let step = command.argv.get(1).cloned().unwrap_or_default();
        let reply = {
            let mut script = self.lock();
            script.calls.push(Call {
                step: step.clone(),
                at: self.started.elapsed(),
            });
            match script.replies.get_mut(&step) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match reply.unwrap_or(Reply::Ok("")) {
            Reply::Ok(stdout) => Ok(ExecResult {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
            Reply::Exit(code) => Ok(ExecResult {
                stdout: String::new(),
                stderr: format!("vm: exited with {code}\n"),
                exit_code: Some(code),
            }),
            Reply::Unreachable => Err(ssh_exec::Error::Spawn(std::io::Error::other(
                "connection refused",
            ))),
        }
    }

    fn target(&self) -> &str {
        &self.target
    }
}
