pub mod commands;
pub mod config;
pub mod controller;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

use std::time::Duration;

pub use commands::VmCommands;
pub use config::WorkerConfig;
pub use controller::VmController;
pub use types::{PollPolicy, VmIdentity, VmStatus};
pub use worker::LatentVm;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: String, value: String },

    #[error("remote command `{step}` failed (exit {exit_code:?}): {detail}")]
    RemoteCommandFailed {
        step: &'static str,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("instance {instance} not running after {timeout:?}")]
    StartupTimeout { instance: String, timeout: Duration },

    #[error("instance {instance} not stopped after {timeout:?}")]
    ShutdownTimeout { instance: String, timeout: Duration },

    #[error("cannot {operation} while instance is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: VmStatus,
    },

    #[error("lifecycle task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
