use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

/// The VM a controller manages. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmIdentity {
    image: String,
    instance_name: String,
    host: String,
    user: String,
}

impl VmIdentity {
    /// Build an identity, rejecting empty fields.
    pub fn new(
        image: impl Into<String>,
        instance_name: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            image: image.into(),
            instance_name: instance_name.into(),
            host: host.into(),
            user: user.into(),
        };

        for (field, value) in [
            ("image", &identity.image),
            ("instance name", &identity.instance_name),
            ("host", &identity.host),
            ("user", &identity.user),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("vm {field} must not be empty")));
            }
        }

        Ok(identity)
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

/// Best-known lifecycle state of the instance.
///
/// The remote host is authoritative. The status parser only ever yields
/// `Running`, `Stopped` or `Unknown`; `Provisioning` and `Stopping` describe
/// an operation in flight and are reported by [`LatentVm`](crate::LatentVm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VmStatus {
    #[default]
    Unknown,
    Provisioning,
    Running,
    Stopping,
    Stopped,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Parse the output of the status query.
    ///
    /// Matching is exact, trailing newline included. Anything else, empty
    /// output and error text among it, is `Unknown`: a guess here could hand
    /// a VM to the scheduler before it is up.
    pub fn from_status_output(output: &str) -> Self {
        match output {
            "running\n" => Self::Running,
            "stopped\n" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often and how long to poll while waiting for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Bound on waiting for `Running` during acquire.
    pub startup_timeout: Duration,
    /// Bound on waiting for `Stopped` during release; `None` waits forever.
    pub shutdown_timeout: Option<Duration>,
}

impl PollPolicy {
    pub const DEFAULT_INTERVAL_SECS: u64 = 20;
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Policy with the same bound for startup and shutdown.
    pub fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        let timeout = Duration::from_secs(timeout_secs);
        Self {
            interval: Duration::from_secs(interval_secs),
            startup_timeout: timeout,
            shutdown_timeout: Some(timeout),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_secs(Self::DEFAULT_INTERVAL_SECS, Self::DEFAULT_TIMEOUT_SECS)
    }
}
