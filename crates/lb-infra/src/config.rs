use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ssh_exec::SshConfig;

use crate::commands::VmCommands;
use crate::types::{PollPolicy, VmIdentity};
use crate::{Error, Result};

/// Everything needed to manage one VM, loaded at construction.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub identity: VmIdentity,
    pub ssh: SshConfig,
    pub commands: VmCommands,
    pub policy: PollPolicy,
}

impl WorkerConfig {
    /// Load from env vars (and `.env` if present):
    ///
    /// - `LB_VM_IMAGE`, `LB_VM_NAME`, `LB_VM_HOST`, `LB_VM_USER` (required)
    /// - `LB_SSH_PORT` (default: `22`)
    /// - `LB_SSH_IDENTITY` (optional, private key path)
    /// - `LB_SSH_CONNECT_TIMEOUT_SECS` (default: `10`)
    /// - `LB_VM_DATASTORE` (optional)
    /// - `LB_VM_BINARY` (default: `"vm"`)
    /// - `LB_PRIVILEGE_COMMAND` (default: `"sudo"`, empty for none)
    /// - `LB_POLL_INTERVAL_SECS` (default: `20`)
    /// - `LB_POLL_TIMEOUT_SECS` (default: `300`)
    /// - `LB_SHUTDOWN_TIMEOUT_SECS` (default: poll timeout, `0` waits forever)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let identity = VmIdentity::new(
            required(&lookup, "LB_VM_IMAGE")?,
            required(&lookup, "LB_VM_NAME")?,
            required(&lookup, "LB_VM_HOST")?,
            required(&lookup, "LB_VM_USER")?,
        )?;

        let mut ssh = SshConfig::new(identity.host(), identity.user());
        ssh.port = parsed(&lookup, "LB_SSH_PORT", ssh.port)?;
        ssh.connect_timeout_secs =
            parsed(&lookup, "LB_SSH_CONNECT_TIMEOUT_SECS", ssh.connect_timeout_secs)?;
        ssh.identity_file = optional(&lookup, "LB_SSH_IDENTITY").map(PathBuf::from);
        if let Some(privilege) = lookup("LB_PRIVILEGE_COMMAND") {
            let privilege = privilege.trim();
            ssh.privilege = (!privilege.is_empty()).then(|| privilege.to_string());
        }

        let commands = VmCommands {
            vm_binary: optional(&lookup, "LB_VM_BINARY").unwrap_or_else(|| "vm".into()),
            datastore: optional(&lookup, "LB_VM_DATASTORE"),
        };

        let interval_secs = parsed(
            &lookup,
            "LB_POLL_INTERVAL_SECS",
            PollPolicy::DEFAULT_INTERVAL_SECS,
        )?;
        if interval_secs == 0 {
            return Err(Error::Configuration(
                "LB_POLL_INTERVAL_SECS must be greater than zero".into(),
            ));
        }
        let timeout_secs = parsed(&lookup, "LB_POLL_TIMEOUT_SECS", PollPolicy::DEFAULT_TIMEOUT_SECS)?;
        let shutdown_secs = parsed(&lookup, "LB_SHUTDOWN_TIMEOUT_SECS", timeout_secs)?;

        let policy = PollPolicy {
            shutdown_timeout: (shutdown_secs > 0).then(|| Duration::from_secs(shutdown_secs)),
            ..PollPolicy::from_secs(interval_secs, timeout_secs)
        };

        Ok(Self {
            identity,
            ssh,
            commands,
            policy,
        })
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .ok_or_else(|| Error::MissingEnv(name.into()))
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match optional(lookup, name) {
        Some(raw) => raw.parse().map_err(|_| Error::InvalidEnv {
            name: name.into(),
            value: raw,
        }),
        None => Ok(default),
    }
}
