use std::process::ExitCode;

use lb_infra::{LatentVm, WorkerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let vm = match LatentVm::from_config(&config) {
        Ok(vm) => vm,
        Err(e) => {
            tracing::error!(error = %e, "cannot manage vm");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        instance = vm.identity().instance_name(),
        host = vm.identity().host(),
        interval_secs = config.policy.interval.as_secs(),
        timeout_secs = config.policy.startup_timeout.as_secs(),
        "starting vm"
    );

    let acquired = vm.start_instance().await;
    if acquired.is_ok() {
        tracing::info!(instance = vm.identity().instance_name(), "vm ready, ctrl-c to release");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    }

    // Tear down even after a failed acquire so a half-built instance is not left behind.
    if let Some(release) = vm.stop_instance()
        && let Err(e) = release.await
    {
        tracing::error!(error = %e, "release task failed");
    }

    tracing::info!(phase = %vm.phase(), "done");

    if acquired.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
