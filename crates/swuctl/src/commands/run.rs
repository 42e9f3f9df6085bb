//! Update run

use anyhow::Result;
use std::process::ExitCode;
use tracing::info;

use swu_update::{FlatDeviceTree, HostPlatform, MemoryEnv, Orchestrator, UpdateConfig};

use super::GlobalOptions;
use crate::error::CliError;
use crate::output::{self, ConsoleObserver};

/// Run the update from the medium.
pub fn execute(
    opts: &GlobalOptions,
    halt: bool,
    digest: &str,
    config_file: &str,
) -> Result<ExitCode> {
    let config = UpdateConfig {
        digest: digest.to_string(),
        config_file: config_file.to_string(),
        halt_on_completion: halt,
        ..opts.update_config()
    };
    info!("Updating from {} into {}", config.medium.display(), config.sysroot.display());

    let platform = HostPlatform::new(&config.sysroot);
    let observer = ConsoleObserver::new(opts.json);
    let orchestrator = Orchestrator::new(config, &platform, &FlatDeviceTree, Some(&observer))
        .verbose(opts.verbose > 0);

    let mut env = MemoryEnv::new();
    let report = orchestrator.run(&mut env).map_err(CliError::from)?;
    output::print_report(&report, opts.json);

    Ok(if report.result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
