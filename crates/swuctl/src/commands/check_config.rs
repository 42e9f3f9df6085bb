//! Config file check

use anyhow::Result;
use std::path::Path;

use swu_update::{ConfigLoader, MemoryEnv, SwuError};

use super::GlobalOptions;
use crate::error::CliError;
use crate::output;

/// Load a config file through the version gate and print its entries.
pub fn execute(opts: &GlobalOptions, path: Option<&Path>, expected_version: &str) -> Result<()> {
    let default_path = opts.update_config().config_path();
    let path = path.unwrap_or(default_path.as_path());

    let mut env = MemoryEnv::new();
    let file = ConfigLoader::new(expected_version)
        .load(path, &mut env)
        .map_err(|e| CliError::from(SwuError::from(e)))?;
    output::print_config(path, &file, opts.json);
    Ok(())
}
