//! Device tree selection by display id

use anyhow::Result;
use std::path::Path;

use swu_update::panel::{CANONICAL_BLOB, detect_device_tree};

use super::GlobalOptions;
use crate::error::CliError;
use crate::output;

/// Print the device tree in `dir` (or on the medium) matching `display_id`.
pub fn execute(opts: &GlobalOptions, display_id: &str, dir: Option<&Path>) -> Result<()> {
    let config = opts.update_config();
    let dir = dir.unwrap_or(config.medium.as_path());
    let found = detect_device_tree(dir, display_id).map_err(CliError::from)?;
    output::print_device_tree(display_id, found.as_deref(), CANONICAL_BLOB, opts.json);
    Ok(())
}
