//! Target table lookup

use anyhow::Result;

use swu_update::target::supported_targets;
use swu_update::{DeviceFamily, ImageClass, SwuError, TargetDescriptor, resolve};

use super::GlobalOptions;
use crate::error::CliError;
use crate::output;

/// Resolve one pair, or list the whole table when no class is given.
pub fn execute(opts: &GlobalOptions, class: Option<&str>, family: Option<&str>) -> Result<()> {
    let targets = lookup(class, family).map_err(CliError::from)?;
    output::print_targets(&targets, opts.json);
    Ok(())
}

fn lookup(class: Option<&str>, family: Option<&str>) -> Result<Vec<TargetDescriptor>, SwuError> {
    match (class, family) {
        (Some(class), Some(family)) => {
            let class: ImageClass = class.parse()?;
            let family: DeviceFamily = family.parse()?;
            Ok(vec![resolve(class, family)?])
        }
        _ => supported_targets()
            .map(|(class, family)| resolve(class, family))
            .collect(),
    }
}
