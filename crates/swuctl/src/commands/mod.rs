//! Command implementations for swuctl

pub mod check_config;
pub mod detect_dtb;
pub mod resolve;
pub mod run;
pub mod verify;

use clap::Subcommand;
use std::path::PathBuf;

use swu_update::{CONFIG_VERSION, UpdateConfig};

#[derive(Subcommand)]
pub enum Commands {
    /// Apply the update described by the config file on the medium
    Run {
        /// Wait for the medium to be removed once the run is over
        #[arg(long)]
        halt: bool,
        /// Digest algorithm of the sidecar files
        #[arg(long, default_value = "md5")]
        digest: String,
        /// Config file name on the medium
        #[arg(long, default_value = "swupdate.cfg")]
        config: String,
    },

    /// Show where an image class is written on a device family
    Resolve {
        /// Image class (bootloader, bootloader-env, full-os, rootfs, kernel, device-tree, panel)
        #[arg(requires = "family")]
        class: Option<String>,
        /// Device family (flash, emmc, sd, mmc, sata)
        family: Option<String>,
    },

    /// Check a file against its digest sidecar
    Verify {
        /// Image with a sidecar next to it
        source: PathBuf,
        /// Written copy to compare instead of the source itself
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Digest algorithm of the sidecar
        #[arg(long, default_value = "md5")]
        digest: String,
    },

    /// Pick the device tree built for a display
    DetectDtb {
        /// Display identifier
        display_id: String,
        /// Directory holding the device trees (defaults to the medium)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Parse a config file without applying it
    CheckConfig {
        /// Config file (defaults to the one on the medium)
        path: Option<PathBuf>,
        /// Version the header must carry
        #[arg(long, default_value = CONFIG_VERSION)]
        expected_version: String,
    },
}

/// Options shared by every command
pub struct GlobalOptions {
    pub json: bool,
    pub verbose: u8,
    pub medium: Option<PathBuf>,
    pub sysroot: Option<PathBuf>,
}

impl GlobalOptions {
    /// Run settings with the medium and sysroot overrides applied.
    pub fn update_config(&self) -> UpdateConfig {
        let mut config = UpdateConfig::default();
        if let Some(medium) = &self.medium {
            config.medium.clone_from(medium);
        }
        if let Some(sysroot) = &self.sysroot {
            config.sysroot.clone_from(sysroot);
        }
        config
    }
}
