//! swuctl - Software update control
//!
//! Applies an update from removable media into a device root, and inspects
//! the pieces of an update (target table, digest sidecars, config files,
//! device tree selection) without applying anything.

#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod output;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Commands, GlobalOptions};

#[derive(Parser)]
#[command(name = "swuctl")]
#[command(about = "Software update control - apply and inspect updates from removable media")]
#[command(version)]
#[command(long_about = "
swuctl applies the update described by swupdate.cfg on an update medium:
bootloader, bootloader environment, OS images and display panel timings.
Device paths are resolved below --sysroot, so a run can be rehearsed on a
directory tree before it is used on a board.

Use --json flag for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(long, global = true, help = "Output in JSON format for machine parsing")]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Root of the update medium
    #[arg(long, global = true, env = "SWU_MEDIUM")]
    medium: Option<PathBuf>,

    /// Directory device paths are resolved under
    #[arg(long, global = true, env = "SWU_SYSROOT")]
    sysroot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            json: self.json,
            verbose: self.verbose,
            medium: self.medium.clone(),
            sysroot: self.sysroot.clone(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("swuctl={log_level},swu_update={log_level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(code) => code,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(error::exit_code(&e))
        }
    }
}

fn execute_command(cli: &Cli) -> Result<ExitCode> {
    let opts = cli.global_options();
    match &cli.command {
        Commands::Run { halt, digest, config } => {
            commands::run::execute(&opts, *halt, digest, config)
        }
        Commands::Resolve { class, family } => {
            commands::resolve::execute(&opts, class.as_deref(), family.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { source, dest, digest } => {
            commands::verify::execute(&opts, source, dest.as_deref(), digest)
        }
        Commands::DetectDtb { display_id, dir } => {
            commands::detect_dtb::execute(&opts, display_id, dir.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { path, expected_version } => {
            commands::check_config::execute(&opts, path.as_deref(), expected_version)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_run_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["swuctl", "run"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        match cli.command {
            Commands::Run { halt, digest, config } => {
                assert!(!halt);
                assert_eq!(digest, "md5");
                assert_eq!(config, "swupdate.cfg");
            }
            _ => return Err("expected run".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli =
            Cli::try_parse_from(["swuctl", "resolve", "--json", "-vv", "--medium", "/media/usb0"])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.medium, Some(PathBuf::from("/media/usb0")));
        Ok(())
    }

    #[test]
    fn parse_resolve_class_requires_family() {
        assert!(matches!(Cli::try_parse_from(["swuctl", "resolve", "kernel"]), Err(_)));
        assert!(matches!(Cli::try_parse_from(["swuctl", "resolve", "kernel", "emmc"]), Ok(_)));
    }

    #[test]
    fn medium_override_applies_to_config() -> TestResult {
        let cli = Cli::try_parse_from([
            "swuctl",
            "--medium",
            "/media/usb0",
            "--sysroot",
            "/tmp/root",
            "run",
        ])?;
        let config = cli.global_options().update_config();
        assert_eq!(config.config_path(), PathBuf::from("/media/usb0/swupdate.cfg"));
        assert_eq!(config.sysroot, PathBuf::from("/tmp/root"));
        Ok(())
    }
}
