//! Output formatting for CLI responses

use anyhow::Error;
use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use std::path::Path;

use swu_update::{
    BootSwitch, ConfigFile, StatusEvent, StatusObserver, TargetDescriptor, UpdateReport,
    UpdateStatus, VerificationResult,
};

/// Print a JSON document, reporting serialization failures on stderr.
fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format output as JSON: {e}"),
    }
}

/// Print a successful result wrapped in the usual envelope.
fn print_success<T: Serialize>(key: &str, value: &T) {
    print_json(&json!({
        "success": true,
        key: value,
    }));
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    print_json(&json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "exit_code": crate::error::exit_code(error),
        }
    }));
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Prints status events as the run progresses
pub struct ConsoleObserver {
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl StatusObserver for ConsoleObserver {
    fn notify(&self, event: StatusEvent) {
        if self.quiet {
            return;
        }
        let label = match event {
            StatusEvent::Preparation | StatusEvent::Progress => event.to_string().cyan(),
            StatusEvent::Success => event.to_string().green(),
            StatusEvent::Fail => event.to_string().red(),
            StatusEvent::Disabled => event.to_string().yellow(),
        };
        eprintln!("{} {}", "==>".bold(), label.bold());
    }
}

/// Print the report of an update run
pub fn print_report(report: &UpdateReport, json: bool) {
    if json {
        print_json(&json!({
            "success": report.result.is_success(),
            "report": report,
        }));
        return;
    }

    println!("{} {}", "Config version:".bold(), report.config_version);

    if let Some(script) = &report.script {
        println!("  Script {} exited with {}", script.path.display(), script.exit_code);
    }

    for outcome in &report.outcomes {
        let status = match &outcome.status {
            UpdateStatus::Skipped => "skipped".dimmed(),
            UpdateStatus::Success => "success".green(),
            UpdateStatus::Failed { reason } => format!("failed: {reason}").red(),
        };
        println!("  {:<16} {}", outcome.image_class.as_str(), status);
    }

    match &report.boot_switch {
        BootSwitch::Performed { device } => println!("  Boot target: {}", device.green()),
        BootSwitch::NotRequired => println!("  Boot target: {}", "unchanged".dimmed()),
        BootSwitch::Withheld { reason } => {
            println!("  Boot target: {} ({})", "withheld".yellow(), reason)
        }
        BootSwitch::Failed { reason } => println!("  Boot target: {} ({})", "failed".red(), reason),
    }

    if report.result.is_success() {
        println!("{}", "Update succeeded".green().bold());
    } else {
        println!("{}", "Update failed".red().bold());
    }
}

/// Print one resolved target or the whole table
pub fn print_targets(targets: &[TargetDescriptor], json: bool) {
    if json {
        print_success("targets", &targets);
        return;
    }
    for target in targets {
        let kind = target.handler_kind.to_string();
        println!(
            "  {:<16} {:<6} {:<8} {}",
            target.image_class.as_str(),
            target.device_family.as_str(),
            kind,
            target.device_path.bold()
        );
    }
}

/// Print a verification result
pub fn print_verification(source: &Path, result: &VerificationResult, json: bool) {
    if json {
        print_json(&json!({
            "success": result.verified,
            "source": source,
            "verification": result,
        }));
        return;
    }
    let verdict = if result.verified { "OK".green() } else { "FAILED".red() };
    println!("{}: {} ({})", source.display(), verdict.bold(), result.reason);
}

/// Print the device tree picked for a display
pub fn print_device_tree(display_id: &str, found: Option<&str>, default: &str, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "display_id": display_id,
            "device_tree": found.unwrap_or(default),
            "default": found.is_none(),
        }));
        return;
    }
    match found {
        Some(name) => println!("{}", name.bold()),
        None => println!("{} {}", default.bold(), "(default)".dimmed()),
    }
}

/// Print a parsed config file
pub fn print_config(path: &Path, file: &ConfigFile, json: bool) {
    if json {
        print_success("config", file);
        return;
    }
    println!("{} {} (version {})", "Config:".bold(), path.display(), file.version);
    for (key, value) in &file.entries {
        println!("  {}={}", key.cyan(), value);
    }
}
