//! End-to-end update run
//!
//! A run prepares the medium, gates on the config file version, loads the
//! config into the environment and then walks the image classes in a fixed
//! order. Every step yields an [`UpdateOutcome`]; a failed image never stops
//! the run. The boot target is switched last, and only when every attempted
//! OS image succeeded.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, UpdateConfig};
use crate::env::{DEFAULT_ENV, EnvStore, keys};
use crate::error::{ConfigError, IoResultExt, SwuError};
use crate::fdt::FdtCodec;
use crate::handler::{HandlerContext, dispatch};
use crate::log::UpdateLog;
use crate::panel::{CANONICAL_BLOB, panel_update_requested};
use crate::platform::Platform;
use crate::request::{UpdateOutcome, UpdateRequest, UpdateStatus};
use crate::status::{StatusEvent, StatusObserver};
use crate::target::{DeviceFamily, ImageClass, Role, resolve};
use crate::verify::{DigestAlgorithm, Verifier};

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    /// Every attempted step succeeded
    Success,
    /// At least one attempted step failed
    Failed,
}

impl RunResult {
    /// Whether the run succeeded.
    pub fn is_success(self) -> bool {
        self == RunResult::Success
    }
}

/// What happened to the boot target selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BootSwitch {
    /// Boot target switched to `device`
    Performed {
        /// Device booted next
        device: String,
    },
    /// No OS image was updated
    NotRequired,
    /// An OS image failed, the previous target stays
    Withheld {
        /// Why the switch was not made
        reason: String,
    },
    /// Writing the selection failed
    Failed {
        /// What went wrong
        reason: String,
    },
}

/// Script executed instead of the image steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRun {
    /// Script path
    pub path: PathBuf,
    /// Exit status
    pub exit_code: i32,
}

/// Summary of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    /// Version from the config header
    pub config_version: String,
    /// One outcome per image class, in processing order
    pub outcomes: Vec<UpdateOutcome>,
    /// Boot target handling
    pub boot_switch: BootSwitch,
    /// Script run, when the config delegated to one
    pub script: Option<ScriptRun>,
    /// Combined result
    pub result: RunResult,
}

impl UpdateReport {
    /// Outcome of `class`.
    pub fn outcome(&self, class: ImageClass) -> Option<&UpdateStatus> {
        self.outcomes
            .iter()
            .find(|o| o.image_class == class)
            .map(|o| &o.status)
    }

    /// Image classes that were attempted.
    pub fn attempted(&self) -> Vec<ImageClass> {
        self.outcomes
            .iter()
            .filter(|o| o.status != UpdateStatus::Skipped)
            .map(|o| o.image_class)
            .collect()
    }
}

/// Drives an update run
pub struct Orchestrator<'a> {
    config: UpdateConfig,
    platform: &'a dyn Platform,
    codec: &'a dyn FdtCodec,
    observer: Option<&'a dyn StatusObserver>,
    verbose: bool,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator. `observer`, when given, receives every status
    /// event of every run.
    pub fn new(
        config: UpdateConfig,
        platform: &'a dyn Platform,
        codec: &'a dyn FdtCodec,
        observer: Option<&'a dyn StatusObserver>,
    ) -> Self {
        Self {
            config,
            platform,
            codec,
            observer,
            verbose: false,
        }
    }

    /// Log every handler stage.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    fn notify(&self, event: StatusEvent) {
        info!("Status: {}", event);
        if let Some(observer) = self.observer {
            observer.notify(event);
        }
    }

    /// Run the update.
    ///
    /// # Errors
    ///
    /// Returns an error only when the run is aborted before any image is
    /// touched: missing medium, rejected config or unknown digest algorithm.
    /// Image failures are reported in the [`UpdateReport`].
    pub fn run(&self, env: &mut dyn EnvStore) -> Result<UpdateReport, SwuError> {
        self.notify(StatusEvent::Preparation);
        let log = UpdateLog::new(self.platform.host_path(&self.config.log_path()));

        let prepared = self.prepare(env, &log);
        let (config_version, verifier) = match prepared {
            Ok(ready) => ready,
            Err(e) => {
                error!("Update aborted: {}", e);
                log.record(&format!("aborted: {e}"));
                self.notify(StatusEvent::Fail);
                return Err(e);
            }
        };
        self.notify(StatusEvent::Progress);
        let env: &dyn EnvStore = env;

        if let Some(script) = env.get(keys::UPDATE_SCRIPT) {
            let report = self.run_script(script, config_version, &log);
            self.copy_log(env, &log);
            self.notify(StatusEvent::Disabled);
            return Ok(report);
        }

        let ctx = HandlerContext {
            platform: self.platform,
            verifier,
            codec: self.codec,
            env,
            scratch_mount: &self.config.scratch_mount,
            log: Some(&log),
        };

        let full_image = env.get(keys::FULL_IMAGE).is_some_and(|v| !v.trim().is_empty());
        let outcomes: Vec<UpdateOutcome> = ImageClass::ALL
            .into_iter()
            .map(|class| {
                let outcome = self.step(&ctx, class, full_image);
                log.record(&format!("{}: {}", class, outcome.status));
                outcome
            })
            .collect();

        let boot_switch = self.switch_boot_target(env, &outcomes);
        log.record(&format!("boot switch: {boot_switch:?}"));

        let failed = outcomes.iter().any(|o| o.status.is_failed())
            || matches!(boot_switch, BootSwitch::Failed { .. });
        let result = if failed { RunResult::Failed } else { RunResult::Success };
        info!("Update finished: {:?}", result);
        log.record(&format!("result: {result:?}"));

        self.copy_log(env, &log);
        self.notify(if failed { StatusEvent::Fail } else { StatusEvent::Success });

        if self.config.halt_on_completion {
            self.wait_for_removal();
        }

        Ok(UpdateReport {
            config_version,
            outcomes,
            boot_switch,
            script: None,
            result,
        })
    }

    /// Block until the update medium is removed.
    pub fn wait_for_removal(&self) {
        info!("Update complete, remove the update medium");
        while self.platform.medium_present(&self.config.medium) {
            thread::sleep(self.config.media_poll_interval);
        }
    }

    fn prepare(
        &self,
        env: &mut dyn EnvStore,
        log: &UpdateLog,
    ) -> Result<(String, Verifier), SwuError> {
        if !self.platform.medium_present(&self.config.medium) {
            return Err(ConfigError::MediumMissing(self.config.medium.clone()).into());
        }
        let algorithm: DigestAlgorithm = self.config.digest.parse()?;

        let path = self.config.config_path();
        log.record(&format!("loading {}", path.display()));
        let file = ConfigLoader::new(&self.config.expected_version).load(&path, env)?;
        Ok((file.version, Verifier::new(algorithm)))
    }

    fn run_script(&self, script: &str, config_version: String, log: &UpdateLog) -> UpdateReport {
        let path = self.config.medium_path(script);
        info!("Running update script {}", path.display());
        log.record(&format!("script: {}", path.display()));

        let (exit_code, result) = match self.platform.run_script(&path) {
            Ok(code) => (code, if code == 0 { RunResult::Success } else { RunResult::Failed }),
            Err(e) => {
                error!("Update script failed to start: {}", e);
                (-1, RunResult::Failed)
            }
        };
        log.record(&format!("script exit status: {exit_code}"));

        UpdateReport {
            config_version,
            outcomes: Vec::new(),
            boot_switch: BootSwitch::NotRequired,
            script: Some(ScriptRun { path, exit_code }),
            result,
        }
    }

    fn family(&self, env: &dyn EnvStore, role: Role) -> Result<DeviceFamily, SwuError> {
        match env.get(role.env_key()) {
            Some(value) => value.trim().parse(),
            None => Ok(self.config.default_family(role)),
        }
    }

    fn step(&self, ctx: &HandlerContext<'_>, class: ImageClass, full_image: bool) -> UpdateOutcome {
        let env = ctx.env;
        let value = if class == ImageClass::Panel {
            panel_update_requested(env).then_some(CANONICAL_BLOB)
        } else {
            env.get(class.env_key()).map(str::trim).filter(|v| !v.is_empty())
        };
        let Some(value) = value else {
            return UpdateOutcome::skipped(class);
        };
        if full_image && class.is_os_component() {
            info!("{} superseded by the full image", class);
            return UpdateOutcome::skipped(class);
        }

        match self.build_request(env, class, value) {
            Ok(request) => {
                info!("Updating {} on {}", class, request.destination());
                dispatch(ctx, &request)
            }
            Err(e) => {
                error!("Cannot update {}: {}", class, e);
                UpdateOutcome::failed(class, e)
            }
        }
    }

    fn build_request(
        &self,
        env: &dyn EnvStore,
        class: ImageClass,
        value: &str,
    ) -> Result<UpdateRequest, SwuError> {
        let family = self.family(env, class.role())?;
        let target = resolve(class, family)?;

        let request = match class {
            ImageClass::Panel => UpdateRequest::new(&target, value),
            ImageClass::BootloaderEnv
                if value == DEFAULT_ENV
                    || (env.is_enabled(keys::BB_ENV_ERASE) && family == DeviceFamily::Flash) =>
            {
                info!("Erasing bootloader environment on {}", target.device_path);
                UpdateRequest::new(&target, value).erase_only()
            }
            ImageClass::Bootloader | ImageClass::BootloaderEnv => {
                let source = self.config.medium_path(value);
                let payload = preload(&source, self.config.preload_limit)?;
                let request = UpdateRequest::new(&target, source);
                match payload {
                    Some(payload) => request.with_payload(payload),
                    None => request,
                }
            }
            _ => UpdateRequest::new(&target, self.config.medium_path(value)),
        };
        Ok(request.verbose(self.verbose))
    }

    fn switch_boot_target(&self, env: &dyn EnvStore, outcomes: &[UpdateOutcome]) -> BootSwitch {
        let os: Vec<&UpdateOutcome> = outcomes
            .iter()
            .filter(|o| o.image_class.role() == Role::Os && o.status != UpdateStatus::Skipped)
            .collect();

        if os.is_empty() {
            return BootSwitch::NotRequired;
        }
        if let Some(failed) = os.iter().find(|o| o.status.is_failed()) {
            let reason = format!("{} update failed", failed.image_class);
            warn!("Boot target unchanged: {}", reason);
            return BootSwitch::Withheld { reason };
        }

        let device = match self
            .family(env, Role::Os)
            .and_then(|family| resolve(ImageClass::FullOs, family))
        {
            Ok(target) => target.device_path.to_string(),
            Err(e) => return BootSwitch::Failed { reason: e.to_string() },
        };
        match self.platform.set_boot_target(&device) {
            Ok(()) => BootSwitch::Performed { device },
            Err(e) => {
                error!("Boot target switch failed: {}", e);
                BootSwitch::Failed { reason: e.to_string() }
            }
        }
    }

    fn copy_log(&self, env: &dyn EnvStore, log: &UpdateLog) {
        if !env.is_enabled(keys::UPDATE_LOG) {
            return;
        }
        let dest = self.config.medium.join(&self.config.log_file);
        match log.copy_to(&dest) {
            Ok(_) => info!("Update log copied to {}", dest.display()),
            Err(e) => warn!("Cannot copy update log: {}", e),
        }
    }
}

/// Read `path` into memory when it is no larger than `limit`.
fn preload(path: &Path, limit: u64) -> Result<Option<Vec<u8>>, SwuError> {
    let len = fs::metadata(path).at(path)?.len();
    if len > limit {
        return Ok(None);
    }
    fs::read(path).at(path).map(Some)
}
