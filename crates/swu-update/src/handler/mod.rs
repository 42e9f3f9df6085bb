//! Update strategies
//!
//! Each [`HandlerKind`] has one [`Handler`]. Handlers never return errors:
//! whatever goes wrong becomes a failed [`UpdateOutcome`] so the run can go
//! on with the next image.

mod block;
mod dtpatch;
mod file;

pub use block::BlockDeviceHandler;
pub use dtpatch::DeviceTreePatchHandler;
pub use file::FileHandler;

use tracing::{error, info};

use crate::env::EnvStore;
use crate::error::{IoResultExt, SwuError};
use crate::fdt::FdtCodec;
use crate::log::UpdateLog;
use crate::platform::Platform;
use crate::request::{UpdateOutcome, UpdateRequest};
use crate::target::HandlerKind;
use crate::verify::Verifier;

/// Collaborators shared by all handlers of a run
pub struct HandlerContext<'a> {
    /// Device access
    pub platform: &'a dyn Platform,
    /// Integrity checks
    pub verifier: Verifier,
    /// Device tree codec for panel patches
    pub codec: &'a dyn FdtCodec,
    /// Environment holding the panel parameters
    pub env: &'a dyn EnvStore,
    /// Mount point used for filesystem targets
    pub scratch_mount: &'a str,
    /// Run log
    pub log: Option<&'a UpdateLog>,
}

impl HandlerContext<'_> {
    pub(crate) fn stage(&self, request: &UpdateRequest, message: &str) {
        if request.is_verbose() {
            info!("{}: {}", request.image_class(), message);
        }
        if let Some(log) = self.log {
            log.record(&format!("{}: {}", request.image_class(), message));
        }
    }
}

/// Update strategy for one kind of target
pub trait Handler {
    /// Kind of target handled.
    fn kind(&self) -> HandlerKind;

    /// Carry out `request`.
    fn update(&self, request: &UpdateRequest) -> Result<(), SwuError>;

    /// Carry out `request` and report the outcome.
    fn handle(&self, request: &UpdateRequest) -> UpdateOutcome {
        match self.update(request) {
            Ok(()) => UpdateOutcome::success(request.image_class()),
            Err(e) => {
                error!(
                    "{} update of {} failed: {}",
                    request.image_class(),
                    request.destination(),
                    e
                );
                UpdateOutcome::failed(request.image_class(), e)
            }
        }
    }
}

/// Hand `request` to the handler for its kind.
pub fn dispatch(ctx: &HandlerContext<'_>, request: &UpdateRequest) -> UpdateOutcome {
    match request.handler_kind() {
        HandlerKind::BlockDevice => BlockDeviceHandler::new(ctx).handle(request),
        HandlerKind::File => FileHandler::new(ctx).handle(request),
        HandlerKind::DeviceTreePatch => DeviceTreePatchHandler::new(ctx).handle(request),
    }
}

/// Size of the image a request carries.
pub(crate) fn image_size(request: &UpdateRequest) -> Result<u64, SwuError> {
    match request.payload() {
        Some(payload) => Ok(payload.len() as u64),
        None => Ok(std::fs::metadata(request.source()).at(request.source())?.len()),
    }
}

/// Fail unless `device` can hold `required` bytes.
pub(crate) fn check_capacity(
    platform: &dyn Platform,
    device: &str,
    required: u64,
) -> Result<(), SwuError> {
    let available = platform.device_capacity(device)?;
    if required > available {
        return Err(SwuError::Capacity {
            device: device.to_string(),
            required,
            available,
        });
    }
    Ok(())
}
