//! Raw block and flash device overwrite

use std::fs::File;
use tracing::debug;

use super::{Handler, HandlerContext, check_capacity, image_size};
use crate::error::{IoResultExt, SwuError};
use crate::request::UpdateRequest;
use crate::target::HandlerKind;

/// Writes an image to a device from offset zero
pub struct BlockDeviceHandler<'a> {
    ctx: &'a HandlerContext<'a>,
}

impl<'a> BlockDeviceHandler<'a> {
    /// Create a handler using `ctx`.
    pub fn new(ctx: &'a HandlerContext<'a>) -> Self {
        Self { ctx }
    }

    fn erase(&self, request: &UpdateRequest) -> Result<(), SwuError> {
        let fill = request.device_family().erased_byte();
        self.ctx.stage(request, &format!("erasing {}", request.destination()));
        self.ctx.platform.erase(request.destination(), fill)
    }
}

impl Handler for BlockDeviceHandler<'_> {
    fn kind(&self) -> HandlerKind {
        HandlerKind::BlockDevice
    }

    fn update(&self, request: &UpdateRequest) -> Result<(), SwuError> {
        let platform = self.ctx.platform;
        let verifier = &self.ctx.verifier;
        let dest = request.destination();

        if request.is_erase_only() {
            return self.erase(request);
        }

        let size = image_size(request)?;
        check_capacity(platform, dest, size)?;

        self.ctx.stage(request, "checking source image");
        let result = match request.payload() {
            Some(payload) => verifier.verify_buffer(request.source(), payload)?,
            None => verifier.verify_source(request.source())?,
        };
        result.into_result("source image")?;

        if request.device_family().requires_erase() {
            self.erase(request)?;
        }

        self.ctx.stage(request, &format!("writing {size} bytes to {dest}"));
        let written = match request.payload() {
            Some(payload) => platform.write_image(dest, &mut &*payload)?,
            None => {
                let mut file = File::open(request.source()).at(request.source())?;
                platform.write_image(dest, &mut file)?
            }
        };
        debug!("{} bytes written to {}", written, dest);

        self.ctx.stage(request, "verifying destination");
        verifier
            .verify_window(request.source(), &platform.host_path(dest), size)?
            .into_result(dest)?;

        self.ctx.stage(request, "done");
        Ok(())
    }
}
