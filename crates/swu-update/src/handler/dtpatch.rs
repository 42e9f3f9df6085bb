//! Display panel parameter patch of the boot device tree

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

use super::{Handler, HandlerContext};
use crate::error::{IoResultExt, PatchError, SwuError};
use crate::panel::{PanelSettings, PatchState, prepare_blob};
use crate::platform::ScratchMount;
use crate::request::UpdateRequest;
use crate::target::HandlerKind;

/// Applies the `TFT_LVDS_PANEL_*` parameters to the blob on the boot partition
pub struct DeviceTreePatchHandler<'a> {
    ctx: &'a HandlerContext<'a>,
}

impl<'a> DeviceTreePatchHandler<'a> {
    /// Create a handler using `ctx`.
    pub fn new(ctx: &'a HandlerContext<'a>) -> Self {
        Self { ctx }
    }

    fn patch(
        &self,
        request: &UpdateRequest,
        settings: &PanelSettings,
        root: &Path,
        state: &mut PatchTracker,
    ) -> Result<(), SwuError> {
        let blob_path = prepare_blob(root)?;
        let blob = fs::read(&blob_path).at(&blob_path)?;
        let mut tree = self.ctx.codec.unflatten(&blob)?;
        state.advance(PatchState::Loaded)?;
        debug!("Loaded {} ({} nodes)", blob_path.display(), tree.node_count());

        state.advance(PatchState::Patching)?;
        settings.apply(&mut tree)?;

        let patched = self.ctx.codec.flatten(&tree)?;
        replace_file(&blob_path, &patched)?;
        state.advance(PatchState::Saved)?;
        self.ctx.stage(
            request,
            &format!("wrote {} bytes to {}", patched.len(), blob_path.display()),
        );
        Ok(())
    }
}

impl Handler for DeviceTreePatchHandler<'_> {
    fn kind(&self) -> HandlerKind {
        HandlerKind::DeviceTreePatch
    }

    fn update(&self, request: &UpdateRequest) -> Result<(), SwuError> {
        let settings = PanelSettings::from_env(self.ctx.env)?;
        if settings.is_disabled() {
            self.ctx.stage(request, "disabling panel output");
        }

        let mut state = PatchTracker::default();
        let mount = ScratchMount::mount(
            self.ctx.platform,
            request.destination(),
            self.ctx.scratch_mount,
        );
        let result = mount.and_then(|mount| {
            state.advance(PatchState::Mounted)?;
            let result = self.patch(request, &settings, mount.root(), &mut state);
            drop(mount);
            result
        });

        match result {
            Ok(()) => {
                state.advance(PatchState::Unmounted)?;
                self.ctx.stage(request, "done");
                Ok(())
            }
            Err(e) => {
                state.fail();
                Err(e)
            }
        }
    }
}

/// Follows a patch through its states
#[derive(Debug, Default)]
struct PatchTracker {
    state: Option<PatchState>,
}

impl PatchTracker {
    fn advance(&mut self, next: PatchState) -> Result<(), PatchError> {
        let allowed = match self.state {
            None => next == PatchState::Mounted,
            Some(current) => current.can_advance_to(next),
        };
        if !allowed {
            return Err(PatchError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Panel patch: {:?} -> {:?}", self.state, next);
        self.state = Some(next);
        Ok(())
    }

    /// Failed is reachable from every state and absorbing.
    fn fail(&mut self) {
        if self.state != Some(PatchState::Failed) {
            debug!("Panel patch: {:?} -> Failed", self.state);
            self.state = Some(PatchState::Failed);
        }
    }
}

/// Replace `path` with `data` through a sibling staging file.
fn replace_file(path: &Path, data: &[u8]) -> Result<(), SwuError> {
    let staging = path.with_extension("new");
    let written = File::create(&staging).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    if let Err(e) = written {
        if staging.is_file()
            && let Err(cleanup) = fs::remove_file(&staging)
        {
            warn!("Cannot remove {}: {}", staging.display(), cleanup);
        }
        return Err(SwuError::io(&staging, e));
    }
    fs::rename(&staging, path).at(path)
}
