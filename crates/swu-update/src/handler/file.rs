//! File copy into a mounted boot partition

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{Handler, HandlerContext, check_capacity};
use crate::error::{IoResultExt, SwuError};
use crate::platform::ScratchMount;
use crate::request::UpdateRequest;
use crate::target::HandlerKind;

const BACKUP_SUFFIX: &str = ".bak";

/// Copies an image into the filesystem on the destination device
///
/// An existing file of the same name and the existing alias are kept as
/// `<name>.bak` until the new copy is verified; both are restored if
/// anything fails.
pub struct FileHandler<'a> {
    ctx: &'a HandlerContext<'a>,
}

impl<'a> FileHandler<'a> {
    /// Create a handler using `ctx`.
    pub fn new(ctx: &'a HandlerContext<'a>) -> Self {
        Self { ctx }
    }

    fn install(&self, request: &UpdateRequest, root: &Path, name: &str) -> Result<(), SwuError> {
        let verifier = &self.ctx.verifier;
        let source = request.source();
        let target = root.join(name);

        self.ctx.stage(request, &format!("copying {name}"));
        fs::copy(source, &target).at(&target)?;
        verifier.verify(source, &target)?.into_result(name)?;

        let Some(alias) = request.alias().filter(|alias| *alias != name) else {
            return Ok(());
        };
        let link = root.join(alias);
        if self.ctx.platform.symlinks_supported() {
            match make_symlink(name, &link) {
                Ok(()) => {
                    self.ctx.stage(request, &format!("linked {alias} -> {name}"));
                    return Ok(());
                }
                Err(e) => warn!("Cannot link {} to {}: {}, copying instead", alias, name, e),
            }
        }

        fs::copy(source, &link).at(&link)?;
        verifier.verify(source, &link)?.into_result(alias)?;
        self.ctx.stage(request, &format!("copied {name} to {alias}"));
        Ok(())
    }
}

impl Handler for FileHandler<'_> {
    fn kind(&self) -> HandlerKind {
        HandlerKind::File
    }

    fn update(&self, request: &UpdateRequest) -> Result<(), SwuError> {
        let platform = self.ctx.platform;
        let dest = request.destination();
        let source = request.source();

        let size = fs::metadata(source).at(source)?.len();
        check_capacity(platform, dest, size)?;

        self.ctx.stage(request, "checking source image");
        self.ctx
            .verifier
            .verify_source(source)?
            .into_result("source image")?;

        let name = request.source_file_name().ok_or_else(|| {
            SwuError::invalid_argument(format!("no file name in {}", source.display()))
        })?;

        let mount = ScratchMount::mount(platform, dest, self.ctx.scratch_mount)?;
        let root = mount.root();

        let alias = request.alias().filter(|alias| *alias != name);
        let copies = if alias.is_some() && !platform.symlinks_supported() { 2 } else { 1 };
        let required = size.saturating_mul(copies);
        let capacity = platform.device_capacity(dest)?;
        let used = directory_usage(root, &[Some(name), alias])?;
        let available = capacity.saturating_sub(used);
        debug!("{}: {} bytes used, {} available, {} required", dest, used, available, required);
        if required > available {
            return Err(SwuError::FreeSpace {
                device: dest.to_string(),
                required,
                available,
            });
        }

        let mut saved = Vec::new();
        let target = root.join(name);
        if target.exists() {
            saved.push(SetAside::take(target)?);
        }
        if let Some(link) = alias.map(|alias| root.join(alias))
            && fs::symlink_metadata(&link).is_ok()
        {
            match SetAside::take(link) {
                Ok(entry) => saved.push(entry),
                Err(e) => {
                    restore_all(saved)?;
                    return Err(e);
                }
            }
        }

        match self.install(request, root, name) {
            Ok(()) => {
                for entry in saved {
                    entry.discard()?;
                }
                self.ctx.stage(request, "done");
                Ok(())
            }
            Err(e) => {
                for path in [Some(name), alias].into_iter().flatten().map(|n| root.join(n)) {
                    if saved.iter().all(|entry| entry.path != path) {
                        discard_partial(&path);
                    }
                }
                if !saved.is_empty() {
                    restore_all(saved)?;
                    self.ctx.stage(request, &format!("restored previous {name}"));
                }
                Err(e)
            }
        }
    }
}

fn discard_partial(path: &Path) {
    if fs::symlink_metadata(path).is_ok()
        && let Err(e) = fs::remove_file(path)
    {
        warn!("Cannot remove partial {}: {}", path.display(), e);
    }
}

/// A file moved to `<name>.bak` while its replacement is installed
struct SetAside {
    path: PathBuf,
    backup: PathBuf,
}

impl SetAside {
    fn take(path: PathBuf) -> Result<Self, SwuError> {
        let mut backup = path.clone().into_os_string();
        backup.push(BACKUP_SUFFIX);
        let backup = PathBuf::from(backup);
        fs::rename(&path, &backup).at(&backup)?;
        Ok(Self { path, backup })
    }

    fn discard(self) -> Result<(), SwuError> {
        fs::remove_file(&self.backup).at(&self.backup)
    }

    fn restore(self) -> Result<(), SwuError> {
        if fs::symlink_metadata(&self.path).is_ok() {
            fs::remove_file(&self.path).at(&self.path)?;
        }
        fs::rename(&self.backup, &self.path).at(&self.path)
    }
}

/// Put every set-aside file back, reporting the first failure.
fn restore_all(saved: Vec<SetAside>) -> Result<(), SwuError> {
    let mut first = None;
    for entry in saved {
        if let Err(e) = entry.restore() {
            warn!("Cannot restore previous file: {}", e);
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Bytes taken by regular files under `root`, leaving out top-level entries
/// named in `exclude`.
fn directory_usage(root: &Path, exclude: &[Option<&str>]) -> Result<u64, SwuError> {
    let mut total = 0u64;
    for entry in fs::read_dir(root).at(root)? {
        let entry = entry.at(root)?;
        let file_name = entry.file_name();
        if exclude.iter().flatten().any(|name| file_name == **name) {
            continue;
        }
        total = total.saturating_add(usage(&entry.path())?);
    }
    Ok(total)
}

fn usage(path: &Path) -> Result<u64, SwuError> {
    let meta = fs::symlink_metadata(path).at(path)?;
    if meta.is_dir() {
        let mut total = 0u64;
        for entry in fs::read_dir(path).at(path)? {
            total = total.saturating_add(usage(&entry.at(path)?.path())?);
        }
        Ok(total)
    } else if meta.is_file() {
        Ok(meta.len())
    } else {
        Ok(0)
    }
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &str, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symbolic links not supported",
    ))
}
