//! Storage, mount and process access used by the update handlers
//!
//! [`Platform`] is the only way the engine touches devices. [`HostPlatform`]
//! maps device paths into a sysroot directory: a block device is a regular
//! file whose length is its capacity, a mountable partition is a directory.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::error::{IoResultExt, SwuError};

/// Device and filesystem operations needed by the update handlers
pub trait Platform {
    /// Host path backing a device-side path.
    fn host_path(&self, device_path: &str) -> PathBuf;

    /// Bytes the device can hold.
    fn device_capacity(&self, device: &str) -> Result<u64, SwuError>;

    /// Fill the whole device with `fill`.
    fn erase(&self, device: &str, fill: u8) -> Result<(), SwuError>;

    /// Write `image` to the device from offset zero, returning the number of
    /// bytes written.
    fn write_image(&self, device: &str, image: &mut dyn Read) -> Result<u64, SwuError>;

    /// Mount the filesystem on `device` at `mount_point` and return the host
    /// directory its contents are reachable under.
    fn mount(&self, device: &str, mount_point: &str) -> Result<PathBuf, SwuError>;

    /// Release the mount at `mount_point` and remove the mount point.
    fn umount(&self, mount_point: &str) -> Result<(), SwuError>;

    /// Whether mounted filesystems accept symbolic links.
    fn symlinks_supported(&self) -> bool;

    /// Select the device the system boots from next.
    fn set_boot_target(&self, device: &str) -> Result<(), SwuError>;

    /// Run a shell script and return its exit status.
    fn run_script(&self, script: &Path) -> Result<i32, SwuError>;

    /// Whether the update medium is still inserted.
    fn medium_present(&self, medium: &Path) -> bool;
}

/// Sysroot-relative file holding the selected boot device.
pub const BOOT_TARGET_FILE: &str = "env/nv/boot.default";

/// [`Platform`] backed by a directory tree on the host
#[derive(Debug)]
pub struct HostPlatform {
    sysroot: PathBuf,
    capacities: BTreeMap<String, u64>,
    symlinks: bool,
    active_mount: RefCell<Option<String>>,
}

impl HostPlatform {
    /// Create a platform rooted at `sysroot`.
    pub fn new(sysroot: impl Into<PathBuf>) -> Self {
        Self {
            sysroot: sysroot.into(),
            capacities: BTreeMap::new(),
            symlinks: true,
            active_mount: RefCell::new(None),
        }
    }

    /// Record the size of a mountable partition. Partitions without a
    /// recorded size are unbounded.
    pub fn with_capacity(mut self, device: impl Into<String>, bytes: u64) -> Self {
        self.capacities.insert(device.into(), bytes);
        self
    }

    /// Behave like a filesystem without symbolic link support.
    pub fn without_symlinks(mut self) -> Self {
        self.symlinks = false;
        self
    }

    /// Sysroot directory.
    pub fn sysroot(&self) -> &Path {
        &self.sysroot
    }

    /// Device currently mounted on the scratch mount point, if any.
    pub fn active_mount(&self) -> Option<String> {
        self.active_mount.borrow().clone()
    }

    /// Device selected by the last boot switch.
    pub fn boot_target(&self) -> Option<String> {
        fs::read_to_string(self.sysroot.join(BOOT_TARGET_FILE))
            .ok()
            .map(|s| s.trim().to_string())
    }
}

impl Platform for HostPlatform {
    fn host_path(&self, device_path: &str) -> PathBuf {
        self.sysroot.join(device_path.trim_start_matches('/'))
    }

    fn device_capacity(&self, device: &str) -> Result<u64, SwuError> {
        if let Some(&bytes) = self.capacities.get(device) {
            return Ok(bytes);
        }
        let path = self.host_path(device);
        let meta = fs::metadata(&path).at(&path)?;
        if meta.is_dir() {
            Ok(u64::MAX)
        } else {
            Ok(meta.len())
        }
    }

    fn erase(&self, device: &str, fill: u8) -> Result<(), SwuError> {
        let path = self.host_path(device);
        let len = fs::metadata(&path).at(&path)?.len();
        debug!("Erasing {} ({} bytes, fill 0x{:02x})", device, len, fill);

        let mut file = OpenOptions::new().write(true).open(&path).at(&path)?;
        let block = [fill; 4096];
        let mut remaining = len;
        while remaining > 0 {
            let n = usize::try_from(remaining.min(block.len() as u64)).unwrap_or(block.len());
            file.write_all(block.get(..n).unwrap_or_default()).at(&path)?;
            remaining -= n as u64;
        }
        file.sync_all().at(&path)
    }

    fn write_image(&self, device: &str, image: &mut dyn Read) -> Result<u64, SwuError> {
        let path = self.host_path(device);
        let mut file = OpenOptions::new().write(true).open(&path).at(&path)?;
        file.seek(SeekFrom::Start(0)).at(&path)?;
        let written = io::copy(image, &mut file).at(&path)?;
        file.sync_all().at(&path)?;
        debug!("Wrote {} bytes to {}", written, device);
        Ok(written)
    }

    fn mount(&self, device: &str, mount_point: &str) -> Result<PathBuf, SwuError> {
        if let Some(active) = self.active_mount.borrow().as_deref() {
            return Err(SwuError::Mount {
                device: device.to_string(),
                reason: format!("{mount_point} busy with {active}"),
            });
        }

        let root = self.host_path(device);
        if !root.is_dir() {
            return Err(SwuError::Mount {
                device: device.to_string(),
                reason: "no filesystem".to_string(),
            });
        }

        let point = self.host_path(mount_point);
        fs::create_dir_all(&point).at(&point)?;
        *self.active_mount.borrow_mut() = Some(device.to_string());
        debug!("Mounted {} on {}", device, mount_point);
        Ok(root)
    }

    fn umount(&self, mount_point: &str) -> Result<(), SwuError> {
        let device = self.active_mount.borrow_mut().take();
        let point = self.host_path(mount_point);
        if point.exists() {
            fs::remove_dir_all(&point).at(&point)?;
        }
        if let Some(device) = device {
            debug!("Unmounted {} from {}", device, mount_point);
        }
        Ok(())
    }

    fn symlinks_supported(&self) -> bool {
        self.symlinks
    }

    fn set_boot_target(&self, device: &str) -> Result<(), SwuError> {
        let path = self.sysroot.join(BOOT_TARGET_FILE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        let staging = path.with_extension("new");
        {
            let mut file = File::create(&staging).at(&staging)?;
            writeln!(file, "{device}").at(&staging)?;
            file.sync_all().at(&staging)?;
        }
        fs::rename(&staging, &path).at(&path)?;
        info!("Boot target set to {}", device);
        Ok(())
    }

    fn run_script(&self, script: &Path) -> Result<i32, SwuError> {
        let mut command = Command::new("sh");
        command.arg(script);
        if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        let status = command.status().at(script)?;
        Ok(status.code().unwrap_or(-1))
    }

    fn medium_present(&self, medium: &Path) -> bool {
        medium.is_dir()
    }
}

/// Scratch mount released when dropped
///
/// Unmounts and removes the mount point on every exit path.
pub struct ScratchMount<'a> {
    platform: &'a dyn Platform,
    mount_point: String,
    root: PathBuf,
}

impl<'a> ScratchMount<'a> {
    /// Mount `device` on `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`SwuError::Mount`] if the device has no filesystem or the
    /// mount point is already in use.
    pub fn mount(
        platform: &'a dyn Platform,
        device: &str,
        mount_point: &str,
    ) -> Result<Self, SwuError> {
        let root = platform.mount(device, mount_point)?;
        Ok(Self {
            platform,
            mount_point: mount_point.to_string(),
            root,
        })
    }

    /// Directory the mounted filesystem is reachable under.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for ScratchMount<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.platform.umount(&self.mount_point) {
            warn!("Failed to release {}: {}", self.mount_point, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sysroot() -> Result<(TempDir, HostPlatform), io::Error> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("dev/mmc3.0"))?;
        fs::write(dir.path().join("dev/m25p0.barebox"), vec![0u8; 64])?;
        let platform = HostPlatform::new(dir.path());
        Ok((dir, platform))
    }

    #[test]
    fn test_host_path_mapping() -> Result<(), io::Error> {
        let (dir, platform) = sysroot()?;
        assert_eq!(
            platform.host_path("/dev/mmc3.1"),
            dir.path().join("dev/mmc3.1")
        );
        Ok(())
    }

    #[test]
    fn test_block_capacity_is_file_length() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, platform) = sysroot()?;
        assert_eq!(platform.device_capacity("/dev/m25p0.barebox")?, 64);
        assert_eq!(platform.device_capacity("/dev/mmc3.0")?, u64::MAX);

        let platform = platform.with_capacity("/dev/mmc3.0", 1024);
        assert_eq!(platform.device_capacity("/dev/mmc3.0")?, 1024);
        Ok(())
    }

    #[test]
    fn test_erase_fills_device() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, platform) = sysroot()?;
        platform.erase("/dev/m25p0.barebox", 0xff)?;
        let data = fs::read(dir.path().join("dev/m25p0.barebox"))?;
        assert_eq!(data.len(), 64);
        assert!(data.iter().all(|&b| b == 0xff));
        Ok(())
    }

    #[test]
    fn test_write_keeps_device_size() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, platform) = sysroot()?;
        let written = platform.write_image("/dev/m25p0.barebox", &mut &b"barebox"[..])?;
        assert_eq!(written, 7);
        let data = fs::read(dir.path().join("dev/m25p0.barebox"))?;
        assert_eq!(data.len(), 64);
        assert_eq!(data.get(..7), Some(&b"barebox"[..]));
        Ok(())
    }

    #[test]
    fn test_second_mount_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, platform) = sysroot()?;
        let guard = ScratchMount::mount(&platform, "/dev/mmc3.0", "/tmp/swu")?;
        assert!(dir.path().join("tmp/swu").is_dir());
        assert_eq!(guard.root(), dir.path().join("dev/mmc3.0"));

        let second = platform.mount("/dev/mmc3.0", "/tmp/swu");
        assert!(matches!(second, Err(SwuError::Mount { .. })));

        drop(guard);
        assert!(platform.active_mount().is_none());
        assert!(!dir.path().join("tmp/swu").exists());
        Ok(())
    }

    #[test]
    fn test_mount_requires_filesystem() -> Result<(), io::Error> {
        let (_dir, platform) = sysroot()?;
        let result = platform.mount("/dev/m25p0.barebox", "/tmp/swu");
        assert!(matches!(result, Err(SwuError::Mount { .. })));
        assert!(platform.active_mount().is_none());
        Ok(())
    }

    #[test]
    fn test_boot_target_switch() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, platform) = sysroot()?;
        assert_eq!(platform.boot_target(), None);
        platform.set_boot_target("/dev/mmc2")?;
        assert_eq!(platform.boot_target().as_deref(), Some("/dev/mmc2"));
        platform.set_boot_target("/dev/mmc3")?;
        assert_eq!(platform.boot_target().as_deref(), Some("/dev/mmc3"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_run_script_exit_status() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, platform) = sysroot()?;
        let script = dir.path().join("update.sh");
        fs::write(&script, "exit 3\n")?;
        assert_eq!(platform.run_script(&script)?, 3);
        Ok(())
    }
}
