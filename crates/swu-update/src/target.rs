//! Image class and device family to target resolution
//!
//! The table is static and [`resolve`] performs no I/O. A pair that is not in
//! the table is an error; there is no fallback device.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::env::keys;
use crate::error::SwuError;

/// Logical category of an update payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageClass {
    /// Bootloader image
    Bootloader,
    /// Bootloader persisted environment
    BootloaderEnv,
    /// Full disk image for the OS device
    FullOs,
    /// Root filesystem partition image
    Rootfs,
    /// Kernel image copied into the boot partition
    Kernel,
    /// Device tree blob copied into the boot partition
    DeviceTree,
    /// Display panel parameters patched into the device tree
    Panel,
}

impl ImageClass {
    /// Every class, in the order the orchestrator processes them.
    pub const ALL: [ImageClass; 7] = [
        ImageClass::Bootloader,
        ImageClass::BootloaderEnv,
        ImageClass::FullOs,
        ImageClass::Rootfs,
        ImageClass::Kernel,
        ImageClass::DeviceTree,
        ImageClass::Panel,
    ];

    /// Storage role whose device family selects this class's target.
    pub fn role(self) -> Role {
        match self {
            ImageClass::Bootloader | ImageClass::BootloaderEnv => Role::Bootloader,
            _ => Role::Os,
        }
    }

    /// Environment key whose presence triggers this class's update step.
    pub fn env_key(self) -> &'static str {
        match self {
            ImageClass::Bootloader => keys::BAREBOX_IMAGE,
            ImageClass::BootloaderEnv => keys::BAREBOX_ENV,
            ImageClass::FullOs => keys::FULL_IMAGE,
            ImageClass::Rootfs => keys::ROOTFS_IMAGE,
            ImageClass::Kernel => keys::KERNEL_IMAGE,
            ImageClass::DeviceTree => keys::DTS_IMAGE,
            ImageClass::Panel => keys::PANEL_UPDATE,
        }
    }

    /// Stable name the boot scripts load, written next to the copied file.
    pub fn alias(self) -> Option<&'static str> {
        match self {
            ImageClass::Kernel => Some("kernel"),
            ImageClass::DeviceTree => Some("oftree"),
            _ => None,
        }
    }

    /// Whether a full OS image supersedes this class.
    pub fn is_os_component(self) -> bool {
        matches!(
            self,
            ImageClass::Rootfs | ImageClass::Kernel | ImageClass::DeviceTree | ImageClass::Panel
        )
    }

    /// Short name used in logs and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageClass::Bootloader => "bootloader",
            ImageClass::BootloaderEnv => "bootloader-env",
            ImageClass::FullOs => "full-os",
            ImageClass::Rootfs => "rootfs",
            ImageClass::Kernel => "kernel",
            ImageClass::DeviceTree => "device-tree",
            ImageClass::Panel => "panel",
        }
    }
}

impl fmt::Display for ImageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageClass {
    type Err = SwuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| SwuError::invalid_argument(format!("unknown image class '{s}'")))
    }
}

/// Storage role an image class belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Bootloader and its environment
    Bootloader,
    /// Operating system payload
    Os,
}

impl Role {
    /// Environment key selecting this role's device family.
    pub fn env_key(self) -> &'static str {
        match self {
            Role::Bootloader => keys::BB_TARGET_DEV,
            Role::Os => keys::OS_TARGET_DEV,
        }
    }
}

/// Selectable class of physical storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Linear SPI NOR flash
    Flash,
    /// Soldered eMMC
    Emmc,
    /// SD card slot used for the bootloader
    Sd,
    /// Removable MMC/SD card used for the OS
    Mmc,
    /// SATA disk
    Sata,
}

impl DeviceFamily {
    /// Every family known to the resolver.
    pub const ALL: [DeviceFamily; 5] = [
        DeviceFamily::Flash,
        DeviceFamily::Emmc,
        DeviceFamily::Sd,
        DeviceFamily::Mmc,
        DeviceFamily::Sata,
    ];

    /// Linear flash must be erased before it can be reprogrammed.
    pub fn requires_erase(self) -> bool {
        matches!(self, DeviceFamily::Flash)
    }

    /// Byte value an erased device reads back as.
    pub fn erased_byte(self) -> u8 {
        if self.requires_erase() { 0xff } else { 0x00 }
    }

    /// Name used in the config file.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::Flash => "flash",
            DeviceFamily::Emmc => "emmc",
            DeviceFamily::Sd => "sd",
            DeviceFamily::Mmc => "mmc",
            DeviceFamily::Sata => "sata",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = SwuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| SwuError::invalid_argument(format!("unknown device family '{s}'")))
    }
}

/// Update strategy used for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    /// Raw overwrite of a block or flash device
    BlockDevice,
    /// File copy into a mounted filesystem
    File,
    /// Property patch of a device tree blob in a mounted filesystem
    DeviceTreePatch,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::BlockDevice => write!(f, "blkdev"),
            HandlerKind::File => write!(f, "file"),
            HandlerKind::DeviceTreePatch => write!(f, "dtpatch"),
        }
    }
}

/// Concrete destination of an image class on a device family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Image class
    pub image_class: ImageClass,
    /// Device family the target lives on
    pub device_family: DeviceFamily,
    /// Strategy used to update it
    pub handler_kind: HandlerKind,
    /// Device node
    pub device_path: &'static str,
}

const TARGETS: &[(ImageClass, DeviceFamily, HandlerKind, &str)] = &[
    (ImageClass::Bootloader, DeviceFamily::Flash, HandlerKind::BlockDevice, "/dev/m25p0.barebox"),
    (ImageClass::Bootloader, DeviceFamily::Emmc, HandlerKind::BlockDevice, "/dev/mmc3.barebox"),
    (ImageClass::Bootloader, DeviceFamily::Sd, HandlerKind::BlockDevice, "/dev/mmc2.barebox"),
    (
        ImageClass::BootloaderEnv,
        DeviceFamily::Flash,
        HandlerKind::BlockDevice,
        "/dev/m25p0.barebox-environment",
    ),
    (
        ImageClass::BootloaderEnv,
        DeviceFamily::Emmc,
        HandlerKind::BlockDevice,
        "/dev/mmc3.barebox-environment",
    ),
    (
        ImageClass::BootloaderEnv,
        DeviceFamily::Sd,
        HandlerKind::BlockDevice,
        "/dev/mmc2.barebox-environment",
    ),
    (ImageClass::FullOs, DeviceFamily::Emmc, HandlerKind::BlockDevice, "/dev/mmc3"),
    (ImageClass::FullOs, DeviceFamily::Mmc, HandlerKind::BlockDevice, "/dev/mmc2"),
    (ImageClass::FullOs, DeviceFamily::Sata, HandlerKind::BlockDevice, "/dev/sda"),
    (ImageClass::Rootfs, DeviceFamily::Emmc, HandlerKind::BlockDevice, "/dev/mmc3.1"),
    (ImageClass::Rootfs, DeviceFamily::Mmc, HandlerKind::BlockDevice, "/dev/mmc2.1"),
    (ImageClass::Rootfs, DeviceFamily::Sata, HandlerKind::BlockDevice, "/dev/sda2"),
    (ImageClass::Kernel, DeviceFamily::Emmc, HandlerKind::File, "/dev/mmc3.0"),
    (ImageClass::Kernel, DeviceFamily::Mmc, HandlerKind::File, "/dev/mmc2.0"),
    (ImageClass::Kernel, DeviceFamily::Sata, HandlerKind::File, "/dev/sda1"),
    (ImageClass::DeviceTree, DeviceFamily::Emmc, HandlerKind::File, "/dev/mmc3.0"),
    (ImageClass::DeviceTree, DeviceFamily::Mmc, HandlerKind::File, "/dev/mmc2.0"),
    (ImageClass::DeviceTree, DeviceFamily::Sata, HandlerKind::File, "/dev/sda1"),
    (ImageClass::Panel, DeviceFamily::Emmc, HandlerKind::DeviceTreePatch, "/dev/mmc3.0"),
    (ImageClass::Panel, DeviceFamily::Mmc, HandlerKind::DeviceTreePatch, "/dev/mmc2.0"),
    (ImageClass::Panel, DeviceFamily::Sata, HandlerKind::DeviceTreePatch, "/dev/sda1"),
];

/// Resolve an image class on a device family to its target.
///
/// # Errors
///
/// Returns [`SwuError::InvalidArgument`] when the pair is not in the table.
pub fn resolve(
    image_class: ImageClass,
    device_family: DeviceFamily,
) -> Result<TargetDescriptor, SwuError> {
    TARGETS
        .iter()
        .find(|(class, family, _, _)| *class == image_class && *family == device_family)
        .map(|&(image_class, device_family, handler_kind, device_path)| TargetDescriptor {
            image_class,
            device_family,
            handler_kind,
            device_path,
        })
        .ok_or_else(|| {
            let message = format!("no {image_class} target on {device_family} devices");
            SwuError::invalid_argument(message)
        })
}

/// Every (class, family) pair the resolver knows about.
pub fn supported_targets() -> impl Iterator<Item = (ImageClass, DeviceFamily)> {
    TARGETS.iter().map(|&(class, family, _, _)| (class, family))
}
