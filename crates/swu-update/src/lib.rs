//! # swu-update
//!
//! Boot-time software update engine for embedded boards.
//!
//! An update run reads a versioned key/value config file from a removable
//! medium and applies every image it names: bootloader, bootloader
//! environment, full OS disk image, root filesystem, kernel, device tree and
//! display panel timings. Each image is checked against its digest sidecar
//! before it is written and read back afterwards. The boot target is switched
//! only when every attempted OS image succeeded.
//!
//! ## Architecture
//!
//! - [`config`] - Run settings and the `swupdate.cfg` loader with its version gate
//! - [`target`] - Static image class and device family resolution
//! - [`verify`] - Digest sidecar verification
//! - [`platform`] - Block device, mount and boot selection primitives
//! - [`handler`] - Block device, file copy and device tree patch strategies
//! - [`fdt`] - Flattened device tree codec
//! - [`panel`] - Display panel parameters and their device tree patch
//! - [`orchestrator`] - End-to-end run
//! - [`status`] - Operator status events
//! - [`log`] - Persistent run log
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust
//! use swu_update::prelude::*;
//!
//! let target = resolve(ImageClass::Kernel, DeviceFamily::Emmc)?;
//! assert_eq!(target.device_path, "/dev/mmc3.0");
//! assert_eq!(target.handler_kind, HandlerKind::File);
//! # Ok::<(), SwuError>(())
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs
)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod env;
pub mod error;
pub mod fdt;
pub mod handler;
pub mod log;
pub mod orchestrator;
pub mod panel;
pub mod platform;
pub mod request;
pub mod status;
pub mod target;
pub mod verify;

pub mod prelude;

pub use config::{CONFIG_VERSION, ConfigFile, ConfigLoader, UpdateConfig};
pub use env::{EnvStore, MemoryEnv};
pub use error::{ConfigError, ErrorCategory, FdtError, PatchError, SwuError};
pub use fdt::{DeviceTree, FdtCodec, FlatDeviceTree, Node, Property};
pub use handler::{Handler, HandlerContext, dispatch};
pub use orchestrator::{BootSwitch, Orchestrator, RunResult, ScriptRun, UpdateReport};
pub use panel::PanelSettings;
pub use platform::{HostPlatform, Platform, ScratchMount};
pub use request::{UpdateOutcome, UpdateRequest, UpdateStatus};
pub use status::{RecordingObserver, StatusEvent, StatusObserver};
pub use target::{DeviceFamily, HandlerKind, ImageClass, Role, TargetDescriptor, resolve};
pub use verify::{DigestAlgorithm, VerificationResult, Verifier, VerifyReason};

/// Result type for update operations
pub type Result<T> = std::result::Result<T, SwuError>;
