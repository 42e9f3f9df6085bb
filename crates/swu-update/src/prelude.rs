//! Prelude for swu-update.
//!
//! Re-exports the types needed to drive a run.
//!
//! # Example
//!
//! ```rust
//! use swu_update::prelude::*;
//!
//! let mut env = MemoryEnv::new();
//! env.set("OS_TARGET_DEV", "sata");
//! let config = UpdateConfig::for_medium("/media/usb0");
//! assert_eq!(config.config_path(), std::path::Path::new("/media/usb0/swupdate.cfg"));
//! ```

pub use crate::config::{ConfigLoader, UpdateConfig};
pub use crate::env::{EnvStore, MemoryEnv};
pub use crate::error::{ConfigError, SwuError};
pub use crate::fdt::{FdtCodec, FlatDeviceTree};
pub use crate::orchestrator::{BootSwitch, Orchestrator, RunResult, UpdateReport};
pub use crate::platform::{HostPlatform, Platform};
pub use crate::request::{UpdateOutcome, UpdateStatus};
pub use crate::status::{StatusEvent, StatusObserver};
pub use crate::target::{DeviceFamily, HandlerKind, ImageClass, resolve};
pub use crate::verify::{DigestAlgorithm, Verifier};
