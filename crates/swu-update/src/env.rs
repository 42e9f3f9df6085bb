//! Key-value environment the update run is driven by
//!
//! The config loader writes into an [`EnvStore`]; every update step reads its
//! trigger key from it. Duplicate keys overwrite.

use std::collections::BTreeMap;

/// Recognized environment keys
pub mod keys {
    /// Bootloader image on the medium
    pub const BAREBOX_IMAGE: &str = "BAREBOX_IMAGE";
    /// Bootloader environment image, or `DEFAULT` to erase it
    pub const BAREBOX_ENV: &str = "BAREBOX_ENV";
    /// Full OS disk image; supersedes the component images
    pub const FULL_IMAGE: &str = "FULL_IMAGE";
    /// Root filesystem image
    pub const ROOTFS_IMAGE: &str = "ROOTFS_IMAGE";
    /// Kernel image
    pub const KERNEL_IMAGE: &str = "KERNEL_IMAGE";
    /// Device tree blob
    pub const DTS_IMAGE: &str = "DTS_IMAGE";
    /// Apply the `TFT_LVDS_PANEL_*` parameters to the device tree
    pub const PANEL_UPDATE: &str = "PANEL_UPDATE";
    /// Device family holding the bootloader
    pub const BB_TARGET_DEV: &str = "BB_TARGET_DEV";
    /// Device family holding the OS
    pub const OS_TARGET_DEV: &str = "OS_TARGET_DEV";
    /// Script to execute instead of the image steps
    pub const UPDATE_SCRIPT: &str = "UPDATE_SCRIPT";
    /// Copy the run log back to the medium
    pub const UPDATE_LOG: &str = "UPDATE_LOG";
    /// Erase the bootloader environment on flash instead of writing it
    pub const BB_ENV_ERASE: &str = "BB_ENV_ERASE";
}

/// Value of [`keys::BAREBOX_ENV`] requesting a factory-default environment.
pub const DEFAULT_ENV: &str = "DEFAULT";

/// Key-value variable store
pub trait EnvStore {
    /// Look up a variable.
    fn get(&self, key: &str) -> Option<&str>;

    /// Set a variable, replacing any previous value.
    fn set(&mut self, key: &str, value: &str);

    /// Remove a variable, returning its previous value.
    fn remove(&mut self, key: &str) -> Option<String>;

    /// Whether the variable is set to a true-like value.
    fn is_enabled(&self, key: &str) -> bool {
        self.get(key).is_some_and(is_truthy)
    }
}

/// In-memory [`EnvStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryEnv {
    vars: BTreeMap<String, String>,
}

impl MemoryEnv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of variables set.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variable is set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over all variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl EnvStore for MemoryEnv {
    fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Interpret a config value as a boolean flag.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "true" | "on" | "enable" | "enabled"
    )
}
