//! LVDS display panel parameters in the device tree
//!
//! The panel is described by the `TFT_LVDS_PANEL_*` environment variables.
//! [`PanelSettings::from_env`] collects and validates all of them before any
//! storage is touched; [`PanelSettings::apply`] then edits a [`DeviceTree`]
//! in place.
//!
//! The channel node is the first available node carrying
//! `fsl,data-mapping`, or the first such node at all when every channel is
//! disabled. Its parent is the panel node; every property other than
//! `status` is looked up inside the panel subtree.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::env::{EnvStore, keys};
use crate::error::{IoResultExt, PatchError, SwuError};
use crate::fdt::{DeviceTree, NodePath};

/// Property identifying a display channel node.
pub const PANEL_ANCHOR: &str = "fsl,data-mapping";

/// Blob name the bootloader loads.
pub const CANONICAL_BLOB: &str = "oftree";

/// Blob shipped for user customization, used when the canonical one is absent.
pub const USER_BLOB: &str = "oftree-user";

/// Marker in device tree file names that precedes the display id.
pub const DISPLAY_MARKER: &str = "_12";

const STATUS_DISABLED: &str = "disabled";

/// How a parameter value is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Empty property, present or absent
    Flag,
    /// NUL-terminated string
    Str,
    /// Single big-endian 32-bit cell
    U32,
}

/// One panel parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelParam {
    /// Environment key
    pub key: &'static str,
    /// Storage kind
    pub kind: ParamKind,
    /// Device tree property
    pub property: &'static str,
}

const fn param(key: &'static str, kind: ParamKind, property: &'static str) -> PanelParam {
    PanelParam { key, kind, property }
}

/// Panel parameters in application order. `status` must stay first.
pub const PANEL_PARAMS: [PanelParam; 15] = [
    param("TFT_LVDS_PANEL_OUTPUT", ParamKind::Str, "status"),
    param("TFT_LVDS_PANEL_BITCONFIG_COLOURMAPPING", ParamKind::Str, "fsl,data-mapping"),
    param("TFT_LVDS_PANEL_BITCONFIG_SINGLE_DUAL_LINK", ParamKind::Flag, "fsl,dual-channel"),
    param("TFT_LVDS_PANEL_BITCONFIG_18_24", ParamKind::Str, "fsl,data-width"),
    param("TFT_LVDS_PANEL_TIMING_PIXELCLK_HZ", ParamKind::U32, "clock-frequency"),
    param("TFT_LVDS_PANEL_TIMING_H_ACTIVE_LINES", ParamKind::U32, "hactive"),
    param("TFT_LVDS_PANEL_TIMING_V_ACTIVE_LINES", ParamKind::U32, "vactive"),
    param("TFT_LVDS_PANEL_TIMING_H_FPORCH", ParamKind::U32, "hfront-porch"),
    param("TFT_LVDS_PANEL_TIMING_HSYNC_BPORCH", ParamKind::U32, "hback-porch"),
    param("TFT_LVDS_PANEL_TIMING_HSYNC_WIDTH", ParamKind::U32, "hsync-len"),
    param("TFT_LVDS_PANEL_SIGNAL_HSYNC_POL_ACTIVE", ParamKind::U32, "hsync-active"),
    param("TFT_LVDS_PANEL_TIMING_V_BLANC", ParamKind::U32, "vfront-porch"),
    param("TFT_LVDS_PANEL_TIMING_VSYNC_OFFSET", ParamKind::U32, "vback-porch"),
    param("TFT_LVDS_PANEL_TIMING_VSYNC_WIDTH", ParamKind::U32, "vsync-len"),
    param("TFT_LVDS_PANEL_SIGNAL_VSYNC_POL_ACTIVE", ParamKind::U32, "vsync-active"),
];

/// Validated parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Flag set (`true`) or cleared by `0`
    Flag(bool),
    /// String value
    Str(String),
    /// Integer value
    U32(u32),
}

impl ParamValue {
    fn parse(param: &PanelParam, raw: &str) -> Result<Self, PatchError> {
        let raw = raw.trim();
        Ok(match param.kind {
            ParamKind::Flag => ParamValue::Flag(!raw.starts_with('0')),
            ParamKind::Str => ParamValue::Str(raw.to_string()),
            ParamKind::U32 => ParamValue::U32(parse_cell(raw).ok_or_else(|| {
                PatchError::InvalidInteger {
                    key: param.key,
                    value: raw.to_string(),
                }
            })?),
        })
    }
}

/// Parse an unsigned integer with C-style base detection: `0x` hex, a
/// leading `0` octal, decimal otherwise. The first character must be a
/// digit and nothing may follow the number.
pub fn parse_cell(text: &str) -> Option<u32> {
    if !text.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let hex = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"));
    let (digits, radix) = if let Some(hex) = hex {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (text.get(1..)?, 8)
    } else {
        (text, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

/// Panel parameters read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSettings {
    values: Vec<(PanelParam, ParamValue)>,
}

impl PanelSettings {
    /// Collect the panel parameters.
    ///
    /// A `disabled` output needs no other parameter; otherwise every
    /// parameter must be set and integers must parse.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::MissingParameter`] or
    /// [`PatchError::InvalidInteger`] naming the first offending key.
    pub fn from_env(env: &dyn EnvStore) -> Result<Self, PatchError> {
        let mut values = Vec::with_capacity(PANEL_PARAMS.len());
        for (index, param) in PANEL_PARAMS.iter().enumerate() {
            let raw = env
                .get(param.key)
                .ok_or(PatchError::MissingParameter(param.key))?;
            let value = ParamValue::parse(param, raw)?;
            let disabled = index == 0 && value == ParamValue::Str(STATUS_DISABLED.to_string());
            values.push((*param, value));
            if disabled {
                break;
            }
        }
        Ok(Self { values })
    }

    /// Whether the panel output is switched off.
    pub fn is_disabled(&self) -> bool {
        self.values.len() == 1
            && matches!(self.values.first(), Some((_, ParamValue::Str(s))) if s == STATUS_DISABLED)
    }

    /// Parameters in application order.
    pub fn values(&self) -> &[(PanelParam, ParamValue)] {
        &self.values
    }

    /// Edit `tree` to carry these settings.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::PanelNodeNotFound`] if no channel node exists
    /// and [`PatchError::PropertyNotFound`] if the panel subtree lacks a
    /// property that must be replaced.
    pub fn apply(&self, tree: &mut DeviceTree) -> Result<(), PatchError> {
        let channel = find_channel(tree).ok_or(PatchError::PanelNodeNotFound(PANEL_ANCHOR))?;
        let panel: NodePath = channel
            .split_last()
            .map(|(_, parent)| parent.to_vec())
            .unwrap_or_default();

        for (param, value) in &self.values {
            match value {
                ParamValue::Str(text) if param.property == "status" => {
                    let node = tree
                        .node_mut(&channel)
                        .ok_or(PatchError::PanelNodeNotFound(PANEL_ANCHOR))?;
                    node.set_property(param.property, c_string(text));
                }
                ParamValue::Str(text) => {
                    set_existing(tree, &panel, param.property, c_string(text))?;
                }
                ParamValue::U32(cell) => {
                    set_existing(tree, &panel, param.property, cell.to_be_bytes().to_vec())?;
                }
                ParamValue::Flag(enabled) => {
                    let found = tree.find_in_subtree(&panel, param.property, true);
                    match (enabled, found) {
                        (false, Some(path)) => {
                            if let Some(node) = tree.node_mut(&path) {
                                node.remove_property(param.property);
                            }
                        }
                        (true, None) => {
                            let node = tree
                                .node_mut(&panel)
                                .ok_or(PatchError::PanelNodeNotFound(PANEL_ANCHOR))?;
                            node.set_property(param.property, Vec::new());
                        }
                        _ => {}
                    }
                }
            }
            debug!("{} -> {} = {:?}", param.key, param.property, value);
        }
        Ok(())
    }
}

fn find_channel(tree: &DeviceTree) -> Option<NodePath> {
    tree.find_with_property(PANEL_ANCHOR, true)
        .or_else(|| tree.find_with_property(PANEL_ANCHOR, false))
}

fn set_existing(
    tree: &mut DeviceTree,
    panel: &[usize],
    property: &'static str,
    value: Vec<u8>,
) -> Result<(), PatchError> {
    let path = tree
        .find_in_subtree(panel, property, true)
        .ok_or(PatchError::PropertyNotFound(property))?;
    let node = tree
        .node_mut(&path)
        .ok_or(PatchError::PropertyNotFound(property))?;
    node.set_property(property, value);
    Ok(())
}

fn c_string(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    bytes
}

/// Stage of a panel patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchState {
    /// Boot partition mounted
    Mounted,
    /// Blob read and unflattened
    Loaded,
    /// Parameters being applied
    Patching,
    /// Blob reflattened and written back
    Saved,
    /// Boot partition released
    Unmounted,
    /// Patch aborted
    Failed,
}

impl PatchState {
    /// Whether `next` may follow `self`.
    pub fn can_advance_to(self, next: PatchState) -> bool {
        use PatchState::{Failed, Loaded, Mounted, Patching, Saved, Unmounted};
        match (self, next) {
            (Failed | Unmounted, _) => false,
            (_, Failed) => true,
            (Mounted, Loaded) | (Loaded, Patching) | (Patching, Saved) | (Saved, Unmounted) => true,
            _ => false,
        }
    }
}

/// Find the blob to patch under a mounted boot partition.
///
/// When only the user variant exists it is copied to the canonical name
/// first, so the bootloader picks up the patched tree.
///
/// # Errors
///
/// Returns [`PatchError::BlobMissing`] if neither blob exists, or an I/O
/// error if the copy fails.
pub fn prepare_blob(root: &Path) -> Result<PathBuf, SwuError> {
    let canonical = root.join(CANONICAL_BLOB);
    if canonical.is_file() {
        return Ok(canonical);
    }
    let user = root.join(USER_BLOB);
    if user.is_file() {
        info!("{} missing, starting from {}", CANONICAL_BLOB, USER_BLOB);
        fs::copy(&user, &canonical).at(&canonical)?;
        return Ok(canonical);
    }
    Err(PatchError::BlobMissing(CANONICAL_BLOB.to_string()).into())
}

/// Pick the device tree built for a display.
///
/// Files whose name contains [`DISPLAY_MARKER`] are sorted by name and the
/// first containing `display_id` wins. `None` means the default `oftree`
/// should be used.
///
/// # Errors
///
/// Returns an I/O error if `dir` cannot be listed.
pub fn detect_device_tree(dir: &Path, display_id: &str) -> Result<Option<String>, SwuError> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        if let Some(name) = entry.file_name().to_str()
            && name.contains(DISPLAY_MARKER)
        {
            candidates.push(name.to_string());
        }
    }
    candidates.sort();

    let found = candidates.into_iter().find(|name| name.contains(display_id));
    match &found {
        Some(name) => info!("Device tree for display {}: {}", display_id, name),
        None => info!("No device tree for display {}, using {}", display_id, CANONICAL_BLOB),
    }
    Ok(found)
}

/// Whether the environment requests a panel update.
pub fn panel_update_requested(env: &dyn EnvStore) -> bool {
    env.is_enabled(keys::PANEL_UPDATE)
}
