//! Per-image update requests and outcomes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::target::{DeviceFamily, HandlerKind, ImageClass, TargetDescriptor};

/// Normalized description of one image update
///
/// Built once per image class and handed to a handler by reference.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    image_class: ImageClass,
    source: PathBuf,
    destination: String,
    handler_kind: HandlerKind,
    device_family: DeviceFamily,
    verbose: bool,
    payload: Option<Vec<u8>>,
    alias: Option<String>,
    erase_only: bool,
}

impl UpdateRequest {
    /// Start a request for `target` with the image at `source`.
    pub fn new(target: &TargetDescriptor, source: impl Into<PathBuf>) -> Self {
        Self {
            image_class: target.image_class,
            source: source.into(),
            destination: target.device_path.to_string(),
            handler_kind: target.handler_kind,
            device_family: target.device_family,
            verbose: false,
            payload: None,
            alias: target.image_class.alias().map(str::to_string),
            erase_only: false,
        }
    }

    /// Log each stage of the update.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Attach the image content already read into memory.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Erase the destination instead of writing the image.
    pub fn erase_only(mut self) -> Self {
        self.erase_only = true;
        self
    }

    /// Image class.
    pub fn image_class(&self) -> ImageClass {
        self.image_class
    }

    /// Image path on the update medium.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Destination device path.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Strategy that must handle this request.
    pub fn handler_kind(&self) -> HandlerKind {
        self.handler_kind
    }

    /// Device family of the destination.
    pub fn device_family(&self) -> DeviceFamily {
        self.device_family
    }

    /// Whether stages are logged.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// In-memory image content, if preloaded.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Logical file name for the destination alias.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Whether the destination is only erased.
    pub fn is_erase_only(&self) -> bool {
        self.erase_only
    }

    /// File name the image is copied under.
    pub fn source_file_name(&self) -> Option<&str> {
        self.source.file_name().and_then(|n| n.to_str())
    }
}

/// Result of one image step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Image not configured or superseded
    Skipped,
    /// Image written and verified
    Success,
    /// Image step failed
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl UpdateStatus {
    /// Whether the step failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, UpdateStatus::Failed { .. })
    }

    /// Whether the step succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateStatus::Success)
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::Skipped => write!(f, "skipped"),
            UpdateStatus::Success => write!(f, "success"),
            UpdateStatus::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Outcome of one image class in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// Image class
    pub image_class: ImageClass,
    /// What happened
    #[serde(flatten)]
    pub status: UpdateStatus,
}

impl UpdateOutcome {
    /// Step skipped.
    pub fn skipped(image_class: ImageClass) -> Self {
        Self {
            image_class,
            status: UpdateStatus::Skipped,
        }
    }

    /// Step succeeded.
    pub fn success(image_class: ImageClass) -> Self {
        Self {
            image_class,
            status: UpdateStatus::Success,
        }
    }

    /// Step failed with `reason`.
    pub fn failed(image_class: ImageClass, reason: impl fmt::Display) -> Self {
        Self {
            image_class,
            status: UpdateStatus::Failed {
                reason: reason.to_string(),
            },
        }
    }
}
