//! Error types for software update operations

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::panel::PatchState;

/// Errors that can occur during a software update run
#[derive(Error, Debug)]
pub enum SwuError {
    /// Config file missing, unreadable or rejected by the version gate
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Unknown image class, device family or digest algorithm
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Image failed its integrity check
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Destination device is smaller than the image
    #[error("Partition too small: {device} holds {available} bytes, image needs {required}")]
    Capacity {
        /// Destination device
        device: String,
        /// Bytes needed
        required: u64,
        /// Bytes the device can hold
        available: u64,
    },

    /// Destination filesystem does not have enough free space
    #[error("Insufficient free space on {device}: {available} bytes free, image needs {required}")]
    FreeSpace {
        /// Destination device
        device: String,
        /// Bytes needed
        required: u64,
        /// Bytes currently free
        available: u64,
    },

    /// Mounting or unmounting the scratch mount point failed
    #[error("Mount error on {device}: {reason}")]
    Mount {
        /// Device being mounted
        device: String,
        /// Failure description
        reason: String,
    },

    /// I/O error with the path it happened on
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File or device path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Blob could not be (un)flattened
    #[error("Device tree error: {0}")]
    DeviceTree(#[from] FdtError),

    /// Panel parameters could not be applied
    #[error("Panel patch error: {0}")]
    Panel(#[from] PatchError),
}

impl SwuError {
    /// Classify the error for the update policy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SwuError::Config(_) => ErrorCategory::Configuration,
            SwuError::InvalidArgument(_) => ErrorCategory::Resolution,
            SwuError::Verification(_) | SwuError::Capacity { .. } | SwuError::FreeSpace { .. } => {
                ErrorCategory::Verification
            }
            SwuError::Mount { .. } | SwuError::Io { .. } => ErrorCategory::Io,
            SwuError::DeviceTree(_) | SwuError::Panel(_) => ErrorCategory::Structure,
        }
    }

    /// Configuration errors abort the whole run; everything else only
    /// fails the image being processed.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Create an invalid argument error with a message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        SwuError::InvalidArgument(msg.into())
    }

    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SwuError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Error classes of the update policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or rejected configuration; aborts before any write
    Configuration,
    /// Unknown image class / device family combination
    Resolution,
    /// Checksum mismatch, capacity or free space shortfall
    Verification,
    /// Mount, open, read or write failure
    Io,
    /// Device tree node or property missing or malformed
    Structure,
}

/// Errors raised while reading the update config file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Update medium not present
    #[error("update medium not found at {}", .0.display())]
    MediumMissing(PathBuf),

    /// Config file not present on the medium
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),

    /// Config file could not be read
    #[error("config file {} unreadable: {source}", path.display())]
    Unreadable {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// First line is not a `#<ver=X.Y>` header
    #[error("missing version header, first line is {0:?}")]
    MissingHeader(String),

    /// Header version differs from the supported one
    #[error("config version {found} not supported, expected {expected}")]
    VersionMismatch {
        /// Version this build understands
        expected: String,
        /// Version found in the file
        found: String,
    },
}

/// Errors raised by the flattened device tree codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FdtError {
    /// Blob does not start with the FDT magic
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),

    /// Blob version cannot be read
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),

    /// Blob ends before the named block does
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// Unexpected structure token
    #[error("unexpected token 0x{token:x} at offset {offset}")]
    BadToken {
        /// Token value
        token: u32,
        /// Offset in the structure block
        offset: usize,
    },

    /// Node or property name is not terminated or not UTF-8
    #[error("malformed name at offset {0}")]
    BadName(usize),

    /// Tree is too large to be encoded with 32-bit offsets
    #[error("tree too large to flatten")]
    TooLarge,

    /// Nodes nested deeper than the reader accepts
    #[error("nodes nested too deep at offset {0}")]
    TooDeep(usize),
}

/// Errors raised while applying panel parameters to a device tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// A required environment variable is not set
    #[error("{0} not defined")]
    MissingParameter(&'static str),

    /// No node carries the panel anchor property
    #[error("no panel node carrying {0}")]
    PanelNodeNotFound(&'static str),

    /// The panel subtree does not carry a property that must be replaced
    #[error("property {0} not found in panel node")]
    PropertyNotFound(&'static str),

    /// Integer parameter is not a plain unsigned number
    #[error("{key}={value:?} is not a valid 32-bit unsigned integer")]
    InvalidInteger {
        /// Environment key
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// Neither the canonical blob nor its user variant exist
    #[error("device tree blob {0} not found")]
    BlobMissing(String),

    /// The patch stepped out of its state sequence
    #[error("panel patch cannot go from {from:?} to {to:?}")]
    IllegalTransition {
        /// State before the step, `None` before mounting
        from: Option<PatchState>,
        /// Requested state
        to: PatchState,
    },
}

/// Attach a path to I/O errors.
pub trait IoResultExt<T> {
    /// Convert an `io::Result` into a [`SwuError::Io`] carrying `path`.
    fn at(self, path: impl AsRef<Path>) -> Result<T, SwuError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T, SwuError> {
        self.map_err(|source| SwuError::io(path, source))
    }
}
