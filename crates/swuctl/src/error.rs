//! Error types for swuctl

use swu_update::{ErrorCategory, SwuError};
use thiserror::Error;

/// Command failure, classified by the exit status it maps to
#[derive(Error, Debug)]
pub enum CliError {
    /// Medium or config file missing, or rejected by the version gate
    #[error(transparent)]
    Configuration(SwuError),

    /// Unknown image class, device family or digest algorithm
    #[error(transparent)]
    InvalidArgument(SwuError),

    /// Anything that went wrong while reading or writing images
    #[error(transparent)]
    UpdateFailed(SwuError),
}

impl From<SwuError> for CliError {
    fn from(error: SwuError) -> Self {
        if error.is_fatal() {
            return CliError::Configuration(error);
        }
        match error.category() {
            ErrorCategory::Resolution => CliError::InvalidArgument(error),
            _ => CliError::UpdateFailed(error),
        }
    }
}

impl CliError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::UpdateFailed(_) => 1,
            CliError::Configuration(_) => 2,
            CliError::InvalidArgument(_) => 3,
        }
    }
}

/// Exit status for an error raised by a command.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    error.downcast_ref::<CliError>().map_or(1, CliError::exit_code)
}
