//! Sidecar verification

use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;

use swu_update::{DigestAlgorithm, SwuError, VerificationResult, Verifier};

use super::GlobalOptions;
use crate::error::CliError;
use crate::output;

/// Verify `source`, or `dest` against the sidecar of `source`.
pub fn execute(
    opts: &GlobalOptions,
    source: &Path,
    dest: Option<&Path>,
    digest: &str,
) -> Result<ExitCode> {
    let result = check(source, dest, digest).map_err(CliError::from)?;
    output::print_verification(dest.unwrap_or(source), &result, opts.json);

    Ok(if result.verified {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check(source: &Path, dest: Option<&Path>, digest: &str) -> Result<VerificationResult, SwuError> {
    let algorithm: DigestAlgorithm = digest.parse()?;
    let verifier = Verifier::new(algorithm);
    match dest {
        Some(dest) => verifier.verify(source, dest),
        None => verifier.verify_source(source),
    }
}
