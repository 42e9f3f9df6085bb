//! Content hash verification against sidecar digest files
//!
//! A source image `zImage` may be accompanied by `zImage.md5sum` holding the
//! hex digest of its content. No sidecar means there is nothing to check
//! against and verification passes as [`VerifyReason::Skipped`].

use digest::DynDigest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{IoResultExt, SwuError};

const CHUNK_SIZE: usize = 8192;

/// Registered digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// MD5, the format written by `md5sum`
    #[default]
    Md5,
    /// SHA-256, the format written by `sha256sum`
    Sha256,
}

impl DigestAlgorithm {
    /// Every registered algorithm.
    pub const ALL: [DigestAlgorithm; 2] = [DigestAlgorithm::Md5, DigestAlgorithm::Sha256];

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    /// Fresh hasher for this algorithm.
    pub fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            DigestAlgorithm::Md5 => Box::new(md5::Md5::default()),
            DigestAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }

    /// Digest length in bytes.
    pub fn output_size(self) -> usize {
        self.hasher().output_size()
    }

    /// Length of the digest in hex characters.
    pub fn hex_len(self) -> usize {
        self.output_size() * 2
    }

    /// Extension of the sidecar file holding the reference digest.
    pub fn sidecar_extension(self) -> String {
        format!("{}sum", self.name())
    }

    /// Digest of an in-memory buffer.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize().into_vec()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = SwuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        DigestAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == name)
            .ok_or_else(|| SwuError::invalid_argument(format!("unknown digest algorithm '{s}'")))
    }
}

/// Why a verification passed or failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VerifyReason {
    /// Digest matched the sidecar
    Matched,
    /// No sidecar to check against
    Skipped,
    /// Digest differs from the sidecar
    Mismatch {
        /// Hex digest from the sidecar
        expected: String,
        /// Hex digest computed over the checked data
        actual: String,
    },
    /// Sidecar is too short or not hex
    MalformedSidecar {
        /// Sidecar path
        sidecar: PathBuf,
    },
    /// Checked data is shorter than the source it must match
    Truncated {
        /// Bytes the digest window spans
        window: u64,
        /// Bytes actually available
        available: u64,
    },
}

impl fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyReason::Matched => write!(f, "matched"),
            VerifyReason::Skipped => write!(f, "skipped, no sidecar"),
            VerifyReason::Mismatch { expected, actual } => {
                write!(f, "mismatch, expected {expected} got {actual}")
            }
            VerifyReason::MalformedSidecar { sidecar } => {
                write!(f, "malformed sidecar {}", sidecar.display())
            }
            VerifyReason::Truncated { window, available } => {
                write!(f, "truncated, {available} of {window} bytes")
            }
        }
    }
}

/// Outcome of a verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the data may be used
    pub verified: bool,
    /// Detail
    #[serde(flatten)]
    pub reason: VerifyReason,
}

impl VerificationResult {
    fn from_reason(reason: VerifyReason) -> Self {
        let verified = matches!(reason, VerifyReason::Matched | VerifyReason::Skipped);
        Self { verified, reason }
    }

    /// Turn a failed verification into an error.
    ///
    /// # Errors
    ///
    /// Returns [`SwuError::Verification`] naming `what` when not verified.
    pub fn into_result(self, what: &str) -> Result<VerifyReason, SwuError> {
        if self.verified {
            Ok(self.reason)
        } else {
            Err(SwuError::Verification(format!("{what}: {}", self.reason)))
        }
    }
}

enum Reference {
    Absent,
    Malformed(PathBuf),
    Digest(Vec<u8>),
}

/// Compares content digests against sidecar files
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    algorithm: DigestAlgorithm,
}

impl Verifier {
    /// Create a verifier using `algorithm`.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Algorithm in use.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Sidecar path for `source`, e.g. `zImage.md5sum`.
    pub fn sidecar_path(&self, source: &Path) -> PathBuf {
        let mut name = source.as_os_str().to_os_string();
        name.push(".");
        name.push(self.algorithm.sidecar_extension());
        PathBuf::from(name)
    }

    /// Whether `source` has a sidecar.
    pub fn has_sidecar(&self, source: &Path) -> bool {
        self.sidecar_path(source).is_file()
    }

    /// Check `dest` against the sidecar of `source`, over the first
    /// `len(source)` bytes of `dest`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the source, sidecar or destination cannot
    /// be read. Mismatches are reported in the result, not as errors.
    pub fn verify(&self, source: &Path, dest: &Path) -> Result<VerificationResult, SwuError> {
        let window = std::fs::metadata(source).at(source)?.len();
        self.verify_window(source, dest, window)
    }

    /// Check `source` against its own sidecar.
    ///
    /// # Errors
    ///
    /// See [`Verifier::verify`].
    pub fn verify_source(&self, source: &Path) -> Result<VerificationResult, SwuError> {
        self.verify(source, source)
    }

    /// Check the first `window` bytes of `dest` against the sidecar of
    /// `source`.
    ///
    /// # Errors
    ///
    /// See [`Verifier::verify`].
    pub fn verify_window(
        &self,
        source: &Path,
        dest: &Path,
        window: u64,
    ) -> Result<VerificationResult, SwuError> {
        let expected = match self.reference(source)? {
            Reference::Absent => {
                debug!("No sidecar for {}, skipping verification", source.display());
                return Ok(VerificationResult::from_reason(VerifyReason::Skipped));
            }
            Reference::Malformed(sidecar) => {
                warn!("Malformed sidecar {}", sidecar.display());
                return Ok(VerificationResult::from_reason(VerifyReason::MalformedSidecar {
                    sidecar,
                }));
            }
            Reference::Digest(digest) => digest,
        };

        let file = File::open(dest).at(dest)?;
        let mut reader = file.take(window);
        let mut hasher = self.algorithm.hasher();
        let mut buffer = [0u8; CHUNK_SIZE];
        let mut hashed = 0u64;

        loop {
            let bytes_read = reader.read(&mut buffer).at(dest)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(buffer.get(..bytes_read).unwrap_or_default());
            hashed += bytes_read as u64;
        }

        if hashed < window {
            warn!(
                "{} holds {} bytes, {} expected",
                dest.display(),
                hashed,
                window
            );
            return Ok(VerificationResult::from_reason(VerifyReason::Truncated {
                window,
                available: hashed,
            }));
        }

        Ok(self.compare(&expected, &hasher.finalize()))
    }

    /// Check an in-memory payload against the sidecar of `source`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the sidecar exists but cannot be read.
    pub fn verify_buffer(
        &self,
        source: &Path,
        payload: &[u8],
    ) -> Result<VerificationResult, SwuError> {
        match self.reference(source)? {
            Reference::Absent => Ok(VerificationResult::from_reason(VerifyReason::Skipped)),
            Reference::Malformed(sidecar) => Ok(VerificationResult::from_reason(
                VerifyReason::MalformedSidecar { sidecar },
            )),
            Reference::Digest(expected) => {
                Ok(self.compare(&expected, &self.algorithm.digest(payload)))
            }
        }
    }

    /// Compute the hex digest of a whole file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be read.
    pub fn file_digest(&self, path: &Path) -> Result<String, SwuError> {
        let mut file = File::open(path).at(path)?;
        let mut hasher = self.algorithm.hasher();
        let mut buffer = [0u8; CHUNK_SIZE];

        loop {
            let bytes_read = file.read(&mut buffer).at(path)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(buffer.get(..bytes_read).unwrap_or_default());
        }

        Ok(hex::encode(hasher.finalize()))
    }

    fn compare(&self, expected: &[u8], actual: &[u8]) -> VerificationResult {
        if expected == actual {
            VerificationResult::from_reason(VerifyReason::Matched)
        } else {
            VerificationResult::from_reason(VerifyReason::Mismatch {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            })
        }
    }

    fn reference(&self, source: &Path) -> Result<Reference, SwuError> {
        let sidecar = self.sidecar_path(source);
        if !sidecar.is_file() {
            return Ok(Reference::Absent);
        }

        let text = std::fs::read_to_string(&sidecar).at(&sidecar)?;
        let hex_len = self.algorithm.hex_len();
        let token = text.split_whitespace().next().unwrap_or_default();

        let digest = token
            .get(..hex_len)
            .and_then(|hex_digest| hex::decode(hex_digest).ok());

        Ok(match digest {
            Some(digest) => Reference::Digest(digest),
            None => Reference::Malformed(sidecar),
        })
    }
}
