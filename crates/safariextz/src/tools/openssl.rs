//! Argument construction for the `openssl` signing tool.

use crate::process::Invocation;
use std::fmt;
use std::path::{Path, PathBuf};

/// Digest used by `openssl dgst` before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// The only digest Safari accepts for the table of contents.
    #[default]
    Sha1,
}

impl DigestAlgorithm {
    pub fn flag(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "-sha1",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flag()[1..])
    }
}

/// Builds invocations of the openssl binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSslTool {
    program: PathBuf,
}

impl OpenSslTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `openssl dgst -<digest> -sign <key> -binary <input>`.
    ///
    /// The raw signature is written to standard output.
    pub fn sign(&self, key: &Path, input: &Path, digest: DigestAlgorithm) -> Invocation {
        Invocation::new(&self.program)
            .arg("dgst")
            .arg(digest.flag())
            .arg("-sign")
            .arg(key)
            .arg("-binary")
            .arg(input)
            .binary_stdout()
    }
}

impl Default for OpenSslTool {
    fn default() -> Self {
        Self::new("openssl")
    }
}
