//! Transient files exchanged with the external tools.
//!
//! The names are part of the tool contract: `xar --replace-sign` writes
//! `digest.dat`, `xartool` writes `toc.dat`, and `xar --inject-sig` reads
//! `signature.dat`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DIGEST_FILE: &str = "digest.dat";
pub const TOC_FILE: &str = "toc.dat";
pub const SIGNATURE_FILE: &str = "signature.dat";

/// Name passed to `xar --sig-offset`.
pub const SIG_OFFSET_NAME: &str = "sigoffset";

/// Owns the transient files of one run and removes them when dropped,
/// whether the run succeeded or not.
#[derive(Debug)]
pub struct TempArtifacts {
    dir: PathBuf,
}

impl TempArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn digest(&self) -> PathBuf {
        self.dir.join(DIGEST_FILE)
    }

    pub fn toc(&self) -> PathBuf {
        self.dir.join(TOC_FILE)
    }

    pub fn signature(&self) -> PathBuf {
        self.dir.join(SIGNATURE_FILE)
    }

    /// Remove every artifact. Files that are already gone are skipped; other
    /// failures are logged and do not stop the remaining removals.
    pub fn cleanup(&self) {
        for path in [self.signature(), self.digest(), self.toc()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove"),
            }
        }
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}
