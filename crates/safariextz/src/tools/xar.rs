//! Argument construction for the `xar` archiving tool.
//!
//! Only xar 1.6.1 is known to work: 1.5 lacks `--sign` and 1.7 dropped the
//! `--replace-sign`/`--inject-sig` pair used here.

use crate::process::Invocation;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// The three certificates embedded next to the archive signature,
/// leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertChain<'a> {
    pub leaf: &'a Path,
    pub intermediate: &'a Path,
    pub root: &'a Path,
}

/// Builds invocations of the xar binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XarTool {
    program: PathBuf,
}

impl XarTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `xar -cf <archive> -C <parent> <entry>`, run from `parent`.
    ///
    /// Entries in the archive are relative to `parent`, rooted at `entry`.
    pub fn create(&self, archive: &Path, parent: &Path, entry: &OsString) -> Invocation {
        Invocation::new(&self.program)
            .arg("-cf")
            .arg(archive)
            .arg("-C")
            .arg(parent)
            .arg(entry)
            .current_dir(parent)
    }

    /// `xar --replace-sign`: reserve a signature slot of `sig_size` bytes,
    /// embed the certificate chain and write the data to sign to `digest_out`.
    pub fn replace_sign(
        &self,
        archive: &Path,
        digest_out: &Path,
        sig_size: usize,
        chain: &CertChain<'_>,
        sig_offset_name: &str,
    ) -> Invocation {
        Invocation::new(&self.program)
            .arg("--replace-sign")
            .arg("-f")
            .arg(archive)
            .arg("--data-to-sign")
            .arg(digest_out)
            .arg("--sig-size")
            .arg(sig_size.to_string())
            .arg("--cert-loc")
            .arg(chain.leaf)
            .arg("--cert-loc")
            .arg(chain.intermediate)
            .arg("--cert-loc")
            .arg(chain.root)
            .arg("--sig-offset")
            .arg(sig_offset_name)
    }

    /// `xar --inject-sig <signature> -f <archive>`.
    pub fn inject_signature(&self, signature: &Path, archive: &Path) -> Invocation {
        Invocation::new(&self.program)
            .arg("--inject-sig")
            .arg(signature)
            .arg("-f")
            .arg(archive)
    }
}

impl Default for XarTool {
    fn default() -> Self {
        Self::new("xar")
    }
}
