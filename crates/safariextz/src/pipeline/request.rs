//! One packing job with every path resolved.

use crate::builder::{PackOptions, SignatureSizing};
use crate::tools::CertChain;
use crate::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Immutable inputs of a packing run.
///
/// All paths are absolute, since the create stage runs from the source's
/// parent directory and the TOC extractor from the temp directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRequest {
    pub archive: PathBuf,
    pub source_dir: PathBuf,
    pub private_key: PathBuf,
    pub extension_cer: PathBuf,
    pub apple_dev_cer: PathBuf,
    pub apple_root_cer: PathBuf,
    pub temp_dir: PathBuf,
    pub sizing: SignatureSizing,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn required(path: Option<&Path>, name: &str) -> Result<PathBuf> {
    let path = path.ok_or_else(|| Error::MissingCredentials(format!("Must specify {name}")))?;
    absolute(path)
}

impl PackRequest {
    /// Build a request from caller inputs.
    ///
    /// Fails with [`Error::MissingCredentials`] when the key or a certificate
    /// is unset or missing on disk. The source directory is not checked here;
    /// a missing source surfaces as the archiving tool's exit code.
    pub fn new(
        archive: impl AsRef<Path>,
        source_dir: impl AsRef<Path>,
        options: &PackOptions,
    ) -> Result<Self> {
        options.check_credentials()?;

        Ok(Self {
            archive: absolute(archive.as_ref())?,
            source_dir: absolute(source_dir.as_ref())?,
            private_key: required(options.private_key_path(), "privateKey")?,
            extension_cer: required(options.extension_cer_path(), "extensionCer")?,
            apple_dev_cer: required(options.apple_dev_cer_path(), "appleDevCer")?,
            apple_root_cer: required(options.apple_root_cer_path(), "appleRootCer")?,
            temp_dir: absolute(&options.temp_dir()?)?,
            sizing: options.sizing(),
        })
    }

    /// Parent directory and entry name for the archive root.
    pub fn source_parts(&self) -> Result<(PathBuf, OsString)> {
        let entry = self.source_dir.file_name().ok_or_else(|| {
            Error::Config(format!(
                "Source directory has no name: {}",
                self.source_dir.display()
            ))
        })?;
        let parent = self
            .source_dir
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .to_path_buf();
        Ok((parent, entry.to_os_string()))
    }

    pub fn cert_chain(&self) -> CertChain<'_> {
        CertChain {
            leaf: &self.extension_cer,
            intermediate: &self.apple_dev_cer,
            root: &self.apple_root_cer,
        }
    }
}
