//! Packing options with a builder pattern API.
//!
//! [`PackOptions`] holds the key material and working directory for one
//! packing run. It can be built in code or loaded from a TOML file through
//! [`PackConfig`].

use crate::tools::ToolPaths;
use crate::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// How the packer learns the byte length of the leaf signature before the
/// signature exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureSizing {
    /// Sign the private key file with openssl and measure the output.
    #[default]
    Probe,
    /// Read the RSA modulus length from the private key. No process is run.
    FromKey,
}

/// Key material and working directory for packing an extension.
///
/// # Example
///
/// ```
/// use safariextz::PackOptions;
///
/// let options = PackOptions::new()
///     .private_key("certs/key.pem")
///     .extension_cer("certs/dev.cer")
///     .apple_dev_cer("certs/apple1.cer")
///     .apple_root_cer("certs/apple2.cer")
///     .temp("/tmp");
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PackOptions {
    #[serde(alias = "privateKey")]
    private_key: Option<PathBuf>,
    #[serde(alias = "extensionCer")]
    extension_cer: Option<PathBuf>,
    #[serde(alias = "appleDevCer")]
    apple_dev_cer: Option<PathBuf>,
    #[serde(alias = "appleRootCer")]
    apple_root_cer: Option<PathBuf>,
    temp: Option<PathBuf>,
    #[serde(default, alias = "signatureSizing")]
    signature_sizing: SignatureSizing,
}

impl PackOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the developer private key (PEM, usable by `openssl dgst -sign`).
    pub fn private_key(mut self, path: impl AsRef<Path>) -> Self {
        self.private_key = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the extension (leaf) certificate, DER encoded.
    pub fn extension_cer(mut self, path: impl AsRef<Path>) -> Self {
        self.extension_cer = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the intermediate certificate
    /// (Apple Worldwide Developer Relations Certification Authority).
    pub fn apple_dev_cer(mut self, path: impl AsRef<Path>) -> Self {
        self.apple_dev_cer = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the root certificate (Apple Root CA).
    pub fn apple_root_cer(mut self, path: impl AsRef<Path>) -> Self {
        self.apple_root_cer = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the directory for `digest.dat`, `toc.dat` and `signature.dat`.
    ///
    /// Concurrent runs must each use their own directory.
    pub fn temp(mut self, path: impl AsRef<Path>) -> Self {
        self.temp = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn signature_sizing(mut self, sizing: SignatureSizing) -> Self {
        self.signature_sizing = sizing;
        self
    }

    pub fn private_key_path(&self) -> Option<&Path> {
        self.private_key.as_deref()
    }

    pub fn extension_cer_path(&self) -> Option<&Path> {
        self.extension_cer.as_deref()
    }

    pub fn apple_dev_cer_path(&self) -> Option<&Path> {
        self.apple_dev_cer.as_deref()
    }

    pub fn apple_root_cer_path(&self) -> Option<&Path> {
        self.apple_root_cer.as_deref()
    }

    pub fn temp_path(&self) -> Option<&Path> {
        self.temp.as_deref()
    }

    pub fn sizing(&self) -> SignatureSizing {
        self.signature_sizing
    }

    /// Working directory for transient files: `temp`, or the current
    /// directory when unset.
    pub fn temp_dir(&self) -> Result<PathBuf> {
        match self.temp {
            Some(ref temp) => Ok(temp.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Validate that every required path is configured.
    ///
    /// Returns [`Error::MissingCredentials`] naming each missing option.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .credentials()
            .iter()
            .filter(|(_, path)| path.is_none())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(Error::MissingCredentials(format!(
                "Must specify {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// Validate the configuration and check that the key and every
    /// certificate exist as files.
    pub fn check_credentials(&self) -> Result<()> {
        self.validate()?;

        for (name, path) in self.credentials() {
            if let Some(path) = path {
                if !path.is_file() {
                    return Err(Error::MissingCredentials(format!(
                        "{} not found: {}",
                        name,
                        path.display()
                    )));
                }
            }
        }

        Ok(())
    }

    fn credentials(&self) -> [(&'static str, Option<&Path>); 4] {
        [
            ("privateKey", self.private_key.as_deref()),
            ("extensionCer", self.extension_cer.as_deref()),
            ("appleDevCer", self.apple_dev_cer.as_deref()),
            ("appleRootCer", self.apple_root_cer.as_deref()),
        ]
    }

    /// Resolve every relative path against `base`.
    fn resolve_relative(mut self, base: &Path) -> Self {
        for path in [
            &mut self.private_key,
            &mut self.extension_cer,
            &mut self.apple_dev_cer,
            &mut self.apple_root_cer,
            &mut self.temp,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

/// Contents of a packer configuration file.
///
/// ```toml
/// [pack]
/// private-key = "certs/key.pem"
/// extension-cer = "certs/dev.cer"
/// apple-dev-cer = "certs/apple1.cer"
/// apple-root-cer = "certs/apple2.cer"
/// temp = "/tmp"
///
/// [tools]
/// xar = "/opt/xar-1.6.1/bin/xar"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackConfig {
    #[serde(default)]
    pub pack: PackOptions,
    #[serde(default)]
    pub tools: ToolPaths,
}

impl PackConfig {
    /// Parse a configuration from TOML text. Paths are kept as written.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file. Relative paths are resolved against the
    /// directory containing the file; bare tool names such as `xar` are kept
    /// for lookup on `PATH`.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&text)?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.pack = config.pack.resolve_relative(base);
        config.tools = config.tools.resolve_relative(base);
        Ok(config)
    }
}
