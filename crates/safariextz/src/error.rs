//! Error types for packing operations.
//!
//! This module defines the [`enum@Error`] enum covering every way a packing
//! run can fail. The only failure the external tools can report is their exit
//! code, carried by [`Error::ToolFailed`]; the remaining variants cover
//! configuration, I/O and container parsing around the tools.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use crate::pipeline::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for packing operations.
///
/// # Examples
///
/// ```no_run
/// use safariextz::{Error, PackOptions, Packer};
///
/// let options = PackOptions::new()
///     .private_key("certs/key.pem")
///     .extension_cer("certs/dev.cer")
///     .apple_dev_cer("certs/apple1.cer")
///     .apple_root_cer("certs/apple2.cer");
///
/// match Packer::new().pack("out.safariextz", "src/My.safariextension", &options) {
///     Ok(()) => println!("Packed"),
///     Err(Error::ToolFailed { stage, program, code }) => {
///         eprintln!("{program} failed during {stage} with {code:?}")
///     }
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// An external tool exited unsuccessfully.
    ///
    /// `code` is `None` when the process was terminated by a signal.
    /// The stage and program are diagnostics; the exit code is the contract.
    #[error("{program} failed during {stage} (exit code {})", fmt_code(*.code))]
    ToolFailed {
        stage: Stage,
        program: String,
        code: Option<i32>,
    },

    /// An external tool could not be started at all.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid packer configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required key or certificate is not configured or does not exist.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// The private key could not be used to compute a signature size.
    #[error("Unusable private key {}: {reason}", .path.display())]
    Key { path: PathBuf, reason: String },

    /// The table-of-contents signature does not fit the reserved slot.
    #[error("Signature size mismatch: reserved {reserved} bytes, got {actual}")]
    SignatureSizeMismatch { reserved: usize, actual: usize },

    /// Malformed or unsupported xar container.
    #[error("Invalid xar archive: {0}")]
    Xar(String),

    /// Configuration file could not be parsed.
    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Exit code of the failed external tool, if this is a tool failure
    /// and the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::ToolFailed { code, .. } => *code,
            _ => None,
        }
    }
}

fn fmt_code(code: Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none, terminated by signal".to_string(),
    }
}
