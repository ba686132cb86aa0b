//! The packing and signing pipeline.
//!
//! A run moves through a fixed sequence of states, one external tool call per
//! transition:
//!
//! ```text
//! Unsigned --create--> Created --size probe--> Sized --replace-sign--> LeafSigned
//!   --extract toc--> TocExtracted --sign toc--> TocSigned --inject--> Signed
//! ```
//!
//! The first failing stage ends the run with its error. Transient files are
//! removed on every exit path by [`TempArtifacts`].
//!
//! # Examples
//!
//! ```no_run
//! use safariextz::{PackOptions, Packer};
//!
//! let options = PackOptions::new()
//!     .private_key("certs/key.pem")
//!     .extension_cer("certs/dev.cer")
//!     .apple_dev_cer("certs/apple1.cer")
//!     .apple_root_cer("certs/apple2.cer")
//!     .temp("/tmp");
//!
//! Packer::new().pack(
//!     "auto/test.safariextz",
//!     "src/test.safariextension",
//!     &options,
//! )?;
//! # Ok::<(), safariextz::Error>(())
//! ```

pub mod artifacts;
pub mod request;

pub use artifacts::TempArtifacts;
pub use request::PackRequest;

use crate::builder::{PackOptions, SignatureSizing};
use crate::crypto::PrivateKeyInfo;
use crate::process::{Invocation, SystemRunner, ToolOutput, ToolRunner};
use crate::tools::{DigestAlgorithm, TocExtractor, Toolchain};
use crate::{xar, Error, Result};
use artifacts::SIG_OFFSET_NAME;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Digest used for both the sizing probe and the table-of-contents signature.
pub const SIGNATURE_DIGEST: DigestAlgorithm = DigestAlgorithm::Sha1;

/// One transition of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Create,
    SizeProbe,
    LeafSign,
    ExtractToc,
    SignToc,
    InjectSignature,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Create,
        Stage::SizeProbe,
        Stage::LeafSign,
        Stage::ExtractToc,
        Stage::SignToc,
        Stage::InjectSignature,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Create => "create archive",
            Stage::SizeProbe => "signature size probe",
            Stage::LeafSign => "replace-sign",
            Stage::ExtractToc => "extract toc",
            Stage::SignToc => "sign toc",
            Stage::InjectSignature => "inject signature",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress of a run. States after `Sized` carry the reserved signature size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackState {
    Unsigned,
    Created,
    Sized { sig_size: usize },
    LeafSigned { sig_size: usize },
    TocExtracted { sig_size: usize },
    TocSigned { sig_size: usize },
    Signed { sig_size: usize },
}

impl PackState {
    /// The stage that leaves this state, `None` once signed.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            PackState::Unsigned => Some(Stage::Create),
            PackState::Created => Some(Stage::SizeProbe),
            PackState::Sized { .. } => Some(Stage::LeafSign),
            PackState::LeafSigned { .. } => Some(Stage::ExtractToc),
            PackState::TocExtracted { .. } => Some(Stage::SignToc),
            PackState::TocSigned { .. } => Some(Stage::InjectSignature),
            PackState::Signed { .. } => None,
        }
    }

    pub fn sig_size(&self) -> Option<usize> {
        match *self {
            PackState::Unsigned | PackState::Created => None,
            PackState::Sized { sig_size }
            | PackState::LeafSigned { sig_size }
            | PackState::TocExtracted { sig_size }
            | PackState::TocSigned { sig_size }
            | PackState::Signed { sig_size } => Some(sig_size),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_stage().is_none()
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackReport {
    pub archive: PathBuf,
    pub signature_size: usize,
    pub state: PackState,
}

/// Packs and signs Safari extensions by driving `xar` and `openssl`.
///
/// Stages within one run never overlap. Separate runs may execute
/// concurrently only with distinct temp directories and archive paths.
pub struct Packer<R: ToolRunner = SystemRunner> {
    runner: R,
    tools: Toolchain,
}

impl Packer<SystemRunner> {
    /// A packer running the default toolchain as real processes.
    pub fn new() -> Self {
        Self::with_runner(SystemRunner)
    }
}

impl Default for Packer<SystemRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ToolRunner> Packer<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            tools: Toolchain::default(),
        }
    }

    /// Replace the external tool locations.
    pub fn toolchain(mut self, tools: Toolchain) -> Self {
        self.tools = tools;
        self
    }

    pub fn tools(&self) -> &Toolchain {
        &self.tools
    }

    /// Pack `source_dir` into a signed archive at `archive`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingCredentials`] before anything runs, if the key or a
    ///   certificate is unset or missing
    /// - [`Error::ToolFailed`] with the exit code of the first failing tool
    /// - [`Error::SignatureSizeMismatch`] if the TOC signature does not fit
    ///   the reserved slot
    ///
    /// A failed run may leave an unsigned or partially signed archive behind;
    /// delete it before retrying.
    pub fn pack(
        &self,
        archive: impl AsRef<Path>,
        source_dir: impl AsRef<Path>,
        options: &PackOptions,
    ) -> Result<()> {
        self.run(archive, source_dir, options).map(|_| ())
    }

    /// Like [`pack`](Self::pack), returning a report of the run.
    pub fn run(
        &self,
        archive: impl AsRef<Path>,
        source_dir: impl AsRef<Path>,
        options: &PackOptions,
    ) -> Result<PackReport> {
        let request = PackRequest::new(archive, source_dir, options)?;
        self.run_request(&request)
    }

    /// Execute every stage for a prepared request.
    pub fn run_request(&self, request: &PackRequest) -> Result<PackReport> {
        fs::create_dir_all(&request.temp_dir)?;
        let artifacts = TempArtifacts::new(&request.temp_dir);

        info!(
            archive = %request.archive.display(),
            source = %request.source_dir.display(),
            "packing extension"
        );

        let mut state = PackState::Unsigned;
        while !state.is_terminal() {
            state = self.step(request, &artifacts, state)?;
        }

        let signature_size = state.sig_size().unwrap_or_default();
        info!(archive = %request.archive.display(), signature_size, "extension signed");

        Ok(PackReport {
            archive: request.archive.clone(),
            signature_size,
            state,
        })
    }

    /// Run the stage leaving `state` and return the state it leads to.
    ///
    /// Calling `step` on a terminal state returns it unchanged.
    pub fn step(
        &self,
        request: &PackRequest,
        artifacts: &TempArtifacts,
        state: PackState,
    ) -> Result<PackState> {
        let Some(stage) = state.next_stage() else {
            return Ok(state);
        };
        info!(%stage, "running stage");

        let next = match state {
            PackState::Unsigned => {
                self.create_archive(request)?;
                PackState::Created
            }
            PackState::Created => PackState::Sized {
                sig_size: self.signature_size(request)?,
            },
            PackState::Sized { sig_size } => {
                self.replace_sign(request, artifacts, sig_size)?;
                PackState::LeafSigned { sig_size }
            }
            PackState::LeafSigned { sig_size } => {
                self.extract_toc(request, artifacts)?;
                PackState::TocExtracted { sig_size }
            }
            PackState::TocExtracted { sig_size } => {
                self.sign_toc(request, artifacts, sig_size)?;
                PackState::TocSigned { sig_size }
            }
            PackState::TocSigned { sig_size } => {
                self.inject_signature(request, artifacts)?;
                PackState::Signed { sig_size }
            }
            PackState::Signed { .. } => state,
        };

        debug!(?next, "stage complete");
        Ok(next)
    }

    fn exec(&self, stage: Stage, invocation: Invocation) -> Result<ToolOutput> {
        let program = invocation.program_name();
        let output = self
            .runner
            .run(&invocation)
            .map_err(|source| Error::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.success() {
            warn!(%stage, program = %program, code = ?output.code, "tool failed");
            return Err(Error::ToolFailed {
                stage,
                program,
                code: output.code,
            });
        }

        Ok(output)
    }

    fn create_archive(&self, request: &PackRequest) -> Result<()> {
        let (parent, entry) = request.source_parts()?;
        self.exec(
            Stage::Create,
            self.tools.xar.create(&request.archive, &parent, &entry),
        )?;
        Ok(())
    }

    /// Byte length of the leaf signature, learned before it exists.
    fn signature_size(&self, request: &PackRequest) -> Result<usize> {
        let size = match request.sizing {
            SignatureSizing::Probe => {
                // Any input works; the key file is guaranteed to exist.
                let output = self.exec(
                    Stage::SizeProbe,
                    self.tools.openssl.sign(
                        &request.private_key,
                        &request.private_key,
                        SIGNATURE_DIGEST,
                    ),
                )?;
                output.stdout.len()
            }
            SignatureSizing::FromKey => PrivateKeyInfo::load(&request.private_key)?.signature_len()?,
        };

        if size == 0 {
            return Err(Error::Config(
                "Signing tool produced an empty signature".into(),
            ));
        }

        debug!(size, sizing = ?request.sizing, "signature size");
        Ok(size)
    }

    fn replace_sign(
        &self,
        request: &PackRequest,
        artifacts: &TempArtifacts,
        sig_size: usize,
    ) -> Result<()> {
        self.exec(
            Stage::LeafSign,
            self.tools.xar.replace_sign(
                &request.archive,
                &artifacts.digest(),
                sig_size,
                &request.cert_chain(),
                SIG_OFFSET_NAME,
            ),
        )?;
        Ok(())
    }

    fn extract_toc(&self, request: &PackRequest, artifacts: &TempArtifacts) -> Result<()> {
        match self.tools.toc {
            TocExtractor::Builtin => {
                let len = xar::extract_toc(&request.archive, artifacts.toc())?;
                debug!(bytes = len, "extracted toc");
            }
            TocExtractor::External(ref program) => {
                self.exec(
                    Stage::ExtractToc,
                    TocExtractor::invocation(program, &request.archive, artifacts.dir()),
                )?;
            }
        }
        Ok(())
    }

    fn sign_toc(
        &self,
        request: &PackRequest,
        artifacts: &TempArtifacts,
        sig_size: usize,
    ) -> Result<()> {
        let output = self.exec(
            Stage::SignToc,
            self.tools
                .openssl
                .sign(&request.private_key, &artifacts.toc(), SIGNATURE_DIGEST),
        )?;

        if output.stdout.len() != sig_size {
            return Err(Error::SignatureSizeMismatch {
                reserved: sig_size,
                actual: output.stdout.len(),
            });
        }

        fs::write(artifacts.signature(), &output.stdout)?;
        Ok(())
    }

    fn inject_signature(&self, request: &PackRequest, artifacts: &TempArtifacts) -> Result<()> {
        self.exec(
            Stage::InjectSignature,
            self.tools
                .xar
                .inject_signature(&artifacts.signature(), &request.archive),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
