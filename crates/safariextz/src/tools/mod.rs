//! External tool locations and their command lines.
//!
//! The packer drives two external programs, `xar` and `openssl`, plus a
//! table-of-contents extractor that is either built in or an external
//! `xartool`-style binary invoked as `<tool> <archive>`.

pub mod openssl;
pub mod xar;

pub use openssl::{DigestAlgorithm, OpenSslTool};
pub use xar::{CertChain, XarTool};

use crate::process::Invocation;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// How stage 4 obtains the compressed table of contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TocExtractor {
    /// Read the TOC with [`crate::xar::extract_toc`], no process is spawned.
    #[default]
    Builtin,
    /// Run `<program> <archive>` in the temp directory; it must write `toc.dat`
    /// into its working directory.
    External(PathBuf),
}

impl TocExtractor {
    pub fn invocation(program: &Path, archive: &Path, work_dir: &Path) -> Invocation {
        Invocation::new(program).arg(archive).current_dir(work_dir)
    }
}

/// The set of external programs used by one packer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolchain {
    pub xar: XarTool,
    pub openssl: OpenSslTool,
    pub toc: TocExtractor,
}

impl Toolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn xar(mut self, program: impl Into<PathBuf>) -> Self {
        self.xar = XarTool::new(program);
        self
    }

    pub fn openssl(mut self, program: impl Into<PathBuf>) -> Self {
        self.openssl = OpenSslTool::new(program);
        self
    }

    pub fn toc_tool(mut self, program: impl Into<PathBuf>) -> Self {
        self.toc = TocExtractor::External(program.into());
        self
    }

    /// Apply the overrides present in `paths`, keeping the rest.
    pub fn with_paths(mut self, paths: &ToolPaths) -> Self {
        if let Some(ref xar) = paths.xar {
            self = self.xar(xar);
        }
        if let Some(ref openssl) = paths.openssl {
            self = self.openssl(openssl);
        }
        if let Some(ref toc) = paths.toc_tool {
            self = self.toc_tool(toc);
        }
        self
    }
}

/// Tool overrides as they appear in the `[tools]` table of a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolPaths {
    pub xar: Option<PathBuf>,
    pub openssl: Option<PathBuf>,
    pub toc_tool: Option<PathBuf>,
}

impl ToolPaths {
    /// Resolve relative paths with a directory part against `base`. Bare
    /// program names are left for `PATH` lookup.
    pub(crate) fn resolve_relative(mut self, base: &Path) -> Self {
        for path in [&mut self.xar, &mut self.openssl, &mut self.toc_tool]
            .into_iter()
            .flatten()
        {
            if path.is_relative() && path.components().count() > 1 {
                *path = base.join(&*path);
            }
        }
        self
    }
}
