//! External process invocation.
//!
//! Every external tool call made by the packer goes through a [`ToolRunner`].
//! An [`Invocation`] carries the program, its arguments and an explicit working
//! directory, so the packer never changes the working directory of its own
//! process. [`SystemRunner`] runs invocations with [`std::process::Command`]
//! and forwards the tools' output to `tracing`.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// A single external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    binary_stdout: bool,
}

impl Invocation {
    /// Create an invocation of `program` with no arguments.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            current_dir: None,
            binary_stdout: false,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Run the program in `dir` instead of the caller's working directory.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Mark standard output as binary data that must not be logged.
    pub fn binary_stdout(mut self) -> Self {
        self.binary_stdout = true;
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Program name as a lossy string, for diagnostics.
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn is_binary_stdout(&self) -> bool {
        self.binary_stdout
    }

    /// The full command line, space separated, for logging.
    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    /// A successful exit with the given standard output.
    pub fn success_with(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// A failed exit with the given code.
    pub fn failure(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external tools to completion.
///
/// Implementations block until the process exits. An `Err` means the process
/// could not be started; a process that ran and failed is reported through
/// [`ToolOutput::code`].
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput>;
}

impl<R: ToolRunner + ?Sized> ToolRunner for &R {
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        (**self).run(invocation)
    }
}

/// [`ToolRunner`] backed by real operating system processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        debug!(command = %invocation.command_line(), "running command");

        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.get_args());
        if let Some(dir) = invocation.get_current_dir() {
            debug!(dir = %dir.display(), "in dir");
            cmd.current_dir(dir);
        }

        let output = cmd.output()?;
        let program = invocation.program_name();

        if !invocation.is_binary_stdout() {
            forward_lines(&program, &output.stdout, false);
        }
        forward_lines(&program, &output.stderr, true);

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn forward_lines(program: &str, data: &[u8], is_stderr: bool) {
    let text = String::from_utf8_lossy(data);
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        if is_stderr {
            warn!(tool = program, "{line}");
        } else {
            info!(tool = program, "{line}");
        }
    }
}
