//! Command-line interface for the Safari extension packer.
//!
//! Packs a `.safariextension` directory into a signed `.safariextz` archive
//! by driving `xar` and `openssl`, and inspects existing archives.

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use safariextz::xar::{self, XarArchive};
use safariextz::{PackConfig, Packer, SignatureSizing, Toolchain};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SOURCE_SUFFIX: &str = ".safariextension";
const ARCHIVE_EXTENSION: &str = "safariextz";

#[derive(Parser)]
#[command(name = "safariextz")]
#[command(about = "Safari extension packer", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack and sign an extension directory
    Pack(PackArgs),

    /// Write the compressed table of contents of an archive
    ExtractToc {
        /// Archive to read
        archive: PathBuf,

        /// Output file
        #[arg(short, long, default_value = "toc.dat")]
        output: PathBuf,
    },

    /// Verify archive checksums and list its entries
    Verify {
        /// Archive to read
        archive: PathBuf,
    },
}

#[derive(Args)]
struct PackArgs {
    /// Extension directory (e.g. src/test.safariextension)
    source: PathBuf,

    /// Output archive, defaults to the source with a .safariextz extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML config file with [pack] and [tools] tables
    #[arg(short, long, env = "SAFARIEXTZ_CONFIG")]
    config: Option<PathBuf>,

    /// Private key used for signing
    #[arg(short = 'k', long, env = "SAFARIEXTZ_PRIVATE_KEY")]
    private_key: Option<PathBuf>,

    /// Developer certificate for the extension (leaf)
    #[arg(long, env = "SAFARIEXTZ_EXTENSION_CER")]
    extension_cer: Option<PathBuf>,

    /// Apple intermediate certificate
    #[arg(long, env = "SAFARIEXTZ_APPLE_DEV_CER")]
    apple_dev_cer: Option<PathBuf>,

    /// Apple root certificate
    #[arg(long, env = "SAFARIEXTZ_APPLE_ROOT_CER")]
    apple_root_cer: Option<PathBuf>,

    /// Directory for transient files, defaults to the current directory
    #[arg(long, env = "SAFARIEXTZ_TEMP")]
    temp: Option<PathBuf>,

    /// xar binary with --replace-sign and --inject-sig support
    #[arg(long, env = "SAFARIEXTZ_XAR")]
    xar: Option<PathBuf>,

    /// openssl binary
    #[arg(long, env = "SAFARIEXTZ_OPENSSL")]
    openssl: Option<PathBuf>,

    /// External TOC extractor run as `<tool> <archive>`; built in when unset
    #[arg(long, env = "SAFARIEXTZ_TOC_TOOL")]
    toc_tool: Option<PathBuf>,

    /// Take the signature size from the RSA key instead of a probe signature
    #[arg(long)]
    size_from_key: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn,safariextz=info",
        (false, 1) => "warn,safariextz=debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Process exit status for a failed command: the failing tool's own exit
/// code when there is one, 1 otherwise.
fn exit_status(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<safariextz::Error>()
        .and_then(safariextz::Error::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(1)
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Pack(args) => pack(args),
        Command::ExtractToc { archive, output } => {
            let len = xar::extract_toc(&archive, &output)
                .with_context(|| format!("Failed to extract TOC from {}", archive.display()))?;
            info!(bytes = len, output = %output.display(), "wrote toc");
            Ok(())
        }
        Command::Verify { archive } => verify(&archive),
    }
}

fn pack(args: PackArgs) -> anyhow::Result<()> {
    let config = match args.config {
        Some(ref path) => PackConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PackConfig::default(),
    };

    let mut options = config.pack;
    if let Some(path) = args.private_key {
        options = options.private_key(path);
    }
    if let Some(path) = args.extension_cer {
        options = options.extension_cer(path);
    }
    if let Some(path) = args.apple_dev_cer {
        options = options.apple_dev_cer(path);
    }
    if let Some(path) = args.apple_root_cer {
        options = options.apple_root_cer(path);
    }
    if let Some(path) = args.temp {
        options = options.temp(path);
    }
    if args.size_from_key {
        options = options.signature_sizing(SignatureSizing::FromKey);
    }

    let mut tools = Toolchain::new().with_paths(&config.tools);
    if let Some(path) = args.xar {
        tools = tools.xar(path);
    }
    if let Some(path) = args.openssl {
        tools = tools.openssl(path);
    }
    if let Some(path) = args.toc_tool {
        tools = tools.toc_tool(path);
    }

    let output = args
        .output
        .unwrap_or_else(|| default_output(&args.source));

    let report = Packer::new()
        .toolchain(tools)
        .run(&output, &args.source, &options)
        .with_context(|| format!("Failed to pack {}", args.source.display()))?;

    println!(
        "Signed: {} ({}-byte signature)",
        report.archive.display(),
        report.signature_size
    );
    Ok(())
}

fn verify(path: &Path) -> anyhow::Result<()> {
    let mut archive = XarArchive::open_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    for entry in archive.entry_paths() {
        println!("{entry}");
    }

    match archive.signature()? {
        Some(signature) => println!(
            "signature: {}, {} bytes, {} certificates",
            signature.style,
            signature.data.len(),
            signature.certificates.len()
        ),
        None => println!("signature: none"),
    }

    archive
        .verify()
        .with_context(|| format!("Verification failed for {}", path.display()))?;
    println!("checksums: ok");
    Ok(())
}

/// `dir/Name.safariextension` becomes `dir/Name.safariextz`.
fn default_output(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match name.strip_suffix(SOURCE_SUFFIX) {
        Some(stem) if !stem.is_empty() => {
            source.with_file_name(format!("{stem}.{ARCHIVE_EXTENSION}"))
        }
        _ => source.with_extension(ARCHIVE_EXTENSION),
    }
}
