pub mod builder;
pub mod crypto;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod tools;
pub mod xar;

pub use builder::{PackConfig, PackOptions, SignatureSizing};
pub use error::Error;
pub use pipeline::{PackReport, PackRequest, PackState, Packer, Stage};
pub use process::{Invocation, SystemRunner, ToolOutput, ToolRunner};
pub use tools::{TocExtractor, ToolPaths, Toolchain};
pub use xar::XarArchive;

pub type Result<T> = std::result::Result<T, Error>;
