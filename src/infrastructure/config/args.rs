//! Command-line interface.

use super::app_config::LogLevel;
use crate::infrastructure::image::{ResizeFilter, StorageFormat};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments of the `vignette` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vignette",
    version,
    about = "A persistent image cache with on-demand derived variants",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Store directory.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub store: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Payload encoding for new entries.
    #[arg(long, value_enum, global = true)]
    pub format: Option<StorageFormat>,

    /// Resampling filter for derived variants.
    #[arg(long, value_enum, global = true)]
    pub filter: Option<ResizeFilter>,

    /// Derive missing exact-size variants on plain lookups.
    #[arg(long, global = true)]
    pub generate_on_miss: bool,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Cache operations exposed as subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store an image file.
    Put {
        /// Image file to store.
        file: PathBuf,

        /// Identifier; derived from the content when omitted.
        #[arg(long)]
        id: Option<String>,

        /// Variant options; stores an original when omitted.
        #[arg(long)]
        options: Option<String>,
    },

    /// Resolve an image and write it to a file.
    Get {
        /// Identifier.
        id: String,

        /// Variant options.
        #[arg(long)]
        options: Option<String>,

        /// Exact size to resolve.
        #[command(flatten)]
        size: SizeArgs,

        /// Derive the variant from the original when it is missing.
        #[arg(long)]
        dynamic: bool,

        /// Output file; the extension picks the format.
        #[arg(short, long, value_name = "PATH")]
        out: PathBuf,
    },

    /// Remove an image and its variants, or a single variant.
    Delete {
        /// Identifier.
        id: String,

        /// Variant options; removes every entry of the identifier when omitted.
        #[arg(long)]
        options: Option<String>,
    },

    /// Remove entries not accessed for a while.
    Clean {
        /// Age in seconds.
        #[arg(long, value_name = "SECONDS")]
        older_than: u64,
    },

    /// Show entry count and location.
    Stats,
}

/// Exact-size flags shared by lookups.
#[derive(Debug, Clone, Copy, Args)]
pub struct SizeArgs {
    /// Exact width in points.
    #[arg(long, requires = "height")]
    pub width: Option<u32>,

    /// Exact height in points.
    #[arg(long, requires = "width")]
    pub height: Option<u32>,

    /// Density scale.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f32,
}
