use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

/// Load a 32-bit ELF image into this process and run its entry point.
///
/// The segment containing the entry point is mapped and called as
/// `int (*)(void)`; its return value is printed.
#[derive(Parser, Debug)]
#[command(name = "elf32-run", version, about)]
pub struct Cli {
    /// Path to the ELF executable.
    pub path: PathBuf,

    /// Only validate the image and locate its entry segment; do not run it.
    #[arg(long)]
    pub verify: bool,

    /// Diagnostics written to stderr (off, error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: LevelFilter,
}
