//! # ELF32 Runner
//!
//! Command-line front end to [`elf32_loader`]: validates the image given on the
//! command line, loads the segment holding its entry point and reports the
//! value the entry point returns.
//!
//! Exit codes:
//! - `0` — the image was loaded and its entry point returned (whatever value).
//! - `1` — usage error, open failure, validation or loading failure.

mod cli;
mod logger;

use crate::cli::Cli;
use crate::logger::StderrLogger;
use clap::Parser;
use elf32_loader::LoaderError;
use log::debug;
use std::error::Error;
use std::process::ExitCode;

const USAGE_EXIT_CODE: u8 = 1;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version also arrive here.
            return if e.use_stderr() {
                ExitCode::from(USAGE_EXIT_CODE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(e) = StderrLogger::new(cli.log_level).init() {
        eprintln!("warning: logging unavailable: {e}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("{e:?}");
            eprintln!("error: {}", describe(&e));
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<(), LoaderError> {
    if cli.verify {
        let (header, entry) = elf32_loader::verify(&cli.path)?;
        println!(
            "{}: valid and supported (entry {}, {} segments, loads {} {:#x} bytes {})",
            cli.path.display(),
            header.entry,
            header.segment_count,
            entry.vaddr,
            entry.memsz,
            entry.flags
        );
        return Ok(());
    }

    // SAFETY: Running the image is the point of this tool; whoever invokes it
    // vouches for the image.
    let result = unsafe { elf32_loader::load_and_run(&cli.path) }?;
    println!("User _start return value = {result}");
    Ok(())
}

/// The error followed by its chain of sources.
fn describe(e: &LoaderError) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
