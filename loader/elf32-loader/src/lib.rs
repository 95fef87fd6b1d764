//! # 32-bit ELF Loader
//!
//! Loads the segment of a 32-bit little-endian `EM_386` image that contains its
//! entry point into this process and calls into it.
//!
//! ## Pipeline
//!
//! ```text
//! path
//!   ↓  LoaderSession::open           (file handle)
//!   ↓  LoaderSession::validate       → Header
//!   ↓  LoaderSession::load           → MappedSegment
//!   ↓  LoaderSession::run  (unsafe)  → i32
//!   ↓  LoaderSession::release        (always; also on drop)
//! ```
//!
//! Each step refuses to run before its predecessor succeeded, and a failing
//! step releases everything the session acquired so far.
//!
//! ## Loading Strategy
//!
//! Only the first `PT_LOAD` entry whose `[p_vaddr, p_vaddr + p_memsz)` holds
//! `e_entry` is loaded. It is placed in an anonymous RWX mapping wherever the
//! OS puts it; `p_filesz` bytes are copied from the file and the rest up to
//! `p_memsz` is zeroed. The entry address is then translated relative to the
//! mapping's base:
//!
//! ```text
//! host entry = mapping base + (e_entry - p_vaddr)
//! ```
//!
//! No relocations are applied, so the loaded code must not depend on running
//! at its link address.
//!
//! ## Safety
//!
//! [`transfer::run`] is the only place that executes loaded bytes. Once it is
//! called the loader has no control over what happens: the code may fault or
//! exit the process, in which case nothing is released.

pub mod address;
mod bytes;
pub mod error;
pub mod header;
pub mod image;
pub mod mapping;
pub mod segment;
pub mod session;
pub mod transfer;

pub use address::VirtualAddress;
pub use error::LoaderError;
pub use header::{Header, HeaderField, ObjectType, validate, validate_reader};
pub use mapping::MappedSegment;
pub use segment::{PFlags, SegmentTableEntry, SegmentType};
pub use session::LoaderSession;

use log::info;
use std::path::Path;

/// Validate `path`, load its entry segment, run it and release everything.
///
/// # Safety
/// Executes code from `path`; see [`transfer::run`].
///
/// # Errors
/// The first error any step reports. Resources are released in every case
/// where control returns to the loader.
pub unsafe fn load_and_run(path: &Path) -> Result<i32, LoaderError> {
    let mut session = LoaderSession::open(path)?;
    session.validate()?;
    session.load()?;

    // SAFETY: forwarded to the caller.
    let result = unsafe { session.run() };
    session.release();
    result
}

/// Validate `path` and locate its entry segment without mapping or running it.
///
/// # Errors
/// As [`LoaderSession::validate`] and [`LoaderSession::locate`].
pub fn verify(path: &Path) -> Result<(Header, SegmentTableEntry), LoaderError> {
    let mut session = LoaderSession::open(path)?;
    let header = session.validate()?;
    let entry = session.locate()?;
    info!(
        "{} is valid and supported: entry {} in segment at {}",
        path.display(),
        header.entry,
        entry.vaddr
    );
    Ok((header, entry))
}
