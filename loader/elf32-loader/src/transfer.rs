//! # Control Transfer
//!
//! The one place where memory safety ends: the entry address is translated into
//! the mapped segment, turned into a function pointer and called.

use crate::error::LoaderError;
use crate::header::Header;
use crate::mapping::MappedSegment;
use log::info;

/// Signature the entry point is invoked with.
pub type EntryFn = extern "C" fn() -> i32;

/// Offset of `header.entry` within `segment`.
///
/// Checked independently of the selection rule that produced `segment`.
///
/// # Errors
/// [`LoaderError::InvalidEntryPoint`] unless `0 <= entry - vaddr < memsz`.
pub fn entry_offset(segment: &MappedSegment, header: &Header) -> Result<usize, LoaderError> {
    let invalid = || LoaderError::InvalidEntryPoint {
        entry: header.entry,
        vaddr: segment.vaddr(),
        memsz: u32::try_from(segment.len()).unwrap_or(u32::MAX),
    };

    let offset = header
        .entry
        .offset_from(segment.vaddr())
        .ok_or_else(invalid)? as usize;
    if offset >= segment.len() {
        return Err(invalid());
    }
    Ok(offset)
}

/// Call the entry point of a loaded image and return what it returns.
///
/// # Safety
/// This is an unchecked jump into bytes read from a file. The code runs with
/// this process's privileges and address space and may corrupt it, fault, or
/// never return. A fault inside it cannot be recovered from here, and nothing
/// after the call (including releasing the session) is guaranteed to run.
///
/// The caller must trust the image to contain a function at `header.entry`
/// that follows the C calling convention, takes no arguments and returns a
/// 32-bit integer.
///
/// # Errors
/// [`LoaderError::InvalidEntryPoint`] if the entry is outside `segment`; in that
/// case no code is executed.
pub unsafe fn run(segment: &MappedSegment, header: &Header) -> Result<i32, LoaderError> {
    let offset = entry_offset(segment, header)?;

    // SAFETY: `offset < segment.len()`, so the address is inside the mapping. The
    // caller vouches that a function with the `EntryFn` signature lives there.
    let entry = unsafe {
        let addr = segment.base_ptr().add(offset);
        core::mem::transmute::<*const u8, EntryFn>(addr)
    };

    info!(
        "Transferring control to {} (segment offset {offset:#x})",
        header.entry
    );
    let result = entry();
    info!("Entry point returned {result}");
    Ok(result)
}
