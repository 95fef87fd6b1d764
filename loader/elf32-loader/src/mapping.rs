//! # Anonymous Segment Mapping
//!
//! One readable, writable and executable private anonymous mapping per loaded
//! segment. The mapping is released exactly once, when its [`MappedSegment`]
//! is dropped.

use crate::address::VirtualAddress;
use crate::error::LoaderError;
use core::ptr::{self, NonNull};
use core::slice;
use log::{trace, warn};
use std::io;

/// A loaded segment living in this process.
///
/// Owns `len` bytes of anonymous memory starting at [`base_ptr`](Self::base_ptr).
/// The image believes these bytes live at [`vaddr`](Self::vaddr); translation
/// between the two is purely by offset.
///
/// The type is neither `Send` nor `Sync`: it is owned by one loader session
/// on one thread.
#[derive(Debug)]
pub struct MappedSegment {
    base: NonNull<u8>,
    len: usize,
    vaddr: VirtualAddress,
    filesz: u32,
}

impl MappedSegment {
    /// Request `memsz` bytes of anonymous RWX memory for the segment at `vaddr`.
    ///
    /// The memory is zero-filled by the OS. `filesz` is only recorded.
    ///
    /// # Errors
    /// [`LoaderError::Map`] if `memsz` is zero or the OS refuses the mapping.
    pub fn map_anonymous(
        vaddr: VirtualAddress,
        memsz: u32,
        filesz: u32,
    ) -> Result<Self, LoaderError> {
        let len = memsz as usize;
        if len == 0 {
            return Err(LoaderError::Map {
                len,
                source: io::Error::from(io::ErrorKind::InvalidInput),
            });
        }

        // SAFETY: A fresh anonymous mapping at an address of the kernel's choosing
        // does not alias any existing Rust object.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(LoaderError::Map {
                len,
                source: io::Error::last_os_error(),
            });
        }

        let Some(base) = NonNull::new(raw.cast::<u8>()) else {
            return Err(LoaderError::Map {
                len,
                source: io::Error::other("mmap returned a null mapping"),
            });
        };

        trace!("Mapped {len:#x} bytes at {:p} for segment {vaddr}", base.as_ptr());
        Ok(Self {
            base,
            len,
            vaddr,
            filesz,
        })
    }

    /// Host address of the first byte of the segment.
    #[inline]
    #[must_use]
    pub const fn base_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// The segment's address as declared by the image.
    #[inline]
    #[must_use]
    pub const fn vaddr(&self) -> VirtualAddress {
        self.vaddr
    }

    /// Mapped size, i.e. the segment's memory size.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of leading bytes that came from the file.
    #[inline]
    #[must_use]
    pub const fn file_size(&self) -> u32 {
        self.filesz
    }

    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        // SAFETY: `base..base + len` is a live mapping owned by `self`.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    pub const fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl Drop for MappedSegment {
    fn drop(&mut self) {
        // SAFETY: The region was obtained from mmap with exactly this length and
        // is unmapped nowhere else.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        if rc == 0 {
            trace!("Unmapped segment {} ({:#x} bytes)", self.vaddr, self.len);
        } else {
            warn!(
                "Failed to unmap segment {}: {}",
                self.vaddr,
                io::Error::last_os_error()
            );
        }
    }
}
