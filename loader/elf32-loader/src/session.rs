//! # Loader Session
//!
//! Owns everything one invocation acquires: the file handle, the decoded
//! header, the selected segment-table entry and at most one mapping. Each step
//! checks that its predecessor succeeded, and any failure releases the whole
//! session before the error is handed back.

use crate::error::LoaderError;
use crate::header::{Header, validate_reader};
use crate::mapping::MappedSegment;
use crate::segment::{self, SegmentTableEntry};
use crate::transfer;
use log::debug;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// State of a single load-and-run invocation.
///
/// Not shareable between threads; use one session per invocation. Dropping the
/// session releases whatever it still holds.
#[derive(Debug)]
pub struct LoaderSession {
    path: PathBuf,
    file: Option<File>,
    file_len: u64,
    header: Option<Header>,
    segment: Option<SegmentTableEntry>,
    mapping: Option<MappedSegment>,
}

impl LoaderSession {
    /// Open `path` read-only and start a session on it.
    ///
    /// # Errors
    /// [`LoaderError::Io`] if the file cannot be opened or its size queried.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| LoaderError::Io {
            path: path.clone(),
            source,
        };

        let file = File::open(&path).map_err(io_err)?;
        let file_len = file.metadata().map_err(io_err)?.len();
        debug!("Opened {} ({file_len} bytes)", path.display());

        Ok(Self {
            path,
            file: Some(file),
            file_len,
            header: None,
            segment: None,
            mapping: None,
        })
    }

    /// Validate the header at offset 0 and keep it for the following steps.
    ///
    /// # Errors
    /// Anything [`validate_reader`](crate::validate_reader) reports, or
    /// [`LoaderError::OutOfOrder`] if the session was already released. The
    /// session is released on error.
    pub fn validate(&mut self) -> Result<Header, LoaderError> {
        let result = self.try_validate();
        self.release_on_error(result)
    }

    fn try_validate(&mut self) -> Result<Header, LoaderError> {
        let file = self
            .file
            .as_mut()
            .ok_or(LoaderError::OutOfOrder { step: "validate" })?;
        file.seek(SeekFrom::Start(0))
            .map_err(|source| LoaderError::Seek { offset: 0, source })?;

        let header = validate_reader(file)?;
        self.header = Some(header);
        Ok(header)
    }

    /// Find the segment-table entry holding the entry point without mapping it.
    ///
    /// # Errors
    /// As [`segment::find_entry_segment`] and
    /// [`SegmentTableEntry::check_loadable`], so an entry that `locate` accepts
    /// is one [`load`](Self::load) would map. [`LoaderError::OutOfOrder`] if the
    /// header has not been validated. The session is released on error.
    pub fn locate(&mut self) -> Result<SegmentTableEntry, LoaderError> {
        let result = self.try_locate();
        self.release_on_error(result)
    }

    fn try_locate(&mut self) -> Result<SegmentTableEntry, LoaderError> {
        let (file, header) = self.file_and_header("locate the entry segment")?;
        let entry = segment::find_entry_segment(file, &header)?;
        entry.check_loadable(self.file_len)?;
        self.segment = Some(entry);
        Ok(entry)
    }

    /// Map and populate the segment that holds the entry point.
    ///
    /// Replaces a mapping left over from an earlier call.
    ///
    /// # Errors
    /// As [`segment::load`], or [`LoaderError::OutOfOrder`] if the header has
    /// not been validated. The session is released on error.
    pub fn load(&mut self) -> Result<&MappedSegment, LoaderError> {
        self.mapping = None;
        match self.try_load() {
            Ok((entry, mapping)) => {
                self.segment = Some(entry);
                Ok(&*self.mapping.insert(mapping))
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    fn try_load(&mut self) -> Result<(SegmentTableEntry, MappedSegment), LoaderError> {
        let file_len = self.file_len;
        let (file, header) = self.file_and_header("load")?;
        segment::load(file, file_len, &header)
    }

    /// Invoke the loaded entry point.
    ///
    /// The session keeps its resources afterwards; call [`release`](Self::release)
    /// or drop the session once done.
    ///
    /// # Safety
    /// See [`transfer::run`]. In particular, if the invoked code faults or exits,
    /// nothing this session holds is released.
    ///
    /// # Errors
    /// [`LoaderError::OutOfOrder`] if nothing is loaded, otherwise as [`transfer::run`].
    pub unsafe fn run(&mut self) -> Result<i32, LoaderError> {
        let (Some(header), Some(mapping)) = (self.header.as_ref(), self.mapping.as_ref()) else {
            return Err(LoaderError::OutOfOrder { step: "run" });
        };
        // SAFETY: forwarded to the caller.
        unsafe { transfer::run(mapping, header) }
    }

    /// Release everything the session holds.
    ///
    /// Safe to call any number of times, and on sessions where some steps never
    /// ran; each resource is released at most once.
    pub fn release(&mut self) {
        if self.is_released() {
            return;
        }

        debug!("Releasing loader session for {}", self.path.display());
        // Unmap before closing the file the segment was read from.
        drop(self.mapping.take());
        self.segment = None;
        self.header = None;
        drop(self.file.take());
    }

    /// Whether the session no longer holds any resource.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.file.is_none()
            && self.header.is_none()
            && self.segment.is_none()
            && self.mapping.is_none()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total size of the opened file in bytes.
    #[must_use]
    pub const fn file_len(&self) -> u64 {
        self.file_len
    }

    #[must_use]
    pub const fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    #[must_use]
    pub const fn segment(&self) -> Option<&SegmentTableEntry> {
        self.segment.as_ref()
    }

    #[must_use]
    pub const fn mapping(&self) -> Option<&MappedSegment> {
        self.mapping.as_ref()
    }

    const fn file_and_header(&mut self, step: &'static str) -> Result<(&mut File, Header), LoaderError> {
        match (self.file.as_mut(), self.header) {
            (Some(file), Some(header)) => Ok((file, header)),
            _ => Err(LoaderError::OutOfOrder { step }),
        }
    }

    fn release_on_error<T>(&mut self, result: Result<T, LoaderError>) -> Result<T, LoaderError> {
        if result.is_err() {
            self.release();
        }
        result
    }
}

impl Drop for LoaderSession {
    fn drop(&mut self) {
        self.release();
    }
}
