use crate::address::VirtualAddress;
use crate::header::HeaderField;
use std::io;
use std::path::PathBuf;

/// Everything that can end a loader invocation early.
///
/// Every variant is fatal to the invocation it came from; there is no retry.
/// The CLI maps all of them to exit code 1 via [`LoaderError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Failed to open {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Truncated file while reading {what}: expected {expected} bytes, got {actual}")]
    TruncatedFile {
        what: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("Failed to read {what}")]
    Read {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Invalid format: bad magic {magic:02X?}")]
    InvalidFormat { magic: [u8; 4] },

    #[error("Unsupported format: {field} is {value:#x}")]
    UnsupportedFormat { field: HeaderField, value: u32 },

    #[error("Failed to seek to offset {offset:#x}")]
    Seek {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("No loadable segment contains entry point {entry}")]
    EntryPointNotFound { entry: VirtualAddress },

    #[error("Failed to map {len} bytes for the program segment")]
    Map {
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("Entry point {entry} lies outside the mapped segment at {vaddr} ({memsz} bytes)")]
    InvalidEntryPoint {
        entry: VirtualAddress,
        vaddr: VirtualAddress,
        memsz: u32,
    },

    #[error("The segment's memory size {memsz:#x} is smaller than its file size {filesz:#x}")]
    SegmentSizeMismatch { filesz: u32, memsz: u32 },

    #[error("Cannot {step} before the previous loader step succeeded")]
    OutOfOrder { step: &'static str },
}

impl LoaderError {
    /// Process exit code reported for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        1
    }
}
