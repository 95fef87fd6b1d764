//! # ELF32 Header Parsing
//!
//! Decodes the 52-byte file header field by field and checks it against the one
//! flavour this loader runs: 32-bit, little-endian, `EM_386`, current version,
//! executable or relocatable.

use crate::address::VirtualAddress;
use crate::bytes::{read_record, read_u16_le, read_u32_le};
use crate::error::LoaderError;
use core::fmt;
use log::debug;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Size in bytes of the on-disk `Elf32_Ehdr`.
pub const HEADER_SIZE: usize = 52;

pub const EI_MAGIC_BYTES: [u8; 4] = [0x7F, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;

pub const ELFCLASS32: u8 = 1;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u32 = 1;
pub const EM_386: u16 = 3;

/// `e_type` of an image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ObjectType {
    None,
    Relocatable,
    Executable,
    Shared,
    Core,
    Other(u16),
}

impl ObjectType {
    #[must_use]
    pub const fn from_raw(v: u16) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Relocatable,
            2 => Self::Executable,
            3 => Self::Shared,
            4 => Self::Core,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Relocatable => 1,
            Self::Executable => 2,
            Self::Shared => 3,
            Self::Core => 4,
            Self::Other(v) => v,
        }
    }

    /// Only executables and relocatables are accepted.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::Relocatable | Self::Executable)
    }
}

/// Header field that failed validation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HeaderField {
    Class,
    DataEncoding,
    IdentVersion,
    Machine,
    Version,
    Type,
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Class => "class",
            Self::DataEncoding => "data encoding",
            Self::IdentVersion => "ident version",
            Self::Machine => "machine",
            Self::Version => "version",
            Self::Type => "type",
        })
    }
}

/// Decoded `Elf32_Ehdr`.
///
/// A `Header` obtained from [`Header::parse`] or [`validate`] has passed every
/// check; one that fails is never handed out.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub ident: [u8; 16],
    pub kind: ObjectType,
    pub machine: u16,
    pub version: u32,
    pub entry: VirtualAddress,
    pub segment_table_offset: u32,
    pub section_table_offset: u32,
    pub flags: u32,
    pub header_size: u16,
    pub segment_entry_size: u16,
    pub segment_count: u16,
    pub section_entry_size: u16,
    pub section_count: u16,
    pub section_name_index: u16,
}

impl Header {
    /// Decode and validate a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    /// - [`LoaderError::TruncatedFile`] if fewer than [`HEADER_SIZE`] bytes are given.
    /// - [`LoaderError::InvalidFormat`] if the magic does not match.
    /// - [`LoaderError::UnsupportedFormat`] naming the first field that is not supported.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoaderError> {
        if bytes.len() < HEADER_SIZE {
            return Err(LoaderError::TruncatedFile {
                what: "ELF header",
                expected: HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut ident = [0u8; 16];
        ident.copy_from_slice(&bytes[..16]);

        // Validate magic 0x7F 'E''L''F' before looking at anything else.
        let magic = [ident[0], ident[1], ident[2], ident[3]];
        if magic != EI_MAGIC_BYTES {
            return Err(LoaderError::InvalidFormat { magic });
        }

        let short = || LoaderError::TruncatedFile {
            what: "ELF header",
            expected: HEADER_SIZE as u64,
            actual: bytes.len() as u64,
        };
        let u16_at = |off| read_u16_le(bytes, off).ok_or_else(short);
        let u32_at = |off| read_u32_le(bytes, off).ok_or_else(short);

        let header = Self {
            ident,
            kind: ObjectType::from_raw(u16_at(16)?),
            machine: u16_at(18)?,
            version: u32_at(20)?,
            entry: VirtualAddress::new(u32_at(24)?),
            segment_table_offset: u32_at(28)?,
            section_table_offset: u32_at(32)?,
            flags: u32_at(36)?,
            header_size: u16_at(40)?,
            segment_entry_size: u16_at(42)?,
            segment_count: u16_at(44)?,
            section_entry_size: u16_at(46)?,
            section_count: u16_at(48)?,
            section_name_index: u16_at(50)?,
        };

        header.check_supported()?;
        Ok(header)
    }

    fn check_supported(&self) -> Result<(), LoaderError> {
        let unsupported = |field, value| Err(LoaderError::UnsupportedFormat { field, value });

        if self.ident[EI_CLASS] != ELFCLASS32 {
            return unsupported(HeaderField::Class, u32::from(self.ident[EI_CLASS]));
        }
        if self.ident[EI_DATA] != ELFDATA2LSB {
            return unsupported(HeaderField::DataEncoding, u32::from(self.ident[EI_DATA]));
        }
        if u32::from(self.ident[EI_VERSION]) != EV_CURRENT {
            return unsupported(HeaderField::IdentVersion, u32::from(self.ident[EI_VERSION]));
        }
        if self.machine != EM_386 {
            return unsupported(HeaderField::Machine, u32::from(self.machine));
        }
        if self.version != EV_CURRENT {
            return unsupported(HeaderField::Version, self.version);
        }
        if !self.kind.is_supported() {
            return unsupported(HeaderField::Type, u32::from(self.kind.raw()));
        }
        Ok(())
    }
}

/// Read and validate the header from the current position of `reader`.
///
/// Consumes exactly [`HEADER_SIZE`] bytes on success (fewer only if the input
/// ends early); nothing beyond the header is touched.
///
/// # Errors
/// See [`Header::parse`]; additionally [`LoaderError::Read`] if the reader fails.
pub fn validate_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Header, LoaderError> {
    let mut buf = [0u8; HEADER_SIZE];
    read_record(reader, &mut buf, "ELF header")?;
    let header = Header::parse(&buf)?;
    debug!(
        "ELF header: type={:?} machine={} entry={} phoff={:#x} phnum={}",
        header.kind,
        header.machine,
        header.entry,
        header.segment_table_offset,
        header.segment_count
    );
    Ok(header)
}

/// Open `path` read-only and validate its header.
///
/// The handle is closed again before returning; callers that want to keep
/// reading should open a [`LoaderSession`](crate::LoaderSession) instead.
///
/// # Errors
/// [`LoaderError::Io`] if the file cannot be opened, otherwise as [`validate_reader`].
pub fn validate(path: &Path) -> Result<Header, LoaderError> {
    let mut file = File::open(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    validate_reader(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageBuilder;
    use proptest::prelude::*;
    use std::io::{Cursor, Seek};

    fn valid_image() -> Vec<u8> {
        ImageBuilder::returning(42).build()
    }

    fn assert_unsupported(bytes: &[u8], expected: HeaderField) {
        match Header::parse(bytes) {
            Err(LoaderError::UnsupportedFormat { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected unsupported {expected}, got {other:?}"),
        }
    }

    #[test]
    fn parses_valid_header() {
        let image = valid_image();
        let header = Header::parse(&image).unwrap();
        assert_eq!(header.kind, ObjectType::Executable);
        assert_eq!(header.machine, EM_386);
        assert_eq!(header.segment_table_offset, u32::try_from(HEADER_SIZE).unwrap());
        assert_eq!(header.segment_entry_size, 32);
        assert_eq!(header.segment_count, 1);
        assert_eq!(header.entry, VirtualAddress::new(ImageBuilder::DEFAULT_VADDR));
    }

    #[test]
    fn relocatable_is_accepted() {
        let image = ImageBuilder::returning(42).kind(ObjectType::Relocatable).build();
        assert_eq!(Header::parse(&image).unwrap().kind, ObjectType::Relocatable);
    }

    #[test]
    fn ten_byte_input_is_truncated() {
        let mut reader = Cursor::new(vec![0x7F, b'E', b'L', b'F', 1, 1, 1, 0, 0, 0]);
        assert!(matches!(
            validate_reader(&mut reader),
            Err(LoaderError::TruncatedFile { actual: 10, .. })
        ));
    }

    #[test]
    fn bad_magic_stops_after_the_header() {
        let mut image = valid_image();
        image[1] = b'X';
        let mut reader = Cursor::new(image);
        assert!(matches!(
            validate_reader(&mut reader),
            Err(LoaderError::InvalidFormat { magic: [0x7F, b'X', b'L', b'F'] })
        ));
        assert_eq!(reader.stream_position().unwrap(), HEADER_SIZE as u64);
    }

    #[test]
    fn each_field_is_named_when_unsupported() {
        let image = valid_image();

        let mut bytes = image.clone();
        bytes[EI_CLASS] = 2;
        assert_unsupported(&bytes, HeaderField::Class);

        let mut bytes = image.clone();
        bytes[EI_DATA] = 2;
        assert_unsupported(&bytes, HeaderField::DataEncoding);

        let mut bytes = image.clone();
        bytes[EI_VERSION] = 0;
        assert_unsupported(&bytes, HeaderField::IdentVersion);

        let mut bytes = image.clone();
        bytes[18..20].copy_from_slice(&62u16.to_le_bytes());
        assert_unsupported(&bytes, HeaderField::Machine);

        let mut bytes = image;
        bytes[20..24].copy_from_slice(&2u32.to_le_bytes());
        assert_unsupported(&bytes, HeaderField::Version);

        let bytes = ImageBuilder::returning(42).kind(ObjectType::Shared).build();
        assert_unsupported(&bytes, HeaderField::Type);
    }

    #[test]
    fn unsupported_machine_reports_value() {
        let image = ImageBuilder::returning(0).machine(0x28).build();
        let err = Header::parse(&image).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported format: machine is 0x28");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        assert!(matches!(validate(&path), Err(LoaderError::Io { .. })));
    }

    proptest! {
        #[test]
        fn any_wrong_magic_is_invalid_format(
            magic in any::<[u8; 4]>().prop_filter("must differ", |m| *m != EI_MAGIC_BYTES),
            tail in proptest::collection::vec(any::<u8>(), HEADER_SIZE - 4..256),
        ) {
            let mut bytes = magic.to_vec();
            bytes.extend_from_slice(&tail);
            let mut reader = Cursor::new(bytes);
            let is_invalid = matches!(
                validate_reader(&mut reader),
                Err(LoaderError::InvalidFormat { .. })
            );
            prop_assert!(is_invalid);
            prop_assert_eq!(reader.stream_position().unwrap(), HEADER_SIZE as u64);
        }
    }
}
