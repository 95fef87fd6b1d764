//! # Segment Table Walking
//!
//! Reads the segment table record by record, picks the first `PT_LOAD` entry
//! whose memory range contains the entry point and populates an anonymous
//! mapping for it from the file.

use crate::address::VirtualAddress;
use crate::bytes::{read_record, read_u32_le};
use crate::error::LoaderError;
use crate::header::Header;
use crate::mapping::MappedSegment;
use core::fmt;
use log::{debug, info, trace};
use std::io::{Read, Seek, SeekFrom};

/// Size in bytes of the on-disk `Elf32_Phdr`.
pub const SEGMENT_ENTRY_SIZE: usize = 32;

pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;

/// `p_type` of a segment-table entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SegmentType {
    Null,
    Load,
    Other(u32),
}

impl SegmentType {
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        match v {
            PT_NULL => Self::Null,
            PT_LOAD => Self::Load,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Null => PT_NULL,
            Self::Load => PT_LOAD,
            Self::Other(v) => v,
        }
    }
}

/// Bitfield wrapper for `Elf32_Phdr.p_flags` (32-bit)
///
/// Layout (LSB→MSB):
/// - bit 0: execute
/// - bit 1: write
/// - bit 2: read
/// - bits 3..31: reserved (must be zero for standard flags)
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PFlags {
    #[bits(1)]
    pub execute: bool,
    #[bits(1)]
    pub write: bool,
    #[bits(1)]
    pub read: bool,
    #[bits(29)]
    __: u32,
}

impl fmt::Display for PFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |set, c| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            bit(self.read(), 'r'),
            bit(self.write(), 'w'),
            bit(self.execute(), 'x')
        )
    }
}

/// Decoded `Elf32_Phdr`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SegmentTableEntry {
    pub kind: SegmentType,
    pub offset: u32,
    pub vaddr: VirtualAddress,
    pub paddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: PFlags,
    pub align: u32,
}

impl SegmentTableEntry {
    /// Decode one record from the first [`SEGMENT_ENTRY_SIZE`] bytes of `bytes`.
    ///
    /// Returns `None` if `bytes` is too short.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            kind: SegmentType::from_raw(read_u32_le(bytes, 0)?),
            offset: read_u32_le(bytes, 4)?,
            vaddr: VirtualAddress::new(read_u32_le(bytes, 8)?),
            paddr: read_u32_le(bytes, 12)?,
            filesz: read_u32_le(bytes, 16)?,
            memsz: read_u32_le(bytes, 20)?,
            flags: PFlags::from_bits(read_u32_le(bytes, 24)?),
            align: read_u32_le(bytes, 28)?,
        })
    }

    /// Whether `addr` lies in `[vaddr, vaddr + memsz)`.
    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: VirtualAddress) -> bool {
        addr.within(self.vaddr, self.memsz)
    }

    /// The selection rule: a `PT_LOAD` entry whose memory range holds `entry`.
    #[inline]
    #[must_use]
    pub fn holds_entry(&self, entry: VirtualAddress) -> bool {
        self.kind == SegmentType::Load && self.contains(entry)
    }

    /// Check the invariants an entry must satisfy before it is mapped.
    ///
    /// # Errors
    /// - [`LoaderError::SegmentSizeMismatch`] if `memsz < filesz`.
    /// - [`LoaderError::TruncatedFile`] if the file-backed bytes run past `file_len`.
    pub fn check_loadable(&self, file_len: u64) -> Result<(), LoaderError> {
        if self.memsz < self.filesz {
            return Err(LoaderError::SegmentSizeMismatch {
                filesz: self.filesz,
                memsz: self.memsz,
            });
        }

        let end = u64::from(self.offset) + u64::from(self.filesz);
        if end > file_len {
            return Err(LoaderError::TruncatedFile {
                what: "segment contents",
                expected: u64::from(self.filesz),
                actual: file_len.saturating_sub(u64::from(self.offset)),
            });
        }
        Ok(())
    }
}

fn seek_to<R: Seek + ?Sized>(reader: &mut R, offset: u64) -> Result<(), LoaderError> {
    reader
        .seek(SeekFrom::Start(offset))
        .map(|_| ())
        .map_err(|source| LoaderError::Seek { offset, source })
}

/// Walk the segment table and return the first entry that holds the entry point.
///
/// Records are read sequentially at a fixed [`SEGMENT_ENTRY_SIZE`] stride;
/// scanning stops at the first match.
///
/// # Errors
/// - [`LoaderError::Seek`] if the table offset cannot be reached.
/// - [`LoaderError::TruncatedFile`] on any short record.
/// - [`LoaderError::EntryPointNotFound`] if no entry matches.
pub fn find_entry_segment<R: Read + Seek + ?Sized>(
    reader: &mut R,
    header: &Header,
) -> Result<SegmentTableEntry, LoaderError> {
    seek_to(reader, u64::from(header.segment_table_offset))?;

    let mut record = [0u8; SEGMENT_ENTRY_SIZE];
    for i in 0..header.segment_count {
        read_record(reader, &mut record, "segment table entry")?;
        let entry = SegmentTableEntry::decode(&record).ok_or(LoaderError::TruncatedFile {
            what: "segment table entry",
            expected: SEGMENT_ENTRY_SIZE as u64,
            actual: record.len() as u64,
        })?;

        trace!(
            "phdr[{i}]: type={:?} vaddr={} memsz={:#x} filesz={:#x} flags={}",
            entry.kind, entry.vaddr, entry.memsz, entry.filesz, entry.flags
        );

        if entry.holds_entry(header.entry) {
            debug!("Entry point {} is in segment {i} at {}", header.entry, entry.vaddr);
            return Ok(entry);
        }
    }

    Err(LoaderError::EntryPointNotFound {
        entry: header.entry,
    })
}

/// Copy the file-backed part of `entry` into `segment` and zero the rest.
fn populate<R: Read + Seek + ?Sized>(
    reader: &mut R,
    entry: &SegmentTableEntry,
    segment: &mut MappedSegment,
) -> Result<(), LoaderError> {
    let filesz = entry.filesz as usize;
    let dst = segment.as_mut_slice();

    if filesz != 0 {
        seek_to(reader, u64::from(entry.offset))?;
        read_record(reader, &mut dst[..filesz], "segment contents")?;
    }

    // Zero BSS tail
    dst[filesz..].fill(0);
    Ok(())
}

/// Select, map and populate the segment holding `header.entry`.
///
/// `file_len` is the total size of the image and bounds the file-backed part
/// of the selected entry. A mapping created here is released again before any
/// error is returned.
///
/// # Errors
/// Everything [`find_entry_segment`] and [`SegmentTableEntry::check_loadable`]
/// report, plus [`LoaderError::Map`] if the mapping is refused.
pub fn load<R: Read + Seek + ?Sized>(
    reader: &mut R,
    file_len: u64,
    header: &Header,
) -> Result<(SegmentTableEntry, MappedSegment), LoaderError> {
    let entry = find_entry_segment(reader, header)?;
    entry.check_loadable(file_len)?;

    let mut segment = MappedSegment::map_anonymous(entry.vaddr, entry.memsz, entry.filesz)?;
    populate(reader, &entry, &mut segment)?;

    info!(
        "Loaded segment {} ({:#x} bytes, {:#x} from file, {}) at {:p}",
        entry.vaddr,
        entry.memsz,
        entry.filesz,
        entry.flags,
        segment.base_ptr()
    );
    Ok((entry, segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageBuilder, SegmentSpec};
    use std::io::Cursor;

    fn header_of(image: &[u8]) -> Header {
        Header::parse(image).unwrap()
    }

    fn load_image(image: Vec<u8>) -> Result<(SegmentTableEntry, MappedSegment), LoaderError> {
        let header = header_of(&image);
        let len = image.len() as u64;
        load(&mut Cursor::new(image), len, &header)
    }

    #[test]
    fn decodes_flags() {
        let flags = PFlags::from_bits(0x5);
        assert!(flags.read());
        assert!(!flags.write());
        assert!(flags.execute());
        assert_eq!(flags.to_string(), "r-x");
    }

    #[test]
    fn flags_are_carried_through_load() {
        let rw = PFlags::new().with_read(true).with_write(true);
        let image = ImageBuilder::new()
            .entry(0x1000)
            .segment(SegmentSpec::load(0x1000, vec![0xC3], 0x10).with_flags(rw))
            .build();
        let (entry, _) = load_image(image).unwrap();
        assert_eq!(entry.flags, rw);
        assert_eq!(entry.flags.to_string(), "rw-");
    }

    #[test]
    fn entry_at_segment_start_matches() {
        let image = ImageBuilder::new()
            .entry(0x1000)
            .segment(SegmentSpec::load(0x1000, vec![0xC3], 0x10))
            .build();
        let (entry, _) = load_image(image).unwrap();
        assert_eq!(entry.vaddr, VirtualAddress::new(0x1000));
    }

    #[test]
    fn entry_at_segment_end_does_not_match() {
        let image = ImageBuilder::new()
            .entry(0x1010)
            .segment(SegmentSpec::load(0x1000, vec![0xC3], 0x10))
            .build();
        assert!(matches!(
            load_image(image),
            Err(LoaderError::EntryPointNotFound { .. })
        ));
    }

    #[test]
    fn first_matching_load_segment_wins() {
        let image = ImageBuilder::new()
            .entry(0x2004)
            .segment(SegmentSpec::other(4, 0x2000, vec![0; 8], 0x100))
            .segment(SegmentSpec::load(0x1000, vec![1; 8], 0x100))
            .segment(SegmentSpec::load(0x2000, vec![2; 8], 0x100))
            .segment(SegmentSpec::load(0x2000, vec![3; 8], 0x100))
            .build();
        let (entry, segment) = load_image(image).unwrap();
        assert_eq!(entry.vaddr, VirtualAddress::new(0x2000));
        assert_eq!(&segment.as_slice()[..8], &[2; 8]);
    }

    #[test]
    fn bss_tail_is_zeroed() {
        let data = vec![0xAA; 24];
        let image = ImageBuilder::new()
            .entry(0x4000)
            .segment(SegmentSpec::load(0x4000, data.clone(), 0x1000))
            .build();
        let (_, segment) = load_image(image).unwrap();
        assert_eq!(segment.len(), 0x1000);
        assert_eq!(&segment.as_slice()[..24], data.as_slice());
        assert!(segment.as_slice()[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn memsz_smaller_than_filesz_is_rejected() {
        let image = ImageBuilder::new()
            .entry(0x1000)
            .segment(SegmentSpec::load(0x1000, vec![0; 32], 16))
            .build();
        assert!(matches!(
            load_image(image),
            Err(LoaderError::SegmentSizeMismatch { filesz: 32, memsz: 16 })
        ));
    }

    #[test]
    fn segment_contents_past_end_of_file_are_truncated() {
        let mut image = ImageBuilder::returning(7).build();
        image.truncate(image.len() - 2);
        assert!(matches!(
            load_image(image),
            Err(LoaderError::TruncatedFile { what: "segment contents", .. })
        ));
    }

    #[test]
    fn table_offset_past_end_of_file_is_truncated() {
        let image = ImageBuilder::returning(7)
            .segment_table_offset(0x10_0000)
            .build();
        assert!(matches!(
            load_image(image),
            Err(LoaderError::TruncatedFile { what: "segment table entry", .. })
        ));
    }

    #[test]
    fn empty_table_finds_nothing() {
        let image = ImageBuilder::new().entry(0x1000).build();
        assert!(matches!(
            load_image(image),
            Err(LoaderError::EntryPointNotFound { entry }) if entry == VirtualAddress::new(0x1000)
        ));
    }
}
