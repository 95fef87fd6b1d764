//! # Synthetic Image Writer
//!
//! Builds minimal 32-bit little-endian `EM_386` images in memory: the header,
//! a segment table right behind it, and the segment contents after that.

use crate::header::{
    EI_MAGIC_BYTES, ELFCLASS32, ELFDATA2LSB, EM_386, EV_CURRENT, HEADER_SIZE, ObjectType,
};
use crate::segment::{PFlags, PT_LOAD, SEGMENT_ENTRY_SIZE};

/// One segment to emit.
#[derive(Debug, Clone)]
pub struct SegmentSpec {
    pub kind: u32,
    pub vaddr: u32,
    /// File-backed bytes; their length becomes `p_filesz`.
    pub data: Vec<u8>,
    pub memsz: u32,
    pub flags: PFlags,
}

impl SegmentSpec {
    /// A `PT_LOAD` segment, readable and executable.
    #[must_use]
    pub fn load(vaddr: u32, data: Vec<u8>, memsz: u32) -> Self {
        Self::other(PT_LOAD, vaddr, data, memsz)
    }

    #[must_use]
    pub const fn other(kind: u32, vaddr: u32, data: Vec<u8>, memsz: u32) -> Self {
        Self {
            kind,
            vaddr,
            data,
            memsz,
            flags: PFlags::new().with_read(true).with_execute(true),
        }
    }

    #[must_use]
    pub const fn with_flags(mut self, flags: PFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    kind: ObjectType,
    machine: u16,
    entry: u32,
    segment_table_offset: Option<u32>,
    segments: Vec<SegmentSpec>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// Link address conventionally used for 32-bit x86 executables.
    pub const DEFAULT_VADDR: u32 = 0x0804_8000;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            kind: ObjectType::Executable,
            machine: EM_386,
            entry: 0,
            segment_table_offset: None,
            segments: Vec::new(),
        }
    }

    /// x86 machine code for `mov eax, value ; ret`.
    #[must_use]
    pub fn return_code(value: i32) -> Vec<u8> {
        let mut code = vec![0xB8];
        code.extend_from_slice(&value.to_le_bytes());
        code.push(0xC3);
        code
    }

    /// An executable whose single `PT_LOAD` segment at [`Self::DEFAULT_VADDR`]
    /// starts with code returning `value`.
    #[must_use]
    pub fn returning(value: i32) -> Self {
        Self::returning_at(Self::DEFAULT_VADDR, value, 0)
    }

    /// As [`returning`](Self::returning), at `vaddr` and with `bss` zero-filled
    /// bytes after the code.
    #[must_use]
    pub fn returning_at(vaddr: u32, value: i32, bss: u32) -> Self {
        let code = Self::return_code(value);
        let memsz = len_u32(code.len()).saturating_add(bss);
        Self::new()
            .entry(vaddr)
            .segment(SegmentSpec::load(vaddr, code, memsz))
    }

    #[must_use]
    pub const fn kind(mut self, kind: ObjectType) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub const fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    #[must_use]
    pub const fn entry(mut self, entry: u32) -> Self {
        self.entry = entry;
        self
    }

    /// Record `offset` as `e_phoff` instead of where the table is really written.
    #[must_use]
    pub const fn segment_table_offset(mut self, offset: u32) -> Self {
        self.segment_table_offset = Some(offset);
        self
    }

    #[must_use]
    pub fn segment(mut self, segment: SegmentSpec) -> Self {
        self.segments.push(segment);
        self
    }

    /// Serialize the image.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let table_off = HEADER_SIZE;
        let mut data_off = table_off + self.segments.len() * SEGMENT_ENTRY_SIZE;

        let mut out = Vec::with_capacity(data_off);
        self.write_header(&mut out, len_u32(table_off));

        for seg in &self.segments {
            put_u32(&mut out, seg.kind);
            put_u32(&mut out, len_u32(data_off));
            put_u32(&mut out, seg.vaddr);
            put_u32(&mut out, seg.vaddr);
            put_u32(&mut out, len_u32(seg.data.len()));
            put_u32(&mut out, seg.memsz);
            put_u32(&mut out, seg.flags.into_bits());
            put_u32(&mut out, 0x1000);
            data_off += seg.data.len();
        }

        for seg in &self.segments {
            out.extend_from_slice(&seg.data);
        }
        out
    }

    fn write_header(&self, out: &mut Vec<u8>, table_off: u32) {
        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&EI_MAGIC_BYTES);
        ident[4] = ELFCLASS32;
        ident[5] = ELFDATA2LSB;
        ident[6] = 1; // EV_CURRENT
        out.extend_from_slice(&ident);

        put_u16(out, self.kind.raw());
        put_u16(out, self.machine);
        put_u32(out, EV_CURRENT);
        put_u32(out, self.entry);
        put_u32(out, self.segment_table_offset.unwrap_or(table_off));
        put_u32(out, 0); // e_shoff
        put_u32(out, 0); // e_flags
        put_u16(out, len_u16(HEADER_SIZE));
        put_u16(out, len_u16(SEGMENT_ENTRY_SIZE));
        put_u16(out, len_u16(self.segments.len()));
        put_u16(out, 40); // e_shentsize
        put_u16(out, 0);
        put_u16(out, 0);
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn len_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

fn len_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use crate::segment::SegmentTableEntry;

    #[test]
    fn return_code_encodes_immediate() {
        assert_eq!(
            ImageBuilder::return_code(42),
            [0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]
        );
    }

    #[test]
    fn segment_data_follows_the_table() {
        let image = ImageBuilder::returning_at(0x1000, 5, 0x20).build();
        let header = Header::parse(&image).unwrap();
        let off = header.segment_table_offset as usize;
        let entry = SegmentTableEntry::decode(&image[off..]).unwrap();

        assert_eq!(entry.offset as usize, HEADER_SIZE + SEGMENT_ENTRY_SIZE);
        assert_eq!(entry.filesz, 6);
        assert_eq!(entry.memsz, 0x26);
        assert_eq!(image.len(), HEADER_SIZE + SEGMENT_ENTRY_SIZE + 6);
        assert_eq!(&image[entry.offset as usize..], ImageBuilder::return_code(5));
    }
}
