//! Little-endian field readers and a short-read aware record reader.

use crate::error::LoaderError;
use std::io::{ErrorKind, Read};

#[inline]
pub fn read_u16_le(buf: &[u8], off: usize) -> Option<u16> {
    let end = off.checked_add(2)?;
    let s = buf.get(off..end)?;
    Some(u16::from_le_bytes([s[0], s[1]]))
}

#[inline]
pub fn read_u32_le(buf: &[u8], off: usize) -> Option<u32> {
    let end = off.checked_add(4)?;
    let s = buf.get(off..end)?;
    Some(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

/// Fill `buf` completely from `reader`.
///
/// Unlike [`Read::read_exact`] this keeps track of how many bytes actually
/// arrived, so a short file is reported as [`LoaderError::TruncatedFile`]
/// with the real count.
pub fn read_record<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), LoaderError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(source) => return Err(LoaderError::Read { what, source }),
        }
    }

    if filled == buf.len() {
        Ok(())
    } else {
        Err(LoaderError::TruncatedFile {
            what,
            expected: buf.len() as u64,
            actual: filled as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn field_reads_are_bounds_checked() {
        let buf = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(read_u16_le(&buf, 0), Some(0x1234));
        assert_eq!(read_u32_le(&buf, 0), Some(0x5678_1234));
        assert_eq!(read_u16_le(&buf, 3), None);
        assert_eq!(read_u32_le(&buf, 1), None);
        assert_eq!(read_u32_le(&buf, usize::MAX), None);
    }

    #[test]
    fn short_read_reports_actual_count() {
        let mut reader = Cursor::new(vec![1u8; 10]);
        let mut buf = [0u8; 52];
        let err = read_record(&mut reader, &mut buf, "header").unwrap_err();
        assert!(matches!(
            err,
            LoaderError::TruncatedFile {
                what: "header",
                expected: 52,
                actual: 10
            }
        ));
    }

    #[test]
    fn full_read_succeeds() {
        let mut reader = Cursor::new((0u8..40).collect::<Vec<_>>());
        let mut buf = [0u8; 32];
        read_record(&mut reader, &mut buf, "record").unwrap();
        assert_eq!(buf[31], 31);
    }
}
