use core::fmt;

/// 32-bit virtual address as recorded in an image.
///
/// A thin wrapper around `u32` that denotes addresses in the image's own
/// virtual address space, as opposed to host pointers into a mapping. Nothing
/// here assumes the image is ever placed at that address; see
/// [`VirtualAddress::offset_from`] for the translation the loader relies on.
///
/// ### Examples
/// ```rust
/// # use elf32_loader::VirtualAddress;
/// let entry = VirtualAddress::new(0x0804_8010);
/// let base = VirtualAddress::new(0x0804_8000);
/// assert_eq!(entry.offset_from(base), Some(0x10));
/// assert_eq!(base.offset_from(entry), None);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Widened value, for range arithmetic that must not wrap.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// Distance from `base` up to `self`, or `None` if `self` lies below `base`.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<u32> {
        self.0.checked_sub(base.0)
    }

    /// Whether `self` lies in `[base, base + len)`.
    ///
    /// The upper bound is computed in 64 bits, so a region that ends exactly at
    /// the top of the 32-bit space is still handled correctly.
    #[inline]
    #[must_use]
    pub const fn within(self, base: Self, len: u32) -> bool {
        base.as_u64() <= self.as_u64() && self.as_u64() < base.as_u64() + len as u64
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<VirtualAddress> for u32 {
    #[inline]
    fn from(v: VirtualAddress) -> Self {
        v.as_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_has_inclusive_lower_and_exclusive_upper_bound() {
        let base = VirtualAddress::new(0x1000);
        assert!(VirtualAddress::new(0x1000).within(base, 0x10));
        assert!(VirtualAddress::new(0x100F).within(base, 0x10));
        assert!(!VirtualAddress::new(0x1010).within(base, 0x10));
        assert!(!VirtualAddress::new(0x0FFF).within(base, 0x10));
    }

    #[test]
    fn within_empty_region_never_matches() {
        let base = VirtualAddress::new(0x1000);
        assert!(!base.within(base, 0));
    }

    #[test]
    fn within_does_not_wrap_at_top_of_address_space() {
        let base = VirtualAddress::new(0xFFFF_FFF0);
        assert!(VirtualAddress::new(0xFFFF_FFFF).within(base, 0x10));
        assert!(!VirtualAddress::new(0x0000_0005).within(base, 0x20));
    }

    #[test]
    fn display_is_zero_padded_hex() {
        assert_eq!(VirtualAddress::new(0x0804_8000).to_string(), "0x08048000");
        assert_eq!(format!("{:?}", VirtualAddress::new(0x42)), "VA(0x00000042)");
    }
}
