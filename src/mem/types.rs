//! Basic types and utilities for dealing with memory.

use core::fmt::{self, Debug, Display, Formatter};
use core::ops::{Add, AddAssign, Sub};

/// Convenience constants for dealing with memory sizes.
pub mod size {
    /// The number of bytes in 1 KiB.
    pub const KB: usize = 1024;
    /// The number of bytes in 1 MiB.
    pub const MB: usize = 1024 * KB;
}

/// A raw virtual address.
pub type RawVirtualAddress = usize;

/// The previous number with the given alignment.
#[inline]
pub const fn align_down(n: usize, align: usize) -> usize {
    n & !(align - 1)
}

/// The next number with the given alignment.
#[inline]
pub const fn align_up(n: usize, align: usize) -> usize {
    align_down(n + align - 1, align)
}

/// The next number with the given alignment, or `None` on overflow.
#[inline]
pub const fn checked_align_up(n: usize, align: usize) -> Option<usize> {
    match n.checked_add(align - 1) {
        Some(v) => Some(align_down(v, align)),
        None => None,
    }
}

/// A virtual address in the calling process.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(RawVirtualAddress);

impl VirtualAddress {
    pub const fn new(address: RawVirtualAddress) -> VirtualAddress {
        VirtualAddress(address)
    }

    /// The underlying address.
    #[inline]
    pub const fn raw(&self) -> RawVirtualAddress {
        self.0
    }

    /// Check whether the address has the given alignment.
    #[inline]
    pub const fn is_aligned(&self, align: usize) -> bool {
        self.0 % align == 0
    }

    /// Get the previous address of the given alignment.
    pub const fn prev_aligned(&self, align: usize) -> Self {
        VirtualAddress(align_down(self.0, align))
    }

    /// Get the next address of the given alignment.
    pub const fn next_aligned(&self, align: usize) -> Self {
        VirtualAddress(align_up(self.0, align))
    }

    /// Offset of the address from the previous boundary of the given alignment.
    #[inline]
    pub const fn offset_in(&self, align: usize) -> usize {
        self.0 & (align - 1)
    }
}

impl Display for VirtualAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "VirtualAddress(0x{:x})", self.0)
    }
}

impl Debug for VirtualAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        <VirtualAddress as Display>::fmt(self, f)
    }
}

impl Add<usize> for VirtualAddress {
    type Output = VirtualAddress;

    fn add(self, rhs: usize) -> VirtualAddress {
        VirtualAddress(
            self.0
                .checked_add(rhs)
                .expect("Virtual address addition overflowed."),
        )
    }
}

impl AddAssign<usize> for VirtualAddress {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl Sub<VirtualAddress> for VirtualAddress {
    type Output = usize;

    fn sub(self, rhs: VirtualAddress) -> usize {
        match self.0.overflowing_sub(rhs.0) {
            (v, false) => v,
            (_, true) => panic!("Virtual address subtraction overflowed."),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_down(65535, 65536), 0);
        assert_eq!(checked_align_up(usize::MAX, 4096), None);

        let a = VirtualAddress::new(0x1_2345);
        assert!(!a.is_aligned(0x1000));
        assert_eq!(a.prev_aligned(0x1000), VirtualAddress::new(0x1_2000));
        assert_eq!(a.next_aligned(0x1000), VirtualAddress::new(0x1_3000));
        assert_eq!(a.offset_in(0x1000), 0x345);
    }

    #[test]
    fn arithmetic() {
        let a = VirtualAddress::new(0x1000);
        assert_eq!(a + 0x10, VirtualAddress::new(0x1010));
        assert_eq!(VirtualAddress::new(0x3000) - a, 0x2000);
    }

    #[test]
    #[should_panic(expected = "subtraction overflowed")]
    fn underflow() {
        let _ = VirtualAddress::new(0x1000) - VirtualAddress::new(0x2000);
    }
}
