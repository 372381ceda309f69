//! Physical and Virtual Memory Addressing Schemes.
//!
//! This module provides abstractions for virtual address and physical
//! address. Kernel virtual memory directly maps physical memory at
//! [`DIRECT_MAP_BASE`]: the first page of that window maps to the first frame
//! of physical memory, the second page to the second frame, and so on. This
//! lets the monitor reach a page-table page from its physical address with
//! simple arithmetic.
//!
//! The module defines three types for memory addresses: [`Kva`] for kernel
//! virtual address, [`Va`] for virtual address, and [`Pa`] for physical
//! address. All three support the usual address arithmetic.
//!
//! ```
//! use abyss::addressing::{Pa, PAGE_SIZE};
//!
//! let pa = Pa::new(0x1234_5000).unwrap();
//! let next = pa + PAGE_SIZE;
//! assert_eq!(next.into_usize(), 0x1234_6000);
//! assert_eq!(pa.into_kva().into_pa(), pa);
//! ```

/// Base of the kernel's direct mapping of physical memory.
pub const DIRECT_MAP_BASE: usize = 0xffff000000000000 | (510 << 39);

/// The size of a single page in memory, in bytes.
///
/// This is also the stride of the `showmappings` range sweep.
pub const PAGE_SIZE: usize = 0x1000;

/// The shift amount to get the page index from a given address.
pub const PAGE_SHIFT: usize = 12; // 12 bits (log2 of 4 KB)

/// A mask for extracting the offset within a page from a given address.
pub const PAGE_MASK: usize = 0xfff;

/// Represents a physical address.
///
/// A physical address must be below `0xffff_0000_0000_0000`.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Pa(usize);

impl Pa {
    /// The physical address `0`.
    pub const ZERO: Self = Self(0);

    /// Creates a new physical address if the address is valid.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr < 0xffff_0000_0000_0000 {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Cast the physical address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Convert the physical address into the kernel virtual address that
    /// maps it in the direct-mapped window.
    #[inline]
    pub const fn into_kva(self) -> Kva {
        Kva(self.0 + DIRECT_MAP_BASE)
    }

    /// Offset within the page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

/// Represents a kernel virtual address inside the direct-mapped window.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Kva(usize);

impl Kva {
    /// Creates a kernel virtual address if `addr` lies in the upper half.
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        match addr & 0xffff_8000_0000_0000 {
            0xffff_8000_0000_0000 => Some(Self(addr)),
            _ => None,
        }
    }

    /// Cast the address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Convert a direct-mapped kernel virtual address back to physical.
    #[inline]
    pub const fn into_pa(self) -> Pa {
        Pa(self.0 - DIRECT_MAP_BASE)
    }
}

/// Represents a canonical virtual address.
///
/// Bits 63..47 must all equal bit 47.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// Creates a virtual address if `addr` is canonical.
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        match addr & 0xffff_8000_0000_0000 {
            m if m == 0xffff_8000_0000_0000 || m == 0 => Some(Self(addr)),
            _ => None,
        }
    }

    /// Cast the address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

}

macro_rules! impl_arith {
    ($t: ty) => {
        impl core::ops::Add<usize> for $t {
            type Output = Self;

            fn add(self, other: usize) -> Self::Output {
                Self(self.0 + other)
            }
        }
        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, other: usize) {
                self.0 = self.0 + other
            }
        }
        impl core::ops::Sub<Self> for $t {
            type Output = usize;

            fn sub(self, other: Self) -> Self::Output {
                self.0 - other.0
            }
        }
        impl core::ops::BitAnd<usize> for $t {
            type Output = Self;

            fn bitand(self, other: usize) -> Self {
                Self(self.0 & other)
            }
        }
    };
}

impl_arith!(Kva);
impl_arith!(Va);
impl_arith!(Pa);

macro_rules! impl_fmt {
    ($t: ty, $name: literal) => {
        impl core::fmt::Debug for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($name, "(0x{:x})"), self.0)
            }
        }
        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($name, "(0x{:x})"), self.0)
            }
        }
    };
}

impl_fmt!(Kva, "Kva");
impl_fmt!(Va, "Va");
impl_fmt!(Pa, "Pa");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_addresses() {
        assert!(Va::new(0x0000_7fff_ffff_f000).is_some());
        assert!(Va::new(0xffff_8000_0000_0000).is_some());
        assert!(Va::new(0x0000_8000_0000_0000).is_none());
        assert!(Va::new(0x1234_0000_0000_0000).is_none());
        assert!(Pa::new(0xffff_0000_0000_0000).is_none());
    }

    #[test]
    fn direct_map_round_trip() {
        let pa = Pa::new(0xab000).unwrap();
        let kva = pa.into_kva();
        assert!(Kva::new(kva.into_usize()).is_some());
        assert_eq!(kva.into_pa(), pa);
        assert_eq!((pa + 0x123).offset(), 0x123);
        assert_eq!(std::format!("{}", Va::new(0x1000).unwrap()), "Va(0x1000)");
    }
}
