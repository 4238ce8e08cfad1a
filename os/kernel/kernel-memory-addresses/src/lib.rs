//! # Address Types (i386)
//!
//! Physical and virtual 32-bit addresses are distinct types, so a value
//! read from a page-table entry cannot be handed to code expecting a linear
//! address without an explicit conversion. Under the kernel's identity
//! window both kinds carry the same numbers.
//!
//! | Type                | Meaning                                        |
//! |---------------------|------------------------------------------------|
//! | [`VirtualAddress`]  | Linear address, translated by the page tables. |
//! | [`PhysicalAddress`] | Address on the memory bus.                     |
//! | [`PhysicalPage<S>`] | Page-aligned physical base of a page of `S`.   |
//! | [`FrameIndex`]      | Bit index of a 4 KiB frame (`address >> 12`).  |
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! assert_eq!(FrameIndex::containing(pa).as_u32(), 0x102);
//! assert_eq!(pa.page::<Size4K>().base(), PhysicalAddress::new(0x0010_2000));
//! assert_eq!(VirtualAddress::new(0x0040_1234).offset::<Size4K>(), 0x234);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Add, AddAssign};

mod sealed {
    pub trait Sealed {}
}

/// A page granularity the paging hardware understands.
pub trait PageSize: sealed::Sealed + Copy + Eq + Ord + core::hash::Hash {
    /// Bytes per page, a power of two.
    const SIZE: u32;
    /// `log2(SIZE)`.
    const SHIFT: u32;
    const NAME: &'static str;

    /// Low bits that hold the offset within a page.
    const MASK: u32 = Self::SIZE - 1;
}

/// The 4 KiB page mapped by one page-table entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;

impl sealed::Sealed for Size4K {}

impl PageSize for Size4K {
    const SIZE: u32 = 4096;
    const SHIFT: u32 = 12;
    const NAME: &'static str = "4K";
}

/// A value that must be page aligned was not.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UnalignedAddress(pub u32);

impl fmt::Display for UnalignedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address 0x{:08X} is not page aligned", self.0)
    }
}

impl core::error::Error for UnalignedAddress {}

/// Arithmetic and formatting shared by both address kinds.
macro_rules! address_type {
    ($name:ident, $tag:literal) => {
        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(value: u32) -> Self {
                Self(value)
            }

            #[inline]
            #[must_use]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            #[inline]
            #[must_use]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            #[inline]
            #[must_use]
            pub const fn is_aligned<S: PageSize>(self) -> bool {
                self.0 & S::MASK == 0
            }

            /// Offset of this address within its page of size `S`.
            #[inline]
            #[must_use]
            pub const fn offset<S: PageSize>(self) -> u32 {
                self.0 & S::MASK
            }

            #[inline]
            #[must_use]
            pub const fn align_down<S: PageSize>(self) -> Self {
                Self(self.0 & !S::MASK)
            }

            /// Round up to a page boundary, saturating at the last page.
            #[inline]
            #[must_use]
            pub const fn align_up<S: PageSize>(self) -> Self {
                match self.0.checked_add(S::MASK) {
                    Some(v) => Self(v & !S::MASK),
                    None => Self(u32::MAX & !S::MASK),
                }
            }

            #[inline]
            #[must_use]
            pub const fn checked_add(self, rhs: u32) -> Option<Self> {
                match self.0.checked_add(rhs) {
                    Some(v) => Some(Self(v)),
                    None => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "(0x{:08X})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }

        impl Add<u32> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: u32) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl AddAssign<u32> for $name {
            #[inline]
            fn add_assign(&mut self, rhs: u32) {
                self.0 += rhs;
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

/// Linear address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

address_type!(VirtualAddress, "VA");

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Physical address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u32);

address_type!(PhysicalAddress, "PA");

impl PhysicalAddress {
    /// Never handed out by an allocator.
    pub const NULL: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The page of size `S` containing this address.
    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> PhysicalPage<S> {
        PhysicalPage::containing_address(self)
    }
}

/// Physical base of a page of size `S`; the low `S::SHIFT` bits are zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: u32,
    _size: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: PhysicalAddress) -> Self {
        Self {
            base: addr.0 & !S::MASK,
            _size: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.base)
    }

    /// The address `offset` bytes into the page.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u32) -> PhysicalAddress {
        PhysicalAddress(self.base | (offset & S::MASK))
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>(0x{:08X})", S::NAME, self.base)
    }
}

impl<S: PageSize> TryFrom<PhysicalAddress> for PhysicalPage<S> {
    type Error = UnalignedAddress;

    fn try_from(pa: PhysicalAddress) -> Result<Self, UnalignedAddress> {
        if pa.is_aligned::<S>() {
            Ok(Self::containing_address(pa))
        } else {
            Err(UnalignedAddress(pa.0))
        }
    }
}

impl<S: PageSize> From<PhysicalPage<S>> for PhysicalAddress {
    fn from(page: PhysicalPage<S>) -> Self {
        page.base()
    }
}

/// Index of a 4 KiB physical frame.
///
/// The frame allocator's bitmap is indexed by this type; the bit is the only
/// place a frame's state lives.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameIndex(u32);

impl FrameIndex {
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.0 >> Size4K::SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0 << Size4K::SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage<Size4K> {
        PhysicalPage::containing_address(self.base())
    }
}

impl fmt::Debug for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame#{}", self.0)
    }
}

impl Add<u32> for FrameIndex {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u32) -> Self {
        Self(self.0 + rhs)
    }
}

impl From<PhysicalPage<Size4K>> for FrameIndex {
    fn from(page: PhysicalPage<Size4K>) -> Self {
        Self::containing(page.base())
    }
}
