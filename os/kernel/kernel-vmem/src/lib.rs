//! # Virtual Memory Support
//!
//! Two-level i386 paging (no PAE) for the kernel's single flat address space.
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12   | 11‒0   |
//! | Directory |  Table  | Offset |
//! ```
//!
//! ```text
//!  CR3 → Page Directory (1024 PDEs) → Page Table (1024 PTEs) → 4 KiB frame
//! ```
//!
//! Each directory entry covers 4 MiB. The kernel owns exactly one directory and
//! one table: directory entry 0 links the table, and the table identity-maps
//! the first 4 MiB. New mappings are only accepted inside that window.
//!
//! ## What you get
//! - [`PageEntryBits`]: the 32-bit entry layout shared by PDEs and PTEs.
//! - [`PageDirectory`] / [`PageTable`]: 4 KiB-aligned arrays of 1024 entries.
//! - [`AddressSpace`]: builds the identity window and mutates it.
//! - The [`FrameAlloc`] and [`PhysMapper`] seams the mapper (and the heap and
//!   task code above it) are written against.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
pub mod page_table;

pub use crate::address_space::{AddressSpace, MapError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{DirectoryIndex, PageDirectory, PageTable, TableIndex};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Source of **physical** 4 KiB frames.
///
/// The implementation decides where frames come from (bitmap, bump pool in
/// tests). Returned frames are 4 KiB aligned by construction.
pub trait FrameAlloc {
    /// Allocate one frame; `None` when memory is exhausted.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, page: PhysicalPage<Size4K>);
}

/// Converts physical addresses to pointers usable in the current address
/// space.
///
/// The kernel runs identity mapped, so its mapper is the identity function;
/// tests back "physical memory" with a host buffer instead.
pub trait PhysMapper {
    /// Pointer through which the byte at `pa` can be accessed.
    ///
    /// Computing the pointer is always safe; dereferencing it is not.
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T;

    /// Borrow the `T` stored at `pa`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable and suitably aligned for `T`.
    /// - The bytes at `pa` must be a valid `T` and must not be aliased for `'a`.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr::<T>(pa) }
    }

    /// Copy the `T` stored at `pa`.
    ///
    /// # Safety
    /// `pa` must be mapped, aligned for `T` and hold a valid `T`.
    #[inline]
    unsafe fn read<T: Copy>(&self, pa: PhysicalAddress) -> T {
        unsafe { self.phys_to_ptr::<T>(pa).read() }
    }

    /// Store `value` at `pa` without reading or dropping the old bytes.
    ///
    /// # Safety
    /// `pa` must be mapped writable and aligned for `T`.
    #[inline]
    unsafe fn write<T>(&self, pa: PhysicalAddress, value: T) {
        unsafe { self.phys_to_ptr::<T>(pa).write(value) }
    }

    /// Fill a whole frame with zeros.
    ///
    /// # Safety
    /// The frame must be mapped writable and not referenced elsewhere.
    #[inline]
    unsafe fn zero_frame(&self, page: PhysicalPage<Size4K>) {
        unsafe { core::ptr::write_bytes(self.phys_to_ptr::<u8>(page.base()), 0, 4096) }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        (**self).phys_to_ptr(pa)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    pub struct BumpAlloc {
        next: u32,
        end: u32,
        pub freed: Vec<PhysicalPage<Size4K>>,
    }

    impl BumpAlloc {
        pub fn new(start: u32, end: u32) -> Self {
            Self {
                next: start,
                end,
                freed: Vec::new(),
            }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            if self.next + 4096 > self.end {
                return None;
            }
            let p = self.next;
            self.next += 4096;
            Some(PhysicalAddress::new(p).page())
        }

        fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
            self.freed.push(page);
        }
    }

    /// A 4 KiB-aligned raw frame.
    #[repr(C, align(4096))]
    pub struct Aligned4K([u8; 4096]);

    /// Simulated physical memory: frame `n` backs addresses `n * 4096 ..`.
    pub struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Aligned4K([0u8; 4096]));
            }
            Self { frames: v }
        }
    }

    impl PhysMapper for TestPhys {
        fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
            let idx = pa.as_usize() >> 12;
            let off = pa.as_usize() & 0xFFF;
            let base = self.frames[idx].0.as_ptr().cast_mut();
            base.wrapping_add(off).cast()
        }
    }
}
