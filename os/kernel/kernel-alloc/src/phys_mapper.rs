//! # Physical Mappers
//!
//! [`PhysMapper`] implementations for the two places the kernel core runs:
//!
//! - [`IdentityPhysMapper`]: the kernel on hardware. The first 4 MiB are
//!   mapped 1:1, so a physical address *is* the pointer.
//! - `RamPhysMapper` (tests and the `simulated-ram` feature): a block of host
//!   memory standing in for a physical window, so the frame allocator, page
//!   tables and heap can run unmodified under `cargo test`.
//!
//! ## Example
//! ```rust,ignore
//! use kernel_alloc::phys_mapper::RamPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! let ram = RamPhysMapper::new(PhysicalAddress::new(0x10_0000), 2);
//! let word = PhysicalAddress::new(0x10_1004);
//! unsafe {
//!     ram.write::<u32>(word, 0xDEAD_BEEF);
//!     assert_eq!(ram.read::<u32>(word), 0xDEAD_BEEF);
//! }
//! ```

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for identity-mapped memory.
///
/// # Safety
/// Only addresses inside the identity window may be dereferenced.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    #[inline]
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        core::ptr::with_exposed_provenance_mut(pa.as_usize())
    }
}

#[cfg(any(test, feature = "simulated-ram"))]
pub use simulated::RamPhysMapper;

#[cfg(any(test, feature = "simulated-ram"))]
mod simulated {
    use alloc::boxed::Box;
    use core::cell::UnsafeCell;
    use core::fmt;
    use kernel_info::memory::PAGE_SIZE;
    use kernel_memory_addresses::{PhysicalAddress, Size4K};
    use kernel_vmem::PhysMapper;

    #[repr(C, align(4096))]
    struct Frame([u8; PAGE_SIZE as usize]);

    /// Zero-filled host memory posing as the physical range
    /// `[base, base + frames * 4096)`.
    ///
    /// Touching an address outside the range panics.
    pub struct RamPhysMapper {
        base: u32,
        frames: Box<[UnsafeCell<Frame>]>,
    }

    impl RamPhysMapper {
        /// Simulate `frames` frames starting at `base` (rounded down to a page).
        #[must_use]
        pub fn new(base: PhysicalAddress, frames: usize) -> Self {
            let frames = (0..frames)
                .map(|_| UnsafeCell::new(Frame([0; PAGE_SIZE as usize])))
                .collect();
            Self {
                base: base.align_down::<Size4K>().as_u32(),
                frames,
            }
        }

        /// First simulated address.
        #[must_use]
        pub const fn base(&self) -> PhysicalAddress {
            PhysicalAddress::new(self.base)
        }

        /// Number of simulated frames.
        #[must_use]
        pub fn frames(&self) -> usize {
            self.frames.len()
        }

        /// Whether `pa` is backed by this simulation.
        #[must_use]
        pub fn contains(&self, pa: PhysicalAddress) -> bool {
            self.frame_of(pa).is_some()
        }

        fn frame_of(&self, pa: PhysicalAddress) -> Option<(&UnsafeCell<Frame>, usize)> {
            let rel = pa.as_u32().checked_sub(self.base)?;
            let frame = self.frames.get((rel / PAGE_SIZE) as usize)?;
            Some((frame, (rel % PAGE_SIZE) as usize))
        }
    }

    impl PhysMapper for RamPhysMapper {
        fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
            let Some((frame, offset)) = self.frame_of(pa) else {
                panic!("{pa} is outside the simulated RAM");
            };
            frame.get().cast::<u8>().wrapping_add(offset).cast()
        }
    }

    impl fmt::Debug for RamPhysMapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RamPhysMapper")
                .field("base", &self.base())
                .field("frames", &self.frames.len())
                .finish()
        }
    }
}
