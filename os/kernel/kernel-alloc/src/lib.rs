//! # Kernel Memory Allocation
//!
//! Physical frame allocation and the kernel heap built on top of it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Kernel Heap                         │
//! │    • First-fit free list, 4 seed pages              │
//! │    • One-page top-up per failed search              │
//! │    • No coalescing                                  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ whole frames
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • Identity map on hardware                       │
//! │    • Simulated RAM under test                       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Bitmap Frame Allocator                    │
//! │    • One bit per 4 KiB frame, 256 MiB ceiling       │
//! │    • First-fit runs of contiguous frames            │
//! │    • No-heap, fixed-size state                      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ### Physical Frame Allocator ([`frame_alloc`])
//!
//! Built from the [`BootInfo`](kernel_info::boot::BootInfo) memory map. Low
//! memory, the kernel image and loader modules are never handed out. Frees
//! are unchecked unless the `checked-free` feature is on.
//!
//! ### Kernel Heap ([`heap`])
//!
//! Variable-size blocks carved out of frames. The heap assumes it can reach
//! every frame it is given through its [`PhysMapper`](kernel_vmem::PhysMapper),
//! which on hardware means the frames must lie in the identity window.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! `IdentityPhysMapper` for the kernel, `RamPhysMapper` for host tests
//! (`simulated-ram` feature).
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::frame_alloc::BitmapFrameAlloc;
//! use kernel_info::boot::{BootInfo, MemoryRegion, PhysicalRange};
//!
//! let map = [MemoryRegion::available(0x10_0000, 0x10_0000)];
//! let boot = BootInfo {
//!     memory_map: Some(&map),
//!     kernel_image: PhysicalRange::new(0x10_0000, 0x10_8000),
//!     modules: &[],
//! };
//!
//! let mut frames = Box::new(BitmapFrameAlloc::new());
//! frames.init(&boot).unwrap();
//! let run = frames.allocate_pages(2).unwrap();
//! assert_eq!(run.as_u32(), 0x10_8000);
//! frames.free_pages(run, 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "simulated-ram"))]
extern crate alloc;

pub mod frame_alloc;
pub mod heap;
pub mod phys_mapper;

pub use crate::frame_alloc::{BitmapFrameAlloc, FrameAllocError};
pub use crate::heap::{BlockHandle, HeapError, KernelHeap};
pub use crate::phys_mapper::IdentityPhysMapper;
#[cfg(any(test, feature = "simulated-ram"))]
pub use crate::phys_mapper::RamPhysMapper;
