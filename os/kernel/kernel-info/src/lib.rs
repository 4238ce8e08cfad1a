//! # Kernel Configuration and Boot Interface
//!
//! This crate defines the boot contract between the Multiboot loader and the
//! kernel core, plus the compile-time layout constants every subsystem agrees
//! on (page size, trackable memory ceiling, stack and heap sizing, selector
//! values).
//!
//! ## Architecture
//!
//! ### Boot Information ([`boot`], [`multiboot`])
//! * **Memory map**: ordered physical ranges tagged available or reserved
//! * **Kernel image bounds**: the physical span the loader placed the kernel in
//! * **Modules**: physical ranges of loader-supplied modules (initrd etc.)
//!
//! The [`multiboot`] module decodes the raw Multiboot v1 structures into the
//! architecture-neutral [`BootInfo`](boot::BootInfo) the frame allocator
//! consumes. A boot without a memory map is fatal.
//!
//! ### Memory Layout ([`memory`])
//!
//! ```text
//! Physical Memory Layout:
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1 MiB)        │  always reserved
//! 0x0010_0000 ├─────────────────────────────────┤
//!             │       Kernel Image              │  reserved from boot info
//!             ├─────────────────────────────────┤
//!             │       Modules                   │  reserved from boot info
//!             ├─────────────────────────────────┤
//!             │    Available RAM                │  bitmap-tracked frames
//! 0x1000_0000 └─────────────────────────────────┘  256 MiB ceiling
//! ```
//!
//! The first [`IDENTITY_MAP_BYTES`](memory::IDENTITY_MAP_BYTES) of the address
//! space are mapped 1:1, and the heap assumes it can address the frames it is
//! given at their physical address.
//!
//! ### Segments ([`segments`])
//! Ring-0 and ring-3 selectors and the initial flags word used when a task is
//! first entered.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod multiboot;
pub mod segments;
