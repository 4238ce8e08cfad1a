//! # Inter-Process Communication
//!
//! Shared memory regions: runs of physically contiguous frames that several
//! tasks can reach under a numeric id.
//!
//! ```text
//!   create(size) ──► id ──attach──► phys base ──detach(addr)──┐
//!                     ▲                                        │
//!                     └──────────── attach count ◄─────────────┘
//!   destroy(id): refused while attached, frees the frames otherwise
//! ```
//!
//! `attach` hands back the physical base of the region. Nothing is mapped
//! into the caller's address space; on this kernel low physical memory is
//! identity mapped, so the address is directly usable.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod shm;

pub use crate::shm::{SharedMemory, ShmError, ShmId, ShmRegion};
