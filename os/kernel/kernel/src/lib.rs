//! # Kernel Core
//!
//! The [`Kernel`] context object owns every core structure and is the only
//! way the rest of the system reaches them.
//!
//! ## Boot Sequence
//!
//! ```text
//! BootInfo ──► frame allocator ──► address space ──► heap (4 pages)
//!                                                      │
//!                       idle task (optional) ◄── scheduler
//!                                                      │
//!               spawn_*_task ... ──► enter() ──► first task, never returns
//! ```
//!
//! ## Locking
//!
//! Each structure sits in its own [`CriticalSection`](kernel_sync::CriticalSection).
//! When more than one is needed they are always entered in the order
//!
//! `scheduler → shared memory → heap → frames`
//!
//! Stack switches happen after the scheduler's section is left, with
//! interrupts still masked by an outer guard.
//!
//! ## Architecture Backend
//!
//! The core is generic over a [`ContextSwitch`](kernel_task::ContextSwitch)
//! implementation. On 32-bit x86 the [`arch::i386`] module supplies it, the
//! user-mode trampoline and the `int 0x80` entry stub.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod arch;
mod config;
mod context;

pub use crate::config::KernelConfig;
pub use crate::context::Kernel;

use kernel_alloc::FrameAllocError;
use kernel_task::TaskError;
use kernel_vmem::MapError;

/// Reasons [`Kernel::boot`] gives up.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootError {
    #[error("frame allocator: {0}")]
    Frames(#[from] FrameAllocError),
    #[error("address space: {0}")]
    AddressSpace(#[from] MapError),
    #[error("idle task: {0}")]
    IdleTask(#[from] TaskError),
}
