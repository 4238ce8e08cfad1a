//! # Kernel synchronization primitives
//!
//! The kernel runs on a single processor; the only source of concurrency is an
//! interrupt arriving while a core structure is half updated. Every mutable
//! kernel structure therefore lives in a [`CriticalSection`]: interrupts are
//! masked (and the previous state remembered) before the inner spin lock is
//! taken, and restored after it is released.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod critical;
pub mod irq;
mod once_slot;
mod spin_lock;

pub use critical::{CriticalGuard, CriticalSection};
pub use irq::{InterruptControl, IrqGuard, NoInterrupts};
pub use once_slot::OnceSlot;
pub use spin_lock::{SPIN_REPORT_THRESHOLD, SpinLock, SpinLockGuard};

#[cfg(target_arch = "x86")]
pub use irq::X86Interrupts;
