//! User-side support for tasks running on the kernel core.
//!
//! * [`syscall_abi`]: opcode table and result conventions shared with the
//!   kernel's dispatcher (`kernel` feature).
//! * `syscall`: `int 0x80` wrappers for ring-3 code (`syscall` feature,
//!   i386 targets only).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![cfg_attr(not(feature = "syscall"), forbid(unsafe_code))]
#![cfg_attr(feature = "syscall", allow(unsafe_code))]

#[cfg(all(feature = "syscall", target_arch = "x86"))]
pub mod syscall;

#[cfg(feature = "syscall-abi")]
pub mod syscall_abi;
