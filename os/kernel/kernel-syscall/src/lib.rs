//! # System Call Dispatch
//!
//! Decodes the `int 0x80` register image and routes it to a
//! [`SyscallHandler`]. Errors from the handler are collapsed into the ABI
//! sentinels of [`stdlib::syscall_abi`] here and nowhere else.
//!
//! ```text
//!  user: eax=op ebx ecx edx ──int 0x80──► entry stub ──► handle_trap(&mut TrapFrame)
//!                                                            │
//!                                         dispatch(op, a1, a2, a3) ──► SyscallHandler
//!                                                            │
//!  user: eax = result ◄──────────iretd────────── TrapFrame.eax
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod dispatch;
pub mod trap_frame;

pub use crate::dispatch::{SyscallHandler, dispatch};
pub use crate::trap_frame::{TrapFrame, handle_trap};
pub use stdlib::syscall_abi::{NULL_ADDRESS, SYSCALL_ERROR, SYSCALL_VECTOR, Sysno};
