//! # Context Switching Seam
//!
//! The scheduler decides *what* runs next and produces a [`Dispatch`]; an
//! architecture backend implementing [`ContextSwitch`] performs the actual
//! transfer. The kernel applies the dispatch only after the scheduler's
//! critical section is released (interrupts stay disabled).

use crate::stack::{StackPointer, UserEntry};

/// Hardware control transfer.
pub trait ContextSwitch {
    /// Save the current resumption point into `*save` and resume `next`.
    ///
    /// Returns when some other context switches back to the saved one.
    ///
    /// # Safety
    /// - `save` must be valid for a write and stay valid until resumed.
    /// - `next` must point at a frame laid out by a previous switch or by
    ///   task creation.
    unsafe fn switch(&self, save: *mut StackPointer, next: StackPointer);

    /// Drop to ring 3 at `entry`. Hardware backends do not return.
    ///
    /// # Safety
    /// `entry` must describe mapped user code and stack.
    unsafe fn enter_user(&self, entry: UserEntry);
}

/// A transfer the scheduler has committed to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// Stack switch from the current context to a saved one.
    Switch {
        save: *mut StackPointer,
        next: StackPointer,
    },
    /// First run of a user task straight from the boot context.
    EnterUser(UserEntry),
}

impl Dispatch {
    /// Hand the transfer to `arch`.
    ///
    /// # Safety
    /// See [`ContextSwitch::switch`] and [`ContextSwitch::enter_user`]; the
    /// scheduler produces values meeting those requirements as long as the
    /// TCBs and the scheduler itself stay in place.
    pub unsafe fn perform<X: ContextSwitch + ?Sized>(self, arch: &X) {
        match self {
            Self::Switch { save, next } => unsafe { arch.switch(save, next) },
            Self::EnterUser(entry) => unsafe { arch.enter_user(entry) },
        }
    }
}

/// Halt forever. Used when there is nothing left to run.
pub fn park_forever() -> ! {
    loop {
        #[cfg(target_arch = "x86")]
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
        #[cfg(not(target_arch = "x86"))]
        core::hint::spin_loop();
    }
}
