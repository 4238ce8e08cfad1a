//! Interrupt masking.
//!
//! The interrupt flag is reached through the [`InterruptControl`] trait so the
//! core structures can be exercised on a host, where `cli`/`sti` would fault.

use core::marker::PhantomData;

/// Access to the processor's interrupt-enable flag.
///
/// Implementations are zero-sized markers; all operations are associated
/// functions so a guard does not need to carry a reference.
pub trait InterruptControl {
    /// Whether maskable interrupts are currently delivered.
    fn interrupts_enabled() -> bool;

    /// Masks interrupts.
    fn disable();

    /// Unmasks interrupts.
    fn enable();
}

/// Interrupt control for contexts without a maskable interrupt source
/// (host-side tests, early boot before the IDT exists).
///
/// Reports interrupts as disabled, so guards never re-enable anything.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoInterrupts;

impl InterruptControl for NoInterrupts {
    #[inline]
    fn interrupts_enabled() -> bool {
        false
    }

    #[inline]
    fn disable() {}

    #[inline]
    fn enable() {}
}

/// The i386 interrupt flag (`EFLAGS.IF`, bit 9), via `pushfd`/`cli`/`sti`.
///
/// # Privilege
///
/// `cli`/`sti` are only legal at ring 0 (or with sufficient IOPL).
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Interrupts;

#[cfg(target_arch = "x86")]
impl InterruptControl for X86Interrupts {
    #[inline]
    fn interrupts_enabled() -> bool {
        use kernel_registers::LoadRegister;
        kernel_registers::eflags::Eflags::load().if_interrupt_enable()
    }

    #[inline]
    fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Snapshots the interrupt flag; if interrupts were enabled they are masked,
/// and on drop they are unmasked **only** if they were enabled before. Guards
/// therefore nest: an inner guard created while masked leaves the flag alone.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<I: InterruptControl> {
    were_enabled: bool,
    _control: PhantomData<I>,
}

impl<I: InterruptControl> IrqGuard<I> {
    #[inline]
    pub fn new() -> Self {
        let enabled = I::interrupts_enabled();
        if enabled {
            I::disable();
        }
        Self {
            were_enabled: enabled,
            _control: PhantomData,
        }
    }

    /// Whether interrupts were enabled when the guard was created.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl<I: InterruptControl> Default for IrqGuard<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: InterruptControl> Drop for IrqGuard<I> {
    fn drop(&mut self) {
        if self.were_enabled {
            I::enable();
        }
    }
}
