//! # i386 Backend
//!
//! Control transfer primitives for 32-bit protected mode.
//!
//! - [`I386`] implements [`ContextSwitch`] with a callee-saved register
//!   stack switch and an `iretd` into ring 3.
//! - [`user_trampoline`] is where a user task's first stack switch returns.
//! - [`syscall_entry`] is the handler for the `int 0x80` gate.
//!
//! The descriptor tables are not set up here: the boot path installs a GDT
//! with the ring-3 segments of [`kernel_info::segments`], a TSS whose `esp0`
//! points at a kernel stack, and an interrupt gate with DPL 3 at
//! [`SYSCALL_VECTOR`](kernel_syscall::SYSCALL_VECTOR) pointing at
//! [`syscall_entry`].
//!
//! ## Saved context
//!
//! ```text
//! high  ┌──────────────┐
//!       │ return eip   │ ◄─ ret
//!       │ eflags       │ ◄─ popfd
//!       │ ebp          │
//!       │ ebx          │
//!       │ esi          │
//! low   │ edi          │ ◄─ saved stack pointer
//!       └──────────────┘
//! ```

#[cfg(target_os = "none")]
mod entry;

use core::arch::naked_asm;
use kernel_alloc::{BitmapFrameAlloc, IdentityPhysMapper};
use kernel_info::segments::{KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{CriticalSection, OnceSlot, X86Interrupts};
use kernel_syscall::{SYSCALL_ERROR, TrapFrame, handle_trap};
use kernel_task::{ContextSwitch, StackPointer, UserEntry};

use crate::Kernel;

/// The kernel as it runs on hardware.
pub type I386Kernel = Kernel<'static, IdentityPhysMapper, I386, X86Interrupts>;

/// The single kernel instance, reachable from trap handlers.
pub static KERNEL: OnceSlot<I386Kernel> = OnceSlot::new();

/// Physical memory as seen through the identity window.
pub static PHYS_MAPPER: IdentityPhysMapper = IdentityPhysMapper;

/// The frame bitmap, initialized in place by [`Kernel::boot`].
pub static FRAMES: CriticalSection<BitmapFrameAlloc, X86Interrupts> =
    CriticalSection::new(BitmapFrameAlloc::new());

#[derive(Debug, Default, Copy, Clone)]
pub struct I386;

impl ContextSwitch for I386 {
    #[inline]
    unsafe fn switch(&self, save: *mut StackPointer, next: StackPointer) {
        unsafe { switch_stacks(save, next.as_u32()) }
    }

    #[inline]
    unsafe fn enter_user(&self, entry: UserEntry) {
        unsafe { enter_ring3(entry.eip().as_u32(), entry.esp().as_u32(), entry.eflags()) }
    }
}

/// Push the callee-saved registers and flags, store `esp` into `*save`,
/// then unwind the same layout from `next`.
#[unsafe(naked)]
unsafe extern "C" fn switch_stacks(save: *mut StackPointer, next: u32) {
    naked_asm!(
        "mov eax, [esp + 4]",
        "mov edx, [esp + 8]",
        "pushfd",
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        "mov [eax], esp",
        "mov esp, edx",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "popfd",
        "ret",
    )
}

/// Build an interrupt-return frame and drop to ring 3.
#[unsafe(naked)]
unsafe extern "C" fn enter_ring3(eip: u32, esp: u32, eflags: u32) -> ! {
    naked_asm!(
        "mov ecx, [esp + 4]",
        "mov edx, [esp + 8]",
        "mov eax, [esp + 12]",
        "push {data}",
        "push edx",
        "push eax",
        "push {code}",
        "push ecx",
        "mov ax, {data}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "iretd",
        data = const USER_DATA_SELECTOR,
        code = const USER_CODE_SELECTOR,
    )
}

/// First code a user task runs on its kernel stack.
///
/// Reached by `ret` from [`switch_stacks`] with interrupts masked; skips the
/// unused return slot and `iretd`s through the frame laid out at creation.
#[unsafe(naked)]
pub unsafe extern "C" fn user_trampoline() -> ! {
    naked_asm!(
        "mov ax, {data}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "add esp, 4",
        "iretd",
        data = const USER_DATA_SELECTOR,
    )
}

#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn user_trampoline_address() -> VirtualAddress {
    VirtualAddress::new(user_trampoline as usize as u32)
}

/// `int 0x80` gate handler. Saves a [`TrapFrame`], dispatches, restores
/// and returns the result in `eax`.
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    naked_asm!(
        "pushad",
        "push ds",
        "push es",
        "push fs",
        "push gs",
        "mov ax, {kdata}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "push esp",
        "call {rust}",
        "add esp, 4",
        "pop gs",
        "pop fs",
        "pop es",
        "pop ds",
        "popad",
        "iretd",
        kdata = const KERNEL_DATA_SELECTOR,
        rust = sym syscall_trap,
    )
}

extern "C" fn syscall_trap(frame: &mut TrapFrame) {
    match KERNEL.get() {
        Some(kernel) => handle_trap(kernel, frame),
        None => frame.eax = SYSCALL_ERROR,
    }
}

/// Body of the idle task: sleep until the next interrupt, then offer the
/// processor to anything that became ready.
pub extern "C" fn idle_task() -> ! {
    loop {
        unsafe { core::arch::asm!("sti", "hlt", options(nomem, nostack)) };
        if let Some(kernel) = KERNEL.get() {
            kernel.yield_now();
        }
    }
}

#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn idle_task_address() -> VirtualAddress {
    VirtualAddress::new(idle_task as usize as u32)
}
