//! # Kernel Stacks and Fabricated Frames
//!
//! A task that has never run is resumed exactly like one that yielded: the
//! context switch restores callee-saved registers and the flags word from
//! its stack and `ret`s. Task creation therefore writes a
//! [`KernelEntryFrame`] so that the first switch "returns" into the entry
//! point.
//!
//! User tasks additionally get an [`InterruptReturnFrame`] at the very top of
//! their kernel stack. Their entry frame returns into the user trampoline,
//! which discards the fake return address and `iret`s into ring 3:
//!
//! ```text
//!  top ─► ┌──────────────┐
//!         │ ss   (0x23)  │ ┐
//!         │ esp          │ │
//!         │ eflags 0x202 │ │ InterruptReturnFrame (user tasks only)
//!         │ cs   (0x1B)  │ │
//!         │ eip          │ ┘
//!         ├──────────────┤
//!         │ 0            │ ┐ fake return address
//!         │ eip          │ │ entry point / user trampoline
//!         │ eflags       │ │
//!         │ ebp          │ │ KernelEntryFrame
//!         │ ebx          │ │
//!         │ esi          │ │
//!  sp ──► │ edi          │ ┘
//!         └──────────────┘
//! ```

use core::fmt;
use kernel_info::memory::TASK_STACK_SIZE;
use kernel_info::segments::{
    MASKED_EFLAGS, TASK_ENTRY_EFLAGS, USER_CODE_SELECTOR, USER_DATA_SELECTOR,
};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

use crate::TaskError;

/// A saved kernel stack pointer.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct StackPointer(u32);

impl StackPointer {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for StackPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SP(0x{:08X})", self.0)
    }
}

/// Where a user task starts: instruction and stack pointer in ring 3.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UserEntry {
    eip: VirtualAddress,
    esp: VirtualAddress,
}

impl UserEntry {
    /// # Errors
    /// - [`TaskError::NullEntry`] if `eip` is zero.
    /// - [`TaskError::UnalignedStack`] if `esp` is not word aligned.
    pub const fn new(eip: VirtualAddress, esp: VirtualAddress) -> Result<Self, TaskError> {
        if eip.as_u32() == 0 {
            return Err(TaskError::NullEntry);
        }
        if esp.as_u32() % 4 != 0 {
            return Err(TaskError::UnalignedStack(esp));
        }
        Ok(Self { eip, esp })
    }

    #[inline]
    #[must_use]
    pub const fn eip(&self) -> VirtualAddress {
        self.eip
    }

    #[inline]
    #[must_use]
    pub const fn esp(&self) -> VirtualAddress {
        self.esp
    }

    /// Flags word the task starts with (interrupts enabled).
    #[inline]
    #[must_use]
    pub const fn eflags(&self) -> u32 {
        TASK_ENTRY_EFLAGS
    }
}

/// Registers the context switch pops, lowest address first.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KernelEntryFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub ebp: u32,
    pub eflags: u32,
    pub eip: u32,
    /// Return address seen by the entry function; never used.
    pub return_address: u32,
}

impl KernelEntryFrame {
    #[allow(clippy::cast_possible_truncation)]
    pub const SIZE: u32 = size_of::<Self>() as u32;

    /// Frame that resumes at `eip` with `eflags` and zeroed registers.
    ///
    /// # Errors
    /// [`TaskError::NullEntry`] if `eip` is zero.
    pub const fn new(eip: VirtualAddress, eflags: u32) -> Result<Self, TaskError> {
        if eip.as_u32() == 0 {
            return Err(TaskError::NullEntry);
        }
        Ok(Self {
            edi: 0,
            esi: 0,
            ebx: 0,
            ebp: 0,
            eflags,
            eip: eip.as_u32(),
            return_address: 0,
        })
    }
}

/// What `iret` pops when returning to ring 3.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InterruptReturnFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl InterruptReturnFrame {
    #[allow(clippy::cast_possible_truncation)]
    pub const SIZE: u32 = size_of::<Self>() as u32;

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn user(entry: UserEntry) -> Self {
        Self {
            eip: entry.eip.as_u32(),
            cs: USER_CODE_SELECTOR as u32,
            eflags: entry.eflags(),
            esp: entry.esp.as_u32(),
            ss: USER_DATA_SELECTOR as u32,
        }
    }
}

/// The 8 KiB kernel stack a task owns, identity mapped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KernelStack {
    base: PhysicalAddress,
}

impl KernelStack {
    #[inline]
    #[must_use]
    pub const fn new(base: PhysicalAddress) -> Self {
        Self { base }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// One past the highest byte; the initial stack pointer.
    #[inline]
    #[must_use]
    pub const fn top(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u32() + TASK_STACK_SIZE)
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, sp: StackPointer) -> bool {
        sp.as_u32() >= self.base.as_u32() && sp.as_u32() <= self.top().as_u32()
    }

    /// Prepare the stack so the first switch enters kernel code at `entry`.
    ///
    /// # Errors
    /// [`TaskError::NullEntry`] if `entry` is zero.
    pub fn prepare_kernel<M: PhysMapper>(
        &self,
        mapper: &M,
        entry: VirtualAddress,
    ) -> Result<StackPointer, TaskError> {
        let frame = KernelEntryFrame::new(entry, TASK_ENTRY_EFLAGS)?;
        let sp = self.top().as_u32() - KernelEntryFrame::SIZE;
        // SAFETY: the frame lies inside the stack frames owned by this task.
        unsafe { mapper.write(PhysicalAddress::new(sp), frame) };
        Ok(StackPointer::new(sp))
    }

    /// Prepare the stack so the first switch runs `trampoline`, which
    /// `iret`s into `entry` in ring 3.
    ///
    /// # Errors
    /// [`TaskError::NullEntry`] if `trampoline` is zero.
    pub fn prepare_user<M: PhysMapper>(
        &self,
        mapper: &M,
        trampoline: VirtualAddress,
        entry: UserEntry,
    ) -> Result<StackPointer, TaskError> {
        let frame = KernelEntryFrame::new(trampoline, MASKED_EFLAGS)?;
        let iret_at = self.top().as_u32() - InterruptReturnFrame::SIZE;
        let sp = iret_at - KernelEntryFrame::SIZE;
        // SAFETY: both frames lie inside the stack frames owned by this task.
        unsafe {
            mapper.write(PhysicalAddress::new(iret_at), InterruptReturnFrame::user(entry));
            mapper.write(PhysicalAddress::new(sp), frame);
        }
        Ok(StackPointer::new(sp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::RamPhysMapper;

    const STACK: u32 = 0x0010_2000;

    #[test]
    fn frame_sizes_match_the_switch_stub() {
        assert_eq!(KernelEntryFrame::SIZE, 7 * 4);
        assert_eq!(InterruptReturnFrame::SIZE, 5 * 4);
    }

    #[test]
    fn user_entry_is_validated() {
        let esp = VirtualAddress::new(0x0030_0000);
        assert_eq!(
            UserEntry::new(VirtualAddress::zero(), esp),
            Err(TaskError::NullEntry)
        );
        let odd = VirtualAddress::new(0x0030_0002);
        assert_eq!(
            UserEntry::new(VirtualAddress::new(0x0020_0000), odd),
            Err(TaskError::UnalignedStack(odd))
        );
    }

    #[test]
    fn kernel_stack_returns_into_entry() {
        let ram = RamPhysMapper::new(PhysicalAddress::new(STACK), 2);
        let stack = KernelStack::new(PhysicalAddress::new(STACK));
        let sp = stack
            .prepare_kernel(&ram, VirtualAddress::new(0x0010_0400))
            .unwrap();

        assert_eq!(sp.as_u32(), STACK + TASK_STACK_SIZE - 28);
        assert!(stack.contains(sp));
        let frame: KernelEntryFrame = unsafe { ram.read(PhysicalAddress::new(sp.as_u32())) };
        assert_eq!(frame.eip, 0x0010_0400);
        assert_eq!(frame.eflags, TASK_ENTRY_EFLAGS);
        assert_eq!(frame.ebp, 0);
    }

    #[test]
    fn user_stack_carries_an_iret_frame_at_the_top() {
        let ram = RamPhysMapper::new(PhysicalAddress::new(STACK), 2);
        let stack = KernelStack::new(PhysicalAddress::new(STACK));
        let entry =
            UserEntry::new(VirtualAddress::new(0x0040_0000), VirtualAddress::new(0x0050_0000))
                .unwrap();
        let sp = stack
            .prepare_user(&ram, VirtualAddress::new(0x0010_0800), entry)
            .unwrap();

        let top = STACK + TASK_STACK_SIZE;
        assert_eq!(sp.as_u32(), top - 20 - 28);

        let iret: InterruptReturnFrame = unsafe { ram.read(PhysicalAddress::new(top - 20)) };
        assert_eq!(
            iret,
            InterruptReturnFrame {
                eip: 0x0040_0000,
                cs: 0x1B,
                eflags: 0x202,
                esp: 0x0050_0000,
                ss: 0x23,
            }
        );

        let frame: KernelEntryFrame = unsafe { ram.read(PhysicalAddress::new(sp.as_u32())) };
        assert_eq!(frame.eip, 0x0010_0800);
        assert_eq!(frame.eflags, MASKED_EFLAGS);
    }

    #[test]
    fn null_entry_is_rejected() {
        let ram = RamPhysMapper::new(PhysicalAddress::new(STACK), 2);
        let stack = KernelStack::new(PhysicalAddress::new(STACK));
        assert_eq!(
            stack.prepare_kernel(&ram, VirtualAddress::zero()),
            Err(TaskError::NullEntry)
        );
    }
}
