//! # Segment Selectors and Entry Flags
//!
//! The descriptor tables themselves are installed by the boot path; the core
//! only needs the selector values to fabricate interrupt-return frames.

/// Ring-0 code selector (GDT entry 1).
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// Ring-0 data selector (GDT entry 2).
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

/// Ring-3 code selector (GDT entry 3, RPL 3).
pub const USER_CODE_SELECTOR: u16 = 0x1B;

/// Ring-3 data/stack selector (GDT entry 4, RPL 3).
pub const USER_DATA_SELECTOR: u16 = 0x23;

/// Flags word a task first runs with: IF set plus the always-one bit 1.
pub const TASK_ENTRY_EFLAGS: u32 = 0x202;

/// Flags word with interrupts masked (only the always-one bit 1).
pub const MASKED_EFLAGS: u32 = 0x002;

const _: () = {
    assert!(USER_CODE_SELECTOR & 0b11 == 3);
    assert!(USER_DATA_SELECTOR & 0b11 == 3);
    assert!(KERNEL_CODE_SELECTOR & 0b11 == 0);
    assert!(TASK_ENTRY_EFLAGS & (1 << 9) != 0);
};
