//! Register image built by the `int 0x80` entry stub.
//!
//! The stub runs `pushad` and then pushes the four data segment registers,
//! so from the lowest address up the stack holds:
//!
//! ```text
//! esp ─► gs fs es ds | edi esi ebp esp' ebx edx ecx eax | eip cs eflags [esp ss]
//!        stub pushes   pushad                             CPU (ring 3 adds esp, ss)
//! ```

use crate::dispatch::{SyscallHandler, dispatch};

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct TrapFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// `esp` as saved by `pushad`; ignored by `popad`.
    pub kernel_esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl TrapFrame {
    /// Bytes between the stack pointer handed to the handler and `eip`.
    #[allow(clippy::cast_possible_truncation)]
    pub const SAVED_REGISTERS_SIZE: u32 = (12 * size_of::<u32>()) as u32;

    /// Frame as if `number` had been called with `args`.
    #[must_use]
    pub const fn syscall(number: u32, args: [u32; 3]) -> Self {
        Self {
            gs: 0,
            fs: 0,
            es: 0,
            ds: 0,
            edi: 0,
            esi: 0,
            ebp: 0,
            kernel_esp: 0,
            ebx: args[0],
            edx: args[2],
            ecx: args[1],
            eax: number,
            eip: 0,
            cs: 0,
            eflags: 0,
        }
    }
}

/// Decode `frame`, dispatch, and store the result in `eax`.
pub fn handle_trap<H: SyscallHandler + ?Sized>(handler: &H, frame: &mut TrapFrame) {
    frame.eax = dispatch(handler, frame.eax, frame.ebx, frame.ecx, frame.edx);
}
