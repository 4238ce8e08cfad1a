//! `int 0x80` wrappers for ring-3 tasks (i386 only).

use crate::syscall_abi::{Sysno, decode_address, decode_id};

#[inline(always)]
#[allow(clippy::inline_always)]
fn syscall1(sysno: Sysno, arg: u32) -> u32 {
    let ret: u32;
    unsafe {
        core::arch::asm!(
            "int 0x80",
            inlateout("eax") sysno.as_u32() => ret,
            in("ebx") arg,
            options(nostack)
        );
    }
    ret
}

/// Let the next ready task run.
#[inline]
pub fn yield_now() {
    syscall1(Sysno::Yield, 0);
}

/// Terminate the calling task.
pub fn exit() -> ! {
    syscall1(Sysno::Exit, 0);
    // The kernel never schedules a dead task again.
    loop {
        core::hint::spin_loop();
    }
}

/// Create a shared-memory region of at least `size` bytes.
#[inline]
#[must_use]
pub fn shm_create(size: u32) -> Option<u32> {
    decode_id(syscall1(Sysno::ShmCreate, size))
}

/// Attach region `id` and return its (identity-mapped) base address.
#[inline]
#[must_use]
pub fn shm_attach(id: u32) -> Option<*mut u8> {
    decode_address(syscall1(Sysno::ShmAttach, id))
        .map(|addr| core::ptr::with_exposed_provenance_mut(addr as usize))
}

/// Detach the region containing `addr`.
#[inline]
pub fn shm_detach(addr: *const u8) {
    #[allow(clippy::cast_possible_truncation)]
    let addr = addr.expose_provenance() as u32;
    syscall1(Sysno::ShmDetach, addr);
}

/// Destroy region `id`; fails while the region is still attached.
#[inline]
#[must_use]
pub fn shm_destroy(id: u32) -> bool {
    decode_id(syscall1(Sysno::ShmDestroy, id)).is_some()
}
