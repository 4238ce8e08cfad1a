//! # QEMU Debug Console Support
//!
//! Logging and tracing for the kernel core when it runs under QEMU. Output
//! goes byte by byte to the ISA debug console port (`0xE9`), which QEMU
//! forwards to the host when started with `-debugcon`.
//!
//! ## Output Mechanism
//! ```text
//! log::info!() ──► QemuLogger ──┐
//!                               ├──► QemuSink (fmt::Write) ──► out 0xE9 ──► host
//! qemu_trace!() ────────────────┘
//! ```
//!
//! Nothing allocates: records are formatted straight into the port.
//!
//! ## Features
//!
//! * `enabled` (default): port writes are compiled in for bare-metal x86
//!   targets. Without it, and in hosted builds, every write is a no-op; that
//!   is what host-side tests see.
//!
//! ## Usage
//! ```rust,no_run
//! use log::{LevelFilter, info};
//!
//! kernel_qemu::init(LevelFilter::Debug).expect("logger installed once");
//! info!("Kernel subsystem initialized");
//! ```
//!
//! ```bash
//! qemu-system-i386 -kernel kernel.elf -debugcon stdio
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{QemuLogger, init, write_record};

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// ISA debug console port.
    pub const QEMU_DEBUG_PORT: u16 = 0xE9;

    /// Write a single byte to the debug console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(feature = "enabled", target_os = "none", target_arch = "x86"))]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(all(feature = "enabled", target_os = "none", target_arch = "x86")))]
        let _ = c;
    }

    /// `fmt::Write` adapter over the debug console.
    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments<'_>) {
        // Best effort; the sink itself never fails.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

/// `print!`-style output straight to the debug console, bypassing `log`.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
