//! Architecture backends.

#[cfg(target_arch = "x86")]
pub mod i386;
