use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3: Page-Directory Base Register (32-bit paging, no PAE).
///
/// Holds the physical base of the page directory and the cache-control flags
/// used when the processor walks it.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    /// Bits 0–2: Ignored.
    #[bits(3)]
    pub ignored0: u8,

    /// Bit 3: PWT: Page-level Write-Through for the directory.
    pub pwt: bool,

    /// Bit 4: PCD: Page-level Cache Disable for the directory.
    pub pcd: bool,

    /// Bits 5–11: Ignored.
    #[bits(7)]
    pub ignored1: u8,

    /// Bits 12–31: page-directory physical base >> 12.
    #[bits(20)]
    directory_base_4k: u32,
}

impl Cr3 {
    /// CR3 value selecting the directory at `root` with default caching.
    #[must_use]
    pub const fn from_directory(root: PhysicalPage<Size4K>) -> Self {
        Self::new().with_directory_base_4k(root.base().as_u32() >> 12)
    }

    /// Physical address of the page directory.
    #[must_use]
    pub const fn directory_phys(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.directory_base_4k() << 12)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u32;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
