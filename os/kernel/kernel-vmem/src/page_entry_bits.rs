use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A 32-bit i386 page-directory or page-table entry.
///
/// ### Bit layout
///
/// | Bits   | Name     | Meaning |
/// |--------|----------|---------|
/// | 0      | `P`      | Present |
/// | 1      | `RW`     | Writable |
/// | 2      | `US`     | User-mode accessible |
/// | 3      | `PWT`    | Write-through caching |
/// | 4      | `PCD`    | Cache disabled |
/// | 5      | `A`      | Accessed (set by the CPU) |
/// | 6      | `D`      | Dirty (set by the CPU, PTE only) |
/// | 7      | `PS/PAT` | 4 MiB page in a PDE, PAT in a PTE |
/// | 8      | `G`      | Global (PTE only) |
/// | 9–11   | avail    | Free for OS use |
/// | 12–31  | frame    | Frame base >> 12 |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// # use kernel_memory_addresses::PhysicalAddress;
/// let e = PageEntryBits::kernel_rw().with_physical_address(PhysicalAddress::new(0x5000));
/// assert_eq!(e.into_bits(), 0x5003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    pub accessed: bool,

    /// Dirty (D, bit 6).
    pub dirty: bool,

    /// Page Size in a PDE, PAT in a PTE (bit 7). Never set by this kernel.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global: bool,

    /// Bits 9–11, available to the OS.
    #[bits(3)]
    pub os_available: u8,

    /// Bits 12–31, frame base >> 12.
    #[bits(20)]
    frame_4k: u32,
}

impl PageEntryBits {
    /// Mask of the flag bits (everything below the frame base).
    pub const FLAGS_MASK: u32 = 0xFFF;

    /// Present and writable, supervisor only.
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, writable and reachable from ring 3.
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::kernel_rw().with_user_access(true)
    }

    /// Entry built from a raw flag word; frame bits in `flags` are dropped.
    #[must_use]
    pub const fn from_flags(flags: u32) -> Self {
        Self::from_bits(flags & Self::FLAGS_MASK)
    }

    /// The flag bits of this entry.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.into_bits() & Self::FLAGS_MASK
    }

    /// Frame base this entry points at.
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_4k() << 12)
    }

    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::containing_address(self.physical_address())
    }

    /// Same flags, pointing at the frame containing `pa`.
    #[must_use]
    pub const fn with_physical_address(self, pa: PhysicalAddress) -> Self {
        self.with_frame_4k(pa.as_u32() >> 12)
    }

    pub const fn set_physical_address(&mut self, pa: PhysicalAddress) {
        self.set_frame_4k(pa.as_u32() >> 12);
    }

    /// An all-zero, not-present entry.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }
}
