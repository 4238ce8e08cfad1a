//! # i386 Page Directory and Page Table
//!
//! - [`DirectoryIndex`]: VA bits `[31:22]`, selects a PDE.
//! - [`TableIndex`]: VA bits `[21:12]`, selects a PTE.
//! - [`PageDirectory`] / [`PageTable`]: 4 KiB-aligned arrays of 1024 entries.
//!
//! After modifying active mappings, the caller must perform any required TLB
//! maintenance.

use crate::PageEntryBits;
use kernel_info::memory::PAGE_TABLE_ENTRIES;
use kernel_memory_addresses::VirtualAddress;

/// Index into the page directory (VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// Index into a page table (VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl DirectoryIndex {
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self((va.as_u32() >> 22) as u16)
    }

    /// Construct from a raw value; asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < PAGE_TABLE_ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl TableIndex {
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self(((va.as_u32() >> 12) & 0x3FF) as u16)
    }

    /// Construct from a raw value; asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < PAGE_TABLE_ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}

/// The page directory: 1024 PDEs, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PageEntryBits; PAGE_TABLE_ENTRIES],
}

/// A page table: 1024 PTEs, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; PAGE_TABLE_ENTRIES],
}

const _: () = {
    assert!(size_of::<PageDirectory>() == 4096);
    assert!(size_of::<PageTable>() == 4096);
};

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }

    /// Clear all entries.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::zero());
    }
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }

    /// Clear all entries.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::zero());
    }

    /// Entries with their index, for inspection.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (TableIndex, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (TableIndex(i as u16), *e))
    }
}
