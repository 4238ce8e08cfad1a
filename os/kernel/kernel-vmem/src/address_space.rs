//! # Address Space (i386, single identity window)
//!
//! The kernel runs in one flat address space built from two frames: a page
//! directory and the page table linked at directory index 0. The table
//! identity-maps the first 4 MiB, which holds the kernel image, the boot
//! structures and (by placement) the early heap.
//!
//! ## Highlights
//!
//! - [`AddressSpace::initialize`] allocates both frames and builds the
//!   identity window.
//! - [`AddressSpace::map`] / [`AddressSpace::unmap`] rewrite single entries of
//!   the window; addresses outside it are rejected.
//! - [`AddressSpace::query`] translates a virtual address.
//! - `AddressSpace::activate` (i386 only) loads CR3 and enables paging.
//!
//! ## Safety
//!
//! - Mutating active mappings requires TLB maintenance; on i386 `map` and
//!   `unmap` issue `invlpg` for the touched page.
//! - The provided `PhysMapper` must yield **writable** references to table frames.

use crate::page_table::{DirectoryIndex, PageDirectory, PageTable, TableIndex, split_indices};
use crate::{FrameAlloc, PageEntryBits, PhysMapper};
use kernel_info::memory::{IDENTITY_MAP_BYTES, PAGE_SIZE, PAGE_TABLE_ENTRIES};
use kernel_memory_addresses::{
    PhysicalAddress, PhysicalPage, Size4K, UnalignedAddress, VirtualAddress,
};
use log::{debug, info};

/// Reasons a mapping request is refused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of physical frames for page tables")]
    OutOfFrames,
    #[error("{0} is outside the identity-mapped window")]
    OutsideWindow(VirtualAddress),
    #[error(transparent)]
    Unaligned(#[from] UnalignedAddress),
}

/// Handle to the kernel's address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    directory: PhysicalPage<Size4K>,
    table: PhysicalPage<Size4K>,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Build the identity window.
    ///
    /// Allocates and zeroes a directory and a table frame, fills every table
    /// entry `i` with `i * 4096 | present | writable`, and links the table at
    /// directory index 0. Nothing is activated.
    ///
    /// # Errors
    /// [`MapError::OutOfFrames`] if either frame cannot be allocated; a
    /// directory frame obtained before the failure is returned.
    pub fn initialize<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        let directory = alloc.alloc_4k().ok_or(MapError::OutOfFrames)?;
        let Some(table) = alloc.alloc_4k() else {
            alloc.free_4k(directory);
            return Err(MapError::OutOfFrames);
        };

        let aspace = Self::from_frames(mapper, directory, table);

        let pt = aspace.table_mut();
        pt.zero();
        for i in 0..PAGE_TABLE_ENTRIES as u16 {
            let frame = PhysicalAddress::new(u32::from(i) * PAGE_SIZE);
            pt.set(
                TableIndex::new(i),
                PageEntryBits::kernel_rw().with_physical_address(frame),
            );
        }

        let pd = aspace.directory_mut();
        pd.zero();
        pd.set(
            DirectoryIndex::new(0),
            PageEntryBits::kernel_rw().with_physical_address(table.base()),
        );

        info!(
            "Address space built: directory at {}, identity window of {} KiB",
            directory.base(),
            IDENTITY_MAP_BYTES / 1024
        );
        Ok(aspace)
    }

    /// Wrap already-built directory and table frames.
    #[inline]
    pub const fn from_frames(
        mapper: &'m M,
        directory: PhysicalPage<Size4K>,
        table: PhysicalPage<Size4K>,
    ) -> Self {
        Self {
            directory,
            table,
            mapper,
        }
    }

    /// Physical page of the directory (the value CR3 holds).
    #[inline]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.directory
    }

    /// Physical page of the identity-window table.
    #[inline]
    pub const fn table(&self) -> PhysicalPage<Size4K> {
        self.table
    }

    #[inline]
    fn directory_mut(&self) -> &mut PageDirectory {
        unsafe { self.mapper.phys_to_mut::<PageDirectory>(self.directory.base()) }
    }

    #[inline]
    fn table_mut(&self) -> &mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(self.table.base()) }
    }

    /// Whether `va` lies in the window this address space can edit.
    #[inline]
    #[must_use]
    pub const fn in_window(va: VirtualAddress) -> bool {
        DirectoryIndex::from(va).as_usize() == 0
    }

    /// Install `va → pa` with the flag bits of `flags`.
    ///
    /// The flag word is stored as given (callers normally pass
    /// [`PageEntryBits::kernel_rw`] or [`PageEntryBits::user_rw`]).
    ///
    /// # Errors
    /// - [`MapError::Unaligned`] if either address is not page aligned.
    /// - [`MapError::OutsideWindow`] if `va` is not covered by directory
    ///   entry 0.
    pub fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        let page = PhysicalPage::<Size4K>::try_from(pa)?;
        if !va.is_aligned::<Size4K>() {
            return Err(UnalignedAddress(va.as_u32()).into());
        }

        let (dir, idx) = split_indices(va);
        if dir.as_usize() != 0 {
            return Err(MapError::OutsideWindow(va));
        }

        let entry = PageEntryBits::from_flags(flags.flags()).with_physical_address(page.base());
        self.table_mut().set(idx, entry);

        // Ring 3 needs the user bit at both levels.
        let pd = self.directory_mut();
        let pde = pd.get(dir);
        if entry.user_access() && !pde.user_access() {
            pd.set(dir, pde.with_user_access(true));
        }
        tlb::flush_page(va);

        debug!("Mapped {va} -> {pa} (flags {:#05x})", entry.flags());
        Ok(())
    }

    /// Clear the entry for `va`. Addresses outside the window are ignored.
    pub fn unmap(&self, va: VirtualAddress) {
        let (dir, idx) = split_indices(va);
        if dir.as_usize() != 0 {
            return;
        }
        self.table_mut().set(idx, PageEntryBits::zero());
        tlb::flush_page(va);
    }

    /// The raw entry covering `va`, if `va` is inside the window.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        let (dir, idx) = split_indices(va);
        if dir.as_usize() != 0 {
            return None;
        }
        Some(self.table_mut().get(idx))
    }

    /// Translate `va` to a physical address if it is mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (dir, idx) = split_indices(va);
        let pde = self.directory_mut().get(dir);
        if !pde.present() {
            return None;
        }

        let pt = unsafe { self.mapper.phys_to_mut::<PageTable>(pde.physical_address()) };
        let pte = pt.get(idx);
        if !pte.present() {
            return None;
        }
        Some(pte.physical_page().join(va.offset::<Size4K>()))
    }

    /// Load CR3 with this address space's root and turn on paging.
    ///
    /// # Safety
    /// The code performing the switch must be identity mapped by this space,
    /// and the tables must stay at their physical location for as long as the
    /// space is active.
    #[cfg(target_arch = "x86")]
    pub unsafe fn activate(&self) {
        use kernel_registers::cr0::Cr0;
        use kernel_registers::cr3::Cr3;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

        unsafe {
            Cr3::from_directory(self.directory).store_unsafe();
            let cr0 = Cr0::load_unsafe().with_pg_paging(true);
            cr0.store_unsafe();
        }
        info!("Paging enabled, CR3 = {}", self.directory.base());
    }
}

mod tlb {
    use kernel_memory_addresses::VirtualAddress;

    /// Drop any cached translation for the page containing `va`.
    #[cfg(target_arch = "x86")]
    #[inline]
    pub fn flush_page(va: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
        }
    }

    #[cfg(not(target_arch = "x86"))]
    #[inline]
    pub const fn flush_page(_va: VirtualAddress) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BumpAlloc, TestPhys};

    fn build(phys: &TestPhys) -> (AddressSpace<'_, TestPhys>, BumpAlloc) {
        let mut alloc = BumpAlloc::new(0x1_0000, 0x2_0000);
        let aspace = AddressSpace::initialize(phys, &mut alloc).expect("two frames available");
        (aspace, alloc)
    }

    #[test]
    fn initialize_identity_maps_first_four_mib() {
        let phys = TestPhys::with_frames(64);
        let (aspace, _) = build(&phys);

        assert_eq!(aspace.root().base(), PhysicalAddress::new(0x1_0000));
        assert_eq!(aspace.table().base(), PhysicalAddress::new(0x1_1000));

        for va in [0u32, 0x1000, 0x0010_0123, 0x003F_FFFF] {
            assert_eq!(
                aspace.query(VirtualAddress::new(va)),
                Some(PhysicalAddress::new(va))
            );
        }
        assert_eq!(aspace.query(VirtualAddress::new(0x0040_0000)), None);

        let pde = unsafe { phys.phys_to_mut::<PageDirectory>(aspace.root().base()) }
            .get(DirectoryIndex::new(0));
        assert!(pde.present() && pde.writable() && !pde.user_access());
        assert_eq!(pde.physical_address(), aspace.table().base());
    }

    #[test]
    fn initialize_reports_exhaustion_and_returns_directory() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0x1_0000, 0x1_1000);
        let err = AddressSpace::initialize(&phys, &mut alloc).err();
        assert_eq!(err, Some(MapError::OutOfFrames));
        assert_eq!(alloc.freed, vec![PhysicalAddress::new(0x1_0000).page::<Size4K>()]);
    }

    #[test]
    fn map_inside_window_rewrites_the_entry() {
        let phys = TestPhys::with_frames(64);
        let (aspace, _) = build(&phys);

        let va = VirtualAddress::new(0x0030_0000);
        let pa = PhysicalAddress::new(0x0020_5000);
        aspace.map(va, pa, PageEntryBits::user_rw()).expect("inside window");

        let e = aspace.entry(va).expect("inside window");
        assert_eq!(e.into_bits(), 0x0020_5007);
        assert_eq!(aspace.query(va + 0x10), Some(pa + 0x10));
    }

    #[test]
    fn user_mapping_opens_the_directory_entry() {
        let phys = TestPhys::with_frames(64);
        let (aspace, _) = build(&phys);
        let pd = |a: &AddressSpace<'_, TestPhys>| a.directory_mut().get(DirectoryIndex::new(0));

        aspace
            .map(VirtualAddress::new(0x1000), PhysicalAddress::new(0x1000), PageEntryBits::kernel_rw())
            .expect("inside window");
        assert!(!pd(&aspace).user_access());

        aspace
            .map(VirtualAddress::new(0x2000), PhysicalAddress::new(0x2000), PageEntryBits::user_rw())
            .expect("inside window");
        assert!(pd(&aspace).user_access());
        assert_eq!(pd(&aspace).physical_address(), aspace.table().base());
    }

    #[test]
    fn map_outside_window_fails() {
        let phys = TestPhys::with_frames(64);
        let (aspace, _) = build(&phys);

        let va = VirtualAddress::new(0x0040_0000);
        assert_eq!(
            aspace.map(va, PhysicalAddress::new(0x5000), PageEntryBits::kernel_rw()),
            Err(MapError::OutsideWindow(va))
        );
        assert_eq!(aspace.entry(va), None);
    }

    #[test]
    fn map_rejects_unaligned_operands() {
        let phys = TestPhys::with_frames(64);
        let (aspace, _) = build(&phys);

        assert_eq!(
            aspace.map(
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x2004),
                PageEntryBits::kernel_rw()
            ),
            Err(MapError::Unaligned(UnalignedAddress(0x2004)))
        );
        assert_eq!(
            aspace.map(
                VirtualAddress::new(0x1001),
                PhysicalAddress::new(0x2000),
                PageEntryBits::kernel_rw()
            ),
            Err(MapError::Unaligned(UnalignedAddress(0x1001)))
        );
    }

    #[test]
    fn unmap_clears_and_ignores_outside_window() {
        let phys = TestPhys::with_frames(64);
        let (aspace, _) = build(&phys);

        let va = VirtualAddress::new(0x0000_8000);
        assert!(aspace.query(va).is_some());
        aspace.unmap(va);
        assert_eq!(aspace.query(va), None);
        assert_eq!(aspace.entry(va), Some(PageEntryBits::zero()));

        aspace.unmap(VirtualAddress::new(0x8000_0000));
        assert_eq!(aspace.query(VirtualAddress::new(0x9000)), Some(PhysicalAddress::new(0x9000)));
    }
}
