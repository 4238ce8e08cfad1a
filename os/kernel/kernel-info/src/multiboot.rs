//! # Multiboot v1 Decoding
//!
//! The loader leaves an information block in low memory whose memory map and
//! module list live in separate buffers. The boot path turns those raw byte
//! buffers into slices (everything below 4 MiB is identity mapped) and hands
//! them to [`collect_boot_info`], which produces the [`BootInfo`] the frame
//! allocator consumes.
//!
//! Only available regions are kept: the frame allocator starts from "all
//! used", so reserved entries carry no information for it.

use crate::boot::{BootInfo, BootList, MemoryRegion, PhysicalRange};
use kernel_memory_addresses::PhysicalAddress;

/// Value a compliant loader leaves in `eax`.
pub const BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// `flags` bit: `mem_lower`/`mem_upper` are valid.
pub const INFO_MEMORY: u32 = 1 << 0;
/// `flags` bit: `mods_count`/`mods_addr` are valid.
pub const INFO_MODULES: u32 = 1 << 3;
/// `flags` bit: `mmap_length`/`mmap_addr` are valid.
pub const INFO_MEMORY_MAP: u32 = 1 << 6;

/// Memory-map `type` of usable RAM.
pub const MEMORY_AVAILABLE: u32 = 1;

/// Smallest memory-map entry: `size` + 64-bit base + 64-bit length + `type`.
pub const MMAP_ENTRY_SIZE: usize = 24;

/// Size of one module-list entry.
pub const MODULE_ENTRY_SIZE: usize = 16;

/// Leading part of the Multiboot information block (everything the kernel
/// core reads). The loader's block is longer; trailing fields are ignored.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

const _: () = assert!(size_of::<MultibootInfo>() == 52);

impl MultibootInfo {
    #[must_use]
    pub const fn has_memory_map(&self) -> bool {
        self.flags & INFO_MEMORY_MAP != 0 && self.mmap_addr != 0
    }

    #[must_use]
    pub const fn has_modules(&self) -> bool {
        self.flags & INFO_MODULES != 0 && self.mods_count > 0 && self.mods_addr != 0
    }

    /// Physical location and byte length of the memory map, if present.
    #[must_use]
    pub const fn memory_map_location(&self) -> Option<(PhysicalAddress, usize)> {
        if self.has_memory_map() {
            Some((
                PhysicalAddress::new(self.mmap_addr),
                self.mmap_length as usize,
            ))
        } else {
            None
        }
    }

    /// Physical location and byte length of the module list, if present.
    #[must_use]
    pub const fn modules_location(&self) -> Option<(PhysicalAddress, usize)> {
        if self.has_modules() {
            Some((
                PhysicalAddress::new(self.mods_addr),
                self.mods_count as usize * MODULE_ENTRY_SIZE,
            ))
        } else {
            None
        }
    }
}

/// Reasons the boot information cannot be used.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MultibootError {
    #[error("loader magic 0x{0:08X} is not a Multiboot v1 magic")]
    BadMagic(u32),
    #[error("loader supplied no memory map")]
    MissingMemoryMap,
    #[error("more boot modules than the boot path can hold")]
    TooManyModules,
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw = bytes.get(at..at + 8)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

/// One raw memory-map entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryMapEntry {
    pub addr: u64,
    pub len: u64,
    pub kind: u32,
}

impl MemoryMapEntry {
    /// The entry as a [`MemoryRegion`], truncated to the 32-bit space.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn to_region(&self) -> MemoryRegion {
        let base = self.addr as u32;
        let length = self.len as u32;
        if self.kind == MEMORY_AVAILABLE {
            MemoryRegion::available(base, length)
        } else {
            MemoryRegion::reserved(base, length)
        }
    }
}

/// Iterator over a raw memory-map buffer.
///
/// Each entry is preceded by its `size` (not counting the field itself);
/// entries shorter than [`MMAP_ENTRY_SIZE`] advance by the minimum.
#[derive(Clone)]
pub struct MemoryMapEntries<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> MemoryMapEntries<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }
}

impl Iterator for MemoryMapEntries<'_> {
    type Item = MemoryMapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.cursor;
        if at
            .checked_add(MMAP_ENTRY_SIZE)
            .is_none_or(|end| end > self.bytes.len())
        {
            return None;
        }

        let size = read_u32(self.bytes, at)? as usize;
        let entry = MemoryMapEntry {
            addr: read_u64(self.bytes, at + 4)?,
            len: read_u64(self.bytes, at + 12)?,
            kind: read_u32(self.bytes, at + 20)?,
        };

        // A size that overflows the cursor ends the walk after this entry.
        self.cursor = size
            .checked_add(4)
            .and_then(|step| at.checked_add(step.max(MMAP_ENTRY_SIZE)))
            .unwrap_or(usize::MAX);
        Some(entry)
    }
}

/// Iterator over a raw module-list buffer, yielding each module's span.
#[derive(Clone)]
pub struct ModuleEntries<'a> {
    chunks: core::slice::ChunksExact<'a, u8>,
}

impl<'a> ModuleEntries<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            chunks: bytes.chunks_exact(MODULE_ENTRY_SIZE),
        }
    }
}

impl Iterator for ModuleEntries<'_> {
    type Item = PhysicalRange;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        Some(PhysicalRange::new(read_u32(chunk, 0)?, read_u32(chunk, 4)?))
    }
}

/// Checks the loader magic passed in `eax`.
///
/// # Errors
/// [`MultibootError::BadMagic`] for anything but [`BOOTLOADER_MAGIC`].
pub const fn check_magic(magic: u32) -> Result<(), MultibootError> {
    if magic == BOOTLOADER_MAGIC {
        Ok(())
    } else {
        Err(MultibootError::BadMagic(magic))
    }
}

/// Builds the [`BootInfo`] from the decoded loader buffers.
///
/// `mmap` must be `None` when [`MultibootInfo::has_memory_map`] is false.
/// Available regions beyond the capacity of `regions` are dropped, which
/// only shrinks the usable pool.
///
/// # Errors
/// * [`MultibootError::MissingMemoryMap`] if `mmap` is `None`.
/// * [`MultibootError::TooManyModules`] if the module list does not fit;
///   dropping a module would let the allocator hand out its frames.
pub fn collect_boot_info<'a, const R: usize, const M: usize>(
    mmap: Option<&[u8]>,
    modules: Option<&[u8]>,
    kernel_image: PhysicalRange,
    regions: &'a mut BootList<MemoryRegion, R>,
    module_ranges: &'a mut BootList<PhysicalRange, M>,
) -> Result<BootInfo<'a>, MultibootError> {
    let mmap = mmap.ok_or(MultibootError::MissingMemoryMap)?;

    for region in MemoryMapEntries::new(mmap)
        .map(|e| e.to_region())
        .filter(|r| r.is_available() && r.length > 0)
    {
        if regions.push(region).is_err() {
            break;
        }
    }

    if let Some(modules) = modules {
        for module in ModuleEntries::new(modules) {
            module_ranges
                .push(module)
                .map_err(|_| MultibootError::TooManyModules)?;
        }
    }

    Ok(BootInfo {
        memory_map: Some(regions.as_slice()),
        kernel_image,
        modules: module_ranges.as_slice(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmap_entry(buf: &mut Vec<u8>, size: u32, addr: u64, len: u64, kind: u32) {
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&addr.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.resize(buf.len() + (size as usize + 4).saturating_sub(MMAP_ENTRY_SIZE), 0);
    }

    fn module_entry(buf: &mut Vec<u8>, start: u32, end: u32) {
        for word in [start, end, 0, 0] {
            buf.extend_from_slice(&word.to_le_bytes());
        }
    }

    #[test]
    fn decodes_grub_style_map() {
        let mut mmap = Vec::new();
        mmap_entry(&mut mmap, 20, 0, 0x9_FC00, MEMORY_AVAILABLE);
        mmap_entry(&mut mmap, 20, 0xF_0000, 0x1_0000, 2);
        mmap_entry(&mut mmap, 20, 0x10_0000, 0x7EE_0000, MEMORY_AVAILABLE);

        let entries: Vec<_> = MemoryMapEntries::new(&mmap).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].kind, 2);
        assert_eq!(entries[2].to_region(), MemoryRegion::available(0x10_0000, 0x7EE_0000));
    }

    #[test]
    fn honors_larger_entry_sizes() {
        let mut mmap = Vec::new();
        mmap_entry(&mut mmap, 28, 0x10_0000, 0x1000, MEMORY_AVAILABLE);
        mmap_entry(&mut mmap, 20, 0x20_0000, 0x2000, MEMORY_AVAILABLE);

        let entries: Vec<_> = MemoryMapEntries::new(&mmap).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].addr, 0x20_0000);
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let mut mmap = Vec::new();
        mmap_entry(&mut mmap, 20, 0x10_0000, 0x1000, MEMORY_AVAILABLE);
        mmap.extend_from_slice(&[0u8; 10]);
        assert_eq!(MemoryMapEntries::new(&mmap).count(), 1);
    }

    #[test]
    fn oversized_entry_ends_the_walk() {
        let mut mmap = Vec::new();
        mmap_entry(&mut mmap, 20, 0x10_0000, 0x1000, MEMORY_AVAILABLE);
        mmap[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        mmap_entry(&mut mmap, 20, 0x20_0000, 0x2000, MEMORY_AVAILABLE);

        let entries: Vec<_> = MemoryMapEntries::new(&mmap).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].addr, 0x10_0000);

        let mut walk = MemoryMapEntries::new(&mmap);
        walk.cursor = usize::MAX - 4;
        assert!(walk.next().is_none());
    }

    #[test]
    fn sixty_four_bit_fields_are_truncated() {
        let entry = MemoryMapEntry {
            addr: 0x1_0010_0000,
            len: 0x1_0000_2000,
            kind: MEMORY_AVAILABLE,
        };
        assert_eq!(entry.to_region(), MemoryRegion::available(0x10_0000, 0x2000));
    }

    #[test]
    fn collect_keeps_only_available_regions_and_modules() {
        let mut mmap = Vec::new();
        mmap_entry(&mut mmap, 20, 0, 0x9_FC00, MEMORY_AVAILABLE);
        mmap_entry(&mut mmap, 20, 0xF_0000, 0x1_0000, 2);
        mmap_entry(&mut mmap, 20, 0x10_0000, 0x0F0_0000, MEMORY_AVAILABLE);
        let mut mods = Vec::new();
        module_entry(&mut mods, 0x20_0100, 0x20_3000);

        let mut regions = BootList::<MemoryRegion, 8>::new();
        let mut modules = BootList::<PhysicalRange, 4>::new();
        let image = PhysicalRange::new(0x10_0000, 0x11_8000);
        let info = collect_boot_info(Some(&mmap), Some(&mods), image, &mut regions, &mut modules)
            .expect("map present");

        let map = info.memory_map.expect("map present");
        assert_eq!(map.len(), 2);
        assert!(map.iter().all(MemoryRegion::is_available));
        assert_eq!(info.modules, &[PhysicalRange::new(0x20_0100, 0x20_3000)]);
        assert_eq!(info.kernel_image, image);
    }

    #[test]
    fn missing_map_is_reported() {
        let mut regions = BootList::<MemoryRegion, 8>::new();
        let mut modules = BootList::<PhysicalRange, 4>::new();
        let err = collect_boot_info(
            None,
            None,
            PhysicalRange::default(),
            &mut regions,
            &mut modules,
        )
        .unwrap_err();
        assert_eq!(err, MultibootError::MissingMemoryMap);
    }

    #[test]
    fn module_overflow_is_an_error() {
        let mut mmap = Vec::new();
        mmap_entry(&mut mmap, 20, 0x10_0000, 0x10_0000, MEMORY_AVAILABLE);
        let mut mods = Vec::new();
        module_entry(&mut mods, 0x20_0000, 0x20_1000);
        module_entry(&mut mods, 0x30_0000, 0x30_1000);

        let mut regions = BootList::<MemoryRegion, 8>::new();
        let mut modules = BootList::<PhysicalRange, 1>::new();
        let err = collect_boot_info(
            Some(&mmap),
            Some(&mods),
            PhysicalRange::default(),
            &mut regions,
            &mut modules,
        )
        .unwrap_err();
        assert_eq!(err, MultibootError::TooManyModules);
    }

    #[test]
    fn info_flags_gate_locations() {
        let mut info = MultibootInfo {
            mmap_addr: 0x9000,
            mmap_length: 96,
            mods_addr: 0xA000,
            mods_count: 2,
            ..MultibootInfo::default()
        };
        assert_eq!(info.memory_map_location(), None);
        assert_eq!(info.modules_location(), None);

        info.flags = INFO_MEMORY_MAP | INFO_MODULES;
        assert_eq!(
            info.memory_map_location(),
            Some((PhysicalAddress::new(0x9000), 96))
        );
        assert_eq!(
            info.modules_location(),
            Some((PhysicalAddress::new(0xA000), 32))
        );
        assert!(check_magic(BOOTLOADER_MAGIC).is_ok());
        assert_eq!(check_magic(0x1234), Err(MultibootError::BadMagic(0x1234)));
    }
}
