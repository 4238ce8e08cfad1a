//! # Kernel Boot Information
//!
//! Architecture-neutral view of what the loader handed over. Built once on the
//! boot stack (no heap exists yet) and consumed by the frame allocator.

use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// How the loader classified a memory-map entry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RegionKind {
    /// Free RAM the kernel may hand out.
    Available,
    /// Anything else (ACPI, NVS, defective, firmware).
    #[default]
    Reserved,
}

/// One entry of the boot memory map.
///
/// `length` is 32-bit: the loader's 64-bit fields are truncated since
/// nothing beyond the 4 GiB space is addressable on this platform.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: PhysicalAddress,
    pub length: u32,
    pub kind: RegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn available(base: u32, length: u32) -> Self {
        Self {
            base: PhysicalAddress::new(base),
            length,
            kind: RegionKind::Available,
        }
    }

    #[must_use]
    pub const fn reserved(base: u32, length: u32) -> Self {
        Self {
            base: PhysicalAddress::new(base),
            length,
            kind: RegionKind::Reserved,
        }
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.kind, RegionKind::Available)
    }

    /// Exclusive end; computed in 64 bits since `base + length` may pass 4 GiB.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.base.as_u32()) + u64::from(self.length)
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryRegion({:?}, 0x{:08X}..0x{:09X})",
            self.kind,
            self.base.as_u32(),
            self.end()
        )
    }
}

/// A half-open physical range `[start, end)`.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct PhysicalRange {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl PhysicalRange {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            end: PhysicalAddress::new(end),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.as_u32() <= self.start.as_u32()
    }

    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.as_u32() >= self.start.as_u32() && pa.as_u32() < self.end.as_u32()
    }
}

impl fmt::Debug for PhysicalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PhysicalRange(0x{:08X}..0x{:08X})",
            self.start.as_u32(),
            self.end.as_u32()
        )
    }
}

/// Everything the kernel learns from the loader.
#[derive(Copy, Clone, Debug, Default)]
pub struct BootInfo<'a> {
    /// The loader's memory map; `None` when the loader supplied none.
    pub memory_map: Option<&'a [MemoryRegion]>,
    /// Physical span of the loaded kernel image.
    pub kernel_image: PhysicalRange,
    /// Physical spans of loader modules.
    pub modules: &'a [PhysicalRange],
}

/// Fixed-capacity list for boot data gathered before the heap exists.
#[derive(Clone)]
pub struct BootList<T, const N: usize> {
    items: [T; N],
    len: usize,
}

impl<T: Copy + Default, const N: usize> BootList<T, N> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: [T::default(); N],
            len: 0,
        }
    }

    /// Appends `item`, handing it back if the list is full.
    ///
    /// # Errors
    /// Returns `Err(item)` once `N` items are stored.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let Some(slot) = self.items.get_mut(self.len) else {
            return Err(item);
        };
        *slot = item;
        self.len += 1;
        Ok(())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items[..self.len]
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T: Copy + Default, const N: usize> Default for BootList<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
