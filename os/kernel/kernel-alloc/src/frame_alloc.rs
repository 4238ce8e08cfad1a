//! # Bitmap Frame Allocator
//!
//! One bit per 4 KiB frame below [`MAX_PHYS_MEMORY`], set when the frame is
//! free. The bit is the only place a frame's state lives: there is no
//! ownership record, so a double free goes unnoticed unless the
//! `checked-free` feature is enabled.
//!
//! ```text
//! bitmap[byte] bit b  ⇔  frame (byte * 8 + b)  ⇔  [frame * 4096, frame * 4096 + 4096)
//! ```
//!
//! Allocation is a first-fit scan for a run of free bits, starting at the
//! first frame above low memory.

use kernel_info::boot::{BootInfo, PhysicalRange};
use kernel_info::memory::{FRAME_COUNT, LOW_MEMORY_END, MAX_PHYS_MEMORY, PAGE_SIZE};
use kernel_memory_addresses::{FrameIndex, PageSize, PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::FrameAlloc;
use log::{debug, info, trace};

const BITMAP_BYTES: usize = FRAME_COUNT / 8;

/// Frames tracked by the bitmap.
const TOTAL_FRAMES: u32 = MAX_PHYS_MEMORY / PAGE_SIZE;

/// Why a frame request could not be served.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("boot information carries no memory map")]
    MissingMemoryMap,
    #[error("requested a run of zero frames")]
    ZeroCount,
    #[error("no run of {0} contiguous free frames")]
    OutOfFrames(u32),
}

/// Physical frame allocator over the fixed 256 MiB window.
pub struct BitmapFrameAlloc {
    bitmap: [u8; BITMAP_BYTES],
    /// Where every scan starts; `TOTAL_FRAMES` while nothing is allocatable.
    first_usable: u32,
}

impl BitmapFrameAlloc {
    /// An allocator with every frame marked used.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_BYTES],
            first_usable: TOTAL_FRAMES,
        }
    }

    /// Rebuild the bitmap from the loader's view of memory.
    ///
    /// Every frame starts out used. Available regions are then marked free,
    /// clipped to the ceiling (the scan stops at the first region that starts
    /// beyond it). Finally low memory, the kernel image and every module are
    /// marked used again, in that order.
    ///
    /// # Errors
    /// [`FrameAllocError::MissingMemoryMap`] if the loader supplied no map.
    /// The bitmap is left fully used in that case.
    pub fn init(&mut self, boot: &BootInfo<'_>) -> Result<(), FrameAllocError> {
        self.bitmap.fill(0);
        self.first_usable = TOTAL_FRAMES;

        let regions = boot
            .memory_map
            .ok_or(FrameAllocError::MissingMemoryMap)?;

        let ceiling = u64::from(MAX_PHYS_MEMORY);
        for region in regions
            .iter()
            .filter(|r| r.is_available() && r.length > 0)
        {
            let base = u64::from(region.base.as_u32());
            if base >= ceiling {
                trace!("Ignoring {region:?} and everything after it: beyond the ceiling");
                break;
            }

            let end = region.end().min(ceiling);
            self.mark_range(base, end, true);

            if end > u64::from(LOW_MEMORY_END) {
                let low_end = FrameIndex::containing(PhysicalAddress::new(LOW_MEMORY_END));
                self.first_usable = self.first_usable.min(low_end.as_u32());
            }
        }

        self.mark_range(0, u64::from(LOW_MEMORY_END), false);
        self.reserve(PhysicalRange {
            start: boot.kernel_image.start,
            end: boot.kernel_image.end.align_up::<Size4K>(),
        });
        for module in boot.modules {
            self.reserve(PhysicalRange {
                start: module.start.align_down::<Size4K>(),
                end: module.end.align_up::<Size4K>(),
            });
        }

        info!(
            "Frame allocator ready: {} of {} frames free, scanning from {:?}",
            self.free_frames(),
            TOTAL_FRAMES,
            FrameIndex::new(self.first_usable)
        );
        Ok(())
    }

    /// Allocate `count` physically contiguous frames.
    ///
    /// # Errors
    /// - [`FrameAllocError::ZeroCount`] for `count == 0`.
    /// - [`FrameAllocError::OutOfFrames`] when no free run is long enough.
    pub fn allocate_pages(&mut self, count: u32) -> Result<PhysicalAddress, FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::ZeroCount);
        }

        let mut start = self.first_usable;
        while start.checked_add(count).is_some_and(|end| end <= TOTAL_FRAMES) {
            match (start..start + count).find(|&frame| !self.bit(frame)) {
                Some(used) => start = used + 1,
                None => {
                    for frame in start..start + count {
                        self.set_bit(frame, false);
                    }
                    let base = FrameIndex::new(start).base();
                    debug!("Allocated {count} frame(s) at {base}");
                    return Ok(base);
                }
            }
        }

        trace!("No run of {count} free frames");
        Err(FrameAllocError::OutOfFrames(count))
    }

    /// Mark `count` frames starting at `base` free.
    ///
    /// A null or unaligned `base` and a zero `count` are ignored; frames past
    /// the ceiling are skipped.
    pub fn free_pages(&mut self, base: PhysicalAddress, count: u32) {
        if base.is_null() || count == 0 || !base.is_aligned::<Size4K>() {
            trace!("Ignoring free of {count} frame(s) at {base}");
            return;
        }

        let start = FrameIndex::containing(base).as_u32();
        let end = start.saturating_add(count).min(TOTAL_FRAMES);
        for frame in start..end {
            #[cfg(feature = "checked-free")]
            if self.bit(frame) {
                log::warn!("{:?} freed while already free", FrameIndex::new(frame));
            }
            self.set_bit(frame, true);
        }
        debug!("Freed {count} frame(s) at {base}");
    }

    /// Allocate a single frame.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfFrames`] when every frame is in use.
    #[inline]
    pub fn allocate(&mut self) -> Result<PhysicalAddress, FrameAllocError> {
        self.allocate_pages(1)
    }

    /// Free a single frame.
    #[inline]
    pub fn free(&mut self, base: PhysicalAddress) {
        self.free_pages(base, 1);
    }

    /// Number of frames currently marked free.
    #[must_use]
    pub fn free_frames(&self) -> u32 {
        self.bitmap.iter().map(|byte| byte.count_ones()).sum()
    }

    /// Number of frames currently marked used, reservations included.
    #[must_use]
    pub fn used_frames(&self) -> u32 {
        TOTAL_FRAMES - self.free_frames()
    }

    /// First frame any scan considers, or `None` if nothing is allocatable.
    #[must_use]
    pub const fn first_usable(&self) -> Option<FrameIndex> {
        if self.first_usable < TOTAL_FRAMES {
            Some(FrameIndex::new(self.first_usable))
        } else {
            None
        }
    }

    /// Whether `frame` is marked free. Frames past the ceiling never are.
    #[must_use]
    pub fn is_free(&self, frame: FrameIndex) -> bool {
        frame.as_u32() < TOTAL_FRAMES && self.bit(frame.as_u32())
    }

    fn reserve(&mut self, range: PhysicalRange) {
        trace!("Reserving {range:?}");
        self.mark_range(
            u64::from(range.start.as_u32()),
            u64::from(range.end.as_u32()),
            false,
        );
    }

    /// Mark every frame touching `[start, end)` free or used.
    fn mark_range(&mut self, start: u64, end: u64, free: bool) {
        if end <= start {
            return;
        }
        let shift = Size4K::SHIFT;
        let first = start >> shift;
        let last = ((end - 1) >> shift).min(u64::from(TOTAL_FRAMES - 1));
        for frame in first..=last {
            // `last` is clamped below `TOTAL_FRAMES`, so every frame fits in u32.
            if let Ok(frame) = u32::try_from(frame) {
                self.set_bit(frame, free);
            }
        }
    }

    #[inline]
    fn bit(&self, frame: u32) -> bool {
        let (byte, mask) = Self::locate(frame);
        self.bitmap[byte] & mask != 0
    }

    #[inline]
    fn set_bit(&mut self, frame: u32, free: bool) {
        let (byte, mask) = Self::locate(frame);
        if free {
            self.bitmap[byte] |= mask;
        } else {
            self.bitmap[byte] &= !mask;
        }
    }

    #[inline]
    const fn locate(frame: u32) -> (usize, u8) {
        ((frame / 8) as usize, 1 << (frame % 8))
    }
}

impl Default for BitmapFrameAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAlloc for BitmapFrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.allocate().ok().map(PhysicalAddress::page)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        self.free(page.base());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::MemoryRegion;

    const MIB: u32 = 1024 * 1024;

    fn boot<'a>(map: &'a [MemoryRegion], modules: &'a [PhysicalRange]) -> BootInfo<'a> {
        BootInfo {
            memory_map: Some(map),
            kernel_image: PhysicalRange::new(MIB, MIB + 0x3800),
            modules,
        }
    }

    fn allocator(map: &[MemoryRegion], modules: &[PhysicalRange]) -> Box<BitmapFrameAlloc> {
        let mut alloc = Box::new(BitmapFrameAlloc::new());
        alloc.init(&boot(map, modules)).expect("memory map present");
        alloc
    }

    #[test]
    fn missing_memory_map_is_an_error() {
        let mut alloc = Box::new(BitmapFrameAlloc::new());
        let info = BootInfo::default();
        assert_eq!(alloc.init(&info), Err(FrameAllocError::MissingMemoryMap));
        assert_eq!(alloc.free_frames(), 0);
        assert_eq!(alloc.first_usable(), None);
        assert_eq!(alloc.allocate(), Err(FrameAllocError::OutOfFrames(1)));
    }

    #[test]
    fn reservations_are_applied_after_available_regions() {
        let map = [
            MemoryRegion::available(0, 0x9_F000),
            MemoryRegion::reserved(0xF_0000, 0x1_0000),
            MemoryRegion::available(MIB, 8 * MIB),
        ];
        let modules = [PhysicalRange::new(2 * MIB + 0x0800, 2 * MIB + 0x1800)];
        let alloc = allocator(&map, &modules);

        // Low memory is reserved even though the map called it available.
        assert!(!alloc.is_free(FrameIndex::new(1)));
        // Kernel image: 0x10_0000..0x10_3800 rounds up to four frames.
        for f in 256..260 {
            assert!(!alloc.is_free(FrameIndex::new(f)), "kernel frame {f}");
        }
        assert!(alloc.is_free(FrameIndex::new(260)));
        // Module 0x20_0800..0x20_1800 rounds out to frames 512 and 513.
        assert!(!alloc.is_free(FrameIndex::new(512)));
        assert!(!alloc.is_free(FrameIndex::new(513)));
        assert!(alloc.is_free(FrameIndex::new(514)));

        assert_eq!(alloc.first_usable(), Some(FrameIndex::new(256)));
        assert_eq!(alloc.free_frames(), 2048 - 4 - 2);
    }

    #[test]
    fn regions_are_clipped_to_the_ceiling() {
        let map = [
            MemoryRegion::available(MIB, 0xFFF0_0000),
            MemoryRegion::available(0x2000_0000, 0x1000_0000),
        ];
        let alloc = allocator(&map, &[]);
        assert!(alloc.is_free(FrameIndex::new(TOTAL_FRAMES - 1)));
        assert!(!alloc.is_free(FrameIndex::new(TOTAL_FRAMES)));
        assert_eq!(alloc.free_frames(), TOTAL_FRAMES - 256 - 4);
    }

    #[test]
    fn low_memory_only_leaves_nothing_allocatable() {
        let map = [MemoryRegion::available(0, 0x9_F000)];
        let mut alloc = allocator(&map, &[]);
        assert_eq!(alloc.first_usable(), None);
        assert_eq!(alloc.allocate(), Err(FrameAllocError::OutOfFrames(1)));
    }

    #[test]
    fn allocate_pages_is_first_fit_and_contiguous() {
        let map = [MemoryRegion::available(MIB, MIB)];
        let mut alloc = allocator(&map, &[]);

        let a = alloc.allocate().unwrap();
        assert_eq!(a, PhysicalAddress::new(MIB + 0x4000));
        let run = alloc.allocate_pages(3).unwrap();
        assert_eq!(run, PhysicalAddress::new(MIB + 0x5000));

        // A single-frame hole in front is skipped for a two-frame request.
        alloc.free(a);
        let pair = alloc.allocate_pages(2).unwrap();
        assert_eq!(pair, PhysicalAddress::new(MIB + 0x8000));
        assert_eq!(alloc.allocate().unwrap(), a);
    }

    #[test]
    fn zero_count_is_rejected() {
        let map = [MemoryRegion::available(MIB, MIB)];
        let mut alloc = allocator(&map, &[]);
        assert_eq!(alloc.allocate_pages(0), Err(FrameAllocError::ZeroCount));
    }

    #[test]
    fn invalid_frees_are_ignored() {
        let map = [MemoryRegion::available(MIB, MIB)];
        let mut alloc = allocator(&map, &[]);
        let before = alloc.free_frames();

        alloc.free_pages(PhysicalAddress::NULL, 4);
        alloc.free_pages(PhysicalAddress::new(0x20_0000), 0);
        alloc.free_pages(PhysicalAddress::new(0x20_0010), 1);
        assert_eq!(alloc.free_frames(), before);

        // Frames past the ceiling are skipped, the rest are freed.
        alloc.free_pages(PhysicalAddress::new(MAX_PHYS_MEMORY - PAGE_SIZE), 8);
        assert_eq!(alloc.free_frames(), before + 1);
    }

    #[test]
    fn exhaustion_is_deterministic_and_one_free_restores_one_allocation() {
        let map = [MemoryRegion::available(MIB, 0x1_4000)];
        let mut alloc = allocator(&map, &[]);

        let mut taken = Vec::new();
        while let Ok(frame) = alloc.allocate() {
            taken.push(frame);
        }
        assert_eq!(taken.len(), 16);
        assert_eq!(alloc.allocate(), Err(FrameAllocError::OutOfFrames(1)));
        assert_eq!(alloc.allocate(), Err(FrameAllocError::OutOfFrames(1)));

        alloc.free(taken[7]);
        assert_eq!(alloc.allocate(), Ok(taken[7]));
        assert!(alloc.allocate().is_err());
    }

    #[test]
    fn outstanding_allocations_never_share_a_frame() {
        let map = [MemoryRegion::available(MIB, MIB)];
        let mut alloc = allocator(&map, &[]);

        let mut owned = std::collections::BTreeSet::new();
        for count in [1, 3, 2, 5, 1, 4] {
            let base = alloc.allocate_pages(count).unwrap();
            let first = FrameIndex::containing(base).as_u32();
            for f in first..first + count {
                assert!(owned.insert(f), "frame {f} handed out twice");
            }
        }
    }

    #[test]
    fn frame_alloc_trait_round_trips_through_the_bitmap() {
        let map = [MemoryRegion::available(MIB, MIB)];
        let mut alloc = allocator(&map, &[]);
        let page = alloc.alloc_4k().unwrap();
        assert!(!alloc.is_free(page.into()));
        alloc.free_4k(page);
        assert!(alloc.is_free(page.into()));
    }
}
