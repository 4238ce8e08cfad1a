//! # Kernel Heap
//!
//! A first-fit free list over whole frames taken from the
//! [`BitmapFrameAlloc`]. Blocks live in physical memory and are reached
//! through a [`PhysMapper`]; in the running kernel that is the identity map.
//!
//! Every block starts with a 32-bit size word (header included) whose low bit
//! is set while the block is handed out. Free blocks keep the address of the
//! next free block in the first payload word:
//!
//! ```text
//! free:    | size | next | ........ |
//! in use:  | size|1 | payload ..... |
//!          ^ block  ^ block + 4 (what callers get)
//! ```
//!
//! Freed blocks are pushed at the head of the list and never merged with
//! their neighbours, so long-running workloads fragment.

use crate::frame_alloc::{BitmapFrameAlloc, FrameAllocError};
use core::fmt;
use kernel_info::memory::{HEAP_INITIAL_PAGES, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;
use log::{debug, info, trace, warn};

/// Bytes of the size word in front of every payload.
const HEADER_SIZE: u32 = 4;

/// Smallest block: the size word plus the free-list link.
const MIN_BLOCK_SIZE: u32 = 8;

/// Low bit of the size word.
const IN_USE: u32 = 1;

/// Why the heap could not serve a request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("allocation of {0} bytes overflows the block size")]
    TooLarge(u32),
    #[error("no free block for {0} bytes after growing the heap")]
    NoFit(u32),
    #[error("heap could not grow: {0}")]
    OutOfFrames(#[from] FrameAllocError),
}

/// Payload address of a live heap allocation.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockHandle(PhysicalAddress);

impl BlockHandle {
    /// First payload byte.
    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        self.0
    }

    /// Address of the block header.
    #[inline]
    #[must_use]
    pub const fn header(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0.as_u32() - HEADER_SIZE)
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:?})", self.0)
    }
}

impl From<BlockHandle> for PhysicalAddress {
    #[inline]
    fn from(value: BlockHandle) -> Self {
        value.address()
    }
}

/// The kernel's variable-size allocator.
pub struct KernelHeap<'m, M: PhysMapper> {
    mapper: &'m M,
    head: Option<PhysicalAddress>,
    pages: u32,
}

impl<'m, M: PhysMapper> KernelHeap<'m, M> {
    /// An empty heap; every allocation fails until [`init`](Self::init) or a
    /// top-up provides memory.
    pub const fn new(mapper: &'m M) -> Self {
        Self {
            mapper,
            head: None,
            pages: 0,
        }
    }

    /// Seed the free list with [`HEAP_INITIAL_PAGES`] contiguous frames.
    ///
    /// # Errors
    /// [`HeapError::OutOfFrames`] if the frames cannot be allocated; the heap
    /// stays empty and can still grow one page at a time.
    pub fn init(&mut self, frames: &mut BitmapFrameAlloc) -> Result<(), HeapError> {
        self.head = None;
        self.pages = 0;

        let base = frames.allocate_pages(HEAP_INITIAL_PAGES)?;
        self.add_region(base, HEAP_INITIAL_PAGES * PAGE_SIZE);
        self.pages = HEAP_INITIAL_PAGES;

        info!(
            "Kernel heap seeded with {} KiB at {base}",
            HEAP_INITIAL_PAGES * PAGE_SIZE / 1024
        );
        Ok(())
    }

    /// Allocate `size` bytes.
    ///
    /// The block is `size + 4` rounded up to a word, and at least 8 bytes.
    /// The first free block that is large enough is used; it is split when
    /// at least 8 bytes would remain. If nothing fits, one more frame is
    /// added to the list and the search is repeated once.
    ///
    /// # Errors
    /// - [`HeapError::ZeroSize`] for `size == 0`.
    /// - [`HeapError::OutOfFrames`] if the heap had to grow and could not.
    /// - [`HeapError::NoFit`] if the request does not fit even after growing.
    pub fn allocate(
        &mut self,
        frames: &mut BitmapFrameAlloc,
        size: u32,
    ) -> Result<BlockHandle, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        let total = block_size(size).ok_or(HeapError::TooLarge(size))?;

        if let Some(block) = self.take_first_fit(total) {
            return Ok(block);
        }

        let page = frames.allocate().inspect_err(|e| {
            warn!("Heap top-up for {size} bytes failed: {e}");
        })?;
        self.add_region(page, PAGE_SIZE);
        self.pages += 1;
        debug!("Heap grew by one page at {page}");

        self.take_first_fit(total).ok_or(HeapError::NoFit(size))
    }

    /// Return a block to the free list.
    ///
    /// A null address is ignored. The address must otherwise be one
    /// previously returned by [`allocate`](Self::allocate) and not yet freed.
    pub fn free(&mut self, payload: impl Into<PhysicalAddress>) {
        let payload = payload.into();
        if payload.as_u32() < HEADER_SIZE {
            return;
        }
        let block = PhysicalAddress::new(payload.as_u32() - HEADER_SIZE);

        let size = self.size_word(block) & !IN_USE;
        self.set_size_word(block, size);
        self.set_next(block, self.head);
        self.head = Some(block);
        trace!("Freed heap block at {block} ({size} bytes)");
    }

    /// Usable bytes behind `block` (its rounded block size minus the header).
    #[must_use]
    pub fn capacity(&self, block: BlockHandle) -> u32 {
        (self.size_word(block.header()) & !IN_USE) - HEADER_SIZE
    }

    /// Frames the heap has taken from the frame allocator.
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.pages
    }

    /// Number of blocks on the free list.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.free_list().count()
    }

    /// Total bytes (headers included) on the free list.
    #[must_use]
    pub fn free_bytes(&self) -> u32 {
        self.free_list()
            .map(|block| self.size_word(block) & !IN_USE)
            .sum()
    }

    fn free_list(&self) -> impl Iterator<Item = PhysicalAddress> + '_ {
        core::iter::successors(self.head, |&block| self.next(block))
    }

    fn add_region(&mut self, base: PhysicalAddress, bytes: u32) {
        self.set_size_word(base, bytes & !IN_USE);
        self.set_next(base, self.head);
        self.head = Some(base);
    }

    /// Unlink and mark in use the first free block of at least `total` bytes.
    fn take_first_fit(&mut self, total: u32) -> Option<BlockHandle> {
        let mut prev = None;
        let mut cursor = self.head;

        while let Some(block) = cursor {
            let available = self.size_word(block) & !IN_USE;
            let next = self.next(block);

            if available >= total {
                let rest = available - total;
                let successor = if rest >= MIN_BLOCK_SIZE {
                    let tail = block + total;
                    self.set_size_word(tail, rest);
                    self.set_next(tail, next);
                    self.set_size_word(block, total | IN_USE);
                    Some(tail)
                } else {
                    self.set_size_word(block, available | IN_USE);
                    next
                };

                match prev {
                    None => self.head = successor,
                    Some(prev) => self.set_next(prev, successor),
                }

                trace!("Heap block at {block}: {total} of {available} bytes taken");
                return Some(BlockHandle(block + HEADER_SIZE));
            }

            prev = Some(block);
            cursor = next;
        }
        None
    }

    #[inline]
    fn size_word(&self, block: PhysicalAddress) -> u32 {
        // SAFETY: `block` is a header inside a frame owned by this heap.
        unsafe { self.mapper.read::<u32>(block) }
    }

    #[inline]
    fn set_size_word(&self, block: PhysicalAddress, size: u32) {
        // SAFETY: `block` is a header inside a frame owned by this heap.
        unsafe { self.mapper.write::<u32>(block, size) }
    }

    #[inline]
    fn next(&self, block: PhysicalAddress) -> Option<PhysicalAddress> {
        // SAFETY: free blocks are at least 8 bytes, so the link word is theirs.
        let raw = unsafe { self.mapper.read::<u32>(block + HEADER_SIZE) };
        (raw != 0).then_some(PhysicalAddress::new(raw))
    }

    #[inline]
    fn set_next(&self, block: PhysicalAddress, next: Option<PhysicalAddress>) {
        let raw = next.map_or(0, PhysicalAddress::as_u32);
        // SAFETY: free blocks are at least 8 bytes, so the link word is theirs.
        unsafe { self.mapper.write::<u32>(block + HEADER_SIZE, raw) }
    }
}

/// Block size for a `size`-byte request, or `None` on overflow.
const fn block_size(size: u32) -> Option<u32> {
    let Some(total) = size.checked_add(HEADER_SIZE + 3) else {
        return None;
    };
    let total = total & !3;
    Some(if total < MIN_BLOCK_SIZE {
        MIN_BLOCK_SIZE
    } else {
        total
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys_mapper::RamPhysMapper;
    use kernel_info::boot::{BootInfo, MemoryRegion, PhysicalRange};
    use kernel_memory_addresses::FrameIndex;

    const MIB: u32 = 1024 * 1024;

    /// 64 frames of simulated RAM at 1 MiB; the first frame is "the kernel".
    fn setup(frames: u32) -> (RamPhysMapper, Box<BitmapFrameAlloc>) {
        let ram = RamPhysMapper::new(PhysicalAddress::new(MIB), 64);
        let map = [MemoryRegion::available(MIB, frames * PAGE_SIZE)];
        let boot = BootInfo {
            memory_map: Some(&map),
            kernel_image: PhysicalRange::new(MIB, MIB + PAGE_SIZE),
            modules: &[],
        };
        let mut alloc = Box::new(BitmapFrameAlloc::new());
        alloc.init(&boot).unwrap();
        (ram, alloc)
    }

    #[test]
    fn block_sizes_round_to_words_with_a_minimum() {
        assert_eq!(block_size(1), Some(8));
        assert_eq!(block_size(4), Some(8));
        assert_eq!(block_size(5), Some(12));
        assert_eq!(block_size(100), Some(104));
        assert_eq!(block_size(u32::MAX - 2), None);
    }

    #[test]
    fn init_seeds_four_pages_as_one_block() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();

        assert_eq!(heap.pages(), HEAP_INITIAL_PAGES);
        assert_eq!(heap.free_blocks(), 1);
        assert_eq!(heap.free_bytes(), HEAP_INITIAL_PAGES * PAGE_SIZE);
        assert_eq!(frames.free_frames(), 64 - 1 - HEAP_INITIAL_PAGES);
    }

    #[test]
    fn zero_size_fails() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();
        assert_eq!(heap.allocate(&mut frames, 0), Err(HeapError::ZeroSize));
    }

    #[test]
    fn allocations_split_the_first_block() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();
        let seed = PhysicalAddress::new(MIB + PAGE_SIZE);

        let a = heap.allocate(&mut frames, 10).unwrap();
        let b = heap.allocate(&mut frames, 1).unwrap();
        assert_eq!(a.address(), seed + 4);
        assert_eq!(heap.capacity(a), 12);
        assert_eq!(b.address(), seed + 16 + 4);
        assert_eq!(heap.capacity(b), 4);
        assert_eq!(heap.free_bytes(), HEAP_INITIAL_PAGES * PAGE_SIZE - 16 - 8);
    }

    #[test]
    fn freed_block_is_reused_first_without_coalescing() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();

        let a = heap.allocate(&mut frames, 32).unwrap();
        let b = heap.allocate(&mut frames, 32).unwrap();
        heap.free(a);
        assert_eq!(heap.free_blocks(), 2);

        // Fits the freed block exactly: same address comes back.
        let c = heap.allocate(&mut frames, 32).unwrap();
        assert_eq!(c, a);

        // Two adjacent freed blocks stay separate.
        heap.free(c);
        heap.free(b);
        assert_eq!(heap.free_blocks(), 3);
        let big = heap.allocate(&mut frames, 64).unwrap();
        assert_ne!(big, a);
    }

    #[test]
    fn small_remainder_is_not_split_off() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();

        let a = heap.allocate(&mut frames, 16).unwrap(); // 20-byte block
        let _guard = heap.allocate(&mut frames, 4).unwrap();
        heap.free(a);

        // 16 bytes needed, 20 available: the 4-byte rest stays attached.
        let b = heap.allocate(&mut frames, 12).unwrap();
        assert_eq!(b, a);
        assert_eq!(heap.capacity(b), 16);
    }

    #[test]
    fn null_free_is_ignored() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();
        heap.free(PhysicalAddress::NULL);
        assert_eq!(heap.free_blocks(), 1);
    }

    #[test]
    fn heap_grows_by_one_page_when_nothing_fits() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();

        let _all = heap
            .allocate(&mut frames, HEAP_INITIAL_PAGES * PAGE_SIZE - 4)
            .unwrap();
        assert_eq!(heap.free_blocks(), 0);

        let before = frames.free_frames();
        let small = heap.allocate(&mut frames, 100).unwrap();
        assert_eq!(heap.pages(), HEAP_INITIAL_PAGES + 1);
        assert_eq!(frames.free_frames(), before - 1);
        assert!(!frames.is_free(FrameIndex::containing(small.address())));
    }

    #[test]
    fn request_larger_than_a_page_fails_after_one_top_up() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();

        let before = frames.free_frames();
        assert_eq!(
            heap.allocate(&mut frames, 5 * PAGE_SIZE),
            Err(HeapError::NoFit(5 * PAGE_SIZE))
        );
        assert_eq!(frames.free_frames(), before - 1);
    }

    #[test]
    fn top_up_failure_reports_frame_exhaustion() {
        // Kernel frame + four heap frames and nothing else.
        let (ram, mut frames) = setup(1 + HEAP_INITIAL_PAGES);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();

        assert_eq!(
            heap.allocate(&mut frames, 5 * PAGE_SIZE),
            Err(HeapError::OutOfFrames(FrameAllocError::OutOfFrames(1)))
        );
    }

    #[test]
    fn live_allocations_are_disjoint_and_inside_heap_frames() {
        let (ram, mut frames) = setup(64);
        let mut heap = KernelHeap::new(&ram);
        heap.init(&mut frames).unwrap();

        let mut live: Vec<(u32, u32)> = Vec::new();
        for size in [24, 7, 4000, 1, 300, 3000, 64, 9000, 12] {
            let Ok(block) = heap.allocate(&mut frames, size) else {
                continue;
            };
            let start = block.address().as_u32();
            let end = start + heap.capacity(block);
            assert!(end - start >= size);
            assert!(!frames.is_free(FrameIndex::containing(block.address())));
            for &(s, e) in &live {
                assert!(end <= s || start >= e, "{start:#x}..{end:#x} overlaps {s:#x}..{e:#x}");
            }
            live.push((start, end));
        }
        assert!(live.len() >= 7);
    }
}
