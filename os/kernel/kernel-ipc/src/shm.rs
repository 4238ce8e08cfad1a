//! # Shared Memory Manager
//!
//! A fixed table of [`SHM_MAX_REGIONS`] slots. Ids come from a counter that
//! starts at 1 and is never reused, so a stale id cannot reach a region that
//! later took over the same slot.
//!
//! | Operation          | Effect                                              |
//! |--------------------|-----------------------------------------------------|
//! | [`create`]         | allocate whole frames, take a slot, ref count 1     |
//! | [`attach`]         | attach count + 1, return the physical base          |
//! | [`detach`]         | attach count − 1 (floored) for the containing region |
//! | [`destroy`]        | refused while attached; frees frames at ref count 0 |
//!
//! [`create`]: SharedMemory::create
//! [`attach`]: SharedMemory::attach
//! [`detach`]: SharedMemory::detach
//! [`destroy`]: SharedMemory::destroy

use core::fmt;
use core::num::NonZeroU32;
use kernel_alloc::{BitmapFrameAlloc, FrameAllocError};
use kernel_info::memory::{PAGE_SIZE, SHM_MAX_REGIONS};
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, info, warn};

/// Identifier of a shared memory region. Never zero.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ShmId(NonZeroU32);

impl ShmId {
    /// `None` for the reserved id 0.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for ShmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShmId({})", self.get())
    }
}

impl fmt::Display for ShmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shm #{}", self.get())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ShmError {
    #[error("zero-sized region")]
    ZeroSize,
    #[error("no frames for the region: {0}")]
    OutOfFrames(#[from] FrameAllocError),
    #[error("all {SHM_MAX_REGIONS} region slots are in use")]
    NoFreeSlot,
    #[error("no region with id {0}")]
    UnknownRegion(u32),
    #[error("{id} is still attached {attached} time(s)")]
    StillAttached { id: ShmId, attached: u32 },
}

/// Snapshot of one live region.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ShmRegion {
    pub id: ShmId,
    /// First byte of the frame run.
    pub phys_base: PhysicalAddress,
    /// Requested size rounded up to whole pages.
    pub size: u32,
    pub pages: u32,
    pub ref_count: u32,
    pub attach_count: u32,
}

impl ShmRegion {
    /// Whether `addr` lies in `[phys_base, phys_base + size)`.
    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        let base = self.phys_base.as_u32();
        let addr = addr.as_u32();
        addr >= base && addr - base < self.size
    }
}

/// The region table.
pub struct SharedMemory {
    slots: [Option<ShmRegion>; SHM_MAX_REGIONS],
    next_id: u32,
}

impl SharedMemory {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [None; SHM_MAX_REGIONS],
            next_id: 1,
        }
    }

    /// Allocate a region of at least `size` bytes.
    ///
    /// The frames are returned to `frames` if no slot is free.
    ///
    /// # Errors
    /// - [`ShmError::ZeroSize`] for `size == 0`.
    /// - [`ShmError::OutOfFrames`] when no contiguous run is free.
    /// - [`ShmError::NoFreeSlot`] when the table is full.
    pub fn create(&mut self, frames: &mut BitmapFrameAlloc, size: u32) -> Result<ShmId, ShmError> {
        if size == 0 {
            return Err(ShmError::ZeroSize);
        }

        let pages = size.div_ceil(PAGE_SIZE);
        let phys_base = frames.allocate_pages(pages)?;

        let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
            frames.free_pages(phys_base, pages);
            warn!("shared memory table full, released {pages} frame(s) at {phys_base}");
            return Err(ShmError::NoFreeSlot);
        };

        let Some(id) = ShmId::new(self.next_id) else {
            frames.free_pages(phys_base, pages);
            return Err(ShmError::NoFreeSlot);
        };
        self.next_id = self.next_id.wrapping_add(1);

        let region = ShmRegion {
            id,
            phys_base,
            size: pages * PAGE_SIZE,
            pages,
            ref_count: 1,
            attach_count: 0,
        };
        *slot = Some(region);

        info!("{id} created: {pages} page(s) at {phys_base}");
        Ok(id)
    }

    /// Count one more attachment and return the region's physical base.
    ///
    /// # Errors
    /// [`ShmError::UnknownRegion`] if no live region has `id`.
    pub fn attach(&mut self, id: u32) -> Result<PhysicalAddress, ShmError> {
        let region = self.find_mut(id).ok_or(ShmError::UnknownRegion(id))?;
        region.attach_count += 1;
        debug!(
            "{} attached at {} ({} attachment(s))",
            region.id, region.phys_base, region.attach_count
        );
        Ok(region.phys_base)
    }

    /// Drop one attachment of the region containing `addr`.
    ///
    /// Null and unknown addresses are ignored; the count never goes below 0.
    pub fn detach(&mut self, addr: PhysicalAddress) {
        if addr.is_null() {
            return;
        }

        match self.slots.iter_mut().flatten().find(|r| r.contains(addr)) {
            Some(region) => {
                region.attach_count = region.attach_count.saturating_sub(1);
                debug!(
                    "{} detached via {addr} ({} attachment(s))",
                    region.id, region.attach_count
                );
            }
            None => debug!("detach of {addr} matches no region"),
        }
    }

    /// Drop the creator's reference and free the region once unreferenced.
    ///
    /// Refused without any state change while the region is attached.
    ///
    /// # Errors
    /// - [`ShmError::UnknownRegion`] if no live region has `id`.
    /// - [`ShmError::StillAttached`] while the attach count is non-zero.
    pub fn destroy(&mut self, frames: &mut BitmapFrameAlloc, id: u32) -> Result<(), ShmError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_some_and(|r| r.id.get() == id))
            .ok_or(ShmError::UnknownRegion(id))?;
        let Some(region) = slot.as_mut() else {
            return Err(ShmError::UnknownRegion(id));
        };

        if region.attach_count > 0 {
            warn!(
                "refusing to destroy {}: {} attachment(s) remain",
                region.id, region.attach_count
            );
            return Err(ShmError::StillAttached {
                id: region.id,
                attached: region.attach_count,
            });
        }

        region.ref_count = region.ref_count.saturating_sub(1);
        if region.ref_count == 0 {
            frames.free_pages(region.phys_base, region.pages);
            info!(
                "{} destroyed, released {} frame(s) at {}",
                region.id, region.pages, region.phys_base
            );
            *slot = None;
        }
        Ok(())
    }

    /// The live region with `id`, if any.
    #[must_use]
    pub fn region(&self, id: u32) -> Option<ShmRegion> {
        self.slots.iter().flatten().find(|r| r.id.get() == id).copied()
    }

    /// Live regions in slot order.
    pub fn regions(&self) -> impl Iterator<Item = &ShmRegion> {
        self.slots.iter().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    fn find_mut(&mut self, id: u32) -> Option<&mut ShmRegion> {
        self.slots.iter_mut().flatten().find(|r| r.id.get() == id)
    }
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("regions", &self.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
