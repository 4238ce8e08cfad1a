//! # Memory Layout

/// Size of a physical frame and of a virtual page.
pub const PAGE_SIZE: u32 = 4096;

/// Highest physical address (exclusive) the frame allocator tracks.
pub const MAX_PHYS_MEMORY: u32 = 256 * 1024 * 1024;

/// Number of frames tracked by the bitmap.
pub const FRAME_COUNT: usize = (MAX_PHYS_MEMORY / PAGE_SIZE) as usize;

/// Everything below this address stays reserved (BIOS, VGA, real-mode data).
pub const LOW_MEMORY_END: u32 = 0x0010_0000; // 1 MiB

/// Span identity-mapped by the single page table linked at directory index 0.
pub const IDENTITY_MAP_BYTES: u32 = 4 * 1024 * 1024;

/// Entries in a page directory or page table.
pub const PAGE_TABLE_ENTRIES: usize = 1024;

/// Kernel stack size of every task.
pub const TASK_STACK_SIZE: u32 = 8 * 1024;

/// Pages backing one task stack.
pub const TASK_STACK_PAGES: u32 = TASK_STACK_SIZE / PAGE_SIZE;

/// Pages the heap is seeded with during boot.
pub const HEAP_INITIAL_PAGES: u32 = 4;

/// Slots in the shared-memory region table.
pub const SHM_MAX_REGIONS: usize = 32;

/// Memory-map entries the boot path can hold before the heap exists.
pub const MAX_BOOT_REGIONS: usize = 64;

/// Boot modules the boot path can hold before the heap exists.
pub const MAX_BOOT_MODULES: usize = 16;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(MAX_PHYS_MEMORY.is_multiple_of(PAGE_SIZE));
    assert!(FRAME_COUNT == 65_536);
    assert!(FRAME_COUNT.is_multiple_of(8));
    assert!(LOW_MEMORY_END.is_multiple_of(PAGE_SIZE));
    assert!(IDENTITY_MAP_BYTES == PAGE_TABLE_ENTRIES as u32 * PAGE_SIZE);
    assert!(TASK_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(HEAP_INITIAL_PAGES > 0);
};
