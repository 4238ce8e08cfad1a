//! Multiboot hand-off.
//!
//! The boot stub switches to the boot stack, installs the descriptor tables
//! and calls [`kernel_main`] with the loader's `eax` and `ebx`. The linker
//! script provides the image bounds and the user program symbols.

use core::panic::PanicInfo;
use kernel_info::boot::{BootList, MemoryRegion, PhysicalRange};
use kernel_info::memory::{MAX_BOOT_MODULES, MAX_BOOT_REGIONS, PAGE_SIZE};
use kernel_info::multiboot::{MultibootInfo, check_magic, collect_boot_info};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_task::park_forever;
use kernel_vmem::PageEntryBits;
use log::{error, info, warn};

use super::{FRAMES, I386, KERNEL, PHYS_MAPPER, idle_task_address, user_trampoline_address};
use crate::{Kernel, KernelConfig};

unsafe extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
    static __user_start: u8;
    static __user_stack_top: u8;
}

#[allow(clippy::cast_possible_truncation)]
fn symbol(ptr: *const u8) -> u32 {
    ptr.addr() as u32
}

/// # Safety
/// `len` bytes at `pa` must be identity mapped and stay untouched.
unsafe fn phys_bytes<'a>(pa: PhysicalAddress, len: usize) -> &'a [u8] {
    unsafe { core::slice::from_raw_parts(core::ptr::with_exposed_provenance(pa.as_usize()), len) }
}

/// Rust entry point called by the boot stub.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(magic: u32, info: u32) -> ! {
    #[cfg(feature = "qemu")]
    if kernel_qemu::init(log::LevelFilter::Debug).is_err() {
        kernel_qemu::qemu_trace!("logger already installed\n");
    }

    if let Err(e) = check_magic(magic) {
        warn!("{e}");
    }

    let info: &MultibootInfo =
        unsafe { &*core::ptr::with_exposed_provenance(info as usize) };
    let mmap = info
        .memory_map_location()
        .map(|(pa, len)| unsafe { phys_bytes(pa, len) });
    let modules = info
        .modules_location()
        .map(|(pa, len)| unsafe { phys_bytes(pa, len) });
    let (kernel_start, kernel_end, user_start, user_stack_top) = unsafe {
        (
            symbol(&raw const __kernel_start),
            symbol(&raw const __kernel_end),
            symbol(&raw const __user_start),
            symbol(&raw const __user_stack_top),
        )
    };

    let mut regions = BootList::<MemoryRegion, MAX_BOOT_REGIONS>::new();
    let mut module_ranges = BootList::<PhysicalRange, MAX_BOOT_MODULES>::new();
    let boot = match collect_boot_info(
        mmap,
        modules,
        PhysicalRange::new(kernel_start, kernel_end),
        &mut regions,
        &mut module_ranges,
    ) {
        Ok(boot) => boot,
        Err(e) => {
            error!("Unusable boot information: {e}");
            park_forever()
        }
    };

    let config = KernelConfig::new(user_trampoline_address()).with_idle_task(idle_task_address());
    let kernel = match Kernel::boot(&PHYS_MAPPER, &FRAMES, I386, &boot, &config) {
        Ok(kernel) => kernel,
        Err(e) => {
            error!("Boot failed: {e}");
            park_forever()
        }
    };
    let Ok(kernel) = KERNEL.set(kernel) else {
        error!("Kernel instance already installed");
        park_forever()
    };

    unsafe { kernel.address_space().activate() };

    // User program and its stack page.
    let user_code = VirtualAddress::new(user_start & !(PAGE_SIZE - 1));
    let user_stack = VirtualAddress::new(user_stack_top - PAGE_SIZE);
    let user_pages = [
        (user_code, PageEntryBits::new().with_present(true).with_user_access(true)),
        (user_stack, PageEntryBits::user_rw()),
    ];
    for (va, flags) in user_pages {
        if let Err(e) = kernel.map(va, PhysicalAddress::new(va.as_u32()), flags) {
            error!("Cannot map user page {va}: {e}");
        }
    }

    match kernel.spawn_user_task(
        VirtualAddress::new(user_start),
        VirtualAddress::new(user_stack_top),
    ) {
        Ok(task) => info!("User program queued as {:?}", kernel.task(task).pid),
        Err(e) => error!("Cannot create the user task: {e}"),
    }

    kernel.enter()
}

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    error!("{info}");
    park_forever()
}
