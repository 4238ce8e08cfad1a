#![allow(dead_code)]

use kernel::{Kernel, KernelConfig};
use kernel_alloc::{BitmapFrameAlloc, RamPhysMapper};
use kernel_info::boot::{BootInfo, MemoryRegion, PhysicalRange};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::{CriticalSection, NoInterrupts};
use kernel_task::{ContextSwitch, StackPointer, UserEntry};
use std::cell::RefCell;

pub const MIB: u32 = 1024 * 1024;
pub const RAM_FRAMES: usize = 64;
pub const TRAMPOLINE: VirtualAddress = VirtualAddress::new(0x0010_0100);
pub const IDLE: VirtualAddress = VirtualAddress::new(0x0010_0200);

pub type TestKernel<'m> = Kernel<'m, RamPhysMapper, Recorder, NoInterrupts>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Switch(StackPointer),
    User(UserEntry),
}

/// Records every transfer instead of performing it.
#[derive(Default)]
pub struct Recorder {
    log: RefCell<Vec<Transfer>>,
}

impl Recorder {
    pub fn transfers(&self) -> Vec<Transfer> {
        self.log.borrow().clone()
    }
}

impl ContextSwitch for Recorder {
    unsafe fn switch(&self, save: *mut StackPointer, next: StackPointer) {
        unsafe { save.write(StackPointer::new(0)) };
        self.log.borrow_mut().push(Transfer::Switch(next));
    }

    unsafe fn enter_user(&self, entry: UserEntry) {
        self.log.borrow_mut().push(Transfer::User(entry));
    }
}

/// Simulated RAM plus the frame bitmap a kernel borrows.
pub struct Machine {
    pub ram: RamPhysMapper,
    pub frames: Box<CriticalSection<BitmapFrameAlloc, NoInterrupts>>,
}

pub fn machine() -> Machine {
    Machine {
        ram: RamPhysMapper::new(PhysicalAddress::new(MIB), RAM_FRAMES),
        frames: Box::new(CriticalSection::new(BitmapFrameAlloc::new())),
    }
}

/// Kernel over all of the machine's RAM except its first frame (the kernel
/// image).
pub fn boot(machine: &Machine, config: KernelConfig) -> TestKernel<'_> {
    let map = [MemoryRegion::available(MIB, RAM_FRAMES as u32 * 4096)];
    let info = BootInfo {
        memory_map: Some(&map),
        kernel_image: PhysicalRange::new(MIB, MIB + 4096),
        modules: &[],
    };
    Kernel::boot(
        &machine.ram,
        &machine.frames,
        Recorder::default(),
        &info,
        &config,
    )
    .expect("boot succeeds")
}

pub fn entry(n: u32) -> VirtualAddress {
    VirtualAddress::new(0x0010_1000 + n * 0x10)
}
