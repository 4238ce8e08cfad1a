use kernel_alloc::{BitmapFrameAlloc, BlockHandle, FrameAllocError, HeapError, KernelHeap};
use kernel_info::boot::BootInfo;
use kernel_ipc::{SharedMemory, ShmError, ShmId};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::{CriticalSection, InterruptControl, IrqGuard};
use kernel_syscall::SyscallHandler;
use kernel_task::{
    ContextSwitch, Pid, Scheduler, SchedulerError, TaskError, TaskHandle, Tcb, park_forever,
};
use kernel_vmem::{AddressSpace, MapError, PageEntryBits, PhysMapper};
use log::{error, info, warn};

use crate::{BootError, KernelConfig};

/// Every core structure of one kernel instance.
///
/// `M` reaches physical memory, `X` performs control transfers and `I`
/// masks interrupts. Once a task has been dispatched the value must stay
/// where it is: the boot context's stack pointer is saved inside it.
///
/// The frame bitmap is borrowed rather than owned; it is the one large
/// structure and lives in a `static` on hardware.
pub struct Kernel<'m, M: PhysMapper, X: ContextSwitch, I: InterruptControl> {
    arch: X,
    /// Serialized by the interrupt mask alone: there is one processor and
    /// no lock is held across its updates.
    address_space: AddressSpace<'m, M>,
    scheduler: CriticalSection<Scheduler<'m, M>, I>,
    shm: CriticalSection<SharedMemory, I>,
    heap: CriticalSection<KernelHeap<'m, M>, I>,
    frames: &'m CriticalSection<BitmapFrameAlloc, I>,
}

impl<'m, M: PhysMapper, X: ContextSwitch, I: InterruptControl> Kernel<'m, M, X, I> {
    /// Bring up the core from the loader's view of memory.
    ///
    /// `frames` is initialized in place. A heap that cannot be seeded is only
    /// logged: it grows on first use.
    ///
    /// # Errors
    /// - [`BootError::Frames`] without a memory map.
    /// - [`BootError::AddressSpace`] if the page tables cannot be allocated.
    /// - [`BootError::IdleTask`] if the configured idle task cannot be built.
    pub fn boot(
        mapper: &'m M,
        frames: &'m CriticalSection<BitmapFrameAlloc, I>,
        arch: X,
        boot: &BootInfo<'_>,
        config: &KernelConfig,
    ) -> Result<Self, BootError> {
        let (address_space, heap, scheduler) = frames.with(|frames| -> Result<_, BootError> {
            frames.init(boot)?;

            let address_space = AddressSpace::initialize(mapper, frames)?;

            let mut heap = KernelHeap::new(mapper);
            if let Err(e) = heap.init(frames) {
                warn!("Kernel heap not seeded: {e}");
            }

            let mut scheduler =
                Scheduler::new(mapper, address_space.root().base(), config.user_trampoline);
            if let Some(entry) = config.idle_entry {
                scheduler.create_idle_task(frames, &mut heap, entry)?;
            }

            info!(
                "Kernel core up: {} frames free, heap {} page(s)",
                frames.free_frames(),
                heap.pages()
            );
            Ok((address_space, heap, scheduler))
        })?;

        Ok(Self {
            arch,
            address_space,
            scheduler: CriticalSection::new(scheduler),
            shm: CriticalSection::new(SharedMemory::new()),
            heap: CriticalSection::new(heap),
            frames,
        })
    }

    /// Create and queue a ring-0 task starting at `entry`.
    ///
    /// # Errors
    /// See [`Scheduler::create_kernel_task`].
    pub fn spawn_kernel_task(&self, entry: VirtualAddress) -> Result<TaskHandle, TaskError> {
        self.scheduler.with(|sched| {
            self.heap.with(|heap| {
                self.frames
                    .with(|frames| sched.create_kernel_task(frames, heap, entry))
            })
        })
    }

    /// Create and queue a ring-3 task. The caller maps `entry` and `stack`
    /// user-accessible beforehand.
    ///
    /// # Errors
    /// See [`Scheduler::create_user_task`].
    pub fn spawn_user_task(
        &self,
        entry: VirtualAddress,
        stack: VirtualAddress,
    ) -> Result<TaskHandle, TaskError> {
        self.scheduler.with(|sched| {
            self.heap.with(|heap| {
                self.frames
                    .with(|frames| sched.create_user_task(frames, heap, entry, stack))
            })
        })
    }

    /// Dispatch the first task.
    ///
    /// On hardware this only returns through a later switch back into the
    /// boot context, which never happens.
    ///
    /// # Errors
    /// See [`Scheduler::start`].
    pub fn start_first_task(&self) -> Result<(), SchedulerError> {
        let _irq = IrqGuard::<I>::new();
        let dispatch = self.scheduler.with(Scheduler::start)?;
        unsafe { dispatch.perform(&self.arch) };
        Ok(())
    }

    /// Enter the scheduler for good. Parks the processor if nothing can run.
    pub fn enter(&self) -> ! {
        if let Err(e) = self.start_first_task() {
            error!("Cannot enter the scheduler: {e}");
        }
        park_forever()
    }

    /// Let the next ready task run. Returns at once if none is ready.
    pub fn yield_now(&self) {
        let _irq = IrqGuard::<I>::new();
        match self.scheduler.with(Scheduler::plan_yield) {
            Ok(Some(dispatch)) => unsafe { dispatch.perform(&self.arch) },
            Ok(None) => {}
            Err(e) => error!("Yield failed: {e}"),
        }
    }

    /// Terminate the running task and switch away from it.
    ///
    /// Returns only when no other task is ready.
    pub fn exit_current(&self) {
        match self.scheduler.with(Scheduler::exit_current) {
            Ok(_) => self.yield_now(),
            Err(e) => warn!("exit without a running task: {e}"),
        }
    }

    /// Install `va → pa` in the identity window.
    ///
    /// The address space has no lock of its own; masking interrupts is all
    /// the serialization a single processor needs.
    ///
    /// # Errors
    /// See [`AddressSpace::map`].
    pub fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        let _irq = IrqGuard::<I>::new();
        self.address_space.map(va, pa, flags)
    }

    pub fn unmap(&self, va: VirtualAddress) {
        let _irq = IrqGuard::<I>::new();
        self.address_space.unmap(va);
    }

    /// Walks the tables without masking; each entry is read in one load.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.address_space.query(va)
    }

    /// # Errors
    /// See [`BitmapFrameAlloc::allocate_pages`].
    pub fn allocate_frames(&self, count: u32) -> Result<PhysicalAddress, FrameAllocError> {
        self.frames.with(|frames| frames.allocate_pages(count))
    }

    pub fn free_frames(&self, base: PhysicalAddress, count: u32) {
        self.frames.with(|frames| frames.free_pages(base, count));
    }

    /// # Errors
    /// See [`KernelHeap::allocate`].
    pub fn heap_allocate(&self, size: u32) -> Result<BlockHandle, HeapError> {
        self.heap
            .with(|heap| self.frames.with(|frames| heap.allocate(frames, size)))
    }

    pub fn heap_free(&self, block: BlockHandle) {
        self.heap.with(|heap| heap.free(block));
    }

    /// # Errors
    /// See [`SharedMemory::create`].
    pub fn shm_create(&self, size: u32) -> Result<ShmId, ShmError> {
        self.shm
            .with(|shm| self.frames.with(|frames| shm.create(frames, size)))
    }

    /// # Errors
    /// See [`SharedMemory::attach`].
    pub fn shm_attach(&self, id: u32) -> Result<PhysicalAddress, ShmError> {
        self.shm.with(|shm| shm.attach(id))
    }

    pub fn shm_detach(&self, addr: PhysicalAddress) {
        self.shm.with(|shm| shm.detach(addr));
    }

    /// # Errors
    /// See [`SharedMemory::destroy`].
    pub fn shm_destroy(&self, id: u32) -> Result<(), ShmError> {
        self.shm
            .with(|shm| self.frames.with(|frames| shm.destroy(frames, id)))
    }

    /// The running task, once the scheduler was entered.
    #[must_use]
    pub fn current(&self) -> Option<TaskHandle> {
        self.scheduler.with(|sched| sched.current())
    }

    #[must_use]
    pub fn current_pid(&self) -> Option<Pid> {
        self.scheduler
            .with(|sched| sched.current().map(|task| sched.task(task).pid))
    }

    /// Snapshot of a task's control block.
    #[must_use]
    pub fn task(&self, task: TaskHandle) -> Tcb {
        self.scheduler.with(|sched| sched.task(task))
    }

    #[must_use]
    pub const fn arch(&self) -> &X {
        &self.arch
    }

    #[must_use]
    pub const fn address_space(&self) -> &AddressSpace<'m, M> {
        &self.address_space
    }

    #[must_use]
    pub const fn scheduler(&self) -> &CriticalSection<Scheduler<'m, M>, I> {
        &self.scheduler
    }

    #[must_use]
    pub const fn shared_memory(&self) -> &CriticalSection<SharedMemory, I> {
        &self.shm
    }

    #[must_use]
    pub const fn heap(&self) -> &CriticalSection<KernelHeap<'m, M>, I> {
        &self.heap
    }

    #[must_use]
    pub const fn frames(&self) -> &'m CriticalSection<BitmapFrameAlloc, I> {
        self.frames
    }
}

impl<M: PhysMapper, X: ContextSwitch, I: InterruptControl> SyscallHandler for Kernel<'_, M, X, I> {
    fn yield_now(&self) {
        Self::yield_now(self);
    }

    fn exit(&self) {
        self.exit_current();
    }

    fn shm_create(&self, size: u32) -> Result<ShmId, ShmError> {
        Self::shm_create(self, size)
    }

    fn shm_attach(&self, id: u32) -> Result<PhysicalAddress, ShmError> {
        Self::shm_attach(self, id)
    }

    fn shm_detach(&self, addr: PhysicalAddress) {
        Self::shm_detach(self, addr);
    }

    fn shm_destroy(&self, id: u32) -> Result<(), ShmError> {
        Self::shm_destroy(self, id)
    }
}
