mod common;

use common::{TRAMPOLINE, TestKernel, boot, entry, machine};
use kernel::KernelConfig;
use kernel_info::memory::PAGE_SIZE;
use kernel_ipc::ShmError;
use kernel_memory_addresses::{FrameIndex, PhysicalAddress};
use kernel_syscall::{NULL_ADDRESS, SYSCALL_ERROR, Sysno, TrapFrame, handle_trap};
use kernel_task::TaskState;

fn call(kernel: &TestKernel<'_>, sysno: Sysno, arg: u32) -> u32 {
    let mut frame = TrapFrame::syscall(sysno.as_u32(), [arg, 0, 0]);
    handle_trap(kernel, &mut frame);
    frame.eax
}

#[test]
fn shared_memory_lifecycle_through_int80() {
    let machine = machine();
    let kernel = boot(&machine, KernelConfig::new(TRAMPOLINE));
    let free = kernel.frames().with(|f| f.free_frames());

    let id = call(&kernel, Sysno::ShmCreate, 4096);
    assert_eq!(id, 1);
    assert_eq!(kernel.frames().with(|f| f.free_frames()), free - 1);

    let base = call(&kernel, Sysno::ShmAttach, id);
    assert_ne!(base, NULL_ADDRESS);
    assert_eq!(base % PAGE_SIZE, 0);

    assert_eq!(call(&kernel, Sysno::ShmDestroy, id), SYSCALL_ERROR);
    assert_eq!(call(&kernel, Sysno::ShmDetach, base + 100), 0);
    assert_eq!(call(&kernel, Sysno::ShmDestroy, id), 0);
    assert_eq!(kernel.frames().with(|f| f.free_frames()), free);
    assert_eq!(call(&kernel, Sysno::ShmAttach, id), NULL_ADDRESS);

    // The released frames are the first ones handed out again.
    let again = call(&kernel, Sysno::ShmCreate, 4096);
    assert_eq!(again, 2);
    assert_eq!(call(&kernel, Sysno::ShmAttach, again), base);
}

#[test]
fn two_tasks_share_one_region() {
    let machine = machine();
    let kernel = boot(&machine, KernelConfig::new(TRAMPOLINE));

    let id = kernel.shm_create(3 * PAGE_SIZE + 1).unwrap();
    let first = kernel.shm_attach(id.get()).unwrap();
    let second = kernel.shm_attach(id.get()).unwrap();
    assert_eq!(first, second);

    let region = kernel.shared_memory().with(|s| s.region(id.get())).unwrap();
    assert_eq!(region.pages, 4);
    assert_eq!(region.attach_count, 2);
    for page in 0..region.pages {
        let frame = FrameIndex::containing(first + page * PAGE_SIZE);
        assert!(!kernel.frames().with(|f| f.is_free(frame)));
    }

    kernel.shm_detach(first);
    assert_eq!(
        kernel.shm_destroy(id.get()),
        Err(ShmError::StillAttached { id, attached: 1 })
    );
    kernel.shm_detach(second + (4 * PAGE_SIZE - 1));
    assert_eq!(kernel.shm_destroy(id.get()), Ok(()));
    assert!(kernel.shared_memory().with(|s| s.is_empty()));
}

#[test]
fn failed_calls_return_the_sentinels() {
    let machine = machine();
    let kernel = boot(&machine, KernelConfig::new(TRAMPOLINE));

    assert_eq!(call(&kernel, Sysno::ShmCreate, 0), SYSCALL_ERROR);
    assert_eq!(call(&kernel, Sysno::ShmAttach, 7), NULL_ADDRESS);
    assert_eq!(call(&kernel, Sysno::ShmDestroy, 7), SYSCALL_ERROR);
    assert_eq!(call(&kernel, Sysno::ShmDetach, 0), 0);
    assert_eq!(
        call(&kernel, Sysno::ShmCreate, 1024 * PAGE_SIZE),
        SYSCALL_ERROR
    );

    let mut frame = TrapFrame::syscall(99, [1, 2, 3]);
    handle_trap(&kernel, &mut frame);
    assert_eq!(frame.eax, SYSCALL_ERROR);
    assert_eq!((frame.ebx, frame.ecx, frame.edx), (1, 2, 3));
}

#[test]
fn yield_and_exit_reach_the_scheduler() {
    let machine = machine();
    let kernel = boot(&machine, KernelConfig::new(TRAMPOLINE));

    let a = kernel.spawn_kernel_task(entry(1)).unwrap();
    let b = kernel.spawn_kernel_task(entry(2)).unwrap();
    kernel.start_first_task().unwrap();
    assert_eq!(kernel.current(), Some(b));

    assert_eq!(call(&kernel, Sysno::Yield, 0), 0);
    assert_eq!(kernel.current(), Some(a));

    call(&kernel, Sysno::Exit, 0);
    assert_eq!(kernel.task(a).state, TaskState::Dead);
    assert_eq!(kernel.current(), Some(b));
    assert_eq!(kernel.task(b).state, TaskState::Running);
}

#[test]
fn shared_memory_outlives_the_creating_task() {
    let machine = machine();
    let kernel = boot(&machine, KernelConfig::new(TRAMPOLINE));

    kernel.spawn_kernel_task(entry(1)).unwrap();
    kernel.spawn_kernel_task(entry(2)).unwrap();
    kernel.start_first_task().unwrap();

    let id = call(&kernel, Sysno::ShmCreate, 100);
    let base = call(&kernel, Sysno::ShmAttach, id);
    call(&kernel, Sysno::Exit, 0);

    assert_eq!(call(&kernel, Sysno::ShmAttach, id), base);
    let region = kernel.shared_memory().with(|s| s.region(id)).unwrap();
    assert_eq!(region.phys_base, PhysicalAddress::new(base));
    assert_eq!(region.attach_count, 2);
}
