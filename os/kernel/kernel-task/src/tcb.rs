//! # Task Control Blocks
//!
//! TCBs live in kernel-heap blocks and are addressed by a [`TaskHandle`]
//! (the block's physical address). The ready-queue link is stored inside
//! the TCB itself, so queueing never allocates.

use core::fmt;
use core::num::NonZeroU32;
use kernel_alloc::BlockHandle;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

use crate::TaskError;
use crate::stack::{KernelStack, StackPointer, UserEntry};

/// Process identifier. The idle task is pid 0; everything else counts from 1.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(pub u32);

impl Pid {
    pub const IDLE: Self = Self(0);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Reference to a TCB stored on the kernel heap.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct TaskHandle(NonZeroU32);

impl TaskHandle {
    /// `None` for the null address.
    #[inline]
    #[must_use]
    pub const fn new(address: PhysicalAddress) -> Option<Self> {
        match NonZeroU32::new(address.as_u32()) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Handle for the TCB stored in `block`.
    #[inline]
    #[must_use]
    pub const fn from_block(block: BlockHandle) -> Option<Self> {
        Self::new(block.address())
    }

    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0.get())
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task(0x{:08X})", self.0)
    }
}

/// Run state of a task.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// In the ready queue.
    Ready,
    /// The task the processor is executing.
    Running,
    /// Waiting on an event; nothing blocks yet.
    Blocked,
    /// Exited. Terminal; the TCB and stack are kept.
    Dead,
}

/// Something that happens to a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskEvent {
    /// The scheduler picked the task.
    Dispatch,
    /// The task gave up the processor.
    Yield,
    /// The task exited.
    Exit,
    /// The task started waiting.
    Block,
    /// What the task waited for happened.
    Wake,
}

/// The task state machine.
///
/// ```text
///            Dispatch            Exit
///   Ready ─────────────► Running ─────► Dead
///     ▲  ◄─────────────    │
///     │       Yield        │ Block
///     └────── Blocked ◄────┘
///       Wake
/// ```
///
/// # Errors
/// [`TaskError::InvalidTransition`] for any other pair.
pub const fn transition(from: TaskState, event: TaskEvent) -> Result<TaskState, TaskError> {
    match (from, event) {
        (TaskState::Ready, TaskEvent::Dispatch) => Ok(TaskState::Running),
        (TaskState::Running, TaskEvent::Yield) | (TaskState::Blocked, TaskEvent::Wake) => {
            Ok(TaskState::Ready)
        }
        (TaskState::Running, TaskEvent::Exit) => Ok(TaskState::Dead),
        (TaskState::Running, TaskEvent::Block) => Ok(TaskState::Blocked),
        _ => Err(TaskError::InvalidTransition { from, event }),
    }
}

/// Privilege level a task runs at, with what its first dispatch needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskMode {
    Kernel,
    User(UserEntry),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tcb {
    pub pid: Pid,
    pub state: TaskState,
    pub mode: TaskMode,
    /// Kernel stack pointer saved by the last switch away from the task.
    pub saved_sp: StackPointer,
    pub kernel_stack: KernelStack,
    /// Page directory the task runs under.
    pub page_root: PhysicalAddress,
    /// Ready-queue link.
    pub next: Option<TaskHandle>,
}

const _: () = assert!(align_of::<Tcb>() <= 4, "heap blocks are only word aligned");

/// Size of the heap block a TCB needs.
#[allow(clippy::cast_possible_truncation)]
pub const TCB_SIZE: u32 = size_of::<Tcb>() as u32;

/// Access to TCBs through the physical mapper.
pub struct TaskTable<'m, M: PhysMapper> {
    mapper: &'m M,
}

impl<'m, M: PhysMapper> TaskTable<'m, M> {
    pub const fn new(mapper: &'m M) -> Self {
        Self { mapper }
    }

    /// Copy of the TCB behind `task`.
    #[must_use]
    pub fn get(&self, task: TaskHandle) -> Tcb {
        // SAFETY: handles are only minted for heap blocks holding a `Tcb`.
        unsafe { self.mapper.read::<Tcb>(task.address()) }
    }

    /// Store a fresh TCB in the block behind `task`.
    pub fn insert(&self, task: TaskHandle, tcb: Tcb) {
        // SAFETY: the block was allocated with `TCB_SIZE` bytes.
        unsafe { self.mapper.write(task.address(), tcb) }
    }

    /// Modify the TCB behind `task` in place.
    pub fn update<R>(&self, task: TaskHandle, f: impl FnOnce(&mut Tcb) -> R) -> R {
        // SAFETY: handles are only minted for heap blocks holding a `Tcb`,
        // and the borrow ends before this returns.
        let tcb = unsafe { self.mapper.phys_to_mut::<Tcb>(task.address()) };
        f(tcb)
    }

    #[inline]
    #[must_use]
    pub fn next(&self, task: TaskHandle) -> Option<TaskHandle> {
        self.get(task).next
    }

    #[inline]
    pub fn set_next(&self, task: TaskHandle, next: Option<TaskHandle>) {
        self.update(task, |tcb| tcb.next = next);
    }

    /// Where the context switch stores `task`'s stack pointer.
    #[must_use]
    pub fn saved_sp_slot(&self, task: TaskHandle) -> *mut StackPointer {
        let tcb = self.mapper.phys_to_ptr::<Tcb>(task.address());
        // SAFETY: only computes a field address, nothing is read.
        unsafe { &raw mut (*tcb).saved_sp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_yield_exit_cycle() {
        let s = transition(TaskState::Ready, TaskEvent::Dispatch).unwrap();
        assert_eq!(s, TaskState::Running);
        let s = transition(s, TaskEvent::Yield).unwrap();
        assert_eq!(s, TaskState::Ready);
        let s = transition(transition(s, TaskEvent::Dispatch).unwrap(), TaskEvent::Exit).unwrap();
        assert_eq!(s, TaskState::Dead);
    }

    #[test]
    fn dead_is_terminal() {
        for event in [
            TaskEvent::Dispatch,
            TaskEvent::Yield,
            TaskEvent::Exit,
            TaskEvent::Block,
            TaskEvent::Wake,
        ] {
            assert_eq!(
                transition(TaskState::Dead, event),
                Err(TaskError::InvalidTransition {
                    from: TaskState::Dead,
                    event
                })
            );
        }
    }

    #[test]
    fn blocked_only_wakes() {
        assert_eq!(
            transition(TaskState::Running, TaskEvent::Block),
            Ok(TaskState::Blocked)
        );
        assert_eq!(
            transition(TaskState::Blocked, TaskEvent::Wake),
            Ok(TaskState::Ready)
        );
        assert!(transition(TaskState::Blocked, TaskEvent::Dispatch).is_err());
        assert!(transition(TaskState::Ready, TaskEvent::Exit).is_err());
    }

    #[test]
    fn null_handle_is_rejected() {
        assert!(TaskHandle::new(PhysicalAddress::NULL).is_none());
        let h = TaskHandle::new(PhysicalAddress::new(0x10_1004)).unwrap();
        assert_eq!(h.address(), PhysicalAddress::new(0x10_1004));
    }
}
