//! # Tasks and Scheduling
//!
//! Task control blocks, the frames that make a fresh task resumable, the
//! ready queue and the cooperative scheduler.
//!
//! ## Lifecycle
//!
//! ```text
//!  create_*_task ──► Ready ──start/plan_yield──► Running ──exit──► Dead
//!                      ▲                            │
//!                      └────────── yield ───────────┘
//! ```
//!
//! * Every task owns an 8 KiB kernel stack (two frames) and a TCB on the
//!   kernel heap. Neither is released when the task dies.
//! * A task is in the ready queue exactly while it is [`TaskState::Ready`].
//! * Control transfer is delegated to a [`ContextSwitch`] implementation;
//!   the scheduler only decides.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod queue;
pub mod scheduler;
pub mod stack;
pub mod switch;
pub mod tcb;

pub use crate::queue::{Fifo, Lifo, QueuePolicy, ReadyQueue};
pub use crate::scheduler::Scheduler;
pub use crate::stack::{
    InterruptReturnFrame, KernelEntryFrame, KernelStack, StackPointer, UserEntry,
};
pub use crate::switch::{ContextSwitch, Dispatch, park_forever};
pub use crate::tcb::{Pid, TaskEvent, TaskHandle, TaskMode, TaskState, Tcb, transition};

use kernel_alloc::{FrameAllocError, HeapError};
use kernel_memory_addresses::VirtualAddress;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("no frames for the kernel stack: {0}")]
    Stack(#[from] FrameAllocError),
    #[error("no heap memory for the control block: {0}")]
    ControlBlock(#[from] HeapError),
    #[error("entry point is null")]
    NullEntry,
    #[error("user stack pointer {0} is not word aligned")]
    UnalignedStack(VirtualAddress),
    #[error("{event:?} is not allowed while {from:?}")]
    InvalidTransition { from: TaskState, event: TaskEvent },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("no task is ready to run")]
    NoReadyTask,
    #[error("the scheduler has already been entered")]
    AlreadyStarted,
    #[error("no task is running")]
    NoCurrentTask,
    #[error(transparent)]
    Task(#[from] TaskError),
}
