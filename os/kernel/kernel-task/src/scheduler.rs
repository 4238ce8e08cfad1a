//! # Cooperative Scheduler
//!
//! One ready queue, one running task, no preemption. Tasks enter the queue
//! when created and when they yield; the head is drawn on every dispatch.
//! With the default [`Lifo`] policy the most recently enqueued task runs
//! next, so a yielding task gets the processor straight back unless
//! something else became ready after it.
//!
//! The scheduler never switches stacks itself: [`start`](Scheduler::start)
//! and [`plan_yield`](Scheduler::plan_yield) update the bookkeeping and
//! return the [`Dispatch`] to perform.

use kernel_alloc::{BitmapFrameAlloc, KernelHeap};
use kernel_info::memory::TASK_STACK_PAGES;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;
use log::{debug, info, trace};

use crate::queue::{Lifo, QueuePolicy, ReadyQueue};
use crate::stack::{KernelStack, StackPointer, UserEntry};
use crate::switch::Dispatch;
use crate::tcb::{
    Pid, TCB_SIZE, TaskEvent, TaskHandle, TaskMode, TaskState, TaskTable, Tcb, transition,
};
use crate::{SchedulerError, TaskError};

/// What a new task starts as.
#[derive(Copy, Clone, Debug)]
enum Spawn {
    Kernel(VirtualAddress),
    User(UserEntry),
}

pub struct Scheduler<'m, M: PhysMapper, P: QueuePolicy = Lifo> {
    tasks: TaskTable<'m, M>,
    mapper: &'m M,
    ready: ReadyQueue<P>,
    current: Option<TaskHandle>,
    /// Stack pointer of the boot context, written by the first switch.
    bootstrap_sp: StackPointer,
    started: bool,
    next_pid: u32,
    page_root: PhysicalAddress,
    user_trampoline: VirtualAddress,
}

impl<'m, M: PhysMapper> Scheduler<'m, M, Lifo> {
    /// A scheduler with the default LIFO discipline.
    pub const fn new(
        mapper: &'m M,
        page_root: PhysicalAddress,
        user_trampoline: VirtualAddress,
    ) -> Self {
        Self::with_policy(mapper, page_root, user_trampoline, Lifo)
    }
}

impl<'m, M: PhysMapper, P: QueuePolicy> Scheduler<'m, M, P> {
    /// `page_root` is recorded in every TCB; `user_trampoline` is where a
    /// user task's first stack switch returns to before it `iret`s.
    pub const fn with_policy(
        mapper: &'m M,
        page_root: PhysicalAddress,
        user_trampoline: VirtualAddress,
        policy: P,
    ) -> Self {
        Self {
            tasks: TaskTable::new(mapper),
            mapper,
            ready: ReadyQueue::new(policy),
            current: None,
            bootstrap_sp: StackPointer::new(0),
            started: false,
            next_pid: 1,
            page_root,
            user_trampoline,
        }
    }

    /// Create a ring-0 task that starts at `entry` and queue it.
    ///
    /// # Errors
    /// [`TaskError`] if the stack or the TCB cannot be allocated, or `entry`
    /// is null. Nothing stays allocated on failure.
    pub fn create_kernel_task(
        &mut self,
        frames: &mut BitmapFrameAlloc,
        heap: &mut KernelHeap<'_, M>,
        entry: VirtualAddress,
    ) -> Result<TaskHandle, TaskError> {
        let pid = self.take_pid();
        self.spawn(frames, heap, pid, Spawn::Kernel(entry))
    }

    /// Create a ring-3 task starting at `entry` with user stack `stack` and
    /// queue it.
    ///
    /// # Errors
    /// As for [`create_kernel_task`](Self::create_kernel_task), plus
    /// validation of the entry values.
    pub fn create_user_task(
        &mut self,
        frames: &mut BitmapFrameAlloc,
        heap: &mut KernelHeap<'_, M>,
        entry: VirtualAddress,
        stack: VirtualAddress,
    ) -> Result<TaskHandle, TaskError> {
        let entry = UserEntry::new(entry, stack)?;
        let pid = self.take_pid();
        self.spawn(frames, heap, pid, Spawn::User(entry))
    }

    /// Create the idle task (pid 0) and queue it.
    ///
    /// # Errors
    /// As for [`create_kernel_task`](Self::create_kernel_task).
    pub fn create_idle_task(
        &mut self,
        frames: &mut BitmapFrameAlloc,
        heap: &mut KernelHeap<'_, M>,
        entry: VirtualAddress,
    ) -> Result<TaskHandle, TaskError> {
        self.spawn(frames, heap, Pid::IDLE, Spawn::Kernel(entry))
    }

    fn take_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    fn spawn(
        &mut self,
        frames: &mut BitmapFrameAlloc,
        heap: &mut KernelHeap<'_, M>,
        pid: Pid,
        kind: Spawn,
    ) -> Result<TaskHandle, TaskError> {
        let stack = KernelStack::new(frames.allocate_pages(TASK_STACK_PAGES)?);

        let block = match heap.allocate(frames, TCB_SIZE) {
            Ok(block) => block,
            Err(e) => {
                frames.free_pages(stack.base(), TASK_STACK_PAGES);
                return Err(e.into());
            }
        };
        let rollback = |frames: &mut BitmapFrameAlloc, heap: &mut KernelHeap<'_, M>| {
            heap.free(block);
            frames.free_pages(stack.base(), TASK_STACK_PAGES);
        };

        let prepared = match kind {
            Spawn::Kernel(entry) => stack
                .prepare_kernel(self.mapper, entry)
                .map(|sp| (sp, TaskMode::Kernel)),
            Spawn::User(entry) => stack
                .prepare_user(self.mapper, self.user_trampoline, entry)
                .map(|sp| (sp, TaskMode::User(entry))),
        };
        let (saved_sp, mode) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                rollback(frames, heap);
                return Err(e);
            }
        };
        let Some(task) = TaskHandle::from_block(block) else {
            rollback(frames, heap);
            return Err(TaskError::NullEntry);
        };

        self.tasks.insert(
            task,
            Tcb {
                pid,
                state: TaskState::Ready,
                mode,
                saved_sp,
                kernel_stack: stack,
                page_root: self.page_root,
                next: None,
            },
        );
        self.ready.push(&self.tasks, task);

        info!(
            "Created {} task {pid} ({task:?}, stack {})",
            match mode {
                TaskMode::Kernel => "kernel",
                TaskMode::User(_) => "user",
            },
            stack.base()
        );
        Ok(task)
    }

    /// Draw the first task. Called once, with interrupts disabled.
    ///
    /// # Errors
    /// - [`SchedulerError::AlreadyStarted`] on a second call.
    /// - [`SchedulerError::NoReadyTask`] if nothing was created.
    pub fn start(&mut self) -> Result<Dispatch, SchedulerError> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        let next = self.ready.pop(&self.tasks).ok_or(SchedulerError::NoReadyTask)?;
        self.started = true;
        let tcb = self.run(next)?;

        info!("Entering scheduler with {}", tcb.pid);
        Ok(match tcb.mode {
            TaskMode::User(entry) => Dispatch::EnterUser(entry),
            TaskMode::Kernel => Dispatch::Switch {
                save: &raw mut self.bootstrap_sp,
                next: tcb.saved_sp,
            },
        })
    }

    /// Pick the next task for a yield.
    ///
    /// Returns `None` when nothing is ready, or before [`start`](Self::start)
    /// since only a dispatched task can yield; the caller keeps running. A
    /// caller that is still running goes back into the queue first, so with
    /// the LIFO policy it competes with everything else queued.
    ///
    /// # Errors
    /// [`SchedulerError::Task`] if a queued task is not in the ready state.
    pub fn plan_yield(&mut self) -> Result<Option<Dispatch>, SchedulerError> {
        let Some(current) = self.current.filter(|_| self.started) else {
            debug!("Yield before the scheduler was entered");
            return Ok(None);
        };
        let Some(next) = self.ready.pop(&self.tasks) else {
            trace!("Yield with an empty ready queue");
            return Ok(None);
        };

        if self.tasks.get(current).state == TaskState::Running {
            self.enqueue(current, TaskEvent::Yield)?;
        }
        let save = self.tasks.saved_sp_slot(current);

        let tcb = self.run(next)?;
        debug!("Switching to {}", tcb.pid);
        Ok(Some(Dispatch::Switch {
            save,
            next: tcb.saved_sp,
        }))
    }

    /// Mark the running task dead. It is never queued again; its TCB and
    /// stack stay allocated.
    ///
    /// # Errors
    /// [`SchedulerError::NoCurrentTask`] before the first dispatch.
    pub fn exit_current(&mut self) -> Result<TaskHandle, SchedulerError> {
        let current = self.current.ok_or(SchedulerError::NoCurrentTask)?;
        let pid = self.tasks.update(current, |tcb| {
            transition(tcb.state, TaskEvent::Exit).map(|state| {
                tcb.state = state;
                tcb.pid
            })
        })?;
        info!("Task {pid} exited");
        Ok(current)
    }

    fn enqueue(&mut self, task: TaskHandle, event: TaskEvent) -> Result<(), TaskError> {
        self.tasks.update(task, |tcb| {
            transition(tcb.state, event).map(|state| tcb.state = state)
        })?;
        self.ready.push(&self.tasks, task);
        Ok(())
    }

    fn run(&mut self, task: TaskHandle) -> Result<Tcb, TaskError> {
        let tcb = self.tasks.update(task, |tcb| {
            transition(tcb.state, TaskEvent::Dispatch).map(|state| {
                tcb.state = state;
                *tcb
            })
        })?;
        self.current = Some(task);
        Ok(tcb)
    }

    /// The task the processor is executing, if the scheduler was entered.
    #[inline]
    #[must_use]
    pub const fn current(&self) -> Option<TaskHandle> {
        self.current
    }

    /// Snapshot of a task's control block.
    #[inline]
    #[must_use]
    pub fn task(&self, task: TaskHandle) -> Tcb {
        self.tasks.get(task)
    }

    #[inline]
    #[must_use]
    pub const fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Queued tasks in draw order.
    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.ready.iter(&self.tasks)
    }

    #[inline]
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Stack pointer the boot context was saved with.
    #[inline]
    #[must_use]
    pub const fn bootstrap_sp(&self) -> StackPointer {
        self.bootstrap_sp
    }
}
