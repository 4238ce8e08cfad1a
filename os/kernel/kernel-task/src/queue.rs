//! # Ready Queue
//!
//! Intrusive singly linked list threaded through the TCBs' `next` fields.
//! Tasks are always drawn from the head; the [`QueuePolicy`] decides which
//! end new tasks go to.
//!
//! | Policy  | Inserts at | Draw order                    |
//! |---------|------------|-------------------------------|
//! | [`Lifo`] | head      | most recently enqueued first  |
//! | [`Fifo`] | tail      | round robin                   |

use kernel_vmem::PhysMapper;

use crate::tcb::{TaskHandle, TaskTable};

/// End of the queue a policy inserts at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Insert {
    Head,
    Tail,
}

/// Queueing discipline of the ready queue.
pub trait QueuePolicy {
    fn insert_at(&self) -> Insert;
}

/// Last in, first out.
#[derive(Copy, Clone, Debug, Default)]
pub struct Lifo;

impl QueuePolicy for Lifo {
    #[inline]
    fn insert_at(&self) -> Insert {
        Insert::Head
    }
}

/// First in, first out.
#[derive(Copy, Clone, Debug, Default)]
pub struct Fifo;

impl QueuePolicy for Fifo {
    #[inline]
    fn insert_at(&self) -> Insert {
        Insert::Tail
    }
}

#[derive(Debug, Default)]
pub struct ReadyQueue<P: QueuePolicy = Lifo> {
    head: Option<TaskHandle>,
    tail: Option<TaskHandle>,
    len: usize,
    policy: P,
}

impl<P: QueuePolicy> ReadyQueue<P> {
    pub const fn new(policy: P) -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            policy,
        }
    }

    /// Link `task` in. The task must not already be queued.
    pub fn push<M: PhysMapper>(&mut self, tasks: &TaskTable<'_, M>, task: TaskHandle) {
        match self.policy.insert_at() {
            Insert::Head => {
                tasks.set_next(task, self.head);
                self.head = Some(task);
                if self.tail.is_none() {
                    self.tail = Some(task);
                }
            }
            Insert::Tail => {
                tasks.set_next(task, None);
                match self.tail {
                    Some(tail) => tasks.set_next(tail, Some(task)),
                    None => self.head = Some(task),
                }
                self.tail = Some(task);
            }
        }
        self.len += 1;
    }

    /// Unlink and return the head.
    pub fn pop<M: PhysMapper>(&mut self, tasks: &TaskTable<'_, M>) -> Option<TaskHandle> {
        let task = self.head?;
        self.head = tasks.next(task);
        if self.head.is_none() {
            self.tail = None;
        }
        tasks.set_next(task, None);
        self.len -= 1;
        Some(task)
    }

    /// The task [`pop`](Self::pop) would return.
    #[inline]
    #[must_use]
    pub const fn peek(&self) -> Option<TaskHandle> {
        self.head
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Queued tasks in draw order.
    pub fn iter<'q, M: PhysMapper>(
        &'q self,
        tasks: &'q TaskTable<'_, M>,
    ) -> impl Iterator<Item = TaskHandle> + 'q {
        core::iter::successors(self.head, |&task| tasks.next(task))
    }
}
