//! # Scheduler
//!
//! Platform-independent task selection for the cooperative kernel.
//!
//! ## Scheduling Algorithm
//!
//! There is no tick and no time slicing. A switch opportunity arises when:
//! 1. The running task calls `yield` (its ready flag is cleared first), or
//! 2. An interrupt handler marks a task ready (`set_ready`) or ready-and-reset.
//!
//! At every opportunity the table is scanned in id order and the **first**
//! ready task runs. This is fixed priority, not round-robin: two tasks that
//! stay ready forever would starve every higher id. Ties cannot happen since
//! ids are unique; the lower id simply wins.
//!
//! A task that never yields blocks the whole system. There is no watchdog;
//! yielding is a convention every task body must follow.

use crate::config::MAX_TASKS;
use crate::error::KernelError;
use crate::task::{TaskControlBlock, TaskId};

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Task to switch in.
    pub id: TaskId,
    /// The port must rebuild the task's initial context before switching in.
    pub rebuild: bool,
}

/// The scheduler state: one control block per task slot plus the slot that
/// currently owns the CPU (`None` while the idle context runs).
pub struct Scheduler {
    tasks: [TaskControlBlock; MAX_TASKS],
    current: Option<TaskId>,
}

impl Scheduler {
    /// Create an empty scheduler. Nothing runs until a task is created.
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            current: None,
        }
    }

    /// Register a task slot. New tasks start ready so they reach their first
    /// suspension point as soon as the scheduler runs.
    pub fn create(&mut self, id: TaskId) -> Result<(), KernelError> {
        let tcb = &mut self.tasks[id.index()];
        if tcb.created {
            return Err(KernelError::AlreadyCreated);
        }
        tcb.created = true;
        tcb.ready = true;
        tcb.reset_pending = false;
        Ok(())
    }

    /// Mark a task runnable. Called from interrupt context.
    pub fn set_ready(&mut self, id: TaskId) {
        let tcb = &mut self.tasks[id.index()];
        if tcb.created {
            tcb.ready = true;
        }
    }

    /// Mark a task runnable and request that it restart from its entry point.
    pub fn set_ready_and_reset(&mut self, id: TaskId) {
        let tcb = &mut self.tasks[id.index()];
        if tcb.created {
            tcb.ready = true;
            tcb.reset_pending = true;
        }
    }

    /// Give up the running slot. The current task will not be selected again
    /// until something marks it ready.
    pub fn yield_current(&mut self) {
        if let Some(id) = self.current {
            self.tasks[id.index()].ready = false;
        }
    }

    /// Select the next task: the lowest-id runnable slot, or `None` for idle.
    ///
    /// Consumes the reset request of the selected task.
    pub fn select_next(&mut self) -> Option<Dispatch> {
        let next = self
            .tasks
            .iter()
            .position(TaskControlBlock::is_runnable)
            .and_then(TaskId::new);

        self.current = next;

        next.map(|id| {
            let tcb = &mut self.tasks[id.index()];
            let rebuild = tcb.reset_pending;
            tcb.reset_pending = false;
            Dispatch { id, rebuild }
        })
    }

    /// Task currently owning the CPU.
    #[inline]
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Flags of one slot.
    pub fn tcb(&self, id: TaskId) -> &TaskControlBlock {
        &self.tasks[id.index()]
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
