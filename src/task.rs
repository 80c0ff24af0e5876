//! # Task Control Block
//!
//! Defines the platform-independent half of a task: its id, whether it is
//! ready to run, and whether it must be rebuilt from its entry point the next
//! time it is switched in. The saved register context and the stack live in
//! the architecture port (`arch`), indexed by the same id.
//!
//! Tasks are created once at boot and never destroyed. "Resetting" a task
//! discards its whole call history: the port rebuilds the initial context
//! frame and the task re-enters its entry point with a fresh stack.

use crate::config::{MAX_TASKS, STACK_SENTINEL};

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Index into the static task table. Lower ids have higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(u8);

impl TaskId {
    /// The CIC protocol task. It holds id 0 so it always wins the scan.
    pub const CIC: TaskId = TaskId(0);

    /// Returns the id for table slot `index`, if the table has that slot.
    pub const fn new(index: usize) -> Option<TaskId> {
        if index < MAX_TASKS {
            Some(TaskId(index as u8))
        } else {
            None
        }
    }

    /// Table slot of this task.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Scheduling flags of one task slot.
///
/// `ready` is cleared by the task itself when it yields and set by interrupt
/// handlers. `reset_pending` is only ever set together with `ready` and is
/// consumed by the scheduler when it next selects the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskControlBlock {
    /// Whether `create` has been called for this slot.
    pub created: bool,
    /// Runnable as soon as it wins the scan.
    pub ready: bool,
    /// Rebuild from the entry point on the next switch-in.
    pub reset_pending: bool,
}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialize the static table.
    pub const EMPTY: TaskControlBlock = TaskControlBlock {
        created: false,
        ready: false,
        reset_pending: false,
    };

    /// Runnable when allocated and ready.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.created && self.ready
    }
}

// ---------------------------------------------------------------------------
// Stack instrumentation
// ---------------------------------------------------------------------------

/// Overwrite a whole stack with the sentinel pattern.
pub fn fill_sentinel(stack: &mut [u32]) {
    stack.fill(STACK_SENTINEL);
}

/// Number of stack words that have ever been written since `fill_sentinel`.
///
/// Stacks grow downwards from the end of the slice, so the untouched region
/// is the run of sentinel words at the start.
pub fn high_water_mark(stack: &[u32]) -> usize {
    let untouched = stack
        .iter()
        .take_while(|&&word| word == STACK_SENTINEL)
        .count();
    stack.len() - untouched
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
