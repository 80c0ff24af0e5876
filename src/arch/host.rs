//! # Host Port Layer
//!
//! Context-switch primitive for running the kernel on a desktop OS, used by
//! the unit tests and the host build of the firmware binary.
//!
//! Each task runs on its own OS thread, but exactly one thread is ever
//! runnable: control is handed around with a baton (mutex + condvar). The
//! dispatcher resumes a task and blocks until the task suspends again, which
//! gives the same single-thread-of-control semantics as the PendSV port.
//!
//! A rebuild unwinds the stale thread (no task-level hook runs) and starts a
//! fresh thread at the same entry point.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Task entry point on the host.
pub type Entry = Arc<dyn Fn() + Send + Sync + 'static>;

/// Payload of the unwind that discards a rebuilt task's call history.
struct Discard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    /// The dispatcher holds the CPU.
    Dispatcher,
    /// The task holds the CPU.
    Task,
    /// The task must drop its call history and exit.
    Discard,
    /// The task thread is gone.
    Exited,
}

struct Handoff {
    holder: Mutex<Holder>,
    changed: Condvar,
}

impl Handoff {
    fn new() -> Self {
        Self {
            holder: Mutex::new(Holder::Dispatcher),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Holder> {
        self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pass(&self, to: Holder) {
        *self.lock() = to;
        self.changed.notify_all();
    }

    fn wait_while(&self, held: Holder) -> Holder {
        let guard = self
            .changed
            .wait_while(self.lock(), |holder| *holder == held)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }

    /// Task side: block until the dispatcher hands over the CPU.
    fn wait_for_cpu(&self) {
        if self.wait_while(Holder::Dispatcher) == Holder::Discard {
            panic::resume_unwind(Box::new(Discard));
        }
    }
}

/// Saved context of one host task: the thread and its baton.
pub struct Fiber {
    entry: Entry,
    stack_bytes: usize,
    handoff: Arc<Handoff>,
    thread: Option<JoinHandle<()>>,
}

impl Fiber {
    /// Spawn the task thread, parked until its first switch-in.
    pub fn spawn(name: &str, entry: Entry, stack_bytes: usize) -> Fiber {
        let mut fiber = Fiber {
            entry,
            stack_bytes,
            handoff: Arc::new(Handoff::new()),
            thread: None,
        };
        fiber.start(name);
        fiber
    }

    fn start(&mut self, name: &str) {
        let handoff = Arc::clone(&self.handoff);
        let entry = Arc::clone(&self.entry);
        let thread = thread::Builder::new()
            .name(name.into())
            .stack_size(self.stack_bytes)
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    handoff.wait_for_cpu();
                    entry();
                }));
                match outcome {
                    Err(payload) if payload.is::<Discard>() => {}
                    Err(payload) => {
                        handoff.pass(Holder::Exited);
                        panic::resume_unwind(payload);
                    }
                    Ok(()) => handoff.pass(Holder::Exited),
                }
            })
            .unwrap_or_else(|err| panic!("failed to spawn task thread {name}: {err}"));
        self.thread = Some(thread);
    }

    /// Discard the call history and restart at the entry point.
    pub fn rebuild(&mut self) {
        let name = self
            .thread
            .as_ref()
            .and_then(|thread| thread.thread().name().map(str::to_owned))
            .unwrap_or_default();

        self.handoff.pass(Holder::Discard);
        if let Some(thread) = self.thread.take() {
            // The stale thread ends by unwinding; its result carries nothing.
            let _ = thread.join();
        }

        self.handoff = Arc::new(Handoff::new());
        self.start(&name);
    }

    /// Handle used to pass the CPU to and from this task without keeping
    /// the kernel's fiber table locked while the task runs.
    pub fn switch(&self) -> Switch {
        Switch {
            handoff: Arc::clone(&self.handoff),
        }
    }
}

/// One end of a fiber's baton.
pub struct Switch {
    handoff: Arc<Handoff>,
}

impl Switch {
    /// Dispatcher side: run the task until it suspends. Returns `false` if
    /// the task thread has exited and can never be resumed again.
    pub fn resume(&self) -> bool {
        if *self.handoff.lock() == Holder::Exited {
            return false;
        }
        self.handoff.pass(Holder::Task);
        self.handoff.wait_while(Holder::Task) != Holder::Exited
    }

    /// Task side: hand the CPU back to the dispatcher and block until resumed.
    pub fn suspend(&self) {
        self.handoff.pass(Holder::Dispatcher);
        self.handoff.wait_for_cpu();
    }
}
