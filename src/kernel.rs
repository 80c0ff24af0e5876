//! # Kernel
//!
//! Public API of the cooperative kernel: `create`, `yield`, `set_ready` and
//! `set_ready_and_reset`, plus startup. Task selection lives in
//! `scheduler.rs`; this module couples it to the port's context switch.
//!
//! ## Startup Sequence (Cortex-M4)
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► KERNEL.create()   ← Register tasks (entry + static stack)
//!         └─► KERNEL.start()    ← Launch the idle context (no return)
//!               ├─► PendSV at lowest priority
//!               ├─► Pend the first switch
//!               └─► Idle context via arch::start_first_context()
//! ```
//!
//! On the host the same API is backed by green threads and a dispatcher
//! (`run_until_idle`) that the caller drives in place of the idle loop.

use core::cell::RefCell;

use crate::scheduler::Scheduler;
use crate::sync::{self, Mutex};
use crate::task::TaskId;

/// Scheduling operations shared by task bodies and interrupt handlers.
pub trait TaskControl {
    /// Give up the CPU. The only suspension point; resumes exactly where it
    /// left off once something marks the calling task ready.
    fn yield_now(&self);

    /// Mark a task runnable and request a switch opportunity. ISR-safe.
    fn set_ready(&self, id: TaskId);

    /// Like `set_ready`, and additionally restart the task at its entry point
    /// with a fresh stack on its next switch-in. No cleanup runs. ISR-safe.
    fn set_ready_and_reset(&self, id: TaskId);

    /// Deepest stack use ever observed for a task, in words. `None` where
    /// the port has no sentinel-filled stack to measure.
    fn stack_high_water(&self, _id: TaskId) -> Option<usize> {
        None
    }
}

fn with_scheduler<R>(scheduler: &Mutex<RefCell<Scheduler>>, f: impl FnOnce(&mut Scheduler) -> R) -> R {
    sync::critical_section(|cs| f(&mut scheduler.borrow_ref_mut(cs)))
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        use core::cell::UnsafeCell;
        use core::ptr::addr_of_mut;

        use crate::arch::cortex_m4::{self, Context, Entry};
        use crate::config::MAX_TASKS;
        use crate::error::KernelError;
        use crate::task::high_water_mark;

        /// The single kernel instance. PendSV reaches it through this static.
        pub static KERNEL: Kernel = Kernel::new();

        static mut IDLE_STACK: [u32; 128] = [0; 128];

        /// Kernel state: the scheduler table plus one saved context per slot
        /// and one for the idle loop.
        pub struct Kernel {
            scheduler: Mutex<RefCell<Scheduler>>,
            contexts: UnsafeCell<[Context; MAX_TASKS]>,
            idle: UnsafeCell<Context>,
        }

        // Safety: `contexts` and `idle` are only touched inside critical
        // sections or from PendSV, which cannot preempt itself.
        unsafe impl Sync for Kernel {}

        impl Kernel {
            const fn new() -> Self {
                Self {
                    scheduler: Mutex::new(RefCell::new(Scheduler::new())),
                    contexts: UnsafeCell::new([Context::EMPTY; MAX_TASKS]),
                    idle: UnsafeCell::new(Context::EMPTY),
                }
            }

            /// Create a task: fill `stack` with the sentinel pattern, build its
            /// initial frame, and mark it ready.
            pub fn create(
                &self,
                id: TaskId,
                entry: Entry,
                stack: &'static mut [u32],
            ) -> Result<(), KernelError> {
                sync::critical_section(|cs| {
                    let mut scheduler = self.scheduler.borrow_ref_mut(cs);
                    if scheduler.tcb(id).created {
                        return Err(KernelError::AlreadyCreated);
                    }
                    // Safety: inside a critical section, before the task exists.
                    let context = unsafe { &mut (*self.contexts.get())[id.index()] };
                    context.build(entry, stack)?;
                    scheduler.create(id)?;
                    crate::debug!("task {} created", id.index());
                    Ok(())
                })
            }

            /// Start scheduling. **Does not return.**
            pub fn start(&self, mut core: cortex_m::Peripherals) -> ! {
                cortex_m4::set_interrupt_priorities(&mut core.SCB);
                cortex_m::interrupt::disable();

                let idle_sp = sync::critical_section(|_cs| {
                    // Safety: the idle stack is handed over exactly once.
                    let idle = unsafe { &mut *self.idle.get() };
                    let stack = unsafe { &mut *addr_of_mut!(IDLE_STACK) };
                    match idle.build(idle_loop, stack) {
                        Ok(()) => idle.sp(),
                        Err(_) => loop {
                            cortex_m::asm::wfi();
                        },
                    }
                });

                // Fires as soon as the idle context enables interrupts.
                cortex_m4::trigger_pendsv();
                crate::info!("kernel started");

                unsafe { cortex_m4::start_first_context(idle_sp) }
            }

            /// Record the outgoing stack pointer and return the incoming one,
            /// rebuilding the incoming task first if a reset is pending.
            pub(crate) fn switch_context(&self, psp: *mut u32) -> *mut u32 {
                sync::critical_section(|cs| {
                    let mut scheduler = self.scheduler.borrow_ref_mut(cs);
                    // Safety: inside a critical section within PendSV.
                    let contexts = unsafe { &mut *self.contexts.get() };
                    let idle = unsafe { &mut *self.idle.get() };

                    match scheduler.current() {
                        Some(id) => contexts[id.index()].save(psp),
                        None => idle.save(psp),
                    }

                    match scheduler.select_next() {
                        Some(dispatch) => {
                            let context = &mut contexts[dispatch.id.index()];
                            if dispatch.rebuild {
                                context.rebuild();
                            }
                            context.sp()
                        }
                        None => idle.sp(),
                    }
                })
            }

        }

        impl TaskControl for Kernel {
            fn yield_now(&self) {
                with_scheduler(&self.scheduler, Scheduler::yield_current);
                cortex_m4::trigger_pendsv();
            }

            fn set_ready(&self, id: TaskId) {
                with_scheduler(&self.scheduler, |scheduler| scheduler.set_ready(id));
                cortex_m4::trigger_pendsv();
            }

            fn set_ready_and_reset(&self, id: TaskId) {
                with_scheduler(&self.scheduler, |scheduler| scheduler.set_ready_and_reset(id));
                cortex_m4::trigger_pendsv();
            }

            fn stack_high_water(&self, id: TaskId) -> Option<usize> {
                sync::critical_section(|_cs| {
                    // Safety: read-only, inside a critical section.
                    let contexts = unsafe { &*self.contexts.get() };
                    Some(high_water_mark(contexts[id.index()].stack()))
                })
            }
        }

        /// Runs whenever no task is ready.
        extern "C" fn idle_loop() -> ! {
            loop {
                cortex_m::asm::wfi();
            }
        }
    } else {
        use std::sync::{Arc, MutexGuard, Weak};

        use crate::arch::host::Fiber;
        use crate::config::{MAX_TASKS, MIN_STACK_WORDS};
        use crate::error::KernelError;

        /// OS threads need far more stack than the firmware's tasks; the
        /// requested size only sets a lower bound.
        const HOST_MIN_STACK_BYTES: usize = 256 * 1024;

        /// Host kernel. Tasks are green threads; the owner of the kernel
        /// plays the idle context and drives `run_until_idle`.
        pub struct Kernel {
            scheduler: Mutex<RefCell<Scheduler>>,
            fibers: std::sync::Mutex<[Option<Fiber>; MAX_TASKS]>,
            this: Weak<Kernel>,
        }

        impl Kernel {
            /// Create an empty kernel.
            pub fn new() -> Arc<Kernel> {
                Arc::new_cyclic(|this| Kernel {
                    scheduler: Mutex::new(RefCell::new(Scheduler::new())),
                    fibers: std::sync::Mutex::new(Default::default()),
                    this: this.clone(),
                })
            }

            fn lock_fibers(&self) -> MutexGuard<'_, [Option<Fiber>; MAX_TASKS]> {
                self.fibers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
            }

            /// Create a task that runs `entry` and mark it ready.
            pub fn create<F>(&self, id: TaskId, entry: F, stack_words: usize) -> Result<(), KernelError>
            where
                F: Fn() + Send + Sync + 'static,
            {
                if stack_words < MIN_STACK_WORDS {
                    return Err(KernelError::StackTooSmall);
                }
                let mut fibers = self.lock_fibers();
                if fibers[id.index()].is_some() {
                    return Err(KernelError::AlreadyCreated);
                }

                let kernel = self.this.clone();
                let body = Arc::new(move || {
                    entry();
                    // Task bodies never return; if one does, it parks for good.
                    if let Some(kernel) = kernel.upgrade() {
                        loop {
                            kernel.yield_now();
                        }
                    }
                });
                let stack_bytes = (stack_words * 4).max(HOST_MIN_STACK_BYTES);
                fibers[id.index()] = Some(Fiber::spawn(&format!("task-{}", id.index()), body, stack_bytes));

                with_scheduler(&self.scheduler, |scheduler| scheduler.create(id))?;
                crate::debug!("task {} created", id.index());
                Ok(())
            }

            /// Switch to ready tasks, lowest id first, until none is ready.
            pub fn run_until_idle(&self) {
                while let Some(dispatch) = with_scheduler(&self.scheduler, Scheduler::select_next) {
                    let switch = {
                        let mut fibers = self.lock_fibers();
                        let Some(fiber) = fibers[dispatch.id.index()].as_mut() else {
                            break;
                        };
                        if dispatch.rebuild {
                            crate::trace!("task {} rebuilt", dispatch.id.index());
                            fiber.rebuild();
                        }
                        fiber.switch()
                    };
                    if !switch.resume() {
                        with_scheduler(&self.scheduler, Scheduler::yield_current);
                    }
                }
            }

            /// Whether the task would be selected at the next opportunity.
            pub fn is_ready(&self, id: TaskId) -> bool {
                with_scheduler(&self.scheduler, |scheduler| scheduler.tcb(id).is_runnable())
            }
        }

        impl TaskControl for Kernel {
            fn yield_now(&self) {
                let current = with_scheduler(&self.scheduler, |scheduler| {
                    scheduler.yield_current();
                    scheduler.current()
                });
                let Some(id) = current else {
                    return;
                };
                let switch = self.lock_fibers()[id.index()].as_ref().map(Fiber::switch);
                if let Some(switch) = switch {
                    switch.suspend();
                }
            }

            fn set_ready(&self, id: TaskId) {
                with_scheduler(&self.scheduler, |scheduler| scheduler.set_ready(id));
            }

            fn set_ready_and_reset(&self, id: TaskId) {
                with_scheduler(&self.scheduler, |scheduler| scheduler.set_ready_and_reset(id));
            }
        }

        impl<K: TaskControl + ?Sized> TaskControl for Arc<K> {
            fn yield_now(&self) {
                (**self).yield_now()
            }

            fn set_ready(&self, id: TaskId) {
                (**self).set_ready(id)
            }

            fn set_ready_and_reset(&self, id: TaskId) {
                (**self).set_ready_and_reset(id)
            }

            fn stack_high_water(&self, id: TaskId) -> Option<usize> {
                (**self).stack_high_water(id)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host port)
// ---------------------------------------------------------------------------
