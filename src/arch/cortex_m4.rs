//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV and the initial stack frame.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks and the idle context
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore.
//!
//! There is no tick: PendSV is only pended by `yield` and by interrupt
//! handlers that mark a task ready. It runs at the lowest priority so it
//! always tail-chains after the GPIO edge handlers instead of delaying them.
//!
//! Build for `thumbv7em-none-eabi`: the frame below has no FPU extension.

use core::arch::{asm, naked_asm};

use crate::config::MIN_STACK_WORDS;
use crate::error::KernelError;
use crate::task::fill_sentinel;

/// Task entry point on the Cortex-M4. Task bodies never return.
pub type Entry = extern "C" fn() -> !;

/// Number of words in the initial frame: 8 hardware-stacked + 8 software-saved.
const FRAME_WORDS: usize = 16;

/// EXC_RETURN value for "return to Thread mode, use PSP, no FPU frame".
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

// ---------------------------------------------------------------------------
// Saved context
// ---------------------------------------------------------------------------

/// Saved context of one task: its entry point, its exclusively-owned stack,
/// and the stack pointer captured at the last switch-out.
pub struct Context {
    entry: Option<Entry>,
    stack: *mut u32,
    stack_words: usize,
    sp: *mut u32,
}

impl Context {
    /// An unused slot.
    pub const EMPTY: Context = Context {
        entry: None,
        stack: core::ptr::null_mut(),
        stack_words: 0,
        sp: core::ptr::null_mut(),
    };

    /// Take ownership of `stack`, fill it with the sentinel pattern, and build
    /// the initial frame so the first switch-in behaves like a resume.
    pub fn build(&mut self, entry: Entry, stack: &'static mut [u32]) -> Result<(), KernelError> {
        if stack.len() < MIN_STACK_WORDS {
            return Err(KernelError::StackTooSmall);
        }
        fill_sentinel(stack);
        self.entry = Some(entry);
        self.stack_words = stack.len();
        self.stack = stack.as_mut_ptr();
        self.rebuild();
        Ok(())
    }

    /// Re-create the initial frame at the top of the stack, discarding the
    /// whole call history.
    pub fn rebuild(&mut self) {
        let Some(entry) = self.entry else {
            return;
        };
        // Safety: `stack` and `stack_words` come from the `&'static mut`
        // slice handed to `build`, which this context owns from then on.
        let stack = unsafe { core::slice::from_raw_parts_mut(self.stack, self.stack_words) };
        self.sp = init_frame(stack, entry as usize as u32);
    }

    /// Stack pointer to restore on switch-in.
    #[inline]
    pub fn sp(&self) -> *mut u32 {
        self.sp
    }

    /// Record the stack pointer captured on switch-out.
    #[inline]
    pub fn save(&mut self, sp: *mut u32) {
        self.sp = sp;
    }

    /// The task's stack, for high-water inspection.
    pub fn stack(&self) -> &[u32] {
        if self.stack.is_null() {
            return &[];
        }
        // Safety: see `rebuild`.
        unsafe { core::slice::from_raw_parts(self.stack, self.stack_words) }
    }
}

/// Build the initial exception frame so that the first PendSV "return"
/// starts executing `pc`.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_exit)
///   R12, R3, R2, R1, R0 (0)
/// [Software saved context]
///   R11 .. R4 (0)              <- returned stack pointer
/// ```
fn init_frame(stack: &mut [u32], pc: u32) -> *mut u32 {
    // Keep the top 8-byte aligned (AAPCS); the slice is word aligned.
    let mut top = stack.len();
    if (stack.as_ptr() as usize + top * 4) & 0x07 != 0 {
        top -= 1;
    }
    let base = top - FRAME_WORDS;
    let frame = &mut stack[base..top];

    frame[..13].fill(0); // R4–R11, R0–R3, R12
    frame[13] = task_exit as usize as u32; // LR
    frame[14] = pc | 1; // PC (Thumb)
    frame[15] = 0x0100_0000; // xPSR, Thumb bit set

    frame.as_mut_ptr()
}

/// Fallback for tasks that return (entry is `fn() -> !`).
extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV trigger and priorities
// ---------------------------------------------------------------------------

/// Pend a context switch. Sets PENDSVSET in the ICSR.
#[inline]
pub fn trigger_pendsv() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Set PendSV to the lowest interrupt priority so context switches never
/// preempt the GPIO edge and timer handlers.
pub fn set_interrupt_priorities(scb: &mut cortex_m::peripheral::SCB) {
    use cortex_m::peripheral::scb::SystemHandler;
    // Safety: changing PendSV priority cannot break a priority-based
    // critical section; none is in use.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// First context launch
// ---------------------------------------------------------------------------

/// Switch to PSP and branch to the context whose frame starts at `psp`.
///
/// This is called once during `kernel::start()` with the idle context and
/// never returns.
///
/// # Safety
/// Must only be called once, from Thread mode on MSP, with a frame built by
/// `init_frame`.
pub unsafe fn start_first_context(psp: *const u32) -> ! {
    asm!(
        // Skip the software-saved R4–R11
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP from now on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Pop the hardware frame manually since this is not an exception return
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR (task_exit, discarded: entry never returns)
        "pop {{r5}}",          // PC (entry point)
        "pop {{r6}}",          // xPSR (discarded)

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler. Performs the actual context switch.
///
/// ## Sequence
/// 1. Save R4–R11 onto the current stack (PSP)
/// 2. Hand the resulting PSP to the kernel, which records it, selects the
///    next task (rebuilding it first if a reset is pending), and returns the
///    PSP to restore
/// 3. Restore R4–R11 from the new stack
/// 4. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR)
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        "bl {switch}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        "ldr r0, ={exc_return}",
        "bx r0",

        switch = sym switch_context,
        exc_return = const EXC_RETURN_THREAD_PSP,
    );
}

/// Record the outgoing PSP and return the incoming one. Called from PendSV.
extern "C" fn switch_context(psp: *mut u32) -> *mut u32 {
    crate::kernel::KERNEL.switch_context(psp)
}
