//! # Configuration
//!
//! Compile-time constants governing the kernel and the CIC protocol timing.
//! All limits are fixed at compile time. No dynamic allocation.

/// Number of slots in the static task table. Task ids index this table
/// directly, and the lowest id always wins when several tasks are ready.
pub const MAX_TASKS: usize = 4;

/// Stack size of the CIC task, in 32-bit words. The protocol keeps its whole
/// session on this stack (about 100 bytes) plus the call chain down to
/// `yield`, so 2 KiB leaves a wide margin for the saved context frame.
pub const CIC_STACK_WORDS: usize = 512;

/// Smallest stack `create` accepts, in words: the initial saved-context frame
/// (16 registers) plus a little room to make the first call.
pub const MIN_STACK_WORDS: usize = 64;

/// Pattern written over every fresh task stack so the high-water mark can be
/// measured later.
pub const STACK_SENTINEL: u32 = 0xDEAD_BEEF;

/// Deadline for streaming the encoded seed, in timer units. Measured on real
/// consoles; keep it opaque.
pub const SEED_DEADLINE: u32 = 1000;

/// Window after a soft-reset request before the data line is pulled low as
/// acknowledgement, in timer units. Measured on real consoles; keep it opaque.
pub const SOFT_RESET_WINDOW: u32 = 550;

/// Timer unit frequency. One timer unit is one microsecond.
pub const TIMER_TICK_HZ: u32 = 1_000_000;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
