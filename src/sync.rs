//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections. On the Cortex-M4 the implementation is
//! provided by `cortex-m` (single-core: interrupts disabled); on the host by
//! the `critical-section` std implementation (a global reentrant lock).
//! The scheduler table is only ever touched inside one of these.

pub use critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
///
/// Keep critical sections short: the CIC clock edges are serviced by
/// interrupts and a long section delays them past the next edge.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}
