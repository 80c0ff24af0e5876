//! # Architecture Abstraction Layer
//!
//! The context-switch primitive behind a narrow interface: build a task's
//! initial context, save/restore it, rebuild it from the entry point.
//! Task selection stays in `scheduler.rs` and is identical on every port.
//!
//! - `cortex_m4`: PendSV register save/restore on bare-metal ARM.
//! - `host`: baton-passing green threads, for tests and the host binary.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::Entry;

#[cfg(not(target_os = "none"))]
pub mod host;

#[cfg(not(target_os = "none"))]
pub use host::Entry;
