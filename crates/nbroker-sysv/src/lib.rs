//! Safe wrappers over the host's System V IPC primitives.
//!
//! This is the lowest layer of nbroker. It provides:
//! - [`SharedSegment`]: create/open/attach/detach/remove of a shared memory segment
//! - [`MessageQueue`]: a kernel FIFO with selective, non-blocking retrieval by type tag
//! - [`signal`]: process liveness probes and wake-signal delivery
//! - [`IpcKey`]: the integer key naming a kernel object, optionally derived from a path
//!
//! Everything above this crate deals only in these types; no other crate calls
//! into `libc` for System V IPC directly.

#[cfg(not(target_os = "linux"))]
compile_error!("nbroker-sysv currently supports Linux only.");

pub mod error;
pub mod key;
pub mod queue;
pub mod segment;
pub mod signal;

pub use error::{Result, SysvError};
pub use key::IpcKey;
pub use queue::{MessageQueue, MAX_MESSAGE_SIZE};
pub use segment::SharedSegment;

/// Default permission bits for kernel objects created by this crate.
pub const DEFAULT_MODE: u32 = 0o600;

/// Returns the calling process id.
pub fn current_pid() -> i32 {
    // SAFETY: getpid has no preconditions and cannot fail.
    unsafe { libc::getpid() }
}
