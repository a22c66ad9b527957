//! Process signalling: liveness probes, wake signals, handler installation
//! and the self-pipe used to hand a wake-up from signal context to a thread.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

use crate::error::{Result, SysvError};

/// Signature of a raw signal handler.
pub type RawHandler = extern "C" fn(libc::c_int);

/// Whether `signal` can be caught and used as a wake signal.
pub fn is_catchable(signal: i32) -> bool {
    signal > 0 && signal <= libc::SIGRTMAX() && signal != libc::SIGKILL && signal != libc::SIGSTOP
}

/// Whether process `pid` currently exists.
///
/// A process owned by another user still counts as alive.
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send `signal` to process `pid`.
pub fn notify(pid: i32, signal: i32) -> Result<()> {
    if pid <= 0 {
        return Err(SysvError::Signal {
            pid,
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "refusing to signal a process group",
            ),
        });
    }
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == -1 {
        return Err(SysvError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// A signal disposition captured when a handler was installed.
pub struct SavedDisposition {
    signal: i32,
    previous: libc::sigaction,
}

impl SavedDisposition {
    pub fn signal(&self) -> i32 {
        self.signal
    }

    /// Reinstate the disposition that was active before [`install_handler`].
    pub fn restore(self) -> Result<()> {
        // SAFETY: `previous` was filled in by a successful sigaction call.
        let rc = unsafe { libc::sigaction(self.signal, &self.previous, std::ptr::null_mut()) };
        if rc == -1 {
            return Err(SysvError::last_os("sigaction"));
        }
        debug!(signal = self.signal, "restored previous signal disposition");
        Ok(())
    }
}

impl std::fmt::Debug for SavedDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavedDisposition")
            .field("signal", &self.signal)
            .finish()
    }
}

/// Install `handler` for `signal` with `SA_RESTART`, returning the previous disposition.
///
/// `handler` runs in signal context and must be async-signal-safe.
pub fn install_handler(signal: i32, handler: RawHandler) -> Result<SavedDisposition> {
    if !is_catchable(signal) {
        return Err(SysvError::Os {
            op: "sigaction",
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("signal {signal} cannot be caught"),
            ),
        });
    }

    // SAFETY: sigaction is plain old data; all-zero is a valid starting point.
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler as libc::sighandler_t;
    action.sa_flags = libc::SA_RESTART;
    // SAFETY: `sa_mask` is a valid sigset_t owned by `action`.
    unsafe { libc::sigemptyset(&mut action.sa_mask) };

    // SAFETY: sigaction is plain old data; all-zero is a valid bit pattern.
    let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };
    // SAFETY: both pointers reference valid sigaction structs.
    let rc = unsafe { libc::sigaction(signal, &action, &mut previous) };
    if rc == -1 {
        return Err(SysvError::last_os("sigaction"));
    }
    debug!(signal, "installed signal handler");
    Ok(SavedDisposition { signal, previous })
}

/// Create a close-on-exec pipe whose write end is non-blocking.
///
/// Returns `(read_end, write_end)`.
pub fn wake_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [-1 as libc::c_int; 2];
    // SAFETY: `fds` is a valid two-element array for pipe2 to fill.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc == -1 {
        return Err(SysvError::last_os("pipe2"));
    }
    // SAFETY: pipe2 succeeded, so both descriptors are open and owned by us.
    let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    // SAFETY: `write_end` is an open descriptor.
    let flags = unsafe { libc::fcntl(write_end.as_raw_fd(), libc::F_GETFL) };
    if flags == -1 {
        return Err(SysvError::last_os("fcntl(F_GETFL)"));
    }
    // SAFETY: `write_end` is an open descriptor.
    let rc = unsafe { libc::fcntl(write_end.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc == -1 {
        return Err(SysvError::last_os("fcntl(F_SETFL)"));
    }

    Ok((read_end, write_end))
}

/// Write one wake byte to `fd`. Async-signal-safe; preserves `errno`.
///
/// A full pipe already guarantees a pending wake, so `EAGAIN` is ignored.
pub fn write_wake_byte(fd: RawFd) {
    if fd < 0 {
        return;
    }
    // SAFETY: __errno_location returns the calling thread's errno slot.
    let errno = unsafe { libc::__errno_location() };
    // SAFETY: reading/writing the thread's own errno is async-signal-safe.
    let saved = unsafe { *errno };
    let byte = 1u8;
    // SAFETY: write is async-signal-safe and `byte` outlives the call.
    unsafe { libc::write(fd, (&byte as *const u8).cast::<libc::c_void>(), 1) };
    // SAFETY: see above.
    unsafe { *errno = saved };
}

/// Block until at least one wake byte is available, returning how many were consumed.
///
/// Returns `Ok(0)` once every write end has been closed.
pub fn read_wake(fd: &OwnedFd, buf: &mut [u8]) -> Result<usize> {
    loop {
        // SAFETY: `buf` is valid for `buf.len()` writable bytes.
        let n = unsafe {
            libc::read(
                fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let source = std::io::Error::last_os_error();
        if source.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(SysvError::Os { op: "read", source });
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;

    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(crate::current_pid()));
        assert!(!is_alive(0));
        assert!(!is_alive(-1));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("true should spawn");
        let pid = child.id() as i32;
        child.wait().expect("child should exit");
        assert!(!is_alive(pid));
        assert!(matches!(notify(pid, libc::SIGUSR2), Err(SysvError::Signal { .. })));
    }

    #[test]
    fn catchable_signals() {
        assert!(is_catchable(libc::SIGUSR1));
        assert!(is_catchable(libc::SIGRTMIN()));
        assert!(!is_catchable(libc::SIGKILL));
        assert!(!is_catchable(libc::SIGSTOP));
        assert!(!is_catchable(0));
        assert!(install_handler(libc::SIGKILL, noop).is_err());
    }

    extern "C" fn noop(_signal: libc::c_int) {}

    #[test]
    fn wake_pipe_round_trip() {
        let (read_end, write_end) = wake_pipe().unwrap();
        write_wake_byte(write_end.as_raw_fd());
        write_wake_byte(write_end.as_raw_fd());

        let mut buf = [0u8; 16];
        let n = read_wake(&read_end, &mut buf).unwrap();
        assert_eq!(n, 2);

        drop(write_end);
        assert_eq!(read_wake(&read_end, &mut buf).unwrap(), 0);
    }

    #[test]
    fn write_wake_byte_ignores_invalid_fd() {
        write_wake_byte(-1);
    }
}
