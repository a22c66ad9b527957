//! Signal-driven delivery.
//!
//! A sender enqueues an envelope and then signals the recipient. The signal
//! handler does one thing: it writes a byte to a self-pipe. A dedicated
//! delivery thread blocks on that pipe and, on every wake, drains this
//! process's envelopes from every open instance, invoking the registered
//! handler once per message.
//!
//! Signals coalesce, so one wake may stand for many envelopes; the drain
//! therefore keeps reading each transport until it is empty.
//!
//! Delivery is armed by the first subscription in the process and disarmed
//! when the last one is closed. Disarming restores the signal dispositions
//! that were in place before arming.

use std::os::fd::{AsRawFd, OwnedFd};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use nbroker_frame::Message;
use nbroker_sysv::signal::{self, SavedDisposition};
use nbroker_sysv::{current_pid, SysvError};
use tracing::{debug, error, info, trace, warn};

use crate::directory;
use crate::error::{BrokerError, Result};

/// Callback invoked on the delivery thread for every delivered message.
pub type Handler = Arc<dyn Fn(Message) + Send + Sync + 'static>;

const THREAD_NAME: &str = "nbroker-delivery";

/// Write end of the self-pipe, read by the signal handler. -1 when unarmed.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_wake_signal(_signal: std::ffi::c_int) {
    signal::write_wake_byte(WAKE_FD.load(Ordering::SeqCst));
}

struct Armed {
    dispositions: Vec<SavedDisposition>,
    write_end: OwnedFd,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

struct Delivery {
    owner_pid: i32,
    handler: Option<Handler>,
    armed: Option<Armed>,
}

impl Delivery {
    const fn new() -> Self {
        Self {
            owner_pid: 0,
            handler: None,
            armed: None,
        }
    }

    /// A forked child has no delivery thread; fall back to unarmed.
    fn reset_if_forked(&mut self) {
        let pid = current_pid();
        if self.owner_pid == pid {
            return;
        }
        self.owner_pid = pid;
        self.handler = None;
        if let Some(mut armed) = self.armed.take() {
            WAKE_FD.store(-1, Ordering::SeqCst);
            for disposition in armed.dispositions.drain(..) {
                if let Err(err) = disposition.restore() {
                    warn!(error = %err, "failed to restore inherited signal disposition");
                }
            }
            // The thread behind this handle only exists in the parent.
            drop(armed.worker.take());
            debug!(pid, "dropped delivery state inherited across fork");
        }
    }
}

static DELIVERY: Mutex<Delivery> = Mutex::new(Delivery::new());

fn delivery() -> MutexGuard<'static, Delivery> {
    let mut guard = DELIVERY.lock().unwrap_or_else(PoisonError::into_inner);
    guard.reset_if_forked();
    guard
}

/// Install `handler` and make sure `wake_signal` wakes the delivery thread.
///
/// The first call starts the thread; later calls replace the handler and add
/// any new wake signal. A drain is triggered immediately so envelopes that
/// arrived before arming are not stranded.
///
/// Returns the handler that was replaced. On error the handler is unchanged.
pub(crate) fn arm(wake_signal: i32, handler: Handler) -> Result<Option<Handler>> {
    let mut state = delivery();
    let mut armed = match state.armed.take() {
        Some(armed) => armed,
        None => start_worker()?,
    };

    if !armed.dispositions.iter().any(|d| d.signal() == wake_signal) {
        match signal::install_handler(wake_signal, on_wake_signal) {
            Ok(saved) => armed.dispositions.push(saved),
            Err(err) => {
                state.armed = Some(armed);
                return Err(err.into());
            }
        }
        info!(wake_signal, "delivery armed");
    }

    let previous = state.handler.replace(handler);
    signal::write_wake_byte(armed.write_end.as_raw_fd());
    state.armed = Some(armed);
    Ok(previous)
}

/// Put back a handler that [`arm`] replaced.
pub(crate) fn restore_handler(previous: Option<Handler>) {
    delivery().handler = previous;
}

fn start_worker() -> Result<Armed> {
    let (read_end, write_end) = signal::wake_pipe()?;
    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let worker = thread::Builder::new()
        .name(THREAD_NAME.into())
        .spawn(move || run_worker(read_end, worker_stop))
        .map_err(|source| SysvError::Os {
            op: "spawn delivery thread",
            source,
        })?;
    WAKE_FD.store(write_end.as_raw_fd(), Ordering::SeqCst);
    Ok(Armed {
        dispositions: Vec::new(),
        write_end,
        stop,
        worker: Some(worker),
    })
}

/// Stop delivery and restore the previous signal dispositions.
///
/// Safe to call when unarmed, and from the delivery thread itself (for a
/// handler that closes its own subscription); in that case the thread exits
/// once the handler returns instead of being joined.
pub(crate) fn disarm() -> Result<()> {
    let armed = {
        let mut state = delivery();
        state.handler = None;
        state.armed.take()
    };
    let Some(mut armed) = armed else {
        return Ok(());
    };

    let mut first_err = None;
    for disposition in armed.dispositions.drain(..) {
        if let Err(err) = disposition.restore() {
            warn!(error = %err, "failed to restore signal disposition");
            first_err.get_or_insert(err);
        }
    }

    WAKE_FD.store(-1, Ordering::SeqCst);
    armed.stop.store(true, Ordering::SeqCst);
    signal::write_wake_byte(armed.write_end.as_raw_fd());

    if let Some(worker) = armed.worker.take() {
        if worker.thread().id() == thread::current().id() {
            debug!("delivery disarmed from its own thread");
        } else if worker.join().is_err() {
            error!("delivery thread panicked");
        }
    }
    drop(armed);
    info!("delivery disarmed");

    match first_err {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Whether this process currently has delivery armed.
pub fn is_armed() -> bool {
    delivery().armed.is_some()
}

fn run_worker(read_end: OwnedFd, stop: Arc<AtomicBool>) {
    let pid = current_pid();
    let mut buf = [0u8; 64];
    debug!(pid, "delivery thread started");

    loop {
        match signal::read_wake(&read_end, &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "wake pipe read failed");
                abandon(&stop);
                break;
            }
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let delivered = drain(pid, &stop);
        if delivered > 0 {
            trace!(delivered, "drained transports");
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
    }

    debug!(pid, "delivery thread exiting");
}

/// Drop the armed state owned by a worker that can no longer run.
///
/// Runs on the worker itself, so the handle is dropped rather than joined.
/// A later `arm` starts a fresh worker.
fn abandon(stop: &Arc<AtomicBool>) {
    let mut state = delivery();
    let owned = state
        .armed
        .as_ref()
        .is_some_and(|armed| Arc::ptr_eq(&armed.stop, stop));
    if !owned {
        return;
    }
    let Some(mut armed) = state.armed.take() else {
        return;
    };
    WAKE_FD.store(-1, Ordering::SeqCst);
    for disposition in armed.dispositions.drain(..) {
        if let Err(err) = disposition.restore() {
            warn!(error = %err, "failed to restore signal disposition");
        }
    }
    drop(armed.worker.take());
    warn!("delivery thread stopped; delivery is unarmed until the next subscribe");
}

/// Deliver every envelope addressed to `pid` across all open instances.
fn drain(pid: i32, stop: &AtomicBool) -> usize {
    let mut delivered = 0;
    for (handle, transport) in directory::transports() {
        loop {
            if stop.load(Ordering::SeqCst) {
                return delivered;
            }
            match transport.try_dequeue_for(pid) {
                Ok(Some(envelope)) => {
                    dispatch(envelope.into_message());
                    delivered += 1;
                }
                Ok(None) => break,
                Err(BrokerError::Frame(err)) => {
                    warn!(%handle, error = %err, "discarding malformed envelope");
                }
                Err(err) => {
                    warn!(%handle, error = %err, "failed to drain transport");
                    break;
                }
            }
        }
    }
    delivered
}

fn dispatch(message: Message) {
    let handler = delivery().handler.clone();
    let Some(handler) = handler else {
        debug!(
            channel = message.channel(),
            sender = message.sender(),
            "no handler registered; dropping message"
        );
        return;
    };

    if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
        warn!("notification handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn abandoned_worker_leaves_delivery_unarmed() {
        arm(12, Arc::new(|_: Message| {})).unwrap();
        let stop = delivery()
            .armed
            .as_ref()
            .map(|armed| Arc::clone(&armed.stop))
            .unwrap();

        // A stale worker must not tear down state it does not own.
        abandon(&Arc::new(AtomicBool::new(false)));
        assert!(is_armed());

        abandon(&stop);
        assert!(!is_armed());
        assert_eq!(WAKE_FD.load(Ordering::SeqCst), -1);

        arm(12, Arc::new(|_: Message| {})).unwrap();
        assert!(is_armed());
        disarm().unwrap();
        assert!(!is_armed());
    }
}
