use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nbroker_core::Message;
use tracing::info;

use crate::cmd::ListenArgs;
use crate::exit::{broker_error, CliError, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let key = args.key.resolve()?;
    let handle = nbroker_core::open(key).map_err(|err| broker_error("open failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (tx, rx) = mpsc::channel::<Message>();
    let tx = Mutex::new(tx);
    let subscribed = nbroker_core::subscribe(handle, args.channel, move |message| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(message);
        }
    });
    if let Err(err) = subscribed {
        let _ = nbroker_core::close(handle);
        return Err(broker_error("subscribe failed", err));
    }
    info!(%key, channel = args.channel, "listening");

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(message) => {
                print_message(&message, format);
                printed = printed.saturating_add(1);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    nbroker_core::close(handle).map_err(|err| broker_error("close failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
