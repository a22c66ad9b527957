use nbroker_core::SubscriberEntry;
use serde::Serialize;

use crate::cmd::InfoArgs;
use crate::exit::{broker_error, CliResult, SUCCESS};
use crate::output::{subscriber_table, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    schema_id: &'static str,
    key: String,
    capacity: usize,
    wake_signal: i32,
    pending: u64,
    subscribers: Vec<SubscriberEntry>,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let key = args.key.resolve()?;
    let handle = nbroker_core::open(key).map_err(|err| broker_error("open failed", err))?;

    let snapshot = (|| -> nbroker_core::Result<InfoOutput> {
        let (capacity, wake_signal) = nbroker_core::settings(handle)?;
        Ok(InfoOutput {
            schema_id: "nbroker/cli/v1/instance-info",
            key: key.to_string(),
            capacity,
            wake_signal,
            pending: nbroker_core::pending(handle)?,
            subscribers: nbroker_core::subscribers(handle)?,
        })
    })();
    let _ = nbroker_core::close(handle);
    let out = snapshot.map_err(|err| broker_error("info failed", err))?;

    print_info(&out, format);
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Instance Info:");
            println!("  Key:          {}", out.key);
            println!("  Capacity:     {}", out.capacity);
            println!("  Wake signal:  {}", out.wake_signal);
            println!("  Pending:      {}", out.pending);
            println!("  Subscribers:  {}", out.subscribers.len());
            if !out.subscribers.is_empty() {
                println!("{}", subscriber_table(&out.subscribers));
            }
        }
        OutputFormat::Raw => {
            for entry in &out.subscribers {
                println!("{} {}", entry.pid, entry.channel);
            }
        }
    }
}
