use nbroker_core::{BrokerError, Target};
use serde::Serialize;

use crate::cmd::SendArgs;
use crate::exit::{broker_error, io_error, CliError, CliResult, SUCCESS, UNAVAILABLE, USAGE};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct SendOutput {
    schema_id: &'static str,
    target: Target,
    sender: i32,
    payload_size: usize,
    delivered: usize,
    unreachable: Vec<i32>,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let key = args.key.resolve()?;
    let target = target(&args)?;
    let payload = match (&args.data, &args.file) {
        (Some(data), _) => data.clone().into_bytes(),
        (None, Some(path)) => {
            std::fs::read(path).map_err(|err| io_error("read payload failed", err))?
        }
        (None, None) => Vec::new(),
    };
    let payload_size = payload.len().min(nbroker_core::PAYLOAD_SIZE);

    let handle = nbroker_core::open(key).map_err(|err| broker_error("open failed", err))?;
    let result = nbroker_core::send(handle, &payload, target);
    let _ = nbroker_core::close(handle);

    let (delivered, unreachable) = match result {
        Ok(delivered) => (delivered, Vec::new()),
        Err(BrokerError::RecipientUnreachable {
            unreachable,
            delivered,
        }) => (delivered, unreachable),
        Err(err) => return Err(broker_error("send failed", err)),
    };

    let out = SendOutput {
        schema_id: "nbroker/cli/v1/message-sent",
        target,
        sender: nbroker_sysv::current_pid(),
        payload_size,
        delivered,
        unreachable,
    };
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Raw => println!("{}", out.delivered),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("sent {} bytes, {}: {} delivered", out.payload_size, out.target, out.delivered);
            if !out.unreachable.is_empty() {
                println!("unreachable: {:?}", out.unreachable);
            }
        }
    }

    if out.unreachable.is_empty() {
        Ok(SUCCESS)
    } else {
        Ok(UNAVAILABLE)
    }
}

fn target(args: &SendArgs) -> CliResult<Target> {
    let target = match (args.broadcast, args.pid, args.channel) {
        (true, None, None) => Ok(Target::Broadcast),
        (false, Some(pid), None) => Target::unicast(pid),
        (false, None, Some(channel)) => Target::multicast(channel),
        _ => {
            return Err(CliError::new(
                USAGE,
                "exactly one of --broadcast, --pid or --channel is required",
            ))
        }
    };
    target.map_err(|err| CliError::new(USAGE, format!("invalid target: {err}")))
}
