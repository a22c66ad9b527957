use nbroker_core::BrokerConfig;
use serde::Serialize;

use crate::cmd::CreateArgs;
use crate::exit::{broker_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct CreateOutput {
    schema_id: &'static str,
    key: String,
    capacity: usize,
    wake_signal: i32,
    mode: String,
}

pub fn run(args: CreateArgs, format: OutputFormat) -> CliResult<i32> {
    let key = args.key.resolve()?;
    let config = BrokerConfig::default()
        .with_registry_capacity(args.capacity)
        .with_wake_signal(args.signal)
        .with_mode(args.mode);

    nbroker_core::create_with_config(key, &config)
        .map_err(|err| broker_error("create failed", err))?;

    let out = CreateOutput {
        schema_id: "nbroker/cli/v1/instance-created",
        key: key.to_string(),
        capacity: config.registry_capacity,
        wake_signal: config.wake_signal,
        mode: format!("{:o}", config.mode),
    };
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Raw => println!("{}", out.key),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "created {} (capacity {}, wake signal {}, mode {})",
            out.key, out.capacity, out.wake_signal, out.mode
        ),
    }
    Ok(SUCCESS)
}
