use crate::cmd::RemoveArgs;
use crate::exit::{broker_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: RemoveArgs, format: OutputFormat) -> CliResult<i32> {
    let key = args.key.resolve()?;
    nbroker_core::remove(key).map_err(|err| broker_error("remove failed", err))?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "schema_id": "nbroker/cli/v1/instance-removed",
                "key": key.to_string(),
            })
        ),
        OutputFormat::Raw => println!("{key}"),
        OutputFormat::Table | OutputFormat::Pretty => println!("removed {key}"),
    }
    Ok(SUCCESS)
}
