use clap::{Args, Subcommand};
use std::path::PathBuf;

use nbroker_core::{IpcKey, DEFAULT_REGISTRY_CAPACITY, DEFAULT_WAKE_SIGNAL};

use crate::exit::{broker_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod create;
pub mod info;
pub mod listen;
pub mod remove;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a broker instance.
    Create(CreateArgs),
    /// Remove a broker instance.
    Remove(RemoveArgs),
    /// Send one message.
    Send(SendArgs),
    /// Subscribe to a channel and print received messages.
    Listen(ListenArgs),
    /// Show the registry and queue depth of an instance.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Create(args) => create::run(args, format),
        Command::Remove(args) => remove::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// How the instance key is given: directly, or derived from a path.
#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Instance key (decimal or 0x-prefixed hex).
    #[arg(
        long,
        env = "NBROKER_KEY",
        value_parser = parse_key,
        allow_negative_numbers = true,
        required_unless_present = "path"
    )]
    pub key: Option<i32>,
    /// Derive the key from an existing path (ftok).
    #[arg(long, value_name = "PATH", conflicts_with = "key")]
    pub path: Option<PathBuf>,
    /// Project id combined with --path.
    #[arg(long, default_value_t = 1)]
    pub proj_id: u8,
}

impl KeyArgs {
    pub fn resolve(&self) -> CliResult<IpcKey> {
        match (&self.path, self.key) {
            (Some(path), _) => IpcKey::from_path(path, self.proj_id)
                .map_err(|err| broker_error("key derivation failed", err.into())),
            (None, Some(raw)) => Ok(IpcKey::new(raw)),
            (None, None) => Err(CliError::new(USAGE, "either --key or --path is required")),
        }
    }
}

pub fn parse_key(value: &str) -> Result<i32, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).map(|v| v as i32),
        None => value.parse::<i32>(),
    };
    parsed.map_err(|err| format!("invalid key {value:?}: {err}"))
}

pub fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    u32::from_str_radix(digits, 8).map_err(|err| format!("invalid octal mode {value:?}: {err}"))
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub key: KeyArgs,
    /// Maximum number of concurrent subscribers.
    #[arg(long, env = "NBROKER_CAPACITY", default_value_t = DEFAULT_REGISTRY_CAPACITY)]
    pub capacity: usize,
    /// Signal used to wake subscribers.
    #[arg(long, env = "NBROKER_WAKE_SIGNAL", default_value_t = DEFAULT_WAKE_SIGNAL)]
    pub signal: i32,
    /// Permission bits (octal) for the instance's kernel objects.
    #[arg(long, value_parser = parse_mode, default_value = "600")]
    pub mode: u32,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[command(flatten)]
    pub key: KeyArgs,
}

#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("target")
        .required(true)
        .args(["broadcast", "pid", "channel"])
))]
pub struct SendArgs {
    #[command(flatten)]
    pub key: KeyArgs,
    /// Send to every subscriber.
    #[arg(long)]
    pub broadcast: bool,
    /// Send to the subscriber with this process id.
    #[arg(long)]
    pub pid: Option<i32>,
    /// Send to every subscriber of this (negative) channel.
    #[arg(long, allow_negative_numbers = true)]
    pub channel: Option<i64>,
    /// String payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub key: KeyArgs,
    /// Channel to subscribe to (negative).
    #[arg(long, allow_negative_numbers = true)]
    pub channel: i64,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub key: KeyArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
