use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nbroker_core::{Message, SubscriberEntry};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    schema_id: &'a str,
    mode: &'a str,
    channel: i64,
    sender: i32,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_message(message: &Message, format: OutputFormat) {
    let mode = mode_name(message.channel());
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                schema_id: "nbroker/cli/v1/message-received",
                mode,
                channel: message.channel(),
                sender: message.sender(),
                payload_size: message.payload().len(),
                payload: payload_preview(message.payload()),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["MODE", "CHANNEL", "SENDER", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    mode.to_string(),
                    message.channel().to_string(),
                    message.sender().to_string(),
                    message.payload().len().to_string(),
                    payload_preview(message.payload()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{mode} channel={} sender={} size={} payload={}",
                message.channel(),
                message.sender(),
                message.payload().len(),
                payload_preview(message.payload())
            );
        }
        OutputFormat::Raw => {
            print_raw(message.payload());
        }
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn subscriber_table(entries: &[SubscriberEntry]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["PID", "CHANNEL"]);
    for entry in entries {
        table.add_row(vec![entry.pid.to_string(), entry.channel.to_string()]);
    }
    table.to_string()
}

/// Delivery mode implied by a message's raw discriminator.
pub fn mode_name(channel: i64) -> &'static str {
    match channel {
        0 => "broadcast",
        c if c > 0 => "unicast",
        _ => "multicast",
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_follows_discriminator_sign() {
        assert_eq!(mode_name(0), "broadcast");
        assert_eq!(mode_name(4242), "unicast");
        assert_eq!(mode_name(-5), "multicast");
    }

    #[test]
    fn preview_marks_binary_payloads() {
        assert_eq!(payload_preview(b"hi"), "hi");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }

    #[test]
    fn subscriber_table_lists_every_entry() {
        let table = subscriber_table(&[
            SubscriberEntry {
                pid: 10,
                channel: -5,
            },
            SubscriberEntry {
                pid: 11,
                channel: -6,
            },
        ]);
        assert!(table.contains("PID"));
        assert!(table.contains("-5"));
        assert!(table.contains("11"));
    }
}
