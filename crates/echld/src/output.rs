use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use echld_payload::Message;
use echld_supervisor::Event;
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
struct EventOutput<'a> {
    worker_id: u16,
    request_id: u16,
    kind: &'a str,
    message: String,
    timestamp: String,
}

pub fn print_event(event: &Event, format: OutputFormat) {
    let kind = event.kind().name();
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                worker_id: event.worker_id,
                request_id: event.request_id,
                kind,
                message: event.message.to_string(),
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
                .set_header(vec!["WORKER", "REQUEST", "KIND", "MESSAGE"])
                .add_row(vec![
                    event.worker_id.to_string(),
                    event.request_id.to_string(),
                    kind.to_string(),
                    event.message.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{event}"),
        OutputFormat::Raw => print_raw(raw_text(&event.message).as_bytes()),
    }
}

#[derive(Debug, Serialize)]
pub struct PingRow {
    pub worker_id: u16,
    pub seq: u32,
    pub bytes: usize,
    pub rtt_us: u64,
}

pub fn print_pings(rows: &[PingRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for row in rows {
                println!(
                    "{}",
                    serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["WORKER", "SEQ", "BYTES", "RTT (us)"]);
            for row in rows {
                table.add_row(vec![
                    row.worker_id.to_string(),
                    row.seq.to_string(),
                    row.bytes.to_string(),
                    row.rtt_us.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in rows {
                println!(
                    "worker={} seq={} bytes={} rtt={}us",
                    row.worker_id, row.seq, row.bytes, row.rtt_us
                );
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ParamRow {
    pub worker_id: u16,
    pub name: String,
    pub value: String,
}

pub fn print_param(row: &ParamRow, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["WORKER", "NAME", "VALUE"])
                .add_row(vec![row.worker_id.to_string(), row.name.clone(), row.value.clone()]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("[{}] {}={}", row.worker_id, row.name, row.value),
        OutputFormat::Raw => println!("{}", row.value),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

/// The text a message carries, without its type.
fn raw_text(message: &Message) -> String {
    match message {
        Message::Notify(text)
        | Message::WorkerDead(text)
        | Message::TimedOut(text)
        | Message::FileOpened(text)
        | Message::Error { text, .. } => text.clone(),
        Message::Param { value, .. } => value.clone(),
        other => other.kind().name().to_string(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
