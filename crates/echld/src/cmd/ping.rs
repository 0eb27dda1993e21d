use std::time::Instant;

use bytes::Bytes;
use echld_payload::{Message, Params};
use tracing::info;

use crate::cmd::{call, PingArgs, Settings};
use crate::exit::{echld_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_pings, OutputFormat, PingRow};

pub fn run(args: PingArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let mut controller = settings.spawn()?;
    let payload = Bytes::from(args.data.into_bytes());

    for worker_id in 1..=args.workers {
        call(&mut controller, worker_id, Message::NewWorker(Params::new()))?;
    }
    info!(workers = args.workers, "workers ready");

    let mut rows = Vec::new();
    for worker_id in 1..=args.workers {
        for seq in 0..args.count {
            let started = Instant::now();
            let event = call(&mut controller, worker_id, Message::Ping(payload.clone()))?;
            let rtt = started.elapsed();
            match event.message {
                Message::Pong(echo) if echo == payload => rows.push(PingRow {
                    worker_id,
                    seq,
                    bytes: echo.len(),
                    rtt_us: u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX),
                }),
                other => {
                    return Err(CliError::new(
                        DATA_INVALID,
                        format!("worker {worker_id}: unexpected reply to ping: {other}"),
                    ))
                }
            }
        }
    }

    controller
        .shutdown()
        .map_err(|err| echld_error("shutdown failed", err))?;
    print_pings(&rows, format);
    Ok(SUCCESS)
}
