use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::{Args, Subcommand};
use echld_payload::Message;
use echld_supervisor::{Controller, ControllerConfig, DispatcherConfig, Event, RequestOutcome};

use crate::exit::{echld_error, remote_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod param;
pub mod ping;
pub mod read;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Spawn workers and ping each of them.
    Ping(PingArgs),
    /// Read or change a dispatcher or worker parameter.
    Param(ParamArgs),
    /// Have a worker read a file and print its events.
    Read(ReadArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every command that spawns a dispatcher.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_workers: usize,
    pub request_timeout: Duration,
}

impl Settings {
    pub fn new(max_workers: usize, request_timeout: &str) -> CliResult<Self> {
        if max_workers == 0 {
            return Err(CliError::new(USAGE, "--max-workers must be at least 1"));
        }
        Ok(Self {
            max_workers,
            request_timeout: parse_duration(request_timeout)?,
        })
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            request_timeout: self.request_timeout,
            dispatcher: DispatcherConfig {
                max_workers: self.max_workers,
                ..DispatcherConfig::default()
            },
            ..ControllerConfig::default()
        }
    }

    pub fn spawn(&self) -> CliResult<Controller> {
        Controller::spawn(self.controller_config())
            .map_err(|err| echld_error("cannot start dispatcher", err))
    }
}

pub fn run(command: Command, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    match command {
        Command::Ping(args) => ping::run(args, format, settings),
        Command::Param(args) => param::run(args, format, settings),
        Command::Read(args) => read::run(args, format, settings),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Number of workers to spawn.
    #[arg(long, short = 'n', default_value = "1", value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,
    /// Pings per worker.
    #[arg(long, short = 'c', default_value = "1")]
    pub count: u32,
    /// Ping payload.
    #[arg(long, default_value = "ping")]
    pub data: String,
}

#[derive(Args, Debug)]
pub struct ParamArgs {
    #[command(subcommand)]
    pub action: ParamAction,
}

#[derive(Subcommand, Debug)]
pub enum ParamAction {
    /// Read a parameter (`params` lists them all).
    Get(ParamGetArgs),
    /// Change a parameter.
    Set(ParamSetArgs),
}

#[derive(Args, Debug)]
pub struct ParamGetArgs {
    /// Parameter name.
    pub name: String,
    /// Worker id; 0 is the dispatcher. A fresh worker is created for other ids.
    #[arg(long, short = 'w', default_value = "0")]
    pub worker: u16,
}

#[derive(Args, Debug)]
pub struct ParamSetArgs {
    /// Parameter name.
    pub name: String,
    /// New value.
    pub value: String,
    /// Worker id; 0 is the dispatcher. A fresh worker is created for other ids.
    #[arg(long, short = 'w', default_value = "0")]
    pub worker: u16,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// File for the worker to read.
    pub file: PathBuf,
    /// Suppress the worker's progress notifications.
    #[arg(long)]
    pub quiet: bool,
    /// Give up if the worker has not reached end of file after this long (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Extra time past the request timeout before giving up on a reply locally.
const REPLY_GRACE: Duration = Duration::from_millis(500);

/// Send one request and wait for its reply. `Error` and `TimedOut` replies
/// become CLI errors.
pub(crate) fn call(controller: &mut Controller, worker_id: u16, message: Message) -> CliResult<Event> {
    let context = format!("{} to worker {worker_id}", message.kind());
    let reply: Rc<RefCell<Option<Event>>> = Rc::default();
    let slot = Rc::clone(&reply);
    controller
        .send_request(worker_id, &message, move |event: &Event| {
            *slot.borrow_mut() = Some(event.clone());
            RequestOutcome::Done
        })
        .map_err(|err| echld_error(&context, err))?;

    let limit = controller.config().request_timeout + REPLY_GRACE;
    controller
        .wait_for(limit, || reply.borrow().is_some())
        .map_err(|err| echld_error(&context, err))?;

    let event = reply
        .borrow_mut()
        .take()
        .ok_or_else(|| CliError::new(TIMEOUT, format!("{context}: no reply")))?;
    if let Message::Error { code, text } = &event.message {
        return Err(remote_error(&context, *code, text));
    }
    if let Message::TimedOut(text) = &event.message {
        return Err(CliError::new(TIMEOUT, format!("{context}: {text}")));
    }
    Ok(event)
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn settings_build_the_controller_config() {
        let settings = Settings::new(3, "750ms").unwrap();
        let config = settings.controller_config();
        assert_eq!(config.request_timeout, Duration::from_millis(750));
        assert_eq!(config.dispatcher.max_workers, 3);
        assert_eq!(Settings::new(0, "1s").unwrap_err().code, USAGE);
    }
}
