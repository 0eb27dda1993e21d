mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, Settings};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "echld", version, about = "Capture worker supervisor CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", env = "ECHLD_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", env = "ECHLD_LOG_LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Size of the dispatcher's worker table.
    #[arg(long, env = "ECHLD_MAX_WORKERS", default_value = "16", global = true)]
    max_workers: usize,

    /// Time a request may wait for its reply (e.g. 5s, 500ms).
    #[arg(long, env = "ECHLD_REQUEST_TIMEOUT", default_value = "5s", global = true)]
    request_timeout: String,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = Settings::new(cli.max_workers, &cli.request_timeout)
        .and_then(|settings| cmd::run(cli.command, format, &settings));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
