use echld_payload::{Message, Params};
use echld_supervisor::DISPATCHER_ID;

use crate::cmd::{call, ParamAction, ParamArgs, Settings};
use crate::exit::{echld_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_param, OutputFormat, ParamRow};

pub fn run(args: ParamArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let (worker_id, message) = match args.action {
        ParamAction::Get(get) => (get.worker, Message::GetParam(get.name)),
        ParamAction::Set(set) => (
            set.worker,
            Message::SetParam {
                name: set.name,
                value: set.value,
            },
        ),
    };

    let mut controller = settings.spawn()?;
    if worker_id != DISPATCHER_ID {
        call(&mut controller, worker_id, Message::NewWorker(Params::new()))?;
    }
    let event = call(&mut controller, worker_id, message)?;
    controller
        .shutdown()
        .map_err(|err| echld_error("shutdown failed", err))?;

    match event.message {
        Message::Param { name, value } => {
            print_param(
                &ParamRow {
                    worker_id,
                    name,
                    value,
                },
                format,
            );
            Ok(SUCCESS)
        }
        other => Err(CliError::new(
            DATA_INVALID,
            format!("unexpected reply: {other}"),
        )),
    }
}
