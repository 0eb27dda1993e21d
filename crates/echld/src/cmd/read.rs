use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use echld_frame::MessageType;
use echld_payload::{Message, Params};
use echld_supervisor::{Event, HandlerOutcome};
use tracing::{info, warn};

use crate::cmd::{call, parse_duration, ReadArgs, Settings};
use crate::exit::{echld_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_event, OutputFormat};

const WORKER_ID: u16 = 1;
const TICK: Duration = Duration::from_millis(100);

const WATCHED: [MessageType; 4] = [
    MessageType::Notify,
    MessageType::Error,
    MessageType::Eof,
    MessageType::WorkerDead,
];

pub fn run(args: ReadArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let path = args.file.display().to_string();

    // Fork before the Ctrl-C handler starts its thread.
    let mut controller = settings.spawn()?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let events: Rc<RefCell<Vec<Event>>> = Rc::default();
    for kind in WATCHED {
        let sink = Rc::clone(&events);
        controller.register_handler(WORKER_ID, kind, move |event: &Event| {
            sink.borrow_mut().push(event.clone());
            HandlerOutcome::Continue
        });
    }

    let quiet = if args.quiet { "TRUE" } else { "FALSE" };
    call(
        &mut controller,
        WORKER_ID,
        Message::NewWorker(Params::new().with("quiet", quiet)),
    )?;
    let opened = call(&mut controller, WORKER_ID, Message::OpenFile(path.clone()))?;
    print_event(&opened, format);

    let started = Instant::now();
    loop {
        let batch: Vec<Event> = events.borrow_mut().drain(..).collect();
        let mut finished = false;
        for event in &batch {
            print_event(event, format);
            match &event.message {
                Message::Eof => finished = true,
                Message::WorkerDead(reason) => {
                    return Err(CliError::new(
                        FAILURE,
                        format!("worker died while reading {path}: {reason}"),
                    ))
                }
                _ => {}
            }
        }
        if finished {
            break;
        }
        if !running.load(Ordering::SeqCst) {
            info!(%path, "interrupted");
            break;
        }
        if started.elapsed() >= timeout {
            return Err(CliError::new(
                TIMEOUT,
                format!("no end of file for {path} after {timeout:?}"),
            ));
        }
        controller
            .wait(Some(TICK))
            .map_err(|err| echld_error("waiting for worker", err))?;
    }

    if let Err(err) = call(&mut controller, WORKER_ID, Message::Close) {
        warn!(%err, "worker did not close cleanly");
    }
    controller
        .shutdown()
        .map_err(|err| echld_error("shutdown failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
