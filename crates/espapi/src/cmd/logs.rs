use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::info;

use crate::cmd::{close_on_interrupt, LogsArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_log, OutputFormat};

pub fn run(args: LogsArgs, format: OutputFormat) -> CliResult<i32> {
    let client = Arc::new(args.device.connect()?);
    let interrupted = close_on_interrupt(&client)?;

    let mut stream = client
        .subscribe_logs(args.level.into(), args.dump_config)
        .map_err(|err| client_error("log subscription failed", err))?;

    let mut printed = 0usize;
    for entry in stream.by_ref() {
        print_log(&entry, format);
        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }
    info!(lines = printed, "log stream finished");

    if interrupted.load(Ordering::SeqCst) {
        return Ok(SUCCESS);
    }
    if let Some(err) = stream.take_error() {
        return Err(client_error("log stream ended", err));
    }
    drop(stream);
    client
        .close()
        .map_err(|err| client_error("disconnect failed", err))?;
    Ok(SUCCESS)
}
