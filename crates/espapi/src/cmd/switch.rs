use std::time::Duration;

use serde::Serialize;

use crate::cmd::{settle, SwitchArgs, SwitchState};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_json, OutputFormat};

/// How long `toggle` waits for the switch to report where it is.
const TOGGLE_SETTLE: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct SwitchOutput<'a> {
    object_id: &'a str,
    state: bool,
}

pub fn run(args: SwitchArgs, format: OutputFormat) -> CliResult<i32> {
    let client = args.device.connect()?;
    let switch = client
        .entities()
        .switch(&args.object_id)
        .map_err(|err| client_error("lookup failed", err))?;

    let on = match args.state {
        SwitchState::On => true,
        SwitchState::Off => false,
        SwitchState::Toggle => {
            if !settle(TOGGLE_SETTLE, || switch.is_valid()) {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("switch '{}' never reported its state", args.object_id),
                ));
            }
            !switch.state().on
        }
    };

    switch
        .set_state(on)
        .map_err(|err| client_error("switch command failed", err))?;

    let out = SwitchOutput {
        object_id: &args.object_id,
        state: on,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        _ => println!("{}: {}", out.object_id, if on { "on" } else { "off" }),
    }

    client
        .close()
        .map_err(|err| client_error("disconnect failed", err))?;
    Ok(SUCCESS)
}
