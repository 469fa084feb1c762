use espapi_client::LightCommand;
use serde::Serialize;

use crate::cmd::{parse_duration, LightArgs};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct LightOutput<'a> {
    object_id: &'a str,
    sent: bool,
}

pub fn run(args: LightArgs, format: OutputFormat) -> CliResult<i32> {
    if args.state.is_none()
        && args.brightness.is_none()
        && args.rgb.is_none()
        && args.white.is_none()
        && args.color_temperature.is_none()
        && args.effect.is_none()
        && args.flash.is_none()
    {
        return Err(CliError::new(USAGE, "nothing to change"));
    }

    let client = args.device.connect()?;
    let light = client
        .entities()
        .light(&args.object_id)
        .map_err(|err| client_error("lookup failed", err))?;

    apply(light.command(), &args)?
        .send()
        .map_err(|err| client_error("light command failed", err))?;

    let out = LightOutput {
        object_id: &args.object_id,
        sent: true,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        _ => println!("{}: command sent", out.object_id),
    }

    client
        .close()
        .map_err(|err| client_error("disconnect failed", err))?;
    Ok(SUCCESS)
}

/// Fold the flags into the builder; capability checks happen in `send`.
fn apply<'a>(mut command: LightCommand<'a>, args: &LightArgs) -> CliResult<LightCommand<'a>> {
    if let Some(state) = args.state {
        command = command.state(state.is_on());
    }
    if let Some(brightness) = args.brightness {
        command = command.brightness(brightness);
    }
    if let Some(rgb) = &args.rgb {
        let [red, green, blue] = rgb[..] else {
            return Err(CliError::new(USAGE, "--rgb takes exactly three values"));
        };
        command = command.color(red, green, blue);
    }
    if let Some(white) = args.white {
        command = command.white(white);
    }
    if let Some(mireds) = args.color_temperature {
        command = command.color_temperature(mireds);
    }
    if let Some(effect) = &args.effect {
        command = command.effect(effect.clone());
    }
    if let Some(transition) = &args.transition {
        command = command.transition(parse_duration(transition)?);
    }
    if let Some(flash) = &args.flash {
        command = command.flash(parse_duration(flash)?);
    }
    Ok(command)
}
