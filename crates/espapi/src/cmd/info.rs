use std::time::Instant;

use espapi_client::{DeviceInfo, ServerHello};
use serde::Serialize;

use crate::cmd::InfoArgs;
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    address: String,
    hello: Option<ServerHello>,
    device: DeviceInfo,
    entities: usize,
    latency_ms: f64,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let client = args.device.connect()?;

    let started = Instant::now();
    let device = client
        .device_info()
        .map_err(|err| client_error("device info failed", err))?;
    let latency_ms = (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;

    let out = InfoOutput {
        address: args.device.addr(),
        hello: client.server_hello(),
        device,
        entities: client.entities().len(),
        latency_ms,
    };
    print_info(&out, format);

    client
        .close()
        .map_err(|err| client_error("disconnect failed", err))?;
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Device Info:");
            println!("  Address:          {}", out.address);
            println!("  Name:             {}", out.device.name);
            println!("  Model:            {}", out.device.model);
            println!("  MAC:              {}", out.device.mac_address);
            println!(
                "  ESPHome:          {} (built {})",
                out.device.esphome_version, out.device.compilation_time
            );
            if let Some(hello) = &out.hello {
                println!(
                    "  API:              {}.{} ({})",
                    hello.api_version_major, hello.api_version_minor, hello.server_info
                );
            }
            println!("  Password:         {}", yes_no(out.device.uses_password));
            println!("  Deep sleep:       {}", yes_no(out.device.has_deep_sleep));
            println!("  Entities:         {}", out.entities);
            println!("  Latency:          {:.2}ms", out.latency_ms);
        }
        OutputFormat::Raw => println!("{}", out.device.name),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
