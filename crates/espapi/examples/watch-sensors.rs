//! Print every sensor change until the device goes away.
//!
//! Run with:
//!   ESPHOME_HOST=porch.local ESPHOME_PASSWORD=secret \
//!     cargo run --example watch-sensors

use espapi::{Client, DeviceAddress};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host = std::env::var("ESPHOME_HOST").unwrap_or_else(|_| "localhost".to_string());
    let password = std::env::var("ESPHOME_PASSWORD").unwrap_or_default();

    let client = Client::connect(&DeviceAddress::from_host(host).addr(), &password)?;
    let entities = client.entities();
    eprintln!("Watching {} sensors", entities.sensors.len());

    let mut subscriptions = Vec::new();
    for sensor in entities.sensors.values() {
        let id = sensor.object_id().to_string();
        let unit = sensor.capabilities().unit_of_measurement.clone();
        subscriptions.push(sensor.subscribe(move |change| {
            println!("{id}: {change:?} {unit}");
        }));
    }

    // Nothing else arrives here; block until the connection ends.
    loop {
        if let Err(e) = client.next_message() {
            eprintln!("Connection ended: {e}");
            break;
        }
    }
    Ok(())
}
