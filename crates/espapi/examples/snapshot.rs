//! Save one camera frame as `snapshot.jpg`.
//!
//! Run with:
//!   ESPHOME_HOST=camera0.local cargo run --example snapshot

use std::fs;

use espapi::{Client, DeviceAddress};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host = std::env::var("ESPHOME_HOST").unwrap_or_else(|_| "localhost".to_string());
    let password = std::env::var("ESPHOME_PASSWORD").unwrap_or_default();

    let client = Client::connect(&DeviceAddress::from_host(host).addr(), &password)?;
    let camera = client.camera()?;
    let frame = camera.image()?;
    fs::write("snapshot.jpg", &frame)?;
    eprintln!("Saved {} bytes from {}", frame.len(), camera.name());

    client.close()?;
    Ok(())
}
