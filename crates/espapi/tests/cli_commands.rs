#![cfg(feature = "cli")]

use std::net::{TcpListener, TcpStream};
use std::process::{Command, Output};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use espapi_frame::{proto, FrameReader, FrameWriter, Message, Schema};

const PASSWORD: &str = "letmein";

struct Device {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
}

impl Device {
    fn expect<R: Schema>(&mut self) -> R {
        loop {
            let message = self
                .reader
                .read_message()
                .expect("device should receive a message");
            if let Some(found) = R::from_message(message) {
                return found;
            }
        }
    }

    fn send(&mut self, message: impl Into<Message>) {
        self.writer
            .write_message(&message.into())
            .expect("device should send");
    }

    /// Hello and connect; returns whether the password matched.
    fn handshake(&mut self) -> bool {
        let _: proto::HelloRequest = self.expect();
        self.send(proto::HelloResponse {
            api_version_major: 1,
            api_version_minor: 3,
            server_info: "porch (esphome v1.14.3)".into(),
        });
        let connect: proto::ConnectRequest = self.expect();
        let accepted = connect.password == PASSWORD;
        self.send(proto::ConnectResponse {
            invalid_password: !accepted,
        });
        accepted
    }

    fn login(&mut self, entities: &[Message]) {
        assert!(self.handshake(), "cli should send the password");
        let _: proto::ListEntitiesRequest = self.expect();
        for entity in entities {
            self.send(entity.clone());
        }
        self.send(proto::ListEntitiesDoneResponse {});
        let _: proto::SubscribeStatesRequest = self.expect();
    }

    /// Answer the cli's goodbye.
    fn farewell(&mut self) {
        let _: proto::DisconnectRequest = self.expect();
        self.send(proto::DisconnectResponse {});
    }
}

fn spawn_device<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(&mut Device) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("device should bind");
    let port = listener.local_addr().expect("device address").port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("device should accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("read timeout should apply");
        let mut device = Device {
            reader: FrameReader::new(stream.try_clone().expect("stream should clone")),
            writer: FrameWriter::new(stream),
        };
        script(&mut device);
    });
    (port, handle)
}

fn espapi(port: u16, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_espapi"))
        .env_remove("ESPHOME_HOST")
        .env("ESPHOME_PASSWORD", PASSWORD)
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .args(["--host", "127.0.0.1", "--port", &port.to_string(), "--timeout", "5s"])
        .output()
        .expect("espapi should run")
}

fn switch(key: u32, object_id: &str) -> Message {
    proto::ListEntitiesSwitchResponse {
        object_id: object_id.into(),
        key,
        name: "Relay".into(),
        unique_id: format!("porch-{object_id}"),
        icon: String::new(),
        assumed_state: false,
    }
    .into()
}

#[test]
fn info_prints_device_details_as_json() {
    let (port, device) = spawn_device(|device| {
        device.login(&[switch(1, "relay")]);
        let _: proto::DeviceInfoRequest = device.expect();
        device.send(proto::DeviceInfoResponse {
            uses_password: true,
            name: "porch".into(),
            mac_address: "24:0A:C4:00:00:01".into(),
            esphome_version: "1.14.3".into(),
            compilation_time: "Jan 01 2020, 12:00:00".into(),
            model: "nodemcuv2".into(),
            has_deep_sleep: false,
        });
        device.farewell();
    });

    let output = espapi(port, &["info"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let info: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("info should print json");
    assert_eq!(info["device"]["name"], "porch");
    assert_eq!(info["hello"]["api_version_minor"], 3);
    assert_eq!(info["entities"], 1);

    device.join().expect("device script should not panic");
}

#[test]
fn wrong_password_exits_50() {
    let (port, device) = spawn_device(|device| {
        assert!(!device.handshake());
    });

    let output = Command::new(env!("CARGO_BIN_EXE_espapi"))
        .env_remove("ESPHOME_HOST")
        .args(["--log-level", "off", "info", "--host", "127.0.0.1"])
        .args(["--port", &port.to_string(), "--password", "nope"])
        .output()
        .expect("espapi should run");

    assert_eq!(output.status.code(), Some(50));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid password"));
    device.join().expect("device script should not panic");
}

#[test]
fn refused_connection_exits_3() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("should bind");
        listener.local_addr().expect("address").port()
    };

    let output = espapi(port, &["info"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn switch_on_sends_the_command() {
    let (port, device) = spawn_device(|device| {
        device.login(&[switch(9, "relay")]);
        let command: proto::SwitchCommandRequest = device.expect();
        assert_eq!(command.key, 9);
        assert!(command.state);
        device.farewell();
    });

    let output = espapi(port, &["switch", "relay", "on"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let out: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(out["state"], true);

    device.join().expect("device script should not panic");
}

#[test]
fn toggle_flips_the_reported_state() {
    let (port, device) = spawn_device(|device| {
        device.login(&[switch(9, "relay")]);
        device.send(proto::SwitchStateResponse { key: 9, state: true });
        let command: proto::SwitchCommandRequest = device.expect();
        assert!(!command.state);
        device.farewell();
    });

    let output = espapi(port, &["switch", "relay", "toggle"]);
    assert!(output.status.success());
    device.join().expect("device script should not panic");
}

#[test]
fn unknown_switch_exits_4() {
    let (port, device) = spawn_device(|device| {
        device.login(&[]);
    });

    let output = espapi(port, &["switch", "garage", "off"]);
    assert_eq!(output.status.code(), Some(4));
    device.join().expect("device script should not panic");
}

#[test]
fn entities_lists_reported_state() {
    let (port, device) = spawn_device(|device| {
        device.login(&[
            switch(1, "relay"),
            proto::ListEntitiesSensorResponse {
                object_id: "temperature".into(),
                key: 2,
                name: "Temperature".into(),
                unique_id: "porch-temperature".into(),
                icon: String::new(),
                unit_of_measurement: "°C".into(),
                accuracy_decimals: 1,
                force_update: false,
            }
            .into(),
        ]);
        device.send(proto::SwitchStateResponse { key: 1, state: true });
        device.send(proto::SensorStateResponse {
            key: 2,
            state: 21.5,
            missing_state: false,
        });
        device.farewell();
    });

    let output = espapi(port, &["entities", "--settle", "3s"]);
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    let rows = rows.as_array().expect("entities should be an array");
    assert_eq!(rows.len(), 2);

    let sensor = rows
        .iter()
        .find(|row| row["kind"] == "sensor")
        .expect("sensor row");
    assert_eq!(sensor["valid"], true);
    assert_eq!(sensor["state"]["value"], 21.5);

    device.join().expect("device script should not panic");
}

#[test]
fn version_prints_name() {
    let output = Command::new(env!("CARGO_BIN_EXE_espapi"))
        .arg("version")
        .output()
        .expect("espapi should run");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("espapi "));
}
