#![allow(dead_code)]

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use espapi_client::{Client, ClientConfig, FixedClock};
use espapi_frame::{proto, FrameReader, FrameWriter, Message, MessageKind, Schema};

pub const PASSWORD: &str = "hunter2";
pub const DEVICE_TIME: u32 = 1_700_000_000;

/// The device end of one accepted connection.
pub struct DeviceSide {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
}

impl DeviceSide {
    fn new(stream: TcpStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("device read timeout should apply");
        let reader = FrameReader::new(stream.try_clone().expect("device stream should clone"));
        Self {
            reader,
            writer: FrameWriter::new(stream),
        }
    }

    pub fn recv(&mut self) -> Message {
        self.reader
            .read_message()
            .expect("device should receive a message")
    }

    /// Read the next message and require it to be `R`.
    pub fn expect<R: Schema>(&mut self) -> R {
        let message = self.recv();
        let kind = message.kind();
        R::from_message(message)
            .unwrap_or_else(|| panic!("device expected {}, got {kind}", R::KIND))
    }

    /// Read until a message of `kind` shows up, skipping anything else.
    pub fn skip_until(&mut self, kind: MessageKind) -> Message {
        loop {
            let message = self.recv();
            if message.kind() == kind {
                return message;
            }
        }
    }

    pub fn send(&mut self, message: impl Into<Message>) {
        self.writer
            .write_message(&message.into())
            .expect("device should send");
    }

    /// Write bytes that bypass the frame codec.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.writer.get_mut();
        stream.write_all(bytes).expect("device should write raw bytes");
        stream.flush().expect("device should flush");
    }

    /// Answer hello and connect; returns whether the password matched.
    pub fn handshake(&mut self) -> bool {
        let hello: proto::HelloRequest = self.expect();
        assert!(!hello.client_info.is_empty());
        self.send(proto::HelloResponse {
            api_version_major: 1,
            api_version_minor: 3,
            server_info: "camera0 (esphome v1.14.3)".into(),
        });

        let connect: proto::ConnectRequest = self.expect();
        let accepted = connect.password == PASSWORD;
        self.send(proto::ConnectResponse {
            invalid_password: !accepted,
        });
        accepted
    }

    /// Complete a full login, announcing `entities`.
    pub fn serve_login(&mut self, entities: &[Message]) {
        assert!(self.handshake(), "client should send the right password");
        let _: proto::ListEntitiesRequest = self.expect();
        for entity in entities {
            self.send(entity.clone());
        }
        self.send(proto::ListEntitiesDoneResponse {});
        let _: proto::SubscribeStatesRequest = self.expect();
    }

    /// Block until the client goes away.
    pub fn drain(&mut self) {
        while self.reader.read_message().is_ok() {}
    }
}

/// An in-process device on an ephemeral loopback port.
pub struct FakeDevice {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl FakeDevice {
    /// Accept one connection and run `script` against it.
    pub fn spawn<F>(script: F) -> Self
    where
        F: FnOnce(&mut DeviceSide) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("device should bind");
        let addr = listener.local_addr().expect("device should have an address");
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("device should accept");
            let mut side = DeviceSide::new(stream);
            script(&mut side);
        });
        Self { addr, handle }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Wait for the script to finish, surfacing its panics.
    pub fn join(self) {
        self.handle.join().expect("device script should not panic");
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        poll_interval: Duration::from_millis(20),
        close_timeout: Duration::from_secs(1),
        ..ClientConfig::default()
            .with_timeout(Duration::from_secs(3))
            .with_client_info("espapi-tests")
            .with_clock(FixedClock(DEVICE_TIME))
    }
}

pub fn dial(device: &FakeDevice) -> Client {
    Client::dial_with_config(&device.addr(), test_config()).expect("client should dial")
}

pub fn sensor(key: u32, object_id: &str) -> Message {
    proto::ListEntitiesSensorResponse {
        object_id: object_id.into(),
        key,
        name: object_id.replace('_', " "),
        unique_id: format!("porch-{object_id}"),
        icon: "mdi:thermometer".into(),
        unit_of_measurement: "°C".into(),
        accuracy_decimals: 1,
        force_update: false,
    }
    .into()
}

pub fn camera(key: u32) -> Message {
    proto::ListEntitiesCameraResponse {
        object_id: "porch_cam".into(),
        key,
        name: "Porch Cam".into(),
        unique_id: "porch-cam".into(),
    }
    .into()
}

pub fn switch(key: u32, object_id: &str) -> Message {
    proto::ListEntitiesSwitchResponse {
        object_id: object_id.into(),
        key,
        name: object_id.into(),
        unique_id: format!("porch-{object_id}"),
        icon: String::new(),
        assumed_state: false,
    }
    .into()
}

pub fn light(key: u32, object_id: &str) -> Message {
    proto::ListEntitiesLightResponse {
        object_id: object_id.into(),
        key,
        name: object_id.into(),
        unique_id: format!("porch-{object_id}"),
        supports_brightness: true,
        supports_rgb: true,
        supports_white_value: false,
        supports_color_temperature: false,
        min_mireds: 153.0,
        max_mireds: 500.0,
        effects: vec!["None".into(), "Rainbow".into()],
    }
    .into()
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
