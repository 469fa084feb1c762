use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use espapi_frame::proto::{self, LogLevel};
use espapi_frame::{Message, MessageKind};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::entity::Entity;
use crate::error::{ClientError, Result};
use crate::kinds::Camera;
use crate::logs::LogStream;
use crate::registry::{Entities, Maps};
use crate::sync::lock;

/// What the device said about itself in the hello exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerHello {
    pub api_version_major: u32,
    pub api_version_minor: u32,
    pub server_info: String,
}

impl From<proto::HelloResponse> for ServerHello {
    fn from(hello: proto::HelloResponse) -> Self {
        Self {
            api_version_major: hello.api_version_major,
            api_version_minor: hello.api_version_minor,
            server_info: hello.server_info,
        }
    }
}

/// Static facts about the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub uses_password: bool,
    pub name: String,
    pub mac_address: String,
    pub esphome_version: String,
    pub compilation_time: String,
    pub model: String,
    pub has_deep_sleep: bool,
}

impl From<proto::DeviceInfoResponse> for DeviceInfo {
    fn from(info: proto::DeviceInfoResponse) -> Self {
        Self {
            uses_password: info.uses_password,
            name: info.name,
            mac_address: info.mac_address,
            esphome_version: info.esphome_version,
            compilation_time: info.compilation_time,
            model: info.model,
            has_deep_sleep: info.has_deep_sleep,
        }
    }
}

/// A logged-in session with one device.
///
/// ```no_run
/// use espapi_client::Client;
///
/// let client = Client::connect("livingroom.local:6053", "secret")?;
/// for (id, sensor) in &client.entities().sensors {
///     println!("{id}: {:?}", sensor.state());
/// }
/// client.close()?;
/// # Ok::<(), espapi_client::ClientError>(())
/// ```
#[derive(Debug)]
pub struct Client {
    connection: Connection,
    hello: Mutex<Option<ServerHello>>,
}

impl Client {
    pub fn dial(addr: &str, timeout: Duration) -> Result<Self> {
        Ok(Self::from_connection(Connection::dial(addr, timeout)?))
    }

    pub fn dial_with_config(addr: &str, config: ClientConfig) -> Result<Self> {
        Ok(Self::from_connection(Connection::dial_with_config(addr, config)?))
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self {
            connection,
            hello: Mutex::new(None),
        }
    }

    /// Dial with default settings and log in.
    pub fn connect(addr: &str, password: &str) -> Result<Self> {
        let client = Self::dial_with_config(addr, ClientConfig::default())?;
        client.login(password)?;
        Ok(client)
    }

    /// Authenticate, enumerate entities and subscribe to state updates.
    ///
    /// A rejected password leaves the entity registry untouched.
    pub fn login(&self, password: &str) -> Result<()> {
        let shared = self.connection.shared();

        let hello: proto::HelloResponse = self.connection.request(proto::HelloRequest {
            client_info: shared.config.client_info.clone(),
        })?;
        debug!(server_info = %hello.server_info, "hello");
        *lock(&self.hello) = Some(hello.into());

        let connect: proto::ConnectResponse = self.connection.request(proto::ConnectRequest {
            password: password.to_string(),
        })?;
        if connect.invalid_password {
            return Err(ClientError::Authentication);
        }

        let maps = self.enumerate()?;
        let count = maps.len();
        shared.registry.replace(maps);

        self.connection.send(proto::SubscribeStatesRequest {})?;
        info!(entities = count, "logged in");
        Ok(())
    }

    fn enumerate(&self) -> Result<Maps> {
        let shared = self.connection.shared();
        let link = Arc::downgrade(shared);
        let timeout = shared.config.timeout;

        self.connection.send(proto::ListEntitiesRequest {})?;
        let mut maps = Maps::default();
        loop {
            let message = if timeout.is_zero() {
                self.connection.next_message()?
            } else {
                self.connection.next_message_timeout(timeout)?
            };
            match message.kind() {
                MessageKind::ListEntitiesDoneResponse => return Ok(maps),
                kind if kind.is_entity_description() => {
                    if !maps.insert(&message, &link) {
                        debug!(kind = %kind, "skipping description");
                    }
                }
                kind => debug!(kind = %kind, "ignoring message during enumeration"),
            }
        }
    }

    /// The device's hello reply, once [`login`](Self::login) got that far.
    pub fn server_hello(&self) -> Option<ServerHello> {
        lock(&self.hello).clone()
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        let info: proto::DeviceInfoResponse =
            self.connection.request(proto::DeviceInfoRequest {})?;
        Ok(info.into())
    }

    /// Snapshot of the entities found at login.
    pub fn entities(&self) -> Entities {
        self.connection.shared().registry.snapshot()
    }

    /// The device's first camera.
    pub fn camera(&self) -> Result<Arc<Entity<Camera>>> {
        self.entities().camera()
    }

    /// Fire-and-forget keepalive.
    pub fn ping(&self) -> Result<()> {
        self.connection.send(proto::PingRequest {})
    }

    /// Stream device logs at `level` and above.
    pub fn logs(&self, level: LogLevel) -> Result<LogStream> {
        self.subscribe_logs(level, false)
    }

    /// Like [`logs`](Self::logs); with `dump_config` the device first
    /// replays its configuration.
    pub fn subscribe_logs(&self, level: LogLevel, dump_config: bool) -> Result<LogStream> {
        LogStream::open(self.connection.shared(), level, dump_config)
    }

    pub fn close(&self) -> Result<()> {
        self.connection.close()
    }

    pub fn last_message(&self) -> Option<SystemTime> {
        self.connection.last_message()
    }

    pub fn next_message(&self) -> Result<Message> {
        self.connection.next_message()
    }

    pub fn next_message_timeout(&self, timeout: Duration) -> Result<Message> {
        self.connection.next_message_timeout(timeout)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
