//! One TCP session with a device: a serialized writer, a background receive
//! loop, and request/response correlation on top of both.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use espapi_frame::{proto, FrameConfig, FrameReader, FrameWriter, Message, MessageKind, Schema};
use espapi_transport::{ApiStream, TcpTransport, TransportError};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::correlation::{Waiter, WaiterTable};
use crate::error::{ClientError, Result, Terminal};
use crate::registry::Registry;
use crate::responder::{self, Outcome};
use crate::sync::lock;

const RECEIVE_THREAD_NAME: &str = "espapi-recv";

/// State shared between the caller-facing handle, the receive loop, and
/// every entity that can send commands.
pub(crate) struct Shared {
    writer: Mutex<FrameWriter<ApiStream>>,
    socket: ApiStream,
    pub(crate) waiters: Arc<WaiterTable>,
    pub(crate) registry: Registry,
    pub(crate) config: ClientConfig,
    last_message: Mutex<Option<SystemTime>>,
    gates: Mutex<HashMap<MessageKind, Arc<Mutex<()>>>>,
    stop: AtomicBool,
    closing: AtomicBool,
}

impl Shared {
    /// Send with the configured write deadline.
    pub(crate) fn send(&self, message: &Message) -> Result<()> {
        self.send_with_deadline(message, self.config.deadline())
    }

    /// Send one frame, failing if the write does not finish within `deadline`.
    ///
    /// A failed send is reported to the caller only; the receive loop decides
    /// whether the connection is dead.
    pub(crate) fn send_with_deadline(
        &self,
        message: &Message,
        deadline: Option<Duration>,
    ) -> Result<()> {
        if let Some(terminal) = self.waiters.terminal() {
            return Err(terminal.into());
        }

        let mut writer = lock(&self.writer);
        writer.get_ref().set_write_timeout(deadline)?;
        let written = writer.write_message(message);
        let _ = writer.get_ref().set_write_timeout(None);
        drop(writer);

        match written {
            Ok(()) => {
                trace!(kind = %message.kind(), "sent");
                Ok(())
            }
            Err(err) if err.is_timeout() => Err(ClientError::Timeout(deadline.unwrap_or_default())),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn register_wait(&self, kind: MessageKind) -> Result<Waiter> {
        self.waiters.register(kind)
    }

    /// Send `message` and wait for the next message of kind `expected`.
    ///
    /// Callers expecting the same kind take turns. A zero `timeout` waits
    /// until the reply arrives or the connection dies.
    pub(crate) fn request_response(
        &self,
        message: &Message,
        expected: MessageKind,
        timeout: Duration,
    ) -> Result<Message> {
        let gate = self.gate(expected);
        let _turn = lock(&gate);

        let waiter = self.register_wait(expected)?;
        self.send(message)?;
        if timeout.is_zero() {
            waiter.recv()
        } else {
            waiter.recv_timeout(timeout)
        }
    }

    /// Typed form of [`request_response`](Self::request_response).
    pub(crate) fn request<R: Schema>(&self, message: impl Into<Message>) -> Result<R> {
        let reply = self.request_response(&message.into(), R::KIND, self.config.timeout)?;
        let got = reply.kind();
        R::from_message(reply).ok_or(ClientError::UnexpectedMessage {
            expected: R::KIND,
            got,
        })
    }

    fn gate(&self, kind: MessageKind) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.gates).entry(kind).or_default())
    }

    fn stamp(&self) {
        *lock(&self.last_message) = Some(SystemTime::now());
    }

    pub(crate) fn last_message(&self) -> Option<SystemTime> {
        *lock(&self.last_message)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.stop.load(Ordering::Acquire)
            || self.closing.load(Ordering::Acquire)
            || self.waiters.terminal().is_some()
    }

    fn shutdown_socket(&self) {
        if let Err(err) = self.socket.shutdown() {
            trace!(error = %err, "socket shutdown");
        }
    }
}

/// A live connection to one device.
///
/// Messages nobody is waiting for land in a bounded queue read with
/// [`next_message`](Self::next_message). When that queue is full the receive
/// loop stops reading from the socket until a message is taken.
pub struct Connection {
    shared: Arc<Shared>,
    inbound: Mutex<Receiver<Message>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Dial `addr` with default settings and `timeout` as the dial and
    /// request timeout.
    pub fn dial(addr: &str, timeout: Duration) -> Result<Self> {
        Self::dial_with_config(addr, ClientConfig::default().with_timeout(timeout))
    }

    pub fn dial_with_config(addr: &str, config: ClientConfig) -> Result<Self> {
        let stream = match config.deadline() {
            Some(timeout) => TcpTransport::dial_timeout(addr, timeout)?,
            None => TcpTransport::dial(addr)?,
        };
        Self::from_stream(stream, config)
    }

    /// Start the receive loop over an already connected stream.
    pub fn from_stream(stream: ApiStream, config: ClientConfig) -> Result<Self> {
        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
            read_timeout: Some(config.read_poll()),
            write_timeout: None,
        };
        let reader = FrameReader::with_config_stream(stream.try_clone()?, frame_config.clone())?;
        let socket = stream.try_clone()?;
        let writer = FrameWriter::with_config_stream(stream, frame_config)?;

        let (tx, rx) = mpsc::sync_channel(config.inbound_capacity.max(1));
        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            socket,
            waiters: Arc::new(WaiterTable::new()),
            registry: Registry::new(),
            config,
            last_message: Mutex::new(None),
            gates: Mutex::new(HashMap::new()),
            stop: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        });

        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(RECEIVE_THREAD_NAME.to_string())
                .spawn(move || receive_loop(shared, reader, tx))
                .map_err(TransportError::Io)?
        };

        if let Ok(peer) = shared.socket.peer_addr() {
            debug!(%peer, "connection established");
        }

        Ok(Self {
            shared,
            inbound: Mutex::new(rx),
            receiver: Mutex::new(Some(handle)),
        })
    }

    /// Fire-and-forget send with the configured write deadline.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.shared.send(&message.into())
    }

    pub fn send_with_deadline(
        &self,
        message: impl Into<Message>,
        deadline: Option<Duration>,
    ) -> Result<()> {
        self.shared.send_with_deadline(&message.into(), deadline)
    }

    /// Claim the next message of `kind` before it reaches the inbound queue.
    ///
    /// Registering displaces any earlier waiter for the same kind.
    pub fn register_wait(&self, kind: MessageKind) -> Result<Waiter> {
        self.shared.register_wait(kind)
    }

    pub fn unregister(&self, kind: MessageKind) {
        self.shared.waiters.unregister(kind);
    }

    pub fn request_response(
        &self,
        message: impl Into<Message>,
        expected: MessageKind,
        timeout: Duration,
    ) -> Result<Message> {
        self.shared
            .request_response(&message.into(), expected, timeout)
    }

    /// Send `message` and wait for the reply schema `R` with the configured
    /// timeout.
    pub fn request<R: Schema>(&self, message: impl Into<Message>) -> Result<R> {
        self.shared.request(message)
    }

    /// Block until an unclaimed message arrives.
    pub fn next_message(&self) -> Result<Message> {
        self.check_terminal()?;
        lock(&self.inbound)
            .recv()
            .map_err(|_| self.closed_error())
    }

    pub fn next_message_timeout(&self, timeout: Duration) -> Result<Message> {
        self.check_terminal()?;
        match lock(&self.inbound).recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => Err(ClientError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed_error()),
        }
    }

    /// Say goodbye to the device and stop the receive loop.
    ///
    /// Returns the result of the disconnect exchange. Calling `close` again
    /// is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let exchange = if self.shared.waiters.terminal().is_some() {
            Ok(())
        } else {
            self.shared
                .request_response(
                    &proto::DisconnectRequest {}.into(),
                    MessageKind::DisconnectResponse,
                    self.shared.config.close_timeout,
                )
                .map(|_| ())
        };

        self.shared.stop.store(true, Ordering::Release);
        self.shared.waiters.close_all(Terminal::closed());
        self.shared.shutdown_socket();
        info!("connection closed");
        exchange
    }

    /// When the last message of any kind arrived.
    pub fn last_message(&self) -> Option<SystemTime> {
        self.shared.last_message()
    }

    /// The error every operation fails with once the connection is dead.
    pub fn terminal_error(&self) -> Option<ClientError> {
        self.shared.waiters.terminal().map(ClientError::from)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Wait for the receive loop to exit. Only useful after `close` or once
    /// the connection has failed.
    pub fn join(&self) {
        let handle = lock(&self.receiver).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("receive loop panicked");
            }
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn check_terminal(&self) -> Result<()> {
        match self.shared.waiters.terminal() {
            Some(terminal) => Err(terminal.into()),
            None => Ok(()),
        }
    }

    fn closed_error(&self) -> ClientError {
        self.shared
            .waiters
            .terminal()
            .unwrap_or_else(Terminal::closed)
            .into()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.shared.socket.peer_addr().ok())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn receive_loop(shared: Arc<Shared>, reader: FrameReader<ApiStream>, inbound: SyncSender<Message>) {
    let terminal = panic::catch_unwind(AssertUnwindSafe(|| pump(&shared, reader, inbound)))
        .unwrap_or_else(|_| {
            warn!("receive loop panicked");
            Terminal::Connection("receive loop panicked".to_string())
        });

    debug!(?terminal, "receive loop exiting");
    shared.waiters.close_all(terminal);
    shared.shutdown_socket();
}

/// Read and route messages until something ends the session.
fn pump(shared: &Arc<Shared>, mut reader: FrameReader<ApiStream>, inbound: SyncSender<Message>) -> Terminal {
    loop {
        if shared.stop.load(Ordering::Acquire) {
            break Terminal::closed();
        }

        let message = match reader.read_message() {
            Ok(message) => message,
            Err(err) if err.is_timeout() => continue,
            Err(err) => {
                if shared.stop.load(Ordering::Acquire) {
                    break Terminal::closed();
                }
                warn!(error = %err, "receive loop failed");
                break Terminal::from_frame(&err);
            }
        };

        shared.stamp();
        trace!(kind = %message.kind(), "received");

        match responder::respond(shared, message) {
            Outcome::Handled => {}
            Outcome::Stop => break Terminal::closed_by_device(),
            Outcome::Dispatched(message) => {
                if let Some(message) = shared.waiters.deliver(message) {
                    trace!(kind = %message.kind(), "state update applied");
                }
            }
            Outcome::Unhandled(message) => {
                let Some(message) = shared.waiters.deliver(message) else {
                    continue;
                };
                if waiter_only(message.kind()) {
                    trace!(kind = %message.kind(), "dropping unclaimed message");
                    continue;
                }
                if inbound.send(message).is_err() {
                    // The handle is gone; nobody can read from this connection.
                    break Terminal::closed();
                }
            }
        }
    }
}

/// Kinds that only mean something to whoever asked for them: stream chunks
/// and replies to fire-and-forget requests. Unclaimed, they are dropped so
/// they cannot fill the inbound queue.
fn waiter_only(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::CameraImageResponse
            | MessageKind::SubscribeLogsResponse
            | MessageKind::PingResponse
            | MessageKind::DisconnectResponse
    )
}
