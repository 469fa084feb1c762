use std::sync::Arc;
use std::time::Duration;

use espapi_frame::DEFAULT_MAX_PAYLOAD;

use crate::clock::{Clock, SystemClock};

/// Default timeout for dialing and for each request/response round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the disconnect exchange performed by `close`.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the receive loop wakes up to check for a stop request.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the queue holding messages nobody was waiting for.
pub const DEFAULT_INBOUND_CAPACITY: usize = 16;

/// Identifies this client in `HelloRequest`.
pub const DEFAULT_CLIENT_INFO: &str = concat!("espapi ", env!("CARGO_PKG_VERSION"));

/// Connection and login settings.
///
/// A zero `timeout` means "wait forever" for request/response calls and no
/// deadline on dial or writes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sent to the device in `HelloRequest`.
    pub client_info: String,
    /// Dial timeout, write deadline, and per-request wait.
    pub timeout: Duration,
    /// Bound on the disconnect round trip in `close`.
    pub close_timeout: Duration,
    /// Read timeout used by the receive loop to notice a stop request.
    pub poll_interval: Duration,
    /// Capacity of the inbound queue; a full queue stalls the receive loop.
    pub inbound_capacity: usize,
    /// Largest payload accepted from the device.
    pub max_payload_size: usize,
    /// Answers `GetTimeRequest`.
    pub clock: Arc<dyn Clock>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: DEFAULT_CLIENT_INFO.to_string(),
            timeout: DEFAULT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            clock: Arc::new(SystemClock),
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client_info(mut self, client_info: impl Into<String>) -> Self {
        self.client_info = client_info.into();
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Write deadline for a send, `None` when the timeout is zero.
    pub(crate) fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Socket read timeout for the receive loop; never zero.
    pub(crate) fn read_poll(&self) -> Duration {
        if self.poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            self.poll_interval
        }
    }
}
