use std::sync::Arc;

use espapi_frame::proto::{self, LogLevel};
use espapi_frame::{Message, MessageKind};
use serde::Serialize;
use tracing::debug;

use crate::connection::Shared;
use crate::correlation::Waiter;
use crate::error::{ClientError, Result};

/// One line of device log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
    pub send_failed: bool,
}

impl From<proto::SubscribeLogsResponse> for LogEntry {
    fn from(entry: proto::SubscribeLogsResponse) -> Self {
        Self {
            level: LogLevel::try_from(entry.level).unwrap_or_default(),
            tag: entry.tag,
            message: entry.message,
            send_failed: entry.send_failed,
        }
    }
}

/// Device log lines, in arrival order.
///
/// The stream ends when the connection closes or another subscription takes
/// over; [`take_error`](Self::take_error) tells which. It cannot be restarted.
#[derive(Debug)]
pub struct LogStream {
    waiter: Option<Waiter>,
    error: Option<ClientError>,
}

impl LogStream {
    /// Register the standing waiter, then ask the device for logs.
    pub(crate) fn open(shared: &Arc<Shared>, level: LogLevel, dump_config: bool) -> Result<Self> {
        let waiter = shared.register_wait(MessageKind::SubscribeLogsResponse)?;
        shared.send(&Message::from(proto::SubscribeLogsRequest {
            level: level as i32,
            dump_config,
        }))?;
        debug!(?level, dump_config, "subscribed to logs");
        Ok(Self {
            waiter: Some(waiter),
            error: None,
        })
    }

    /// Why the stream ended, if it has.
    pub fn take_error(&mut self) -> Option<ClientError> {
        self.error.take()
    }

    pub fn is_finished(&self) -> bool {
        self.waiter.is_none()
    }
}

impl Iterator for LogStream {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        let waiter = self.waiter.as_ref()?;
        match waiter.recv() {
            Ok(Message::SubscribeLogsResponse(entry)) => Some(entry.into()),
            Ok(other) => {
                self.error = Some(ClientError::UnexpectedMessage {
                    expected: MessageKind::SubscribeLogsResponse,
                    got: other.kind(),
                });
                self.waiter = None;
                None
            }
            Err(err) => {
                debug!(error = %err, "log stream ended");
                self.error = Some(err);
                self.waiter = None;
                None
            }
        }
    }
}
