//! Requests the device makes of the client, answered from the receive loop.

use espapi_frame::{proto, Message, MessageKind};
use tracing::{debug, warn};

use crate::connection::Shared;

/// What the receive loop should do with a message after the responder saw it.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Answered here; nothing else to do.
    Handled,
    /// The device asked to disconnect and has been acknowledged.
    Stop,
    /// A state update already applied to the registry. Still offered to a
    /// waiter, never queued.
    Dispatched(Message),
    /// Everything else: offer to a waiter, then queue.
    Unhandled(Message),
}

pub(crate) fn respond(shared: &Shared, message: Message) -> Outcome {
    match message.kind() {
        MessageKind::DisconnectRequest => {
            debug!("device requested disconnect");
            reply(shared, proto::DisconnectResponse {});
            Outcome::Stop
        }
        MessageKind::PingRequest => {
            reply(shared, proto::PingResponse {});
            Outcome::Handled
        }
        MessageKind::GetTimeRequest => {
            let epoch_seconds = shared.config.clock.epoch_seconds();
            reply(shared, proto::GetTimeResponse { epoch_seconds });
            Outcome::Handled
        }
        kind if kind.is_state_update() => {
            if !shared.registry.dispatch(&message) {
                debug!(kind = %kind, "state update for unknown entity");
            }
            Outcome::Dispatched(message)
        }
        _ => Outcome::Unhandled(message),
    }
}

fn reply(shared: &Shared, message: impl Into<Message>) {
    let message = message.into();
    if let Err(err) = shared.send(&message) {
        warn!(kind = %message.kind(), error = %err, "automatic reply failed");
    }
}
