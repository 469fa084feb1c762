//! Single-slot waiters keyed by message kind.
//!
//! The wire carries no request ids, so a reply is matched to its caller by
//! kind alone. At most one waiter exists per kind; registering a second one
//! displaces the first, which then fails with [`ClientError::Cancelled`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SendError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use espapi_frame::{Message, MessageKind};
use tracing::{debug, trace};

use crate::error::{ClientError, Result, Terminal};
use crate::sync::lock;

enum Delivery {
    Message(Message),
    Cancelled,
}

struct Slot {
    id: u64,
    tx: SyncSender<Delivery>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    slots: HashMap<MessageKind, Slot>,
    terminal: Option<Terminal>,
}

/// Registry of waiters plus the connection's sticky terminal error.
#[derive(Default)]
pub struct WaiterTable {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a waiter for `kind`, cancelling any waiter already there.
    ///
    /// Fails immediately with the terminal error once the connection is dead.
    pub fn register(self: &Arc<Self>, kind: MessageKind) -> Result<Waiter> {
        let (tx, rx) = mpsc::sync_channel(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut state = lock(&self.state);
        if let Some(terminal) = &state.terminal {
            return Err(terminal.clone().into());
        }
        let slot = Slot {
            id,
            tx,
            cancelled: Arc::clone(&cancelled),
        };
        if let Some(previous) = state.slots.insert(kind, slot) {
            debug!(kind = %kind, "displacing waiter");
            previous.cancelled.store(true, Ordering::Release);
            let _ = previous.tx.try_send(Delivery::Cancelled);
        }
        drop(state);

        trace!(kind = %kind, id, "waiter registered");
        Ok(Waiter {
            kind,
            id,
            rx,
            cancelled,
            table: Arc::clone(self),
        })
    }

    /// Remove whatever waiter is registered for `kind`.
    ///
    /// The removed waiter observes a closed slot, reported as cancellation.
    pub fn unregister(&self, kind: MessageKind) {
        if let Some(slot) = lock(&self.state).slots.remove(&kind) {
            slot.cancelled.store(true, Ordering::Release);
        }
    }

    fn unregister_if(&self, kind: MessageKind, id: u64) {
        let mut state = lock(&self.state);
        if state.slots.get(&kind).is_some_and(|slot| slot.id == id) {
            state.slots.remove(&kind);
        }
    }

    pub fn is_waiting(&self, kind: MessageKind) -> bool {
        lock(&self.state).slots.contains_key(&kind)
    }

    /// Hand `message` to the waiter for its kind.
    ///
    /// Blocks while the waiter's slot is full. Returns the message when no
    /// live waiter claimed it.
    pub fn deliver(&self, message: Message) -> Option<Message> {
        let kind = message.kind();
        let mut message = message;
        loop {
            let (id, tx) = {
                let state = lock(&self.state);
                match state.slots.get(&kind) {
                    Some(slot) => (slot.id, slot.tx.clone()),
                    None => return Some(message),
                }
            };

            match tx.send(Delivery::Message(message)) {
                Ok(()) => return None,
                Err(SendError(Delivery::Message(returned))) => {
                    // The waiter went away between lookup and send.
                    self.unregister_if(kind, id);
                    message = returned;
                }
                Err(SendError(Delivery::Cancelled)) => return None,
            }
        }
    }

    /// Store the terminal error and close every slot.
    ///
    /// Only the first terminal error sticks.
    pub fn close_all(&self, terminal: Terminal) {
        let mut state = lock(&self.state);
        if state.terminal.is_none() {
            debug!(?terminal, "connection terminal");
            state.terminal = Some(terminal);
        }
        state.slots.clear();
    }

    pub fn terminal(&self) -> Option<Terminal> {
        lock(&self.state).terminal.clone()
    }
}

/// A registered wait for one message kind.
///
/// Dropping the waiter unregisters it, unless a newer waiter has already
/// taken the slot.
pub struct Waiter {
    kind: MessageKind,
    id: u64,
    rx: Receiver<Delivery>,
    cancelled: Arc<AtomicBool>,
    table: Arc<WaiterTable>,
}

impl Waiter {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Block until a message arrives.
    pub fn recv(&self) -> Result<Message> {
        match self.rx.recv() {
            Ok(delivery) => self.settle(delivery),
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Block for at most `timeout`.
    ///
    /// On timeout the waiter is unregistered before `Timeout` is returned, so
    /// a fresh registration for the same kind starts from a clean slot.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message> {
        match self.rx.recv_timeout(timeout) {
            Ok(delivery) => self.settle(delivery),
            Err(RecvTimeoutError::Timeout) => {
                self.table.unregister_if(self.kind, self.id);
                // A delivery may have raced the removal.
                match self.rx.try_recv() {
                    Ok(delivery) => self.settle(delivery),
                    Err(_) => Err(ClientError::Timeout(timeout)),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.closed_error()),
        }
    }

    /// Like [`recv_timeout`](Self::recv_timeout), but an expired wait leaves
    /// the registration in place and yields `None`. Used by standing waiters.
    pub fn poll(&self, timeout: Duration) -> Result<Option<Message>> {
        match self.rx.recv_timeout(timeout) {
            Ok(delivery) => self.settle(delivery).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed_error()),
        }
    }

    /// Non-blocking check for a pending message.
    pub fn try_recv(&self) -> Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(delivery) => self.settle(delivery).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.closed_error()),
        }
    }

    fn settle(&self, delivery: Delivery) -> Result<Message> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(ClientError::Cancelled(self.kind));
        }
        match delivery {
            Delivery::Message(message) => Ok(message),
            Delivery::Cancelled => Err(ClientError::Cancelled(self.kind)),
        }
    }

    fn closed_error(&self) -> ClientError {
        if self.cancelled.load(Ordering::Acquire) {
            return ClientError::Cancelled(self.kind);
        }
        match self.table.terminal() {
            Some(terminal) => terminal.into(),
            None => ClientError::Cancelled(self.kind),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.table.unregister_if(self.kind, self.id);
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use espapi_frame::proto;

    use super::*;

    fn table() -> Arc<WaiterTable> {
        Arc::new(WaiterTable::new())
    }

    fn device_info(name: &str) -> Message {
        proto::DeviceInfoResponse {
            name: name.to_string(),
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn delivers_to_registered_waiter() {
        let table = table();
        let waiter = table
            .register(MessageKind::DeviceInfoResponse)
            .expect("register should succeed");

        assert!(table.deliver(device_info("node")).is_none());

        let message = waiter.recv().expect("waiter should receive");
        assert_eq!(message, device_info("node"));
    }

    #[test]
    fn unclaimed_message_is_returned() {
        let table = table();
        let _other = table.register(MessageKind::PingResponse).unwrap();

        let returned = table.deliver(device_info("node"));
        assert_eq!(returned, Some(device_info("node")));
    }

    #[test]
    fn displaced_waiter_is_cancelled_not_served() {
        let table = table();
        let first = table.register(MessageKind::DeviceInfoResponse).unwrap();

        let blocked = thread::spawn(move || first.recv());
        thread::sleep(Duration::from_millis(20));

        let second = table.register(MessageKind::DeviceInfoResponse).unwrap();
        let outcome = blocked.join().expect("waiter thread should not panic");
        assert!(matches!(
            outcome,
            Err(ClientError::Cancelled(MessageKind::DeviceInfoResponse))
        ));

        assert!(table.deliver(device_info("real")).is_none());
        assert_eq!(second.recv().unwrap(), device_info("real"));
    }

    #[test]
    fn displaced_waiter_never_sees_later_message() {
        let table = table();
        let first = table.register(MessageKind::DeviceInfoResponse).unwrap();
        let second = table.register(MessageKind::DeviceInfoResponse).unwrap();

        assert!(table.deliver(device_info("real")).is_none());

        assert!(matches!(first.recv(), Err(ClientError::Cancelled(_))));
        assert_eq!(second.recv().unwrap(), device_info("real"));
    }

    #[test]
    fn timeout_leaves_no_residual_waiter() {
        let table = table();
        let waiter = table.register(MessageKind::DeviceInfoResponse).unwrap();

        let started = Instant::now();
        let err = waiter
            .recv_timeout(Duration::from_millis(30))
            .expect_err("nothing was delivered");
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(matches!(err, ClientError::Timeout(_)));
        assert!(!table.is_waiting(MessageKind::DeviceInfoResponse));

        let fresh = table.register(MessageKind::DeviceInfoResponse).unwrap();
        assert!(table.deliver(device_info("late")).is_none());
        assert_eq!(
            fresh.recv_timeout(Duration::from_secs(1)).unwrap(),
            device_info("late")
        );
    }

    #[test]
    fn poll_keeps_registration() {
        let table = table();
        let waiter = table.register(MessageKind::SubscribeLogsResponse).unwrap();

        assert!(waiter.poll(Duration::from_millis(5)).unwrap().is_none());
        assert!(table.is_waiting(MessageKind::SubscribeLogsResponse));
    }

    #[test]
    fn drop_unregisters_only_own_slot() {
        let table = table();
        let first = table.register(MessageKind::PingResponse).unwrap();
        let second = table.register(MessageKind::PingResponse).unwrap();

        drop(first);
        assert!(table.is_waiting(MessageKind::PingResponse));

        drop(second);
        assert!(!table.is_waiting(MessageKind::PingResponse));
    }

    #[test]
    fn close_all_wakes_waiters_with_terminal() {
        let table = table();
        let waiter = table.register(MessageKind::HelloResponse).unwrap();

        let blocked = thread::spawn(move || waiter.recv());
        thread::sleep(Duration::from_millis(20));
        table.close_all(Terminal::Connection("reset by peer".into()));

        let outcome = blocked.join().unwrap();
        assert!(matches!(outcome, Err(ClientError::Connection(reason)) if reason == "reset by peer"));
    }

    #[test]
    fn terminal_is_sticky_and_first_wins() {
        let table = table();
        table.close_all(Terminal::Protocol("bad marker".into()));
        table.close_all(Terminal::Connection("later".into()));

        assert_eq!(table.terminal(), Some(Terminal::Protocol("bad marker".into())));
        let err = table
            .register(MessageKind::PingResponse)
            .expect_err("registration after terminal should fail");
        assert!(matches!(err, ClientError::Protocol(reason) if reason == "bad marker"));
    }

    #[test]
    fn explicit_unregister_cancels() {
        let table = table();
        let waiter = table.register(MessageKind::HelloResponse).unwrap();
        table.unregister(MessageKind::HelloResponse);

        assert!(matches!(waiter.recv(), Err(ClientError::Cancelled(_))));
    }

    #[test]
    fn dropped_waiter_does_not_claim_messages() {
        let table = table();
        let waiter = table.register(MessageKind::DeviceInfoResponse).unwrap();
        drop(waiter);

        assert_eq!(table.deliver(device_info("x")), Some(device_info("x")));
    }

    #[test]
    fn full_slot_applies_backpressure() {
        let table = table();
        let waiter = table.register(MessageKind::SubscribeLogsResponse).unwrap();
        let log = |text: &str| -> Message {
            proto::SubscribeLogsResponse {
                message: text.to_string(),
                ..Default::default()
            }
            .into()
        };

        assert!(table.deliver(log("one")).is_none());
        let producer = {
            let table = Arc::clone(&table);
            thread::spawn(move || table.deliver(log("two")))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!producer.is_finished());

        assert_eq!(waiter.recv().unwrap(), log("one"));
        assert!(producer.join().unwrap().is_none());
        assert_eq!(waiter.recv().unwrap(), log("two"));
    }
}
