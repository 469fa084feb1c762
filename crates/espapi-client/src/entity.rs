//! Generic entity model shared by every entity kind.
//!
//! An entity's capabilities are fixed at enumeration. Its state is replaced
//! wholesale by the receive loop: readers get an `Arc` snapshot that never
//! changes under them, and subscribers hear about each field that changed.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use espapi_frame::Message;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::warn;

use crate::connection::Shared;
use crate::error::{ClientError, Result};
use crate::sync::{lock, read, write};

/// Two floats closer than this are the same reading.
pub const FLOAT_EPSILON: f32 = 1e-6;

/// NaN (an unavailable reading) differs from every number but not from
/// another NaN.
pub(crate) fn float_changed(old: f32, new: f32) -> bool {
    if old.is_nan() || new.is_nan() {
        return old.is_nan() != new.is_nan();
    }
    (old - new).abs() > FLOAT_EPSILON
}

/// Per-kind types plugged into [`Entity`].
pub trait EntityKind: Send + Sync + Sized + 'static {
    /// What the device declared the entity can do.
    type Capabilities: fmt::Debug + Serialize + Send + Sync;
    /// Current value as last reported by the device.
    type State: fmt::Debug + Clone + Default + PartialEq + Serialize + Send + Sync;
    /// One observable field change, handed to subscribers.
    type Change: fmt::Debug + Send + Sync;

    /// Human readable kind name used in errors and logs.
    const LABEL: &'static str;

    /// Field-level differences between `old` and `new`. With `all` set, every
    /// field is reported regardless of equality.
    fn changes(old: &Self::State, new: &Self::State, all: bool) -> Vec<Self::Change>;
}

/// Identity fields common to all entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityInfo {
    /// Connection scoped numeric id.
    pub key: u32,
    pub object_id: String,
    /// Stable across reconnects.
    pub unique_id: String,
    pub name: String,
}

type Callback<C> = Arc<dyn Fn(&C) + Send + Sync>;

struct Listeners<C> {
    entries: Mutex<Vec<(u64, Callback<C>)>>,
    next_id: AtomicU64,
}

impl<C: fmt::Debug> Listeners<C> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn add(&self, callback: Callback<C>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, callback));
        id
    }

    fn remove(&self, id: u64) {
        lock(&self.entries).retain(|(entry, _)| *entry != id);
    }

    fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    fn notify(&self, changes: &[C]) {
        if changes.is_empty() {
            return;
        }
        // Callbacks may subscribe or unsubscribe; never call them under the lock.
        let callbacks: Vec<Callback<C>> = lock(&self.entries)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for change in changes {
            for callback in &callbacks {
                // A panicking callback must not take the receive loop with it.
                if panic::catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                    warn!(?change, "state callback panicked");
                }
            }
        }
    }
}

/// Handle for a registered change callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unsubscribe now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the callback registered for the entity's lifetime.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// One device entity of kind `K`.
pub struct Entity<K: EntityKind> {
    info: EntityInfo,
    capabilities: K::Capabilities,
    state: RwLock<Arc<K::State>>,
    valid: AtomicBool,
    listeners: Arc<Listeners<K::Change>>,
    link: Weak<Shared>,
}

impl<K: EntityKind> Entity<K> {
    pub(crate) fn new(info: EntityInfo, capabilities: K::Capabilities, link: Weak<Shared>) -> Self {
        Self {
            info,
            capabilities,
            state: RwLock::new(Arc::new(K::State::default())),
            valid: AtomicBool::new(false),
            listeners: Arc::new(Listeners::new()),
            link,
        }
    }

    pub fn key(&self) -> u32 {
        self.info.key
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn object_id(&self) -> &str {
        &self.info.object_id
    }

    pub fn unique_id(&self) -> &str {
        &self.info.unique_id
    }

    pub fn info(&self) -> &EntityInfo {
        &self.info
    }

    pub fn capabilities(&self) -> &K::Capabilities {
        &self.capabilities
    }

    /// Latest state snapshot. Meaningless until [`is_valid`](Self::is_valid).
    pub fn state(&self) -> Arc<K::State> {
        Arc::clone(&read(&self.state))
    }

    /// Whether the device has reported a real value.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Call `callback` for every field change. Callbacks run on the receive
    /// thread, so they must not block on this connection.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&K::Change) + Send + Sync + 'static,
    {
        let id = self.listeners.add(Arc::new(callback));
        let listeners = Arc::downgrade(&self.listeners);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(listeners) = listeners.upgrade() {
                    listeners.remove(id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Apply a state update from the device.
    ///
    /// A missing-state update stores the value silently and marks the entity
    /// invalid. Otherwise subscribers hear each changed field (or every field
    /// on the first valid update) before the new snapshot is committed.
    pub(crate) fn apply(&self, next: K::State, missing: bool) {
        if missing {
            *write(&self.state) = Arc::new(next);
            self.valid.store(false, Ordering::Release);
            return;
        }

        let first = !self.is_valid();
        let current = self.state();
        let changes = K::changes(&current, &next, first);
        self.listeners.notify(&changes);

        *write(&self.state) = Arc::new(next);
        self.valid.store(true, Ordering::Release);
    }

    /// Replace the snapshot without notifying anyone.
    pub(crate) fn replace_state(&self, next: K::State) {
        *write(&self.state) = Arc::new(next);
    }

    pub(crate) fn link(&self) -> Result<Arc<Shared>> {
        self.link
            .upgrade()
            .ok_or_else(|| ClientError::Connection("connection dropped".to_string()))
    }

    /// Fire-and-forget send over the owning connection.
    pub(crate) fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.link()?.send(&message.into())
    }
}

impl<K: EntityKind> fmt::Debug for Entity<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(K::LABEL)
            .field("key", &self.info.key)
            .field("object_id", &self.info.object_id)
            .field("name", &self.info.name)
            .field("valid", &self.is_valid())
            .field("state", &self.state())
            .finish()
    }
}

impl<K: EntityKind> Serialize for Entity<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("Entity", 7)?;
        out.serialize_field("name", &self.info.name)?;
        out.serialize_field("object_id", &self.info.object_id)?;
        out.serialize_field("unique_id", &self.info.unique_id)?;
        out.serialize_field("key", &self.info.key)?;
        out.serialize_field("capabilities", &self.capabilities)?;
        out.serialize_field("state", self.state().as_ref())?;
        out.serialize_field("valid", &self.is_valid())?;
        out.end()
    }
}
