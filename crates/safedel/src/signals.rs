//! Lifecycle notifications for masking, restoring and removing rows.
//!
//! Listeners run synchronously on the thread performing the mutation, while
//! the database write lock is held. "Before" events fire in traversal order
//! before the transaction commits; "after" events fire in the same order once
//! the commit succeeded. A failed operation emits no "after" events.
//!
//! Listeners must not call mutating methods of the database that emitted the
//! event.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use safedel_core::DeletionPolicy;

/// The lifecycle step an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A row is about to be masked.
    BeforeMask,
    /// A row was masked.
    AfterMask,
    /// A masked row is about to be restored.
    BeforeRestore,
    /// A masked row was restored.
    AfterRestore,
    /// A row is about to be physically removed.
    BeforeRemove,
    /// A row was physically removed.
    AfterRemove,
}

impl EventKind {
    /// The matching "after" kind of a "before" kind.
    pub fn completed(self) -> Self {
        match self {
            EventKind::BeforeMask => EventKind::AfterMask,
            EventKind::BeforeRestore => EventKind::AfterRestore,
            EventKind::BeforeRemove => EventKind::AfterRemove,
            other => other,
        }
    }
}

/// One masking, restoring or removing step.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    /// What happened.
    pub kind: EventKind,
    /// Entity type of the row.
    pub entity: String,
    /// Identity of the row.
    pub id: [u8; 16],
    /// Policy the step ran under.
    pub policy: DeletionPolicy,
    /// Masking operation that masked the row, for mask and restore events.
    pub batch: Option<u64>,
}

impl LifecycleEvent {
    /// Copy of this event with its "after" kind.
    pub fn completed(&self) -> Self {
        Self {
            kind: self.kind.completed(),
            ..self.clone()
        }
    }

    /// Identity as lowercase hex.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

/// Handle returned by [`Signals::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

struct ListenerEntry {
    entity: Option<String>,
    callback: Listener,
}

/// Registry of lifecycle listeners.
pub struct Signals {
    listeners: RwLock<HashMap<u64, ListenerEntry>>,
    next_listener_id: AtomicU64,
}

impl Signals {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for events of every entity type.
    pub fn connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    /// Register a listener for events of one entity type.
    pub fn connect_entity<F>(&self, entity: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.register(Some(entity.into()), Arc::new(listener))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let removed = self.listeners.write().remove(&id.0).is_some();
        tracing::debug!(listener_id = id.0, removed, "listener disconnected");
        removed
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an event to every matching listener in registration order.
    pub fn emit(&self, event: &LifecycleEvent) {
        for listener in self.matching(&event.entity) {
            listener(event);
        }
    }

    fn register(&self, entity: Option<String>, callback: Listener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(listener_id = id, entity = ?entity, "listener connected");
        self.listeners
            .write()
            .insert(id, ListenerEntry { entity, callback });
        ListenerId(id)
    }

    // Cloned out so a listener may connect or disconnect without deadlocking.
    fn matching(&self, entity: &str) -> Vec<Listener> {
        let listeners = self.listeners.read();
        let mut ids: Vec<_> = listeners
            .iter()
            .filter(|(_, e)| e.entity.as_deref().map_or(true, |name| name == entity))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| listeners.get(&id).map(|e| Arc::clone(&e.callback)))
            .collect()
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signals")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
