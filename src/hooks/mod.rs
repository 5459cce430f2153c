use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;
use crate::errors::{BoxError, Error, Result};

/// Keyword payload passed to listeners, e.g. `{"name": "db_name"}`.
pub type Payload = Map<String, Value>;

/// Trait for pluggable event listeners.
/// Closures of the right shape implement it through the blanket impl below.
pub trait Listener: Send + Sync {
    fn call(&self, payload: &Payload) -> std::result::Result<(), BoxError>;
}

impl<F> Listener for F
where
    F: Fn(&Payload) -> std::result::Result<(), BoxError> + Send + Sync,
{
    fn call(&self, payload: &Payload) -> std::result::Result<(), BoxError> {
        self(payload)
    }
}

/// Filter evaluated against the payload before a listener runs.
pub type Predicate = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Handle returned by [`Event::attach`], used to [`detach`](Event::detach) a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Registered {
    id: ListenerId,
    listener: Arc<dyn Listener>,
    predicate: Option<Predicate>,
}

struct EventInner {
    name: String,
    next_id: AtomicU64,
    listeners: RwLock<Vec<Registered>>,
}

/// Handle to a named event. Clones share the same listener list.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                name: name.into(),
                next_id: AtomicU64::new(1),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attach a closure listener that sees every fire.
    pub fn listener<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&Payload) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.attach(f, None)
    }

    /// Attach a closure listener that only runs when `predicate` accepts the payload.
    pub fn listener_when<P, F>(&self, predicate: P, f: F) -> ListenerId
    where
        P: Fn(&Payload) -> bool + Send + Sync + 'static,
        F: Fn(&Payload) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.attach(f, Some(Arc::new(predicate)))
    }

    /// Attach any `Listener` implementation, optionally filtered.
    pub fn attach<L: Listener + 'static>(&self, listener: L, predicate: Option<Predicate>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push(Registered { id, listener: Arc::new(listener), predicate });
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    /// A fire already in progress still runs it.
    pub fn detach(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|registered| registered.id != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run matching listeners in registration order.
    /// The first failing listener aborts dispatch and its error is returned.
    pub fn fire(&self, payload: &Payload) -> Result<()> {
        // Snapshot so listeners may register more listeners or fire other events.
        let listeners = self.inner.listeners.read().clone();
        trace!(event = %self.inner.name, listeners = listeners.len(), "fire");
        for registered in listeners {
            if let Some(pred) = &registered.predicate {
                if !pred(payload) {
                    continue;
                }
            }
            registered.listener.call(payload).map_err(|source| Error::Listener {
                event: self.inner.name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.inner.name)
            .field("listeners", &self.len())
            .finish()
    }
}

/// Thread-safe registry of named events.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<String, Event>>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    /// Register `name`, or return the existing event of that name.
    pub fn register_event(&self, name: &str) -> Event {
        let mut map = self.inner.write();
        map.entry(name.to_string()).or_insert_with(|| Event::new(name)).clone()
    }

    pub fn get(&self, name: &str) -> Option<Event> {
        self.inner.read().get(name).cloned()
    }

    pub fn fire(&self, name: &str, payload: &Payload) -> Result<()> {
        let event = self.get(name).ok_or_else(|| Error::UnknownEvent(name.to_string()))?;
        event.fire(payload)
    }
}

/// Single-key payload, the common `name=...` shape.
pub fn payload(key: &str, value: impl Into<Value>) -> Payload {
    let mut map = Payload::new();
    map.insert(key.to_string(), value.into());
    map
}

/// Predicate matching payloads whose `name` key equals `expected`.
pub fn name_is(expected: impl Into<String>) -> impl Fn(&Payload) -> bool + Send + Sync + 'static {
    let expected = expected.into();
    move |payload: &Payload| payload.get("name").and_then(Value::as_str) == Some(expected.as_str())
}
