//! Synchronous field-set events
//!
//! Editors emit an [`Event`] on every mutation of a field set. Handlers are
//! plain closures called in registration order on the emitting thread. A
//! non-persistent handler is removed after its first delivery.

use std::fmt;

use serde::Serialize;

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    FieldInserted,
    FieldReplaced,
    FieldResized,
    FieldValueChanged,
    SetFieldValue,
    FieldDeleted,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::FieldInserted => "field-inserted",
            EventKind::FieldReplaced => "field-replaced",
            EventKind::FieldResized => "field-resized",
            EventKind::FieldValueChanged => "field-value-changed",
            EventKind::SetFieldValue => "set-field-value",
            EventKind::FieldDeleted => "field-deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One mutation of a field set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    /// Path of the field set that changed
    pub set_path: String,
    /// Name of the affected child
    pub field: String,
}

impl Event {
    pub fn new(kind: EventKind, set_path: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            kind,
            set_path: set_path.into(),
            field: field.into(),
        }
    }
}

/// Handle returned by [`EventBus::connect_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Box<dyn FnMut(&Event)>;

struct Subscription {
    id: HandlerId,
    kind: EventKind,
    persistent: bool,
    handler: Handler,
}

/// Registry of event handlers
#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.subscriptions.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every event of `kind`
    ///
    /// With `persistent` false the handler only sees the first event.
    pub fn connect_event<F>(&mut self, kind: EventKind, persistent: bool, handler: F) -> HandlerId
    where
        F: FnMut(&Event) + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            kind,
            persistent,
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a handler; `false` if it was already gone
    pub fn disconnect(&mut self, id: HandlerId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Deliver `event` to the handlers of its kind
    pub fn emit(&mut self, event: &Event) {
        tracing::trace!(kind = %event.kind, set = %event.set_path, field = %event.field, "Event");
        for subscription in self.subscriptions.iter_mut().filter(|s| s.kind == event.kind) {
            (subscription.handler)(event);
        }
        self.subscriptions
            .retain(|s| s.persistent || s.kind != event.kind);
    }

    pub fn handler_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_persistent_and_one_shot() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();

        let log = seen.clone();
        bus.connect_event(EventKind::FieldDeleted, true, move |e| log.borrow_mut().push(format!("p:{}", e.field)));
        let log = seen.clone();
        bus.connect_event(EventKind::FieldDeleted, false, move |e| log.borrow_mut().push(format!("o:{}", e.field)));

        bus.emit(&Event::new(EventKind::FieldDeleted, "/", "a"));
        bus.emit(&Event::new(EventKind::FieldDeleted, "/", "b"));
        assert_eq!(*seen.borrow(), vec!["p:a", "o:a", "p:b"]);
        assert_eq!(bus.handler_count(), 1);
    }

    #[test]
    fn test_kind_filter_and_disconnect() {
        let count = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        let counter = count.clone();
        let id = bus.connect_event(EventKind::FieldInserted, false, move |_| *counter.borrow_mut() += 1);

        // a one-shot handler survives events of other kinds
        bus.emit(&Event::new(EventKind::FieldResized, "/", "x"));
        assert_eq!(bus.handler_count(), 1);
        assert!(bus.disconnect(id));
        assert!(!bus.disconnect(id));
        bus.emit(&Event::new(EventKind::FieldInserted, "/", "x"));
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::SetFieldValue.to_string(), "set-field-value");
        assert_eq!(EventKind::FieldValueChanged.name(), "field-value-changed");
    }
}
