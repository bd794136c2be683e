//! Script events and their handler tables.
//!
//! An event is a named hook point.  Scripts attach handlers to it with a
//! signed priority; firing the event runs every handler as its own queue, in
//! ascending priority order, ties broken by registration order.  Handler
//! names are unique per event so they can be removed later.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::CommandScript;

// ── ScriptEvent ───────────────────────────────────────────────────────────────

/// One attached handler.
#[derive(Debug, Clone)]
pub struct EventHandler {
    pub priority: i64,
    pub name: String,
    pub script: Arc<CommandScript>,
}

/// A named hook point with its ordered handler list.
#[derive(Debug, Default)]
pub struct ScriptEvent {
    pub name: String,
    handlers: Vec<EventHandler>,
}

impl ScriptEvent {
    pub fn new(name: &str) -> Self {
        ScriptEvent { name: name.to_owned(), handlers: Vec::new() }
    }

    /// Attach a handler.  Returns `false` (without attaching) when a handler
    /// of that name is already present.
    pub fn register(&mut self, name: &str, priority: i64, script: Arc<CommandScript>) -> bool {
        if self.handlers.iter().any(|h| h.name == name) {
            return false;
        }
        // Inserting after every handler of equal priority keeps ties in
        // registration order.
        let pos = self.handlers.partition_point(|h| h.priority <= priority);
        self.handlers.insert(pos, EventHandler { priority, name: name.to_owned(), script });
        true
    }

    /// Detach by handler name.  Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name != name);
        self.handlers.len() != before
    }

    /// Detach everything, returning how many handlers were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.handlers.len();
        self.handlers.clear();
        n
    }

    /// Handlers in firing order.
    pub fn handlers(&self) -> &[EventHandler] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ── EventRegistry ─────────────────────────────────────────────────────────────

/// The table of declared events.  Handlers may only attach to declared
/// names, so a typoed event name fails loudly instead of idling forever.
#[derive(Debug, Default)]
pub struct EventRegistry {
    events: HashMap<String, ScriptEvent>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a hook point.  Returns `false` if it already exists.
    pub fn declare(&mut self, name: &str) -> bool {
        if self.events.contains_key(name) {
            return false;
        }
        self.events.insert(name.to_owned(), ScriptEvent::new(name));
        true
    }

    pub fn get(&self, name: &str) -> Option<&ScriptEvent> {
        self.events.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ScriptEvent> {
        self.events.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
