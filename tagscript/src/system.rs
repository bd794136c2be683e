//! The script system: one engine, its commands, scripts, events, and queues.
//!
//! [`ScriptSystem`] is the embedding surface.  It owns the immutable
//! [`TagEngine`] and [`CommandRegistry`] built at startup, the named-script
//! store, the event registry, and the live-queue table.  It is always held
//! behind an `Arc`; queues keep a clone so commands can reach back into the
//! system (spawn a child queue, stop everything, attach an event handler).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::command::{CommandRegistry, CommandScript};
use crate::error::ScriptError;
use crate::events::EventRegistry;
use crate::queue::{lock, CommandQueue, QueueHandle, QueueRegistry};
use crate::tag::TagEngine;

pub struct ScriptSystem {
    engine: Arc<TagEngine>,
    commands: CommandRegistry,
    queues: QueueRegistry,
    events: Mutex<EventRegistry>,
    scripts: Mutex<HashMap<String, Arc<CommandScript>>>,
}

impl ScriptSystem {
    pub fn new(engine: TagEngine, commands: CommandRegistry) -> Arc<Self> {
        Arc::new(ScriptSystem {
            engine: Arc::new(engine),
            commands,
            queues: QueueRegistry::new(),
            events: Mutex::new(EventRegistry::new()),
            scripts: Mutex::new(HashMap::new()),
        })
    }

    /// A system with the standard tag types and the builtin command set.
    pub fn standard() -> Result<Arc<Self>, ScriptError> {
        Ok(ScriptSystem::new(
            crate::stdtags::standard_engine()?,
            crate::builtins::standard_commands()?,
        ))
    }

    pub fn engine(&self) -> &Arc<TagEngine> {
        &self.engine
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    // ── Scripts ───────────────────────────────────────────────────────────────

    /// Validate and store a script under its name.  Re-registering a name
    /// replaces the previous script.
    pub fn add_script(&self, script: CommandScript) -> Result<Arc<CommandScript>, ScriptError> {
        script.check(&self.engine)?;
        let script = Arc::new(script);
        let previous = lock(&self.scripts).insert(script.name.clone(), Arc::clone(&script));
        if previous.is_some() {
            log::warn!("script '{}' replaced", script.name);
        }
        Ok(script)
    }

    pub fn script(&self, name: &str) -> Result<Arc<CommandScript>, ScriptError> {
        lock(&self.scripts)
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::UnknownScript(name.to_owned()))
    }

    // ── Queues ────────────────────────────────────────────────────────────────

    /// Build a registered, runnable queue over a script.
    pub fn new_queue(self: &Arc<Self>, script: Arc<CommandScript>) -> CommandQueue {
        let handle = self.queues.allocate();
        CommandQueue::new(Arc::clone(self), script, handle)
    }

    /// Run a script to completion on the current task, returning the
    /// finished queue for inspection.
    pub async fn run_script(self: &Arc<Self>, script: Arc<CommandScript>) -> CommandQueue {
        let mut queue = self.new_queue(script);
        queue.run().await;
        queue
    }

    /// Run a script on its own task.  The handle is the only view of the
    /// detached queue.
    pub fn spawn(self: &Arc<Self>, script: Arc<CommandScript>) -> QueueHandle {
        let mut queue = self.new_queue(script);
        let handle = queue.handle();
        tokio::spawn(async move {
            queue.run().await;
        });
        handle
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Declare a hook point.  Returns `false` if it already exists.
    pub fn declare_event(&self, name: &str) -> bool {
        lock(&self.events).declare(name)
    }

    /// Access the event registry under its lock.
    pub fn with_events<R>(&self, f: impl FnOnce(&mut EventRegistry) -> R) -> R {
        f(&mut lock(&self.events))
    }

    /// Fire an event: spawn one queue per handler, in handler order.
    pub fn fire_event(self: &Arc<Self>, name: &str) -> Result<Vec<QueueHandle>, ScriptError> {
        let scripts: Vec<Arc<CommandScript>> = {
            let events = lock(&self.events);
            let event = events
                .get(name)
                .ok_or_else(|| ScriptError::UnknownEvent(name.to_owned()))?;
            event.handlers().iter().map(|h| Arc::clone(&h.script)).collect()
        };
        log::debug!("event '{name}' firing {} handler(s)", scripts.len());
        Ok(scripts.into_iter().map(|script| self.spawn(script)).collect())
    }
}

impl std::fmt::Debug for ScriptSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptSystem")
            .field("commands", &self.commands.len())
            .field("queues", &self.queues.len())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::Argument;
    use crate::command::CommandEntry;

    #[test]
    fn add_script_runs_static_checks() {
        let system = ScriptSystem::standard().unwrap();
        let echo = system.commands().lookup("echo").unwrap();
        // echo takes exactly one argument.
        let bad = CommandScript::new("bad", vec![CommandEntry::new(echo, Vec::new())]);
        assert!(matches!(
            system.add_script(bad),
            Err(ScriptError::BadArgumentCount { .. })
        ));
        assert!(matches!(system.script("bad"), Err(ScriptError::UnknownScript(_))));
    }

    #[test]
    fn scripts_are_stored_by_name() {
        let system = ScriptSystem::standard().unwrap();
        let echo = system.commands().lookup("echo").unwrap();
        let script = CommandScript::new(
            "hello",
            vec![CommandEntry::new(echo, vec![Argument::from_text("hi", false, true)])],
        );
        system.add_script(script).unwrap();
        assert_eq!(system.script("hello").unwrap().name, "hello");
    }

    #[test]
    fn event_declaration_rejects_duplicates() {
        let system = ScriptSystem::standard().unwrap();
        assert!(system.declare_event("boot"));
        assert!(!system.declare_event("boot"));
    }
}
