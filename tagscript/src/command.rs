//! Command definitions and command scripts.
//!
//! A [`Command`] is a reusable named behavior; a [`CommandEntry`] is one use
//! of a command inside a script, binding its arguments and (for flow
//! commands) its block.  A [`CommandScript`] is a flat entry list: an entry's
//! block is recorded as a half-open index range over the entries that follow
//! it, so entering a block is a frame push and skipping it is an index jump.
//! [`CommandScript::check`] runs the ahead-of-time analysis over every entry
//! before a script is accepted for execution.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::argument::Argument;
use crate::error::ScriptError;
use crate::queue::CommandContext;
use crate::tag::TagEngine;

// ── Command ───────────────────────────────────────────────────────────────────

/// Static facts about a command, fixed at registration.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub min_args: usize,
    pub max_args: usize,
    /// Flow commands own the block that follows their entry.
    pub flow: bool,
    /// Safe to run off the main queue driver (no ordering dependency on
    /// surrounding entries).
    pub asyncable: bool,
    /// May return [`CommandOutcome::Wait`] to suspend the queue.
    pub waitable: bool,
}

impl CommandSpec {
    pub fn new(name: &str, min_args: usize, max_args: usize) -> Self {
        CommandSpec {
            name: name.to_owned(),
            min_args,
            max_args,
            flow: false,
            asyncable: false,
            waitable: false,
        }
    }

    pub fn flow(mut self) -> Self {
        self.flow = true;
        self
    }

    pub fn asyncable(mut self) -> Self {
        self.asyncable = true;
        self
    }

    pub fn waitable(mut self) -> Self {
        self.waitable = true;
        self
    }
}

/// What an executed entry tells the queue driver to do next.
pub enum CommandOutcome {
    /// Proceed to the next entry.
    Done,
    /// Push a frame over this entry's block.  Only meaningful for flow
    /// commands whose entry carries a block.
    EnterBlock,
    /// Suspend the queue until the signal fires.  The payload is the
    /// suspended operation's determinations; when `store_into` names a
    /// variable, the driver stores them as a list in the current frame.
    Wait {
        signal: oneshot::Receiver<Vec<String>>,
        store_into: Option<String>,
    },
    /// Stop this queue: unwind every frame and finish.
    StopQueue,
}

/// A named, executable script command.
pub trait Command: Send + Sync {
    fn spec(&self) -> &CommandSpec;

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError>;
}

// ── Entries and scripts ───────────────────────────────────────────────────────

/// One command use inside a script.
#[derive(Clone)]
pub struct CommandEntry {
    pub command: Arc<dyn Command>,
    /// Name as written in the script, kept for diagnostics.
    pub name: String,
    pub arguments: Vec<Argument>,
    /// Half-open entry-index range of this entry's block, starting at the
    /// entry immediately after it.
    pub block: Option<(usize, usize)>,
}

impl CommandEntry {
    pub fn new(command: Arc<dyn Command>, arguments: Vec<Argument>) -> Self {
        let name = command.spec().name.clone();
        CommandEntry { command, name, arguments, block: None }
    }
}

impl std::fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("block", &self.block)
            .finish()
    }
}

/// Builder input for [`CommandScript::build`]: a nested entry tree that
/// flattens into the indexed form.
pub enum ScriptNode {
    Command(CommandEntry),
    Block(CommandEntry, Vec<ScriptNode>),
}

/// A named, flattened script.
#[derive(Debug, Clone)]
pub struct CommandScript {
    pub name: String,
    entries: Vec<CommandEntry>,
}

impl CommandScript {
    pub fn new(name: &str, entries: Vec<CommandEntry>) -> Self {
        CommandScript { name: name.to_owned(), entries }
    }

    /// Flatten a nested entry tree, computing block index ranges.
    pub fn build(name: &str, nodes: Vec<ScriptNode>) -> Self {
        let mut entries = Vec::new();
        flatten(nodes, &mut entries);
        CommandScript::new(name, entries)
    }

    /// Split a block range off into a standalone script (for deferred
    /// execution, e.g. event handlers).  Inner block indices are rebased.
    pub fn from_block(&self, name: &str, range: (usize, usize)) -> CommandScript {
        let (start, end) = range;
        let entries = self.entries[start..end]
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                if let Some((s, e)) = entry.block {
                    entry.block = Some((s - start, e - start));
                }
                entry
            })
            .collect();
        CommandScript::new(name, entries)
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    /// Ahead-of-time analysis over every entry: argument counts against the
    /// command's bounds, block range sanity, and [`Argument::check`] on each
    /// argument (including nested modifiers and fallbacks).
    pub fn check(&self, engine: &TagEngine) -> Result<(), ScriptError> {
        for (i, entry) in self.entries.iter().enumerate() {
            let spec = entry.command.spec();
            let got = entry.arguments.len();
            if got < spec.min_args || got > spec.max_args {
                return Err(ScriptError::BadArgumentCount {
                    name: spec.name.clone(),
                    got,
                    min: spec.min_args,
                    max: spec.max_args,
                });
            }
            if let Some((s, e)) = entry.block {
                if s != i + 1 || e < s || e > self.entries.len() {
                    return Err(ScriptError::MalformedBlock(i));
                }
            }
            for arg in &entry.arguments {
                arg.check(engine)?;
            }
        }
        Ok(())
    }
}

fn flatten(nodes: Vec<ScriptNode>, out: &mut Vec<CommandEntry>) {
    for node in nodes {
        match node {
            ScriptNode::Command(entry) => out.push(entry),
            ScriptNode::Block(entry, children) => {
                let idx = out.len();
                out.push(entry);
                flatten(children, out);
                out[idx].block = Some((idx + 1, out.len()));
            }
        }
    }
}

// ── CommandRegistry ───────────────────────────────────────────────────────────

/// The startup-built table of available commands.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command.  Duplicate names are a startup error.
    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<(), ScriptError> {
        let name = command.spec().name.clone();
        if self.commands.contains_key(&name) {
            return Err(ScriptError::DuplicateCommand(name));
        }
        self.commands.insert(name, command);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Command>, ScriptError> {
        self.commands
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::UnknownCommand(name.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(CommandSpec);

    impl Command for Fixed {
        fn spec(&self) -> &CommandSpec {
            &self.0
        }

        fn execute(&self, _ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
            Ok(CommandOutcome::Done)
        }
    }

    fn cmd(name: &str, min: usize, max: usize) -> Arc<dyn Command> {
        Arc::new(Fixed(CommandSpec::new(name, min, max)))
    }

    fn entry(name: &str, args: usize) -> CommandEntry {
        let arguments = (0..args)
            .map(|i| Argument::from_text(&i.to_string(), false, true))
            .collect();
        CommandEntry::new(cmd(name, 0, 9), arguments)
    }

    #[test]
    fn build_flattens_blocks_with_index_ranges() {
        let script = CommandScript::build(
            "s",
            vec![
                ScriptNode::Command(entry("a", 0)),
                ScriptNode::Block(
                    entry("if", 1),
                    vec![
                        ScriptNode::Command(entry("b", 0)),
                        ScriptNode::Block(entry("if", 1), vec![ScriptNode::Command(entry("c", 0))]),
                    ],
                ),
                ScriptNode::Command(entry("d", 0)),
            ],
        );
        let entries = script.entries();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[1].block, Some((2, 4)));
        assert_eq!(entries[2].block, None);
        assert_eq!(entries[3].block, Some((4, 4)));
        assert_eq!(entries[4].name, "d");
    }

    #[test]
    fn check_rejects_argument_count_outside_bounds() {
        let engine = crate::stdtags::standard_engine().unwrap();
        let script = CommandScript::new(
            "s",
            vec![CommandEntry::new(cmd("two", 2, 2), vec![Argument::from_text("x", false, true)])],
        );
        assert!(matches!(
            script.check(&engine),
            Err(ScriptError::BadArgumentCount { got: 1, min: 2, max: 2, .. })
        ));
    }

    #[test]
    fn check_rejects_malformed_block_range() {
        let engine = crate::stdtags::standard_engine().unwrap();
        let mut bad = entry("if", 0);
        bad.block = Some((1, 5)); // past the end
        let script = CommandScript::new("s", vec![bad]);
        assert!(matches!(script.check(&engine), Err(ScriptError::MalformedBlock(0))));
    }

    #[test]
    fn from_block_rebases_inner_ranges() {
        let script = CommandScript::build(
            "s",
            vec![
                ScriptNode::Command(entry("a", 0)),
                ScriptNode::Block(
                    entry("on", 0),
                    vec![
                        ScriptNode::Command(entry("b", 0)),
                        ScriptNode::Block(entry("if", 0), vec![ScriptNode::Command(entry("c", 0))]),
                    ],
                ),
            ],
        );
        let (s, e) = script.entries()[1].block.unwrap();
        let handler = script.from_block("handler", (s, e));
        assert_eq!(handler.entries().len(), 3);
        assert_eq!(handler.entries()[0].name, "b");
        assert_eq!(handler.entries()[1].block, Some((2, 3)));
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut reg = CommandRegistry::new();
        reg.register(cmd("echo", 1, 1)).unwrap();
        let err = reg.register(cmd("echo", 1, 1)).unwrap_err();
        assert_eq!(err, ScriptError::DuplicateCommand("echo".into()));
        assert!(reg.lookup("echo").is_ok());
        assert!(matches!(reg.lookup("nope"), Err(ScriptError::UnknownCommand(_))));
    }
}
