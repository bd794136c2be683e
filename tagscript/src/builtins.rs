//! The builtin command set.
//!
//! Each command is a small unit struct carrying its [`CommandSpec`];
//! [`standard_commands`] assembles the registry.  Commands report failures
//! by returning an error from `execute`, which the queue records and moves
//! past; only `stop` (and a stop request from outside) ends a queue early.

use std::sync::Arc;
use std::time::Duration;

use crate::command::{Command, CommandOutcome, CommandRegistry, CommandSpec};
use crate::error::ScriptError;
use crate::queue::CommandContext;

/// Registry with every builtin registered.
pub fn standard_commands() -> Result<CommandRegistry, ScriptError> {
    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(EchoCommand::new()))?;
    registry.register(Arc::new(DetermineCommand::new()))?;
    registry.register(Arc::new(DefineCommand::new()))?;
    registry.register(Arc::new(AssignCommand::new()))?;
    registry.register(Arc::new(ExportCommand::new()))?;
    registry.register(Arc::new(IfCommand::new()))?;
    registry.register(Arc::new(StopCommand::new()))?;
    registry.register(Arc::new(WaitCommand::new()))?;
    registry.register(Arc::new(RunCommand::new()))?;
    registry.register(Arc::new(EventCommand::new()))?;
    Ok(registry)
}

// ── echo ──────────────────────────────────────────────────────────────────────

/// `echo <text>`: emit the argument as an output line.
pub struct EchoCommand {
    spec: CommandSpec,
}

impl EchoCommand {
    pub fn new() -> Self {
        EchoCommand { spec: CommandSpec::new("echo", 1, 1).asyncable() }
    }
}

impl Command for EchoCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        let line = ctx.argument(0).to_string();
        ctx.good(line);
        Ok(CommandOutcome::Done)
    }
}

// ── determine ─────────────────────────────────────────────────────────────────

/// `determine <value>`: record a result for whoever awaits this queue.
pub struct DetermineCommand {
    spec: CommandSpec,
}

impl DetermineCommand {
    pub fn new() -> Self {
        DetermineCommand { spec: CommandSpec::new("determine", 1, 1) }
    }
}

impl Command for DetermineCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        let value = ctx.argument(0);
        ctx.determine(value);
        Ok(CommandOutcome::Done)
    }
}

// ── define / assign / export ──────────────────────────────────────────────────

/// `define <name> <value>`: declare in the current frame, shadowing outer
/// bindings.
pub struct DefineCommand {
    spec: CommandSpec,
}

impl DefineCommand {
    pub fn new() -> Self {
        DefineCommand { spec: CommandSpec::new("define", 2, 2) }
    }
}

impl Command for DefineCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        let name = ctx.argument(0).to_string();
        let value = ctx.argument(1);
        ctx.define_var(&name, value);
        Ok(CommandOutcome::Done)
    }
}

/// `assign <name> <value>`: overwrite the innermost existing binding.
pub struct AssignCommand {
    spec: CommandSpec,
}

impl AssignCommand {
    pub fn new() -> Self {
        AssignCommand { spec: CommandSpec::new("assign", 2, 2) }
    }
}

impl Command for AssignCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        let name = ctx.argument(0).to_string();
        let value = ctx.argument(1);
        ctx.assign_var(&name, value);
        Ok(CommandOutcome::Done)
    }
}

/// `export <name> <value>`: bind in the enclosing frame so the value
/// survives the current block.
pub struct ExportCommand {
    spec: CommandSpec,
}

impl ExportCommand {
    pub fn new() -> Self {
        ExportCommand { spec: CommandSpec::new("export", 2, 2) }
    }
}

impl Command for ExportCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        let name = ctx.argument(0).to_string();
        let value = ctx.argument(1);
        ctx.set_enclosing(&name, value);
        Ok(CommandOutcome::Done)
    }
}

// ── if ────────────────────────────────────────────────────────────────────────

/// `if <boolean>` { block }: enter the block when the condition is true.
/// A non-boolean condition is an error and the block is not entered.
pub struct IfCommand {
    spec: CommandSpec,
}

impl IfCommand {
    pub fn new() -> Self {
        IfCommand { spec: CommandSpec::new("if", 1, 1).flow() }
    }
}

impl Command for IfCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        if ctx.argument(0).to_boolean()? {
            Ok(CommandOutcome::EnterBlock)
        } else {
            Ok(CommandOutcome::Done)
        }
    }
}

// ── stop ──────────────────────────────────────────────────────────────────────

/// `stop`: end this queue.  `stop all`: flag every live queue (this one
/// included) to stop at its next step boundary.
pub struct StopCommand {
    spec: CommandSpec,
}

impl StopCommand {
    pub fn new() -> Self {
        StopCommand { spec: CommandSpec::new("stop", 0, 1) }
    }
}

impl Command for StopCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        if ctx.argument_count() == 0 {
            return Ok(CommandOutcome::StopQueue);
        }
        let mode = ctx.argument(0).to_string();
        if mode.eq_ignore_ascii_case("all") {
            let flagged = ctx.system().queues().stop_all();
            ctx.good(format!("stopping {flagged} queue(s)"));
            // Our own flag is now set; the next step unwinds this queue.
            Ok(CommandOutcome::Done)
        } else {
            Err(ScriptError::CommandExecution(format!("unknown stop mode '{mode}'")))
        }
    }
}

// ── wait ──────────────────────────────────────────────────────────────────────

/// `wait <seconds>`: suspend the queue for a duration.  Non-positive
/// durations resume immediately.
pub struct WaitCommand {
    spec: CommandSpec,
}

impl WaitCommand {
    pub fn new() -> Self {
        WaitCommand { spec: CommandSpec::new("wait", 1, 1).waitable() }
    }
}

impl Command for WaitCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        let seconds = ctx.argument(0).to_number()?;
        if !seconds.is_finite() {
            return Err(ScriptError::Conversion { to: "duration", input: seconds.to_string() });
        }
        let duration = Duration::from_secs_f64(seconds.clamp(0.0, 86_400.0 * 365.0));
        let (ticket, signal) = ctx.waiter();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            ticket.resume(Vec::new());
        });
        Ok(CommandOutcome::Wait { signal, store_into: None })
    }
}

// ── run ───────────────────────────────────────────────────────────────────────

/// `run <script>`: execute a stored script as a child queue, suspend until
/// it completes, and expose its determinations as the list variable
/// `run_determinations`.
pub struct RunCommand {
    spec: CommandSpec,
}

impl RunCommand {
    pub fn new() -> Self {
        RunCommand { spec: CommandSpec::new("run", 1, 1).waitable() }
    }
}

impl Command for RunCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        let name = ctx.argument(0).to_string();
        let script = ctx.system().script(&name)?;
        let (ticket, signal) = ctx.waiter();
        let mut child = ctx.system().new_queue(script);
        child.on_complete(move |determinations| ticket.resume(determinations.to_vec()));
        tokio::spawn(async move {
            child.run().await;
        });
        Ok(CommandOutcome::Wait {
            signal,
            store_into: Some("run_determinations".to_owned()),
        })
    }
}

// ── event ─────────────────────────────────────────────────────────────────────

/// `event add <event> <name> [priority] [quiet_fail]` { block }: attach the
/// block as a handler.  `event remove <event> <name>` detaches one;
/// `event clear <event>` detaches all.  With `quiet_fail` true, a missing
/// event or duplicate handler is silent instead of an error.
pub struct EventCommand {
    spec: CommandSpec,
}

impl EventCommand {
    pub fn new() -> Self {
        EventCommand { spec: CommandSpec::new("event", 2, 5).flow() }
    }
}

impl Command for EventCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
        let action = ctx.argument(0).to_string();
        let event = ctx.argument(1).to_string();
        match action.as_str() {
            "add" => {
                if ctx.argument_count() < 3 {
                    return Err(ScriptError::CommandExecution(
                        "event add requires a handler name".to_owned(),
                    ));
                }
                let handler = ctx.argument(2).to_string();
                let priority = if ctx.argument_count() > 3 {
                    ctx.argument(3).to_integer()?
                } else {
                    0
                };
                let quiet = ctx.argument_count() > 4 && ctx.argument(4).to_boolean()?;
                let Some(block) = ctx.block() else {
                    return Err(ScriptError::CommandExecution(
                        "event add requires a handler block".to_owned(),
                    ));
                };
                let script = Arc::new(
                    ctx.script()
                        .from_block(&format!("eventhandler_{event}_{handler}"), block),
                );
                let added = ctx.system().with_events(|events| {
                    events.get_mut(&event).map(|e| e.register(&handler, priority, script))
                });
                match added {
                    Some(true) => ctx.good(format!("handler '{handler}' attached to '{event}'")),
                    Some(false) if quiet => {}
                    Some(false) => {
                        return Err(ScriptError::CommandExecution(format!(
                            "event '{event}' already has a handler named '{handler}'"
                        )))
                    }
                    None if quiet => {}
                    None => return Err(ScriptError::UnknownEvent(event)),
                }
            }
            "remove" => {
                if ctx.argument_count() < 3 {
                    return Err(ScriptError::CommandExecution(
                        "event remove requires a handler name".to_owned(),
                    ));
                }
                let handler = ctx.argument(2).to_string();
                let quiet = ctx.argument_count() > 3 && ctx.argument(3).to_boolean()?;
                let removed = ctx.system().with_events(|events| {
                    events.get_mut(&event).map(|e| e.remove(&handler))
                });
                match removed {
                    Some(true) => ctx.good(format!("handler '{handler}' detached from '{event}'")),
                    Some(false) if quiet => {}
                    Some(false) => {
                        return Err(ScriptError::CommandExecution(format!(
                            "event '{event}' has no handler named '{handler}'"
                        )))
                    }
                    None if quiet => {}
                    None => return Err(ScriptError::UnknownEvent(event)),
                }
            }
            "clear" => {
                let cleared = ctx
                    .system()
                    .with_events(|events| events.get_mut(&event).map(|e| e.clear()));
                match cleared {
                    Some(n) => ctx.good(format!("cleared {n} handler(s) from '{event}'")),
                    None => return Err(ScriptError::UnknownEvent(event)),
                }
            }
            other => {
                return Err(ScriptError::CommandExecution(format!(
                    "unknown event action '{other}'"
                )))
            }
        }
        // The handler block is never executed here; the driver already
        // skipped past it.
        Ok(CommandOutcome::Done)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::{Argument, TagChain, TagStep};
    use crate::command::{CommandEntry, CommandScript, ScriptNode};
    use crate::queue::QueueState;
    use crate::system::ScriptSystem;

    fn arg(text: &str) -> Argument {
        Argument::from_text(text, false, true)
    }

    fn var(name: &str) -> Argument {
        Argument::from_chain(TagChain::new(vec![TagStep::with_modifier("var", arg(name))]))
    }

    fn entry(system: &ScriptSystem, name: &str, args: Vec<Argument>) -> CommandEntry {
        CommandEntry::new(system.commands().lookup(name).unwrap(), args)
    }

    #[tokio::test]
    async fn echo_emits_evaluated_argument() {
        let system = ScriptSystem::standard().unwrap();
        let script = Arc::new(CommandScript::new(
            "s",
            vec![
                entry(&system, "define", vec![arg("who"), arg("world")]),
                entry(&system, "echo", vec![var("who")]),
            ],
        ));
        let q = system.run_script(script).await;
        assert_eq!(q.state(), QueueState::Finished);
        assert_eq!(q.output, ["world"]);
        assert!(q.errors.is_empty());
    }

    #[tokio::test]
    async fn if_enters_block_only_when_true() {
        let system = ScriptSystem::standard().unwrap();
        let script = Arc::new(CommandScript::build(
            "s",
            vec![
                ScriptNode::Block(
                    entry(&system, "if", vec![arg("true")]),
                    vec![ScriptNode::Command(entry(&system, "echo", vec![arg("yes")]))],
                ),
                ScriptNode::Block(
                    entry(&system, "if", vec![arg("false")]),
                    vec![ScriptNode::Command(entry(&system, "echo", vec![arg("no")]))],
                ),
            ],
        ));
        let q = system.run_script(script).await;
        assert_eq!(q.output, ["yes"]);
    }

    #[tokio::test]
    async fn if_rejects_non_boolean_condition() {
        let system = ScriptSystem::standard().unwrap();
        let script = Arc::new(CommandScript::build(
            "s",
            vec![
                ScriptNode::Block(
                    entry(&system, "if", vec![arg("maybe")]),
                    vec![ScriptNode::Command(entry(&system, "echo", vec![arg("entered")]))],
                ),
                ScriptNode::Command(entry(&system, "echo", vec![arg("after")])),
            ],
        ));
        let q = system.run_script(script).await;
        // The condition error is reported, the block skipped, and the
        // queue keeps going.
        assert_eq!(q.output, ["after"]);
        assert_eq!(q.errors.len(), 1);
    }

    #[tokio::test]
    async fn stop_ends_the_queue_early() {
        let system = ScriptSystem::standard().unwrap();
        let script = Arc::new(CommandScript::new(
            "s",
            vec![
                entry(&system, "echo", vec![arg("one")]),
                entry(&system, "stop", Vec::new()),
                entry(&system, "echo", vec![arg("two")]),
            ],
        ));
        let q = system.run_script(script).await;
        assert_eq!(q.state(), QueueState::Stopped);
        assert_eq!(q.output, ["one"]);
    }

    #[tokio::test]
    async fn define_shadows_and_export_escapes_the_block() {
        let system = ScriptSystem::standard().unwrap();
        let script = Arc::new(CommandScript::build(
            "s",
            vec![
                ScriptNode::Command(entry(&system, "define", vec![arg("x"), arg("outer")])),
                ScriptNode::Block(
                    entry(&system, "if", vec![arg("true")]),
                    vec![
                        ScriptNode::Command(entry(&system, "define", vec![arg("x"), arg("inner")])),
                        ScriptNode::Command(entry(&system, "export", vec![arg("y"), arg("kept")])),
                        ScriptNode::Command(entry(&system, "echo", vec![var("x")])),
                    ],
                ),
                ScriptNode::Command(entry(&system, "echo", vec![var("x")])),
                ScriptNode::Command(entry(&system, "echo", vec![var("y")])),
            ],
        ));
        let q = system.run_script(script).await;
        assert_eq!(q.output, ["inner", "outer", "kept"]);
        assert!(q.errors.is_empty());
    }

    #[tokio::test]
    async fn assign_writes_through_to_declaring_frame() {
        let system = ScriptSystem::standard().unwrap();
        let script = Arc::new(CommandScript::build(
            "s",
            vec![
                ScriptNode::Command(entry(&system, "define", vec![arg("x"), arg("1")])),
                ScriptNode::Block(
                    entry(&system, "if", vec![arg("true")]),
                    vec![ScriptNode::Command(entry(
                        &system,
                        "assign",
                        vec![arg("x"), arg("2")],
                    ))],
                ),
                ScriptNode::Command(entry(&system, "echo", vec![var("x")])),
            ],
        ));
        let q = system.run_script(script).await;
        assert_eq!(q.output, ["2"]);
    }

    #[tokio::test]
    async fn event_add_requires_declared_event() {
        let system = ScriptSystem::standard().unwrap();
        let script = Arc::new(CommandScript::build(
            "s",
            vec![ScriptNode::Block(
                entry(&system, "event", vec![arg("add"), arg("nope"), arg("h")]),
                vec![ScriptNode::Command(entry(&system, "echo", vec![arg("x")]))],
            )],
        ));
        let q = system.run_script(script).await;
        assert_eq!(q.errors.len(), 1);
        assert!(q.errors[0].contains("unknown event"));
    }

    #[tokio::test]
    async fn event_quiet_fail_suppresses_duplicate_error() {
        let system = ScriptSystem::standard().unwrap();
        system.declare_event("boot");
        let attach = |quiet: &str| {
            ScriptNode::Block(
                entry(
                    &system,
                    "event",
                    vec![arg("add"), arg("boot"), arg("h"), arg("0"), arg(quiet)],
                ),
                vec![ScriptNode::Command(entry(&system, "echo", vec![arg("x")]))],
            )
        };
        let script = Arc::new(CommandScript::build(
            "s",
            vec![attach("false"), attach("true"), attach("false")],
        ));
        let q = system.run_script(script).await;
        // First attach succeeds, the quiet duplicate is silent, the loud
        // duplicate reports.
        assert_eq!(q.errors.len(), 1);
        assert!(q.errors[0].contains("already has a handler"));
        assert_eq!(system.with_events(|e| e.get("boot").unwrap().len()), 1);
    }
}
