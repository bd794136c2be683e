//! Command queues: the frame-stack script driver.
//!
//! A [`CommandQueue`] executes one script as a stack of [`StackFrame`]s over
//! the script's flat entry list.  The driver loop pulls the next entry from
//! the top frame, advances the instruction pointer *past* the entry (and its
//! block, if it has one) before executing, then acts on the command's
//! outcome: `EnterBlock` pushes a frame over the block range, `Wait`
//! suspends the task on a oneshot signal, `StopQueue` unwinds everything.
//!
//! Suspension protocol: a waitable command hands out a [`ResumeTicket`] and
//! returns the paired receiver.  The ticket resumes the queue at most once;
//! a second resume is logged and ignored, and a ticket dropped without
//! resuming stops the queue instead of hanging it.  A stop requested while
//! the queue is waiting takes effect only after the in-flight operation
//! completes.
//!
//! Completion callbacks fire exactly once, in registration order, with the
//! queue's accumulated determinations, whether the queue finished or was
//! stopped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::argument::Argument;
use crate::command::{CommandEntry, CommandOutcome, CommandScript};
use crate::error::ScriptError;
use crate::system::ScriptSystem;
use crate::tag::{EvalContext, TagEngine};
use crate::value::TagValue;

// ── State and handles ─────────────────────────────────────────────────────────

/// Lifecycle of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueueState {
    Running = 0,
    /// Suspended on a waitable command's signal.
    Waiting = 1,
    /// Terminated by a stop request or a `StopQueue` outcome.
    Stopped = 2,
    /// Ran out of entries.
    Finished = 3,
}

impl QueueState {
    fn from_u8(raw: u8) -> QueueState {
        match raw {
            0 => QueueState::Running,
            1 => QueueState::Waiting,
            2 => QueueState::Stopped,
            _ => QueueState::Finished,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueueState::Stopped | QueueState::Finished)
    }
}

/// A shareable view of a live queue: its id, its externally visible state,
/// and the cooperative stop flag.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    pub id: u64,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl QueueHandle {
    fn new(id: u64) -> Self {
        QueueHandle {
            id,
            stop: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(QueueState::Running as u8)),
        }
    }

    /// Ask the queue to stop.  Takes effect at the next step boundary; a
    /// waiting queue first lets its in-flight operation complete.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> QueueState {
        QueueState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: QueueState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

// ── ResumeTicket ──────────────────────────────────────────────────────────────

/// The resume side of a suspended queue.  Cloneable so it can be handed to
/// whatever completes the operation; only the first [`resume`](Self::resume)
/// across all clones delivers.
#[derive(Debug, Clone)]
pub struct ResumeTicket {
    queue_id: u64,
    sender: Arc<Mutex<Option<oneshot::Sender<Vec<String>>>>>,
}

impl ResumeTicket {
    pub(crate) fn new(queue_id: u64) -> (ResumeTicket, oneshot::Receiver<Vec<String>>) {
        let (tx, rx) = oneshot::channel();
        let ticket = ResumeTicket { queue_id, sender: Arc::new(Mutex::new(Some(tx))) };
        (ticket, rx)
    }

    /// Wake the queue, delivering the operation's determinations.  A second
    /// call is a protocol violation: logged, not delivered.
    pub fn resume(&self, determinations: Vec<String>) {
        let mut slot = lock(&self.sender);
        match slot.take() {
            // A closed receiver means the queue already went away; that is
            // not the ticket holder's problem.
            Some(tx) => {
                let _ = tx.send(determinations);
            }
            None => log::error!(
                "queue #{}: {}",
                self.queue_id,
                ScriptError::SuspensionProtocol("resume delivered more than once")
            ),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── QueueRegistry ─────────────────────────────────────────────────────────────

/// The table of live queues, keyed by their handles.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: Mutex<Vec<QueueHandle>>,
    next_id: AtomicU64,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate(&self) -> QueueHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = QueueHandle::new(id);
        lock(&self.queues).push(handle.clone());
        handle
    }

    pub(crate) fn remove(&self, id: u64) {
        lock(&self.queues).retain(|h| h.id != id);
    }

    /// Request a stop on every live queue.  Returns how many were flagged.
    pub fn stop_all(&self) -> usize {
        let queues = lock(&self.queues);
        for handle in queues.iter() {
            handle.request_stop();
        }
        queues.len()
    }

    pub fn find(&self, id: u64) -> Option<QueueHandle> {
        lock(&self.queues).iter().find(|h| h.id == id).cloned()
    }

    pub fn handles(&self) -> Vec<QueueHandle> {
        lock(&self.queues).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.queues).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queues).is_empty()
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// One block activation: its entry-index range, the instruction pointer, and
/// the variables declared inside it.
#[derive(Debug)]
pub(crate) struct StackFrame {
    range: (usize, usize),
    ip: usize,
    locals: HashMap<String, TagValue>,
}

impl StackFrame {
    fn new(range: (usize, usize)) -> Self {
        StackFrame { range, ip: range.0, locals: HashMap::new() }
    }
}

/// [`EvalContext`] over a queue's frame stack, used for every argument
/// evaluation during execution.
struct FrameEval<'a> {
    engine: &'a TagEngine,
    frames: &'a [StackFrame],
    errors: &'a mut Vec<String>,
}

impl EvalContext for FrameEval<'_> {
    fn engine(&self) -> &TagEngine {
        self.engine
    }

    fn get_var(&self, name: &str) -> Option<TagValue> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.locals.get(name).cloned())
    }

    fn error(&mut self, msg: String) {
        log::debug!("tag resolution error: {msg}");
        self.errors.push(msg);
    }
}

// ── CommandQueue ──────────────────────────────────────────────────────────────

type CompletionFn = Box<dyn FnOnce(&[String]) + Send>;

enum StepOutcome {
    Continue,
    Suspended {
        signal: oneshot::Receiver<Vec<String>>,
        store_into: Option<String>,
    },
    Terminal,
}

/// One executing script.
pub struct CommandQueue {
    pub id: u64,
    script: Arc<CommandScript>,
    system: Arc<ScriptSystem>,
    engine: Arc<TagEngine>,
    frames: Vec<StackFrame>,
    state: QueueState,
    handle: QueueHandle,
    /// Values determined so far, delivered to completion callbacks.
    pub determinations: Vec<String>,
    /// Lines produced by commands (echo and friends).
    pub output: Vec<String>,
    /// Recoverable errors reported during execution, in order.
    pub errors: Vec<String>,
    completions: Vec<CompletionFn>,
}

impl CommandQueue {
    pub(crate) fn new(
        system: Arc<ScriptSystem>,
        script: Arc<CommandScript>,
        handle: QueueHandle,
    ) -> Self {
        let root = StackFrame::new((0, script.entries().len()));
        let engine = Arc::clone(system.engine());
        CommandQueue {
            id: handle.id,
            script,
            system,
            engine,
            frames: vec![root],
            state: QueueState::Running,
            handle,
            determinations: Vec::new(),
            output: Vec::new(),
            errors: Vec::new(),
            completions: Vec::new(),
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn script(&self) -> &Arc<CommandScript> {
        &self.script
    }

    /// Register a completion callback.  Fires exactly once, after the queue
    /// finishes or stops, with the determinations accumulated by then.
    pub fn on_complete(&mut self, callback: impl FnOnce(&[String]) + Send + 'static) {
        self.completions.push(Box::new(callback));
    }

    /// Drive the queue to a terminal state.
    pub async fn run(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.set_state(QueueState::Running);
        log::debug!("queue #{} running script '{}'", self.id, self.script.name);
        loop {
            match self.step() {
                StepOutcome::Continue => {}
                StepOutcome::Terminal => break,
                StepOutcome::Suspended { signal, store_into } => {
                    match signal.await {
                        Ok(determinations) => {
                            if let Some(name) = store_into {
                                let list = determinations
                                    .iter()
                                    .map(|d| TagValue::Text(d.clone()))
                                    .collect();
                                self.define_var(&name, TagValue::List(list));
                            }
                            // A stop requested mid-wait is honored at the
                            // next step, after the operation completed.
                            if !self.handle.stop_requested() {
                                self.set_state(QueueState::Running);
                            }
                        }
                        Err(_) => {
                            self.report(ScriptError::SuspensionProtocol(
                                "completion signal dropped without resuming",
                            ));
                            self.handle.request_stop();
                        }
                    }
                }
            }
        }
        log::debug!("queue #{} ended {:?}", self.id, self.state);
    }

    fn step(&mut self) -> StepOutcome {
        if self.handle.stop_requested() {
            self.finish(QueueState::Stopped);
            return StepOutcome::Terminal;
        }
        let script = Arc::clone(&self.script);
        let entries = script.entries();
        let idx = loop {
            let Some(frame) = self.frames.last_mut() else {
                self.finish(QueueState::Finished);
                return StepOutcome::Terminal;
            };
            if frame.ip >= frame.range.1 {
                self.frames.pop();
                continue;
            }
            let idx = frame.ip;
            // Advance past the entry and its block; only an EnterBlock
            // outcome descends into the block.
            frame.ip = match entries[idx].block {
                Some((_, end)) => end,
                None => idx + 1,
            };
            break idx;
        };

        let entry = &entries[idx];
        let spec = entry.command.spec();
        let got = entry.arguments.len();
        if got < spec.min_args || got > spec.max_args {
            self.report(ScriptError::BadArgumentCount {
                name: spec.name.clone(),
                got,
                min: spec.min_args,
                max: spec.max_args,
            });
            return StepOutcome::Continue;
        }

        let command = Arc::clone(&entry.command);
        let mut ctx = CommandContext { queue: self, entry_index: idx };
        match command.execute(&mut ctx) {
            Ok(CommandOutcome::Done) => StepOutcome::Continue,
            Ok(CommandOutcome::EnterBlock) => {
                match entries[idx].block {
                    Some(range) => self.frames.push(StackFrame::new(range)),
                    None => self.report(ScriptError::CommandExecution(format!(
                        "/{} has no block to enter",
                        entries[idx].name
                    ))),
                }
                StepOutcome::Continue
            }
            Ok(CommandOutcome::Wait { signal, store_into }) => {
                self.set_state(QueueState::Waiting);
                StepOutcome::Suspended { signal, store_into }
            }
            Ok(CommandOutcome::StopQueue) => {
                self.finish(QueueState::Stopped);
                StepOutcome::Terminal
            }
            Err(err) => {
                // Command errors are recoverable: report and move on.
                self.report(err);
                StepOutcome::Continue
            }
        }
    }

    fn finish(&mut self, state: QueueState) {
        if self.state.is_terminal() {
            return;
        }
        self.frames.clear();
        self.set_state(state);
        self.system.queues().remove(self.id);
        let determinations = std::mem::take(&mut self.determinations);
        for callback in self.completions.drain(..) {
            callback(&determinations);
        }
        self.determinations = determinations;
    }

    fn set_state(&mut self, state: QueueState) {
        self.state = state;
        self.handle.set_state(state);
    }

    fn report(&mut self, err: ScriptError) {
        log::debug!("queue #{}: {err}", self.id);
        self.errors.push(err.to_string());
    }

    pub(crate) fn evaluate(&mut self, arg: &Argument) -> TagValue {
        let engine = Arc::clone(&self.engine);
        let mut ctx = FrameEval {
            engine: &engine,
            frames: &self.frames,
            errors: &mut self.errors,
        };
        arg.value(&mut ctx)
    }

    // ── Variable scoping ──────────────────────────────────────────────────────

    /// Innermost visible binding.
    pub fn get_var(&self, name: &str) -> Option<TagValue> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.locals.get(name).cloned())
    }

    /// Declare (or redeclare) in the current frame, shadowing outer bindings.
    pub fn define_var(&mut self, name: &str, value: TagValue) {
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.insert(name.to_owned(), value);
        }
    }

    /// Overwrite the innermost existing binding; declares in the current
    /// frame when no binding exists anywhere.
    pub fn assign_var(&mut self, name: &str, value: TagValue) {
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.locals.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.define_var(name, value);
    }

    /// Declare in the frame enclosing the current one, so the binding
    /// outlives the current block.
    pub fn set_enclosing(&mut self, name: &str, value: TagValue) {
        let n = self.frames.len();
        let target = if n >= 2 { n - 2 } else { 0 };
        if let Some(frame) = self.frames.get_mut(target) {
            frame.locals.insert(name.to_owned(), value);
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.id)
            .field("script", &self.script.name)
            .field("state", &self.state)
            .field("frames", &self.frames.len())
            .finish_non_exhaustive()
    }
}

// ── CommandContext ────────────────────────────────────────────────────────────

/// Everything a command sees while executing one entry.
pub struct CommandContext<'q> {
    queue: &'q mut CommandQueue,
    entry_index: usize,
}

impl CommandContext<'_> {
    pub fn entry(&self) -> &CommandEntry {
        &self.queue.script.entries()[self.entry_index]
    }

    pub fn argument_count(&self) -> usize {
        self.entry().arguments.len()
    }

    /// Evaluate the entry's `i`th argument against the queue's scopes.
    /// Out-of-range indices yield empty text (the bounds were checked
    /// before execute).
    pub fn argument(&mut self, i: usize) -> TagValue {
        let script = Arc::clone(&self.queue.script);
        match script.entries()[self.entry_index].arguments.get(i) {
            Some(arg) => self.queue.evaluate(arg),
            None => TagValue::Text(String::new()),
        }
    }

    pub fn engine(&self) -> &TagEngine {
        &self.queue.engine
    }

    pub fn system(&self) -> &Arc<ScriptSystem> {
        &self.queue.system
    }

    pub fn queue_id(&self) -> u64 {
        self.queue.id
    }

    /// The executing script (for block extraction).
    pub fn script(&self) -> Arc<CommandScript> {
        Arc::clone(&self.queue.script)
    }

    /// This entry's block range, if it has one.
    pub fn block(&self) -> Option<(usize, usize)> {
        self.entry().block
    }

    /// Emit an output line.
    pub fn good(&mut self, msg: String) {
        log::debug!("queue #{}: {msg}", self.queue.id);
        self.queue.output.push(msg);
    }

    /// Report a non-fatal problem; the entry keeps going.
    pub fn bad(&mut self, msg: String) {
        log::warn!("queue #{}: {msg}", self.queue.id);
        self.queue.errors.push(msg);
    }

    /// Report a recoverable error without aborting the entry.
    pub fn error(&mut self, msg: String) {
        log::debug!("queue #{}: {msg}", self.queue.id);
        self.queue.errors.push(msg);
    }

    /// Record a determination for the queue's completion callbacks.
    pub fn determine(&mut self, value: TagValue) {
        self.queue.determinations.push(value.to_string());
    }

    /// Pair a [`ResumeTicket`] with the signal for a `Wait` outcome.
    pub fn waiter(&self) -> (ResumeTicket, oneshot::Receiver<Vec<String>>) {
        ResumeTicket::new(self.queue.id)
    }

    pub fn get_var(&self, name: &str) -> Option<TagValue> {
        self.queue.get_var(name)
    }

    pub fn define_var(&mut self, name: &str, value: TagValue) {
        self.queue.define_var(name, value);
    }

    pub fn assign_var(&mut self, name: &str, value: TagValue) {
        self.queue.assign_var(name, value);
    }

    pub fn set_enclosing(&mut self, name: &str, value: TagValue) {
        self.queue.set_enclosing(name, value);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandOutcome, CommandSpec, ScriptNode};
    use crate::system::ScriptSystem;

    struct Note(CommandSpec);

    impl Command for Note {
        fn spec(&self) -> &CommandSpec {
            &self.0
        }

        fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
            ctx.good(self.0.name.clone());
            Ok(CommandOutcome::Done)
        }
    }

    struct Enter(CommandSpec);

    impl Command for Enter {
        fn spec(&self) -> &CommandSpec {
            &self.0
        }

        fn execute(&self, _ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
            Ok(CommandOutcome::EnterBlock)
        }
    }

    struct Skip(CommandSpec);

    impl Command for Skip {
        fn spec(&self) -> &CommandSpec {
            &self.0
        }

        fn execute(&self, _ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
            Ok(CommandOutcome::Done)
        }
    }

    fn note(name: &str) -> CommandEntry {
        CommandEntry::new(Arc::new(Note(CommandSpec::new(name, 0, 0))), Vec::new())
    }

    fn system() -> Arc<ScriptSystem> {
        ScriptSystem::new(crate::stdtags::standard_engine().unwrap(), Default::default())
    }

    #[test]
    fn ticket_resumes_at_most_once() {
        let (ticket, mut rx) = ResumeTicket::new(7);
        let second = ticket.clone();
        ticket.resume(vec!["a".into()]);
        second.resume(vec!["b".into()]); // logged, not delivered
        assert_eq!(rx.try_recv().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn registry_stop_all_flags_every_handle() {
        let reg = QueueRegistry::new();
        let handles = [reg.allocate(), reg.allocate(), reg.allocate()];
        assert_eq!(reg.stop_all(), 3);
        assert!(handles.iter().all(QueueHandle::stop_requested));
        reg.remove(handles[1].id);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn variable_scoping_across_frames() {
        let system = system();
        let script = Arc::new(CommandScript::new("s", Vec::new()));
        let mut q = CommandQueue::new(Arc::clone(&system), script, system.queues().allocate());

        q.define_var("x", TagValue::Integer(1));
        q.frames.push(StackFrame::new((0, 0)));

        // Inner reads see the outer binding.
        assert_eq!(q.get_var("x"), Some(TagValue::Integer(1)));
        // define shadows, assign writes through to the declaring frame.
        q.define_var("x", TagValue::Integer(2));
        assert_eq!(q.get_var("x"), Some(TagValue::Integer(2)));
        q.assign_var("y", TagValue::Integer(9));
        q.set_enclosing("z", TagValue::Integer(3));

        q.frames.pop();
        assert_eq!(q.get_var("x"), Some(TagValue::Integer(1)));
        assert_eq!(q.get_var("y"), None); // declared in the popped frame
        assert_eq!(q.get_var("z"), Some(TagValue::Integer(3)));
    }

    #[tokio::test]
    async fn blocks_are_skipped_unless_entered() {
        let system = system();
        let enter = CommandEntry::new(Arc::new(Enter(CommandSpec::new("in", 0, 0).flow())), Vec::new());
        let skip = CommandEntry::new(Arc::new(Skip(CommandSpec::new("by", 0, 0).flow())), Vec::new());
        let script = Arc::new(CommandScript::build(
            "s",
            vec![
                ScriptNode::Block(enter, vec![ScriptNode::Command(note("inside"))]),
                ScriptNode::Block(skip, vec![ScriptNode::Command(note("never"))]),
                ScriptNode::Command(note("after")),
            ],
        ));
        let mut q = system.new_queue(script);
        q.run().await;
        assert_eq!(q.state(), QueueState::Finished);
        assert_eq!(q.output, ["inside", "after"]);
    }

    #[tokio::test]
    async fn completion_fires_once_with_determinations() {
        struct Det(CommandSpec);
        impl Command for Det {
            fn spec(&self) -> &CommandSpec {
                &self.0
            }
            fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
                ctx.determine(TagValue::Text("done".into()));
                Ok(CommandOutcome::Done)
            }
        }
        let system = system();
        let script = Arc::new(CommandScript::new(
            "s",
            vec![CommandEntry::new(Arc::new(Det(CommandSpec::new("det", 0, 0))), Vec::new())],
        ));
        let mut q = system.new_queue(script);
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        q.on_complete(move |dets| {
            assert_eq!(dets, ["done"]);
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        q.run().await;
        q.run().await; // terminal; must not re-fire
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(system.queues().len(), 0);
    }

    #[tokio::test]
    async fn dropped_ticket_stops_the_queue() {
        struct Leak(CommandSpec);
        impl Command for Leak {
            fn spec(&self) -> &CommandSpec {
                &self.0
            }
            fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandOutcome, ScriptError> {
                let (ticket, signal) = ctx.waiter();
                drop(ticket);
                Ok(CommandOutcome::Wait { signal, store_into: None })
            }
        }
        let system = system();
        let script = Arc::new(CommandScript::new(
            "s",
            vec![
                CommandEntry::new(
                    Arc::new(Leak(CommandSpec::new("leak", 0, 0).waitable())),
                    Vec::new(),
                ),
                note("unreached"),
            ],
        ));
        let mut q = system.new_queue(script);
        q.run().await;
        assert_eq!(q.state(), QueueState::Stopped);
        assert!(q.output.is_empty());
        assert!(q.errors.iter().any(|e| e.contains("suspension protocol")));
    }
}
