//! An embeddable command-scripting engine.
//!
//! Two halves, one system:
//!
//! - **Tag expressions**: dotted chains (`<{var[x].add_int[5]}>`) resolved
//!   through a single-parent type registry, compiled once per argument and
//!   memoized ([`argument`], [`tag`], [`types`], [`value`]).
//! - **Command queues**: scripts as flat entry lists driven by a frame
//!   stack, with cooperative stop flags, suspend/resume on waitable
//!   commands, determinations, and completion callbacks ([`command`],
//!   [`queue`], [`events`]).
//!
//! [`system::ScriptSystem`] ties them together and is the embedding surface.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use tagscript::argument::Argument;
//! use tagscript::command::{CommandEntry, CommandScript};
//! use tagscript::system::ScriptSystem;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let system = ScriptSystem::standard().unwrap();
//! let echo = system.commands().lookup("echo").unwrap();
//! let script = Arc::new(CommandScript::new(
//!     "hello",
//!     vec![CommandEntry::new(echo, vec![Argument::from_text("hi", false, true)])],
//! ));
//! let queue = system.run_script(script).await;
//! assert_eq!(queue.output, ["hi"]);
//! # }
//! ```

pub mod argument;
pub mod builtins;
pub mod command;
pub mod error;
pub mod events;
pub mod queue;
pub mod stdtags;
pub mod system;
pub mod tag;
pub mod types;
pub mod value;

// Re-exports for convenience.
pub use argument::Argument;
pub use command::{Command, CommandOutcome, CommandScript, CommandSpec};
pub use error::ScriptError;
pub use queue::{CommandQueue, QueueHandle, QueueState, ResumeTicket};
pub use system::ScriptSystem;
pub use tag::{EvalContext, TagEngine};
pub use value::TagValue;
