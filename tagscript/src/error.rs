//! Engine error taxonomy.
//!
//! Tag-resolution and conversion failures are recoverable: the engine
//! substitutes a fallback or default value and reports through the active
//! error callback.  Registry misuse ([`ScriptError::DuplicateType`],
//! [`ScriptError::UnknownType`] at registration time) is fatal at startup.
//! Suspension-protocol violations are programming defects, logged and
//! contained rather than surfaced to script authors.

use thiserror::Error;

/// Any error produced by the tagscript engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    /// A tag type name was registered twice.
    #[error("tag type '{0}' is already registered")]
    DuplicateType(String),

    /// A tag type name (or parent name) is not in the registry.
    #[error("unknown tag type '{0}'")]
    UnknownType(String),

    /// A tag-chain step names an operation the value's type chain lacks.
    #[error("type '{type_name}' has no tag operation '{op}'")]
    UnknownOperation { type_name: String, op: String },

    /// A tag-chain base name is not registered.
    #[error("unknown base tag '{0}'")]
    UnknownBase(String),

    /// A value could not be coerced to the requested type.
    #[error("cannot convert '{input}' to {to}")]
    Conversion { to: &'static str, input: String },

    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A mutating value operation is not supported by the value's type.
    #[error("type '{type_name}' does not support '{op}'")]
    UnsupportedOperation { op: &'static str, type_name: &'static str },

    /// A tag operation that needs a bracket argument was invoked without one.
    #[error("tag operation '{0}' requires a [bracket] argument")]
    MissingModifier(String),

    /// A variable name resolved to nothing in any visible scope.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// A command reported failure.  Does not stop the queue by itself.
    #[error("command error: {0}")]
    CommandExecution(String),

    /// A waitable command was resumed more than once, or never resumed.
    #[error("suspension protocol violation: {0}")]
    SuspensionProtocol(&'static str),

    /// An entry was invoked with an argument count outside the command's bounds.
    #[error("/{name} expects {min}..={max} arguments, got {got}")]
    BadArgumentCount { name: String, got: usize, min: usize, max: usize },

    /// A command name has no registration.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// A command name was registered twice.
    #[error("command '{0}' is already registered")]
    DuplicateCommand(String),

    /// A script entry's block range does not describe the entries after it.
    #[error("script entry {0} has a malformed block range")]
    MalformedBlock(usize),

    /// A named script was requested but never loaded.
    #[error("unknown script '{0}'")]
    UnknownScript(String),

    /// An event name was referenced but never declared.
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
