//! Tag type records and the type registry.
//!
//! Each [`TagType`] names at most one parent type, forming a single-parent
//! subtype chain (e.g. `integer → number → text`).  The chain is modeled as
//! an explicit name reference resolved through the registry, not through
//! trait polymorphism, so handler lookup is a plain loop that is easy to
//! test and impossible to make cyclic (a parent must already be registered).
//!
//! The registry is built once at startup and frozen; execution-time lookups
//! are read-only and need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ScriptError;
use crate::tag::EvalContext;
use crate::value::TagValue;

/// A chainable sub-operation on a tag type.
///
/// `current` is the value produced by the previous chain step; `modifier` is
/// the step's already-evaluated bracket argument (`add_int[5]`), if any.
pub type TagHandlerFn = Arc<
    dyn Fn(&mut dyn EvalContext, &TagValue, Option<&TagValue>) -> Result<TagValue, ScriptError>
        + Send
        + Sync,
>;

/// One named sub-operation, with its statically declared return type.
pub struct TagSubHandler {
    pub name: String,
    /// Declared return type name, when statically known.  `None` means the
    /// result type depends on runtime input, forcing dynamic dispatch for
    /// later chain steps.
    pub returns: Option<String>,
    pub handle: TagHandlerFn,
}

impl std::fmt::Debug for TagSubHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagSubHandler")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

// ── TagType ───────────────────────────────────────────────────────────────────

/// A named tag type: its parent link and its table of sub-operations.
#[derive(Debug)]
pub struct TagType {
    pub name: String,
    /// Parent type name; `None` for a root type.
    pub parent: Option<String>,
    /// Whether values of this type can be mutated in place, and therefore
    /// must be duplicated when a cached copy is handed out (decided once
    /// here rather than per evaluation).
    pub duplicates: bool,
    handlers: HashMap<String, Arc<TagSubHandler>>,
}

impl TagType {
    pub fn new(name: &str, parent: Option<&str>, duplicates: bool) -> Self {
        TagType {
            name: name.to_owned(),
            parent: parent.map(str::to_owned),
            duplicates,
            handlers: HashMap::new(),
        }
    }

    /// Add a sub-operation handler.  Later registrations shadow earlier ones
    /// of the same name within this type only.
    pub fn with_handler(
        mut self,
        name: &str,
        returns: Option<&str>,
        handle: TagHandlerFn,
    ) -> Self {
        self.handlers.insert(
            name.to_owned(),
            Arc::new(TagSubHandler {
                name: name.to_owned(),
                returns: returns.map(str::to_owned),
                handle,
            }),
        );
        self
    }

    /// Look up a handler on this type only (no parent walk).
    pub fn own_handler(&self, op: &str) -> Option<&Arc<TagSubHandler>> {
        self.handlers.get(op)
    }
}

// ── TypeRegistry ──────────────────────────────────────────────────────────────

/// The startup-built, read-only table of tag types.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TagType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type.  Fails with [`ScriptError::DuplicateType`] if the
    /// name exists, or [`ScriptError::UnknownType`] if the declared parent
    /// has not been registered yet (which also keeps the chain acyclic).
    pub fn register(&mut self, ty: TagType) -> Result<(), ScriptError> {
        if self.types.contains_key(&ty.name) {
            return Err(ScriptError::DuplicateType(ty.name));
        }
        if let Some(parent) = &ty.parent {
            if !self.types.contains_key(parent) {
                return Err(ScriptError::UnknownType(parent.clone()));
            }
        }
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    /// Resolve a type by name.
    pub fn resolve(&self, name: &str) -> Result<&TagType, ScriptError> {
        self.types
            .get(name)
            .ok_or_else(|| ScriptError::UnknownType(name.to_owned()))
    }

    /// Find a handler for `op`, walking `ty → parent → … → root`.
    /// First match wins; `None` when the chain is exhausted.
    pub fn find_handler(&self, ty: &TagType, op: &str) -> Option<Arc<TagSubHandler>> {
        let mut current = ty;
        loop {
            if let Some(handler) = current.own_handler(op) {
                return Some(Arc::clone(handler));
            }
            match &current.parent {
                Some(parent) => current = self.types.get(parent)?,
                None => return None,
            }
        }
    }

    /// Convenience: resolve the type for a concrete value.
    pub fn type_of(&self, value: &TagValue) -> Result<&TagType, ScriptError> {
        self.resolve(value.type_name())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
