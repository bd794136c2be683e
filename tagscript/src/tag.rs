//! Tag resolution engine.
//!
//! A tag chain (`<{var[x].add_int[5].to_binary}>`) is a dot-separated
//! sequence of named operations applied to a starting value.  The first step
//! is a *base tag* (variable lookup or a typed constructor like
//! `integer[..]`); every later step is resolved against the current value's
//! type through the [`TypeRegistry`], walking the parent chain.
//!
//! Failure policy: any step failure aborts the chain.  If the chain carries
//! a fallback argument, the fallback is evaluated instead and the error is
//! suppressed; otherwise the error is reported through the context's error
//! callback and `null` is substituted.  Fallbacks are single-level: a chain
//! failing *inside* a fallback reports through its own path, it never
//! re-falls-back.

use std::collections::HashMap;
use std::sync::Arc;

use crate::argument::{ChainBase, CompiledChain, StepDispatch};
use crate::error::ScriptError;
use crate::types::TypeRegistry;
use crate::value::TagValue;

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Dependency-injection interface the tag engine evaluates against.
///
/// The queue's frame stack implements this to give chains access to scoped
/// variables; [`BasicContext`] is a standalone implementation for embedding
/// and tests.
pub trait EvalContext {
    /// The shared engine (type registry + base tags).
    fn engine(&self) -> &TagEngine;

    /// Look up a variable visible in the current scope.
    fn get_var(&self, name: &str) -> Option<TagValue>;

    /// Report a recoverable resolution/conversion error.
    fn error(&mut self, msg: String);
}

// ── BaseTag ───────────────────────────────────────────────────────────────────

/// Handler for a chain's starting point.
pub type BaseTagFn = Arc<
    dyn Fn(&mut dyn EvalContext, Option<&TagValue>) -> Result<TagValue, ScriptError>
        + Send
        + Sync,
>;

/// A named chain starting point (`var`, `text`, `integer`, …).
pub struct BaseTag {
    pub name: String,
    /// Statically declared result type; `None` for dynamically-typed bases
    /// such as `var`.
    pub returns: Option<String>,
    pub handle: BaseTagFn,
}

impl std::fmt::Debug for BaseTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseTag")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

// ── TagEngine ─────────────────────────────────────────────────────────────────

/// The type registry plus the base-tag table.
///
/// Built once at startup, then shared immutably (typically behind an `Arc`)
/// by the argument compiler and the execution engine.  Never an ambient
/// global.
#[derive(Debug)]
pub struct TagEngine {
    pub types: TypeRegistry,
    bases: HashMap<String, Arc<BaseTag>>,
}

impl TagEngine {
    pub fn new(types: TypeRegistry) -> Self {
        TagEngine { types, bases: HashMap::new() }
    }

    /// Register a base tag.  Duplicate names are a startup error.
    pub fn add_base(
        &mut self,
        name: &str,
        returns: Option<&str>,
        handle: BaseTagFn,
    ) -> Result<(), ScriptError> {
        if self.bases.contains_key(name) {
            return Err(ScriptError::DuplicateType(name.to_owned()));
        }
        self.bases.insert(
            name.to_owned(),
            Arc::new(BaseTag {
                name: name.to_owned(),
                returns: returns.map(str::to_owned),
                handle,
            }),
        );
        Ok(())
    }

    pub fn base(&self, name: &str) -> Option<&Arc<BaseTag>> {
        self.bases.get(name)
    }
}

// ── Chain resolution ──────────────────────────────────────────────────────────

/// Resolve a compiled chain, applying the fallback-or-error policy.
pub(crate) fn resolve_chain(chain: &CompiledChain, ctx: &mut dyn EvalContext) -> TagValue {
    match resolve_steps(chain, ctx) {
        Ok(value) => value,
        Err(err) => match &chain.fallback {
            // Single-level fallback: evaluated as an ordinary argument, the
            // original error is suppressed.
            Some(fallback) => fallback.value(ctx),
            None => {
                ctx.error(err.to_string());
                TagValue::Null
            }
        },
    }
}

fn resolve_steps(chain: &CompiledChain, ctx: &mut dyn EvalContext) -> Result<TagValue, ScriptError> {
    let mut current = match &chain.base {
        ChainBase::Known { base, modifier } => {
            let modifier = modifier.as_ref().map(|arg| arg.value(ctx));
            (base.handle)(ctx, modifier.as_ref())?
        }
        ChainBase::Unknown(name) => return Err(ScriptError::UnknownBase(name.clone())),
    };
    for step in &chain.steps {
        let modifier = step.modifier.as_ref().map(|arg| arg.value(ctx));
        let handler = match &step.dispatch {
            // Pinned at compile time from the statically inferred type.
            StepDispatch::Static(handler) => Arc::clone(handler),
            StepDispatch::Dynamic => {
                let ty = ctx.engine().types.type_of(&current)?;
                ctx.engine().types.find_handler(ty, &step.name).ok_or_else(|| {
                    ScriptError::UnknownOperation {
                        type_name: current.type_name().to_owned(),
                        op: step.name.clone(),
                    }
                })?
            }
        };
        current = (handler.handle)(ctx, &current, modifier.as_ref())?;
    }
    Ok(current)
}

// ── BasicContext ──────────────────────────────────────────────────────────────

/// A minimal [`EvalContext`] over a flat variable map.
///
/// Useful for embedding (evaluating arguments outside any command queue)
/// and throughout the test suite.
pub struct BasicContext {
    engine: Arc<TagEngine>,
    pub vars: HashMap<String, TagValue>,
    /// Messages delivered to the error callback, in order.
    pub errors: Vec<String>,
}

impl BasicContext {
    pub fn new(engine: Arc<TagEngine>) -> Self {
        BasicContext { engine, vars: HashMap::new(), errors: Vec::new() }
    }

    pub fn with_var(mut self, name: &str, value: TagValue) -> Self {
        self.vars.insert(name.to_owned(), value);
        self
    }
}

impl EvalContext for BasicContext {
    fn engine(&self) -> &TagEngine {
        &self.engine
    }

    fn get_var(&self, name: &str) -> Option<TagValue> {
        self.vars.get(name).cloned()
    }

    fn error(&mut self, msg: String) {
        log::debug!("tag resolution error: {msg}");
        self.errors.push(msg);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
