//! Arguments and the argument compiler.
//!
//! An [`Argument`] is one parsed command parameter: an ordered sequence of
//! [`ArgumentBit`]s (plain literals, tag chains, raw generic text) produced
//! once by the tokenizer.  Scripts are executed far more often than they are
//! parsed, so the argument is *compiled* on first evaluation into a
//! [`CompiledForm`] specialized by shape, memoized on the argument, and
//! reused on every later call:
//!
//! - **Empty**: a fresh empty text value per call.
//! - **Single literal**: the stored value, duplicated iff its type is mutable.
//! - **Single chain**: direct tag resolution, no string rebuilding.
//! - **Mixed**: each bit evaluated exactly once, left to right, results
//!   stringified and concatenated.
//!
//! Compilation here is a closure/struct tree, not code generation; the
//! contract is the memoization and the per-shape fast paths.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::ScriptError;
use crate::tag::{resolve_chain, BaseTag, EvalContext, TagEngine};
use crate::types::TagSubHandler;
use crate::value::{TagValue, NULL_TOKEN};

// ── Parsed structures ─────────────────────────────────────────────────────────

/// One step of a tag chain: an operation name plus its optional bracket
/// argument (`add_int[5]`).
#[derive(Debug, Clone)]
pub struct TagStep {
    pub name: String,
    pub modifier: Option<Arc<Argument>>,
}

impl TagStep {
    pub fn named(name: &str) -> Self {
        TagStep { name: name.to_owned(), modifier: None }
    }

    pub fn with_modifier(name: &str, modifier: Argument) -> Self {
        TagStep { name: name.to_owned(), modifier: Some(Arc::new(modifier)) }
    }
}

/// A full dotted chain.  `steps[0]` is the base tag; the rest are
/// sub-operations resolved against the running value's type.
#[derive(Debug, Clone)]
pub struct TagChain {
    pub steps: Vec<TagStep>,
    /// Evaluated instead of the chain when any step fails.
    pub fallback: Option<Arc<Argument>>,
}

impl TagChain {
    pub fn new(steps: Vec<TagStep>) -> Self {
        TagChain { steps, fallback: None }
    }

    pub fn with_fallback(mut self, fallback: Argument) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }
}

/// One fragment of an argument, fixed at parse time.
#[derive(Debug, Clone)]
pub enum ArgumentBit {
    /// Plain text that inferred to a concrete value at parse time.
    Literal { value: TagValue, type_name: &'static str },
    /// A `<{...}>` tag chain.
    TagChain(TagChain),
    /// Unparsed generic text, passed through verbatim.
    Raw(String),
}

impl ArgumentBit {
    /// Infer a literal bit's value type from its source text.
    ///
    /// Order: quoted input is always text; then `true`/`false`, the null
    /// sentinel, an integer that round-trips exactly, a number that
    /// round-trips (when `perfect` fidelity is required), a map or list
    /// whose canonical form reproduces the input, and finally plain text.
    pub fn literal(text: &str, was_quoted: bool, perfect: bool) -> ArgumentBit {
        if was_quoted {
            return ArgumentBit::Literal { value: TagValue::Text(text.to_owned()), type_name: "text" };
        }
        if text == "true" || text == "false" {
            return ArgumentBit::Literal { value: TagValue::Boolean(text == "true"), type_name: "boolean" };
        }
        if text == NULL_TOKEN {
            return ArgumentBit::Literal { value: TagValue::Null, type_name: "null" };
        }
        if let Ok(n) = text.parse::<i64>() {
            if n.to_string() == text {
                return ArgumentBit::Literal { value: TagValue::Integer(n), type_name: "integer" };
            }
        }
        if let Ok(x) = text.parse::<f64>() {
            if !perfect || x.to_string() == text {
                return ArgumentBit::Literal { value: TagValue::Number(x), type_name: "number" };
            }
        }
        if text.contains('|') {
            if text.contains(':') {
                if let Some(map) = TagValue::map_for(text) {
                    if map.to_string() == text {
                        return ArgumentBit::Literal { value: map, type_name: "map" };
                    }
                }
            }
            let list = TagValue::list_for(text);
            if list.to_string() == text {
                return ArgumentBit::Literal { value: list, type_name: "list" };
            }
        }
        ArgumentBit::Literal { value: TagValue::Text(text.to_owned()), type_name: "text" }
    }

    /// Wrap an already-typed value.
    pub fn of_value(value: TagValue) -> ArgumentBit {
        let type_name = value.type_name();
        ArgumentBit::Literal { value, type_name }
    }
}

impl fmt::Display for ArgumentBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentBit::Literal { value, .. } => write!(f, "{value}"),
            ArgumentBit::Raw(text) => write!(f, "{text}"),
            ArgumentBit::TagChain(chain) => {
                write!(f, "<{{")?;
                for (i, step) in chain.steps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", step.name)?;
                    if let Some(modifier) = &step.modifier {
                        write!(f, "[{modifier}]")?;
                    }
                }
                write!(f, "}}>")
            }
        }
    }
}

// ── Argument ──────────────────────────────────────────────────────────────────

/// One parsed script parameter, with its lazily-built compiled form.
#[derive(Debug)]
pub struct Argument {
    bits: Vec<ArgumentBit>,
    /// Whether the source was quoted (affects literal inference upstream and
    /// is preserved for diagnostics).
    pub was_quoted: bool,
    compiled: OnceLock<CompiledForm>,
}

impl Clone for Argument {
    // The memoized compiled form is per-instance; a clone starts cold.
    fn clone(&self) -> Self {
        Argument::new(self.bits.clone(), self.was_quoted)
    }
}

impl Argument {
    pub fn new(bits: Vec<ArgumentBit>, was_quoted: bool) -> Self {
        Argument { bits, was_quoted, compiled: OnceLock::new() }
    }

    /// Single-literal argument inferred from source text.
    pub fn from_text(text: &str, was_quoted: bool, perfect: bool) -> Self {
        Argument::new(vec![ArgumentBit::literal(text, was_quoted, perfect)], was_quoted)
    }

    /// Single-literal argument around an existing value.
    pub fn from_value(value: TagValue) -> Self {
        Argument::new(vec![ArgumentBit::of_value(value)], false)
    }

    /// Single-chain argument.
    pub fn from_chain(chain: TagChain) -> Self {
        Argument::new(vec![ArgumentBit::TagChain(chain)], false)
    }

    pub fn bits(&self) -> &[ArgumentBit] {
        &self.bits
    }

    /// Evaluate the argument.  Compiles on first call, memoizes the compiled
    /// form, and reuses it thereafter.
    pub fn value(&self, ctx: &mut dyn EvalContext) -> TagValue {
        let form = self.compiled.get_or_init(|| compile_argument(&self.bits, ctx.engine()));
        form.evaluate(ctx)
    }

    /// Ahead-of-time static analysis.
    ///
    /// Returns the statically inferred result type name where derivable
    /// (`None` when only runtime dispatch can decide).  Fails when a step's
    /// statically-known type provably lacks the named operation and the
    /// chain has no fallback, catching bad chains before a script's first
    /// execution.  An undeterminable type is never an error; it just
    /// degrades that chain to dynamic dispatch.
    pub fn check(&self, engine: &TagEngine) -> Result<Option<String>, ScriptError> {
        match self.bits.as_slice() {
            [] => Ok(Some("text".to_owned())),
            [ArgumentBit::Literal { type_name, .. }] => Ok(Some((*type_name).to_owned())),
            [ArgumentBit::TagChain(chain)] => check_chain(chain, engine),
            [ArgumentBit::Raw(_)] => Ok(None),
            bits => {
                for bit in bits {
                    if let ArgumentBit::TagChain(chain) = bit {
                        check_chain(chain, engine)?;
                    }
                }
                // Mixed arguments always concatenate to text.
                Ok(Some("text".to_owned()))
            }
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in &self.bits {
            write!(f, "{bit}")?;
        }
        Ok(())
    }
}

// ── Compiled forms ────────────────────────────────────────────────────────────

/// The memoized evaluator, specialized by argument shape.
#[derive(Debug)]
pub(crate) enum CompiledForm {
    Empty,
    Literal { value: TagValue, duplicate: bool },
    Chain(CompiledChain),
    Raw(String),
    Mixed(Vec<CompiledBit>),
}

#[derive(Debug)]
pub(crate) enum CompiledBit {
    Literal(TagValue),
    Chain(CompiledChain),
    Raw(String),
}

#[derive(Debug)]
pub(crate) struct CompiledChain {
    pub base: ChainBase,
    pub steps: Vec<CompiledStep>,
    pub fallback: Option<Arc<Argument>>,
}

#[derive(Debug)]
pub(crate) enum ChainBase {
    Known { base: Arc<BaseTag>, modifier: Option<Arc<Argument>> },
    /// No such base tag: fails at resolution (recoverable via fallback).
    Unknown(String),
}

#[derive(Debug)]
pub(crate) struct CompiledStep {
    pub name: String,
    pub modifier: Option<Arc<Argument>>,
    pub dispatch: StepDispatch,
}

#[derive(Debug)]
pub(crate) enum StepDispatch {
    /// Handler pinned at compile time from the statically inferred type.
    Static(Arc<TagSubHandler>),
    /// Looked up per call from the running value's type.
    Dynamic,
}

impl CompiledForm {
    pub(crate) fn evaluate(&self, ctx: &mut dyn EvalContext) -> TagValue {
        match self {
            // A fresh text value every call: the result may be mutated by
            // the consumer.
            CompiledForm::Empty => TagValue::Text(String::new()),
            CompiledForm::Literal { value, duplicate } => {
                if *duplicate {
                    value.duplicate()
                } else {
                    value.clone()
                }
            }
            CompiledForm::Chain(chain) => resolve_chain(chain, ctx),
            CompiledForm::Raw(text) => TagValue::Text(text.clone()),
            CompiledForm::Mixed(bits) => {
                let mut out = String::new();
                // Exactly one evaluation per bit, in original order.
                for bit in bits {
                    match bit {
                        CompiledBit::Literal(value) => out.push_str(&value.to_string()),
                        CompiledBit::Chain(chain) => {
                            out.push_str(&resolve_chain(chain, ctx).to_string())
                        }
                        CompiledBit::Raw(text) => out.push_str(text),
                    }
                }
                TagValue::Text(out)
            }
        }
    }
}

// ── Compilation ───────────────────────────────────────────────────────────────

fn compile_argument(bits: &[ArgumentBit], engine: &TagEngine) -> CompiledForm {
    match bits {
        [] => CompiledForm::Empty,
        [ArgumentBit::Literal { value, type_name }] => CompiledForm::Literal {
            value: value.clone(),
            duplicate: needs_duplicate(type_name, engine),
        },
        [ArgumentBit::TagChain(chain)] => CompiledForm::Chain(compile_chain(chain, engine)),
        [ArgumentBit::Raw(text)] => CompiledForm::Raw(text.clone()),
        bits => CompiledForm::Mixed(
            bits.iter()
                .map(|bit| match bit {
                    ArgumentBit::Literal { value, .. } => CompiledBit::Literal(value.clone()),
                    ArgumentBit::TagChain(chain) => CompiledBit::Chain(compile_chain(chain, engine)),
                    ArgumentBit::Raw(text) => CompiledBit::Raw(text.clone()),
                })
                .collect(),
        ),
    }
}

/// Per-type duplication decision, read once at compile time from the
/// registry (unregistered types duplicate defensively).
fn needs_duplicate(type_name: &str, engine: &TagEngine) -> bool {
    engine.types.resolve(type_name).map(|ty| ty.duplicates).unwrap_or(true)
}

fn compile_chain(chain: &TagChain, engine: &TagEngine) -> CompiledChain {
    let (base, mut static_ty) = match chain.steps.first() {
        Some(first) => match engine.base(&first.name) {
            Some(base) => {
                let ty = base
                    .returns
                    .as_deref()
                    .and_then(|name| engine.types.resolve(name).ok());
                (
                    ChainBase::Known { base: Arc::clone(base), modifier: first.modifier.clone() },
                    ty,
                )
            }
            None => (ChainBase::Unknown(first.name.clone()), None),
        },
        None => (ChainBase::Unknown(String::new()), None),
    };

    let mut steps = Vec::with_capacity(chain.steps.len().saturating_sub(1));
    for step in chain.steps.iter().skip(1) {
        let dispatch = match static_ty {
            Some(ty) => match engine.types.find_handler(ty, &step.name) {
                Some(handler) => {
                    static_ty = handler
                        .returns
                        .as_deref()
                        .and_then(|name| engine.types.resolve(name).ok());
                    StepDispatch::Static(handler)
                }
                // Statically unknown operation: leave it to the runtime
                // error/fallback path (AOT `check` reports it louder).
                None => {
                    static_ty = None;
                    StepDispatch::Dynamic
                }
            },
            None => StepDispatch::Dynamic,
        };
        steps.push(CompiledStep {
            name: step.name.clone(),
            modifier: step.modifier.clone(),
            dispatch,
        });
    }

    CompiledChain { base, steps, fallback: chain.fallback.clone() }
}

fn check_chain(chain: &TagChain, engine: &TagEngine) -> Result<Option<String>, ScriptError> {
    let has_fallback = chain.fallback.is_some();
    if let Some(fallback) = &chain.fallback {
        fallback.check(engine)?;
    }

    let mut steps = chain.steps.iter();
    let mut static_ty = match steps.next() {
        Some(first) => {
            if let Some(modifier) = &first.modifier {
                modifier.check(engine)?;
            }
            match engine.base(&first.name) {
                Some(base) => match base.returns.as_deref() {
                    Some(name) => Some(engine.types.resolve(name)?),
                    None => None,
                },
                None if has_fallback => None,
                None => return Err(ScriptError::UnknownBase(first.name.clone())),
            }
        }
        None if has_fallback => return Ok(None),
        None => return Err(ScriptError::UnknownBase(String::new())),
    };

    for step in steps {
        if let Some(modifier) = &step.modifier {
            modifier.check(engine)?;
        }
        if let Some(ty) = static_ty {
            match engine.types.find_handler(ty, &step.name) {
                Some(handler) => {
                    static_ty = match handler.returns.as_deref() {
                        Some(name) => Some(engine.types.resolve(name)?),
                        None => None,
                    };
                }
                None if has_fallback => {
                    static_ty = None;
                }
                None => {
                    return Err(ScriptError::UnknownOperation {
                        type_name: ty.name.clone(),
                        op: step.name.clone(),
                    })
                }
            }
        }
    }
    Ok(static_ty.map(|ty| ty.name.clone()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::stdtags::standard_engine;
    use crate::tag::BasicContext;

    fn ctx() -> BasicContext {
        BasicContext::new(Arc::new(standard_engine().unwrap()))
    }

    // ── Literal inference ─────────────────────────────────────────────────────

    #[test]
    fn inference_order() {
        let cases: &[(&str, &str)] = &[
            ("123", "integer"),
            ("true", "boolean"),
            ("false", "boolean"),
            ("&{NULL}", "null"),
            ("1.5", "number"),
            ("a|b|c", "list"),
            ("x:1|y:2", "map"),
            ("hello", "text"),
            ("007", "text"),  // does not round-trip as integer
        ];
        for (text, expected) in cases {
            match ArgumentBit::literal(text, false, true) {
                ArgumentBit::Literal { type_name, .. } => {
                    assert_eq!(&type_name, expected, "inferring {text:?}")
                }
                other => panic!("expected literal for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn quoted_literal_is_always_text() {
        for text in ["123", "true", "a|b"] {
            match ArgumentBit::literal(text, true, true) {
                ArgumentBit::Literal { type_name, .. } => assert_eq!(type_name, "text"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn imperfect_decimal_allows_loose_number() {
        // "1.50" does not round-trip, so perfect mode falls back to text...
        match ArgumentBit::literal("1.50", false, true) {
            ArgumentBit::Literal { type_name, .. } => assert_eq!(type_name, "text"),
            other => panic!("unexpected {other:?}"),
        }
        // ...but loose mode accepts it as a number.
        match ArgumentBit::literal("1.50", false, false) {
            ArgumentBit::Literal { value, type_name } => {
                assert_eq!(type_name, "number");
                assert_eq!(value, TagValue::Number(1.5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn literal_idempotence() {
        for text in ["123", "true", "1.5", "a|b|c", "x:1|y:2", "&{NULL}", "plain"] {
            match ArgumentBit::literal(text, false, true) {
                ArgumentBit::Literal { value, .. } => {
                    assert_eq!(value.to_string(), *text, "round-tripping {text:?}")
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    // ── Compiled shapes ───────────────────────────────────────────────────────

    #[test]
    fn empty_argument_yields_fresh_text() {
        let arg = Argument::new(Vec::new(), false);
        let mut ctx = ctx();
        assert_eq!(arg.value(&mut ctx), TagValue::Text(String::new()));
        assert_eq!(arg.value(&mut ctx), TagValue::Text(String::new()));
    }

    #[test]
    fn single_literal_evaluations_are_independent() {
        let arg = Argument::from_text("a|b", false, true);
        let mut ctx = ctx();
        let mut first = arg.value(&mut ctx);
        let second = arg.value(&mut ctx);
        use crate::value::ValueOps;
        first.add(&TagValue::Text("c".into())).unwrap();
        assert_eq!(first.to_string(), "a|b|c");
        assert_eq!(second.to_string(), "a|b");
    }

    #[test]
    fn single_chain_resolves_directly() {
        // integer[2].add_int[3]
        let arg = Argument::from_chain(TagChain::new(vec![
            TagStep::with_modifier("integer", Argument::from_text("2", false, true)),
            TagStep::with_modifier("add_int", Argument::from_text("3", false, true)),
        ]));
        let mut ctx = ctx();
        assert_eq!(arg.value(&mut ctx), TagValue::Integer(5));
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn mixed_bits_concatenate_in_order() {
        let arg = Argument::new(
            vec![
                ArgumentBit::literal("x=", false, true),
                ArgumentBit::TagChain(TagChain::new(vec![TagStep::with_modifier(
                    "integer",
                    Argument::from_text("5", false, true),
                )])),
                ArgumentBit::Raw("!".into()),
            ],
            false,
        );
        let mut ctx = ctx();
        assert_eq!(arg.value(&mut ctx), TagValue::Text("x=5!".into()));
    }

    #[test]
    fn mixed_bits_evaluate_each_chain_exactly_once() {
        let mut engine = standard_engine().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        engine
            .add_base(
                "counter",
                Some("integer"),
                Arc::new(move |_, _| {
                    Ok(TagValue::Integer(hits2.fetch_add(1, Ordering::SeqCst) as i64))
                }),
            )
            .unwrap();
        let mut ctx = BasicContext::new(Arc::new(engine));

        let arg = Argument::new(
            vec![
                ArgumentBit::TagChain(TagChain::new(vec![TagStep::named("counter")])),
                ArgumentBit::literal("-", false, true),
                ArgumentBit::TagChain(TagChain::new(vec![TagStep::named("counter")])),
            ],
            false,
        );
        assert_eq!(arg.value(&mut ctx), TagValue::Text("0-1".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        // Second call re-evaluates each bit exactly once more.
        assert_eq!(arg.value(&mut ctx), TagValue::Text("2-3".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    // ── Fallbacks and errors ──────────────────────────────────────────────────

    #[test]
    fn unknown_step_with_fallback_suppresses_error() {
        let arg = Argument::from_chain(
            TagChain::new(vec![
                TagStep::with_modifier("integer", Argument::from_text("1", false, true)),
                TagStep::named("no_such_op"),
            ])
            .with_fallback(Argument::from_text("fallback", false, true)),
        );
        let mut ctx = ctx();
        assert_eq!(arg.value(&mut ctx), TagValue::Text("fallback".into()));
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn unknown_step_without_fallback_reports_and_nulls() {
        // var[n] is an integer at runtime, but no_such_op exists nowhere in
        // its type chain.
        let arg = Argument::from_chain(TagChain::new(vec![
            TagStep::with_modifier("var", Argument::from_text("n", false, true)),
            TagStep::named("no_such_op"),
        ]));
        let mut ctx = ctx().with_var("n", TagValue::Integer(1));
        assert_eq!(arg.value(&mut ctx), TagValue::Null);
        assert_eq!(ctx.errors.len(), 1);
        assert!(ctx.errors[0].contains("no_such_op"));
    }

    #[test]
    fn conversion_failure_uses_fallback() {
        let arg = Argument::from_chain(
            TagChain::new(vec![TagStep::with_modifier(
                "integer",
                Argument::from_text("not-a-number", true, true),
            )])
            .with_fallback(Argument::from_text("0", false, true)),
        );
        let mut ctx = ctx();
        assert_eq!(arg.value(&mut ctx), TagValue::Integer(0));
        assert!(ctx.errors.is_empty());
    }

    // ── Static analysis ───────────────────────────────────────────────────────

    #[test]
    fn check_infers_static_chain_type() {
        let engine = standard_engine().unwrap();
        let arg = Argument::from_chain(TagChain::new(vec![
            TagStep::with_modifier("integer", Argument::from_text("1", false, true)),
            TagStep::with_modifier("add_int", Argument::from_text("2", false, true)),
        ]));
        assert_eq!(arg.check(&engine).unwrap().as_deref(), Some("integer"));
    }

    #[test]
    fn check_rejects_statically_unknown_operation() {
        let engine = standard_engine().unwrap();
        let arg = Argument::from_chain(TagChain::new(vec![
            TagStep::with_modifier("integer", Argument::from_text("1", false, true)),
            TagStep::named("definitely_not_real"),
        ]));
        assert!(matches!(
            arg.check(&engine),
            Err(ScriptError::UnknownOperation { .. })
        ));
    }

    #[test]
    fn check_degrades_to_dynamic_for_untyped_base() {
        let engine = standard_engine().unwrap();
        // var[] is dynamically typed, so any op name must be accepted.
        let arg = Argument::from_chain(TagChain::new(vec![
            TagStep::with_modifier("var", Argument::from_text("x", false, true)),
            TagStep::named("definitely_not_real"),
        ]));
        assert_eq!(arg.check(&engine).unwrap(), None);
    }

    #[test]
    fn check_accepts_unknown_op_when_fallback_exists() {
        let engine = standard_engine().unwrap();
        let arg = Argument::from_chain(
            TagChain::new(vec![
                TagStep::with_modifier("integer", Argument::from_text("1", false, true)),
                TagStep::named("definitely_not_real"),
            ])
            .with_fallback(Argument::from_text("0", false, true)),
        );
        assert_eq!(arg.check(&engine).unwrap(), None);
    }

    #[test]
    fn check_rejects_unknown_base() {
        let engine = standard_engine().unwrap();
        let arg = Argument::from_chain(TagChain::new(vec![TagStep::named("no_such_base")]));
        assert!(matches!(arg.check(&engine), Err(ScriptError::UnknownBase(_))));
    }

    #[test]
    fn display_reconstructs_source_shape() {
        let arg = Argument::new(
            vec![
                ArgumentBit::literal("x=", false, true),
                ArgumentBit::TagChain(TagChain::new(vec![
                    TagStep::with_modifier("var", Argument::from_text("n", false, true)),
                    TagStep::named("to_text"),
                ])),
            ],
            false,
        );
        assert_eq!(arg.to_string(), "x=<{var[n].to_text}>");
    }
}
