//! Standard tag types, sub-operations, and base tags.
//!
//! [`standard_engine`] builds the default [`TagEngine`]: the
//! `text`-rooted type hierarchy (`integer → number → text`, everything else
//! directly under `text`), each type's chainable operations, and the base
//! tags that start a chain (`var[..]`, typed constructors, `null`).
//!
//! Handlers coerce their inputs rather than assuming variants, so a chain
//! that was compiled dynamically (e.g. starting from `var[..]`) behaves the
//! same as a statically pinned one.

use std::sync::Arc;

use crate::error::ScriptError;
use crate::tag::{EvalContext, TagEngine};
use crate::types::{TagHandlerFn, TagType, TypeRegistry};
use crate::value::TagValue;

fn handler<F>(f: F) -> TagHandlerFn
where
    F: Fn(&mut dyn EvalContext, &TagValue, Option<&TagValue>) -> Result<TagValue, ScriptError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Unwrap a required bracket argument.
fn modifier<'a>(m: Option<&'a TagValue>, op: &str) -> Result<&'a TagValue, ScriptError> {
    m.ok_or_else(|| ScriptError::MissingModifier(op.to_owned()))
}

// ── Types ─────────────────────────────────────────────────────────────────────

fn text_type() -> TagType {
    TagType::new("text", None, true)
        .with_handler("to_upper", Some("text"), handler(|_, v, _| {
            Ok(TagValue::Text(v.to_string().to_uppercase()))
        }))
        .with_handler("to_lower", Some("text"), handler(|_, v, _| {
            Ok(TagValue::Text(v.to_string().to_lowercase()))
        }))
        .with_handler("length", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_string().chars().count() as i64))
        }))
        .with_handler("to_text", Some("text"), handler(|_, v, _| {
            Ok(TagValue::Text(v.to_string()))
        }))
        .with_handler("to_integer", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_integer()?))
        }))
        .with_handler("to_number", Some("number"), handler(|_, v, _| {
            Ok(TagValue::Number(v.to_number()?))
        }))
        .with_handler("to_boolean", Some("boolean"), handler(|_, v, _| {
            Ok(TagValue::Boolean(v.to_boolean()?))
        }))
        .with_handler("equals", Some("boolean"), handler(|_, v, m| {
            Ok(TagValue::Boolean(v.to_string() == modifier(m, "equals")?.to_string()))
        }))
        .with_handler("append", Some("text"), handler(|_, v, m| {
            let mut out = v.to_string();
            out.push_str(&modifier(m, "append")?.to_string());
            Ok(TagValue::Text(out))
        }))
        .with_handler("is_null", Some("boolean"), handler(|_, v, _| {
            Ok(TagValue::Boolean(matches!(v, TagValue::Null)))
        }))
        // Same type in as out: the result type is dynamic.
        .with_handler("duplicate", None, handler(|_, v, _| Ok(v.duplicate())))
        .with_handler("or_else", None, handler(|_, v, _| Ok(v.duplicate())))
        .with_handler("type", Some("text"), handler(|_, v, _| {
            Ok(TagValue::Text(v.type_name().to_owned()))
        }))
}

fn number_type() -> TagType {
    TagType::new("number", Some("text"), false)
        .with_handler("add", Some("number"), handler(|_, v, m| {
            Ok(TagValue::Number(v.to_number()? + modifier(m, "add")?.to_number()?))
        }))
        .with_handler("subtract", Some("number"), handler(|_, v, m| {
            Ok(TagValue::Number(v.to_number()? - modifier(m, "subtract")?.to_number()?))
        }))
        .with_handler("multiply", Some("number"), handler(|_, v, m| {
            Ok(TagValue::Number(v.to_number()? * modifier(m, "multiply")?.to_number()?))
        }))
        .with_handler("divide", Some("number"), handler(|_, v, m| {
            Ok(TagValue::Number(v.to_number()? / modifier(m, "divide")?.to_number()?))
        }))
        .with_handler("round", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_number()?.round() as i64))
        }))
        .with_handler("floor", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_number()?.floor() as i64))
        }))
        .with_handler("ceiling", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_number()?.ceil() as i64))
        }))
        .with_handler("absolute_value", Some("number"), handler(|_, v, _| {
            Ok(TagValue::Number(v.to_number()?.abs()))
        }))
        .with_handler("sign", Some("integer"), handler(|_, v, _| {
            let x = v.to_number()?;
            Ok(TagValue::Integer(if x > 0.0 { 1 } else if x < 0.0 { -1 } else { 0 }))
        }))
        .with_handler("is_greater_than", Some("boolean"), handler(|_, v, m| {
            Ok(TagValue::Boolean(v.to_number()? > modifier(m, "is_greater_than")?.to_number()?))
        }))
        .with_handler("is_less_than", Some("boolean"), handler(|_, v, m| {
            Ok(TagValue::Boolean(v.to_number()? < modifier(m, "is_less_than")?.to_number()?))
        }))
        .with_handler("maximum", Some("number"), handler(|_, v, m| {
            Ok(TagValue::Number(v.to_number()?.max(modifier(m, "maximum")?.to_number()?)))
        }))
        .with_handler("minimum", Some("number"), handler(|_, v, m| {
            Ok(TagValue::Number(v.to_number()?.min(modifier(m, "minimum")?.to_number()?)))
        }))
}

fn integer_type() -> TagType {
    TagType::new("integer", Some("number"), false)
        .with_handler("add_int", Some("integer"), handler(|_, v, m| {
            Ok(TagValue::Integer(v.to_integer()?.wrapping_add(modifier(m, "add_int")?.to_integer()?)))
        }))
        .with_handler("subtract_int", Some("integer"), handler(|_, v, m| {
            Ok(TagValue::Integer(
                v.to_integer()?.wrapping_sub(modifier(m, "subtract_int")?.to_integer()?),
            ))
        }))
        .with_handler("multiply_int", Some("integer"), handler(|_, v, m| {
            Ok(TagValue::Integer(
                v.to_integer()?.wrapping_mul(modifier(m, "multiply_int")?.to_integer()?),
            ))
        }))
        .with_handler("divide_int", Some("integer"), handler(|_, v, m| {
            let d = modifier(m, "divide_int")?.to_integer()?;
            if d == 0 {
                return Err(ScriptError::DivisionByZero);
            }
            Ok(TagValue::Integer(v.to_integer()? / d))
        }))
        .with_handler("modulo_int", Some("integer"), handler(|_, v, m| {
            let d = modifier(m, "modulo_int")?.to_integer()?;
            if d == 0 {
                return Err(ScriptError::DivisionByZero);
            }
            Ok(TagValue::Integer(v.to_integer()? % d))
        }))
        .with_handler("absolute_value_int", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_integer()?.wrapping_abs()))
        }))
        .with_handler("maximum_int", Some("integer"), handler(|_, v, m| {
            Ok(TagValue::Integer(v.to_integer()?.max(modifier(m, "maximum_int")?.to_integer()?)))
        }))
        .with_handler("minimum_int", Some("integer"), handler(|_, v, m| {
            Ok(TagValue::Integer(v.to_integer()?.min(modifier(m, "minimum_int")?.to_integer()?)))
        }))
        .with_handler("to_binary", Some("binary"), handler(|_, v, _| {
            Ok(TagValue::Binary(v.to_integer()?.to_le_bytes().to_vec()))
        }))
}

fn boolean_type() -> TagType {
    TagType::new("boolean", Some("text"), false)
        .with_handler("not", Some("boolean"), handler(|_, v, _| {
            Ok(TagValue::Boolean(!v.to_boolean()?))
        }))
        .with_handler("and", Some("boolean"), handler(|_, v, m| {
            Ok(TagValue::Boolean(v.to_boolean()? && modifier(m, "and")?.to_boolean()?))
        }))
        .with_handler("or", Some("boolean"), handler(|_, v, m| {
            Ok(TagValue::Boolean(v.to_boolean()? || modifier(m, "or")?.to_boolean()?))
        }))
}

fn null_type() -> TagType {
    TagType::new("null", Some("text"), false)
        // On null, or_else substitutes the bracket argument.
        .with_handler("or_else", None, handler(|_, _, m| {
            Ok(modifier(m, "or_else")?.duplicate())
        }))
}

fn binary_type() -> TagType {
    TagType::new("binary", Some("text"), true)
        .with_handler("length", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_binary()?.len() as i64))
        }))
        // Little-endian, up to eight bytes.
        .with_handler("to_integer", Some("integer"), handler(|_, v, _| {
            let bytes = v.to_binary()?;
            if bytes.len() > 8 {
                return Err(ScriptError::Conversion { to: "integer", input: v.to_string() });
            }
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(&bytes);
            Ok(TagValue::Integer(i64::from_le_bytes(buf)))
        }))
}

fn list_type() -> TagType {
    TagType::new("list", Some("text"), true)
        .with_handler("size", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_list()?.len() as i64))
        }))
        // One-based index; the element type is only known at runtime.
        .with_handler("get", None, handler(|_, v, m| {
            let items = v.to_list()?;
            let index = modifier(m, "get")?.to_integer()?;
            if index < 1 || index as usize > items.len() {
                return Err(ScriptError::Conversion {
                    to: "list index",
                    input: index.to_string(),
                });
            }
            Ok(items[index as usize - 1].duplicate())
        }))
        .with_handler("reverse", Some("list"), handler(|_, v, _| {
            let mut items = v.to_list()?;
            items.reverse();
            Ok(TagValue::List(items))
        }))
        .with_handler("contains", Some("boolean"), handler(|_, v, m| {
            let needle = modifier(m, "contains")?.to_string();
            Ok(TagValue::Boolean(v.to_list()?.iter().any(|item| item.to_string() == needle)))
        }))
}

fn map_type() -> TagType {
    TagType::new("map", Some("text"), true)
        .with_handler("size", Some("integer"), handler(|_, v, _| {
            Ok(TagValue::Integer(v.to_map()?.len() as i64))
        }))
        .with_handler("get", None, handler(|_, v, m| {
            let key = modifier(m, "get")?.to_string();
            let entries = v.to_map()?;
            entries
                .into_iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v)
                .ok_or(ScriptError::Conversion { to: "map key", input: key })
        }))
        .with_handler("keys", Some("list"), handler(|_, v, _| {
            Ok(TagValue::List(
                v.to_map()?.into_iter().map(|(k, _)| TagValue::Text(k)).collect(),
            ))
        }))
        .with_handler("has_key", Some("boolean"), handler(|_, v, m| {
            let key = modifier(m, "has_key")?.to_string();
            Ok(TagValue::Boolean(v.to_map()?.iter().any(|(k, _)| *k == key)))
        }))
}

/// The default type registry: `text` root, `integer → number → text`, the
/// remaining value types directly under `text`.
pub fn standard_types() -> Result<TypeRegistry, ScriptError> {
    let mut registry = TypeRegistry::new();
    registry.register(text_type())?;
    registry.register(number_type())?;
    registry.register(integer_type())?;
    registry.register(boolean_type())?;
    registry.register(null_type())?;
    registry.register(binary_type())?;
    registry.register(list_type())?;
    registry.register(map_type())?;
    Ok(registry)
}

// ── Base tags ─────────────────────────────────────────────────────────────────

/// The default engine: [`standard_types`] plus the chain starting points.
pub fn standard_engine() -> Result<TagEngine, ScriptError> {
    let mut engine = TagEngine::new(standard_types()?);

    // var[name]: frame variable lookup, type known only at runtime.
    engine.add_base("var", None, Arc::new(|ctx, m| {
        let name = modifier(m, "var")?.to_string();
        ctx.get_var(&name).ok_or(ScriptError::UnknownVariable(name))
    }))?;

    engine.add_base("text", Some("text"), Arc::new(|_, m| {
        Ok(TagValue::Text(m.map(|v| v.to_string()).unwrap_or_default()))
    }))?;

    engine.add_base("integer", Some("integer"), Arc::new(|_, m| {
        Ok(TagValue::Integer(modifier(m, "integer")?.to_integer()?))
    }))?;

    engine.add_base("number", Some("number"), Arc::new(|_, m| {
        Ok(TagValue::Number(modifier(m, "number")?.to_number()?))
    }))?;

    engine.add_base("boolean", Some("boolean"), Arc::new(|_, m| {
        Ok(TagValue::Boolean(modifier(m, "boolean")?.to_boolean()?))
    }))?;

    engine.add_base("null", Some("null"), Arc::new(|_, _| Ok(TagValue::Null)))?;

    engine.add_base("binary", Some("binary"), Arc::new(|_, m| {
        Ok(TagValue::Binary(modifier(m, "binary")?.to_binary()?))
    }))?;

    engine.add_base("list", Some("list"), Arc::new(|_, m| {
        Ok(TagValue::List(modifier(m, "list")?.to_list()?))
    }))?;

    engine.add_base("map", Some("map"), Arc::new(|_, m| {
        Ok(TagValue::Map(modifier(m, "map")?.to_map()?))
    }))?;

    Ok(engine)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
