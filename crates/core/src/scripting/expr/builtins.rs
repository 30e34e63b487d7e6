//! Builtin functions of the expression language.

use regex::Regex;

use crate::sandbox::Sandbox;
use crate::scripting::backend::BackendError;
use crate::value::Value;

use super::eval::runtime;

const NAMES: &[&str] = &[
    "concat",
    "contains",
    "join",
    "len",
    "lowercase",
    "replace",
    "resource",
    "split",
    "squish",
    "str",
    "trim",
    "uppercase",
];

pub fn exists(name: &str) -> bool {
    lookup(name).is_some()
}

/// The interned builtin name matching `name`.
pub fn lookup(name: &str) -> Option<&'static str> {
    NAMES.iter().copied().find(|builtin| *builtin == name)
}

/// Invoke builtin `name`. `sandbox` backs `resource`.
pub fn call(name: &str, args: Vec<Value>, sandbox: &Sandbox) -> Result<Value, BackendError> {
    match name {
        "uppercase" => map_string(name, args, |s| s.to_uppercase()),
        "lowercase" => map_string(name, args, |s| s.to_lowercase()),
        "trim" => map_string(name, args, |s| s.trim().to_string()),
        "squish" => map_string(name, args, |s| {
            s.split_whitespace().collect::<Vec<_>>().join(" ")
        }),
        "replace" => {
            let [text, pattern, replacement] = exactly(name, args)?;
            let text = string(name, &text)?;
            let pattern = Regex::new(string(name, &pattern)?)
                .map_err(|e| runtime(format!("replace: invalid pattern: {e}")))?;
            let replacement = string(name, &replacement)?;
            Ok(Value::Str(pattern.replace_all(text, replacement).into_owned()))
        }
        "split" => split(args),
        "join" => join(args),
        "len" => {
            let [value] = exactly(name, args)?;
            let len = match &value {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                other => return Err(runtime(format!("len: unsupported {}", other.type_name()))),
            };
            Ok(Value::Int(len as i64))
        }
        "concat" => Ok(Value::Str(args.iter().map(Value::render).collect())),
        "str" => {
            let [value] = exactly(name, args)?;
            Ok(Value::Str(value.render()))
        }
        "contains" => {
            let [haystack, needle] = exactly(name, args)?;
            let found = match (&haystack, &needle) {
                (Value::Str(s), Value::Str(part)) => s.contains(part.as_str()),
                (Value::List(items), needle) => items.contains(needle),
                (Value::Map(entries), Value::Str(key)) => entries.contains_key(key),
                (other, _) => {
                    return Err(runtime(format!(
                        "contains: unsupported {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Bool(found))
        }
        "resource" => {
            let [path] = exactly(name, args)?;
            let path = string(name, &path)?;
            let file = sandbox
                .resolve(path)
                .ok_or_else(|| runtime(format!("resource not found: {path}")))?;
            Ok(Value::Str(std::fs::read_to_string(file)?))
        }
        other => Err(runtime(format!("unknown builtin '{other}'"))),
    }
}

fn split(args: Vec<Value>) -> Result<Value, BackendError> {
    let parts: Vec<Value> = match args.as_slice() {
        [text] => string("split", text)?
            .split_whitespace()
            .map(Value::from)
            .collect(),
        [text, separator] => string("split", text)?
            .split(string("split", separator)?)
            .map(Value::from)
            .collect(),
        _ => return Err(arity("split", "1 or 2", args.len())),
    };
    Ok(Value::List(parts))
}

fn join(args: Vec<Value>) -> Result<Value, BackendError> {
    let (items, separator) = match args.as_slice() {
        [Value::List(items)] => (items, ""),
        [Value::List(items), separator] => (items, string("join", separator)?),
        [other, ..] => return Err(runtime(format!("join: expected a list, got {}", other.type_name()))),
        [] => return Err(arity("join", "1 or 2", 0)),
    };
    let rendered: Vec<String> = items.iter().map(Value::render).collect();
    Ok(Value::Str(rendered.join(separator)))
}

fn map_string(
    name: &str,
    args: Vec<Value>,
    f: impl FnOnce(&str) -> String,
) -> Result<Value, BackendError> {
    let [value] = exactly(name, args)?;
    Ok(Value::Str(f(string(name, &value)?)))
}

fn exactly<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], BackendError> {
    let count = args.len();
    args.try_into()
        .map_err(|_| arity(name, &N.to_string(), count))
}

fn string<'a>(name: &str, value: &'a Value) -> Result<&'a str, BackendError> {
    value.as_str().ok_or_else(|| {
        runtime(format!(
            "{name}: expected a string, got {}",
            value.type_name()
        ))
    })
}

fn arity(name: &str, expected: &str, got: usize) -> BackendError {
    runtime(format!("{name}: expects {expected} argument(s), got {got}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
