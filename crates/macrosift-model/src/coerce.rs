//! Scalar coercions between the VBA value types.
//!
//! These reproduce the conversions VBA applies implicitly, including the
//! ones that only make sense as observed engine behavior (`&H..` hex
//! strings, float strings truncating toward the integer part, and strings of
//! comma-grouped digits being cut at the first comma).

use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use thiserror::Error;

use crate::value::{Value, MATCH_ANY};

#[derive(Debug, Error)]
pub enum CoerceError {
    #[error("cannot coerce `{0}` to a number")]
    NonNumeric(String),
}

fn hex_string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^&[hH][0-9a-fA-F]+").expect("valid regex"))
}

fn comma_digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\d+,)+\d+").expect("valid regex"))
}

/// Coerce a value to a string. `Null` is the empty string; a list of
/// character codes becomes the corresponding string with NUL bytes dropped.
pub fn to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Str(s) => s.clone(),
        Value::List(items) => match char_codes_to_string(items) {
            Some(s) => s,
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

fn char_codes_to_string(items: &[Value]) -> Option<String> {
    let mut r = String::new();
    for item in items {
        let code = match item {
            Value::Int(n) => *n,
            Value::Float(f) => *f as i64,
            _ => return None,
        };
        // NUL bytes are skipped, matching how VBA string builtins treat
        // embedded NULs in decode output.
        if code == 0 {
            continue;
        }
        let c = u32::try_from(code).ok().and_then(char::from_u32)?;
        r.push(c);
    }
    Some(r)
}

/// Coerce a value to an integer. `Null` is 0, `&H..` strings parse as hex,
/// float-looking strings truncate toward the integer part.
pub fn to_int(value: &Value) -> Result<i64, CoerceError> {
    match value {
        Value::Null => Ok(0),
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Float(f) => Ok(*f as i64),
        Value::Str(s) => str_to_int(s),
        other => Err(CoerceError::NonNumeric(other.to_string())),
    }
}

fn str_to_int(s: &str) -> Result<i64, CoerceError> {
    // A string of nothing but NUL bytes is 0.
    if !s.is_empty() && s.chars().all(|c| c == '\0') {
        return Ok(0);
    }
    let s = s.replace('\0', "");

    if s.contains('.') {
        if let Ok(f) = s.trim().parse::<f64>() {
            return Ok(f as i64);
        }
    }

    if hex_string_re().is_match(s.trim()) {
        let digits = &s.trim()[2..];
        if let Ok(n) = i64::from_str_radix(digits, 16) {
            return Ok(n);
        }
    }

    s.trim()
        .parse::<i64>()
        .map_err(|_| CoerceError::NonNumeric(s.clone()))
}

/// Coerce a value to a number, preserving an integer or float result.
pub fn to_num(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Null => Ok(Value::Int(0)),
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Str(s) => {
            // "123,456,7890" keeps only the digits before the first comma.
            let mut s = s.as_str();
            if comma_digits_re().is_match(s) {
                s = &s[..s.find(',').unwrap_or(s.len())];
            }
            if s.contains('.') {
                if let Ok(f) = s.trim().parse::<f64>() {
                    return Ok(Value::Float(f));
                }
            }
            str_to_int(s).map(Value::Int)
        }
        other => Err(CoerceError::NonNumeric(other.to_string())),
    }
}

/// Coerce a value to a list of character codes. Strings become one code per
/// character; lists pass through with each element coerced.
pub fn to_int_list(value: &Value) -> Vec<i64> {
    match value {
        Value::List(items) => items
            .iter()
            .map(|item| to_int(item).unwrap_or(0))
            .collect(),
        other => to_string(other).chars().map(|c| c as i64).collect(),
    }
}

/// Lenient integer conversion used by the operator layer. Unlike [`to_int`]
/// this never fails: unconvertible values become 0 (logged), the empty
/// string degrades to the uninitialized sentinel, and the match-any wildcard
/// is left alone so comparisons can still recognize it.
pub fn int_convert(value: &Value) -> Value {
    match value {
        Value::Null => Value::Int(0),
        Value::Int(n) => Value::Int(*n),
        Value::Bool(b) => Value::Int(i64::from(*b)),
        Value::Float(f) => Value::Int(f.round() as i64),
        Value::Str(s) if s.is_empty() => Value::Null,
        Value::Str(s) if s == MATCH_ANY => value.clone(),
        other => {
            let text = other.to_string();
            let head = match text.find('.') {
                Some(i) => &text[..i],
                None => text.as_str(),
            };
            match str_to_int(head) {
                Ok(n) => Value::Int(n),
                Err(_) => {
                    debug!("cannot convert `{text}` to int, defaulting to 0");
                    Value::Int(0)
                }
            }
        }
    }
}

/// Lenient string conversion: `Null` is the empty string.
pub fn str_convert(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => to_string(other),
    }
}

/// The dominant type [`coerce_args`] unifies an argument list to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgType {
    Str,
    Int,
}

/// Coerce a heterogeneous argument list to a single type inferred from the
/// first non-null argument (or the caller's preferred type when present
/// among the observed types). Returns the list unchanged when any argument
/// is neither string nor integer, or when no type can be determined.
pub fn coerce_args(args: Vec<Value>, preferred: Option<ArgType>) -> Vec<Value> {
    if args.is_empty() {
        return args;
    }

    let mut first_type = None;
    let mut all_types = Vec::new();
    let mut all_null = true;
    for arg in &args {
        match arg {
            // Nulls can be int or str depending on context; skip them.
            Value::Null => continue,
            Value::Str(_) => {
                all_null = false;
                if !all_types.contains(&ArgType::Str) {
                    all_types.push(ArgType::Str);
                }
                first_type.get_or_insert(ArgType::Str);
            }
            Value::Int(_) => {
                all_null = false;
                if !all_types.contains(&ArgType::Int) {
                    all_types.push(ArgType::Int);
                }
                first_type.get_or_insert(ArgType::Int);
            }
            // Anything beyond str/int is left alone.
            _ => return args,
        }
    }

    if all_null {
        first_type = Some(ArgType::Int);
    }
    let Some(mut target) = first_type else {
        return args;
    };
    if let Some(preferred) = preferred {
        if all_types.contains(&preferred) {
            target = preferred;
        }
    }

    debug!("coerce args to {target:?}: {args:?}");
    match target {
        ArgType::Str => args.iter().map(|a| Value::Str(to_string(a))).collect(),
        ArgType::Int => {
            let mut out = Vec::with_capacity(args.len());
            for arg in &args {
                match to_int(arg) {
                    Ok(n) => out.push(Value::Int(n)),
                    // One bad argument bails out of the whole coercion.
                    Err(_) => return args,
                }
            }
            out
        }
    }
}
