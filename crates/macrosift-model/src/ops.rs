//! VBA operator semantics over [`Value`].
//!
//! The type of the *first* operand drives implicit coercion, so
//! `add(1, "3")` is `4` while `add("1", 3)` is `"13"`. Wildcard sentinel
//! strings compare as matching anything, with the single exception that the
//! placeholder file name is never equal to the empty string.

use crate::coerce::{int_convert, str_convert, to_num, to_string};
use crate::value::Value;

/// VBA `+`: numeric addition when the left operand makes both operands
/// numeric, string concatenation otherwise.
pub fn add(x: &Value, y: &Value) -> Value {
    let mut x = x.clone();
    let mut y = y.clone();

    if y.is_null() {
        y = Value::Int(0);
    }
    if x.is_null() {
        // Adding a string to an uninitialized value makes the whole
        // expression a string.
        x = if matches!(y, Value::Str(_)) {
            Value::Str(String::new())
        } else {
            Value::Int(0)
        };
    }

    // The first operand's type drives the coercion of the second.
    if matches!(x, Value::Str(_)) && !matches!(y, Value::Str(_)) {
        y = Value::Str(str_convert(&y));
    }
    if matches!(x, Value::Int(_)) && !matches!(y, Value::Int(_)) {
        y = int_convert(&y);
    }

    if let (Some(a), Some(b)) = (x.as_f64(), y.as_f64()) {
        return match (&x, &y) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            _ => Value::Float(a + b),
        };
    }

    if let Value::Str(ys) = &y {
        // An all-numeric zero on the left is VB's empty string.
        let xs = match &x {
            Value::Int(0) => String::new(),
            other => to_string(other),
        };
        return Value::Str(xs + ys);
    }
    if let Value::Str(xs) = &x {
        let ys = match &y {
            Value::Int(0) => String::new(),
            other => to_string(other),
        };
        return Value::Str(xs.clone() + &ys);
    }

    // Neither pure numeric addition nor straightforward concatenation.
    // Stringify both sides and hope for the best.
    Value::Str(to_string(&x) + &to_string(&y))
}

/// VBA `=` with wildcard handling.
pub fn equals(x: &Value, y: &Value) -> bool {
    let zero = Value::Int(0);
    let x = if x.is_null() { &zero } else { x };
    let y = if y.is_null() { &zero } else { y };

    // The analyzed file's name is never the empty string.
    let empty = Value::Str(String::new());
    if (x.is_wildcard() && *y == empty) || (y.is_wildcard() && *x == empty) {
        return false;
    }
    if x.is_wildcard() || y.is_wildcard() {
        return true;
    }

    match (x, y) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::List(a), Value::List(b)) => a == b,
        // Numbers across the int/float divide compare numerically.
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        // Booleans and integers compare as integers.
        (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => i64::from(*a) == *b,
        // Mixed operands stringify and compare.
        (a, b) => to_string(a) == to_string(b),
    }
}

pub fn not_equals(x: &Value, y: &Value) -> bool {
    !equals(x, y)
}

/// VBA `>`: both operands are coerced to numbers, falling back to a string
/// comparison when either cannot be.
pub fn greater_than(x: &Value, y: &Value) -> bool {
    let zero = Value::Int(0);
    let x = if x.is_null() { &zero } else { x };
    let y = if y.is_null() { &zero } else { y };

    if x.is_wildcard() || y.is_wildcard() {
        return true;
    }

    match (to_num(x), to_num(y)) {
        (Ok(a), Ok(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        _ => to_string(x) > to_string(y),
    }
}

pub fn less_than(x: &Value, y: &Value) -> bool {
    !greater_than(x, y) && !equals(x, y)
}

pub fn greater_or_equal(x: &Value, y: &Value) -> bool {
    greater_than(x, y) || equals(x, y)
}

pub fn less_or_equal(x: &Value, y: &Value) -> bool {
    !greater_than(x, y) || equals(x, y)
}

/// VBA `Not` with wildcard handling: a wildcard value resolves to the
/// supplied default before negation.
pub fn logical_not(x: &Value, default_for_wildcard: bool) -> bool {
    let truthy = if x.is_wildcard() {
        default_for_wildcard
    } else {
        match x {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Null => false,
        }
    };
    !truthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{CURRENT_FILE_NAME, MATCH_ANY};
    use pretty_assertions::assert_eq;

    #[test]
    fn add_is_left_operand_driven() {
        assert_eq!(add(&Value::Int(1), &Value::from("3")), Value::Int(4));
        assert_eq!(add(&Value::from("1"), &Value::Int(3)), Value::from("13"));
    }

    #[test]
    fn add_treats_null_as_zero_or_empty() {
        assert_eq!(add(&Value::Null, &Value::Int(3)), Value::Int(3));
        assert_eq!(add(&Value::Null, &Value::from("x")), Value::from("x"));
        assert_eq!(add(&Value::Int(2), &Value::Null), Value::Int(2));
    }

    #[test]
    fn wildcard_equality_rules() {
        let wild = Value::from(CURRENT_FILE_NAME);
        assert!(!equals(&wild, &Value::from("")));
        assert!(equals(&wild, &Value::from("anything_else")));
        assert!(equals(&Value::from(MATCH_ANY), &Value::Int(12)));
    }

    #[test]
    fn greater_than_compares_numerically() {
        // Lexically "5" > "10"; numerically it is not.
        assert!(!greater_than(&Value::from("5"), &Value::from("10")));
        assert!(greater_than(&Value::from("10"), &Value::from("5")));
        assert!(greater_than(&Value::from(MATCH_ANY), &Value::Int(999)));
    }

    #[test]
    fn derived_comparisons() {
        assert!(less_than(&Value::Int(1), &Value::Int(2)));
        assert!(greater_or_equal(&Value::Int(2), &Value::Int(2)));
        assert!(less_or_equal(&Value::Int(2), &Value::Int(2)));
    }

    #[test]
    fn logical_not_uses_wildcard_default() {
        assert!(!logical_not(&Value::from(MATCH_ANY), true));
        assert!(logical_not(&Value::from(MATCH_ANY), false));
        assert!(logical_not(&Value::Int(0), true));
        assert!(!logical_not(&Value::from("x"), false));
    }
}
