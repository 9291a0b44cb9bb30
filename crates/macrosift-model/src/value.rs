use std::fmt;

/// Placeholder for the name of the file under analysis. The real name is not
/// known during static triage, so comparisons treat this as matching any
/// concrete value.
pub const CURRENT_FILE_NAME: &str = "CURRENT_FILE_NAME";

/// Placeholder for some file name the macro manufactured at runtime.
pub const SOME_FILE_NAME: &str = "SOME_FILE_NAME";

/// Placeholder that matches any concrete value under the comparison
/// operators.
pub const MATCH_ANY: &str = "**MATCH ANY**";

/// All wildcard sentinel strings.
pub const WILDCARDS: [&str; 3] = [CURRENT_FILE_NAME, SOME_FILE_NAME, MATCH_ANY];

/// A minimal VBA Variant-like value.
///
/// `Null` is the *uninitialized* sentinel (rendered `NULL`), which is a
/// first-class value distinct from a name being absent from the execution
/// environment. `List` carries character-code arrays built by decode loops.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// True for the wildcard sentinel strings representing not-yet-known
    /// environment facts.
    pub fn is_wildcard(&self) -> bool {
        match self {
            Value::Str(s) => WILDCARDS.contains(&s.as_str()),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(v) => {
                // VBA renders whole doubles without the trailing ".0".
                let s = format!("{v}");
                match s.strip_suffix(".0") {
                    Some(trimmed) => write!(f, "{trimmed}"),
                    None => write!(f, "{s}"),
                }
            }
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
