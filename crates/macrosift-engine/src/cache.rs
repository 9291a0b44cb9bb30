use std::collections::HashMap;
use std::sync::OnceLock;

use log::debug;
use macrosift_model::Value;
use regex::Regex;

/// Memo table for all-literal numeric subtrees, keyed by the subtree's
/// canonical textual rendering.
///
/// Subtrees are immutable for the lifetime of a run, so entries are never
/// invalidated. Only numeric values are cached; anything else could depend
/// on mutable state and is silently ignored.
#[derive(Debug, Default)]
pub struct ConstCache {
    entries: HashMap<String, Value>,
    hits: u64,
}

impl ConstCache {
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let value = self.entries.get(key).cloned();
        if value.is_some() {
            self.hits += 1;
        }
        value
    }

    pub fn set(&mut self, key: &str, value: &Value) {
        if !value.is_numeric() {
            debug!("`{value}` is not numeric, not caching");
            return;
        }
        debug!("cache value of {key} = {value}");
        self.entries.insert(key.to_string(), value.clone());
    }

    /// How many lookups were served from the cache. Used to verify that a
    /// repeated constant expression is not recomputed.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// True when `text` matches the literal arithmetic grammar: digits,
/// `+ - * /`, and balanced parentheses only. Candidate subtrees must also
/// contain zero variable references (checked by the caller via the
/// free-variable collector) before they are eligible for caching.
pub fn is_literal_math_text(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        let base = r"(?:\s*\d+(?:\.\d+)?\s*[+\-*/]\s*)*\s*\d+(?:\.\d+)?";
        let pattern = format!(r"^\s*(?:{base}|\((?:\s*{base}\s*[+\-*/]\s*)*\s*{base}\s*\))\s*$");
        Regex::new(&pattern).expect("valid regex")
    });
    re.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_numeric_values_are_cached() {
        let mut cache = ConstCache::default();
        cache.set("1 + 2", &Value::Int(3));
        cache.set("x", &Value::from("payload"));
        assert_eq!(cache.get("1 + 2"), Some(Value::Int(3)));
        assert_eq!(cache.get("x"), None);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn literal_math_grammar() {
        assert!(is_literal_math_text("1 + 2 * 3"));
        assert!(is_literal_math_text("(1 + 2)"));
        assert!(is_literal_math_text("12"));
        assert!(!is_literal_math_text("x + 1"));
        assert!(!is_literal_math_text("Chr(65)"));
        assert!(!is_literal_math_text("\"1\" + \"2\""));
    }
}
