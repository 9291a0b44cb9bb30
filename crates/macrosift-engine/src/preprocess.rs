//! Literal-hiding preprocessor.
//!
//! Obfuscated scripts bury megabytes of encoded payload in string literals
//! and comments, which makes every downstream textual pass quadratic.
//! `hide` swaps each literal for a short placeholder and records the
//! original in a map; `unhide` is the literal reverse substitution. The
//! scan is expensive on large inputs, so results are memoized per distinct
//! input text.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use log::debug;

/// Masked token (delimiters included) to original text.
pub type PlaceholderMap = BTreeMap<String, String>;

/// Placeholder counter base. Wide enough that generated names never collide
/// with identifiers in real macro source.
const COUNTER_BASE: u64 = 1_000_000;

#[derive(Debug, Default)]
pub struct Preprocessor {
    memo: HashMap<String, (String, PlaceholderMap)>,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every string literal and full-line comment in `source` with
    /// a unique placeholder, returning the masked text and the map needed
    /// to reverse the substitution.
    pub fn hide(&mut self, source: &str) -> (String, PlaceholderMap) {
        if let Some(cached) = self.memo.get(source) {
            return cached.clone();
        }

        // Structured documents are not script text; masking would corrupt
        // them.
        if is_structured_document(source) {
            let result = (source.to_string(), PlaceholderMap::new());
            self.memo.insert(source.to_string(), result.clone());
            return result;
        }

        let mut counter = COUNTER_BASE;
        let mut map = PlaceholderMap::new();
        let masked = mask_comments(source, &mut counter, &mut map);
        let masked = mask_strings(&masked, &mut counter, &mut map);
        debug!("hid {} literals", map.len());

        let result = (masked, map);
        self.memo.insert(source.to_string(), result.clone());
        result
    }
}

/// Reverse substitution of [`Preprocessor::hide`].
pub fn unhide(masked: &str, map: &PlaceholderMap) -> String {
    let mut out = masked.to_string();
    for (token, original) in map {
        out = out.replace(token, original);
    }
    out
}

/// Office container magic and markup wrappers the masking pass must leave
/// alone.
fn is_structured_document(source: &str) -> bool {
    let bytes = source.as_bytes();
    if bytes.starts_with(b"PK\x03\x04") {
        return true;
    }
    // OLE compound file magic, as it appears when read lossily as text.
    if source.starts_with("\u{d0}\u{cf}\u{11}\u{e0}") {
        return true;
    }
    source.contains("</script>") || source.trim_start().starts_with("<?xml")
}

/// Mask full-line comments. Masking instead of deleting keeps the reverse
/// substitution exact, and stops a comment from exposing further comment
/// text when removed.
fn mask_comments(source: &str, counter: &mut u64, map: &mut PlaceholderMap) -> String {
    let mut out = String::with_capacity(source.len());
    for (i, line) in source.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with('\'') && trimmed.len() >= 10 {
            let indent_len = line.len() - trimmed.len();
            let token = format!("'HIDE_{counter}");
            *counter += 1;
            map.insert(token.clone(), trimmed.to_string());
            out.push_str(&line[..indent_len]);
            out.push_str(&token);
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Character-by-character scan replacing each completed double-quoted
/// string with a placeholder. Honors the doubled-quote escape convention
/// and leaves trailing-comment text untouched.
fn mask_strings(source: &str, counter: &mut u64, map: &mut PlaceholderMap) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut in_str = false;
    let mut in_comment = false;
    let mut current = String::new();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if !in_str {
            if c == '\'' {
                in_comment = true;
            } else if c == '\n' {
                in_comment = false;
            }
        }

        if c == '"' && !in_comment {
            if in_str && chars.get(i + 1) == Some(&'"') {
                // Doubled quote, an escaped quote inside the literal.
                current.push_str("\"\"");
                i += 2;
                continue;
            }
            in_str = !in_str;
            if in_str {
                current.clear();
            } else {
                let token = format!("\"HIDE_{counter}\"");
                *counter += 1;
                map.insert(token.clone(), format!("\"{current}\""));
                out.push_str(&token);
            }
            i += 1;
            continue;
        }

        if in_str {
            current.push(c);
        } else {
            out.push(c);
        }
        i += 1;
    }

    // Unterminated literal at end of input: emit it unmasked.
    if in_str {
        out.push('"');
        out.push_str(&current);
    }
    out
}

/// Quote a literal's contents for analysis output, rewriting characters
/// above the printable range as explicit `Chr()` calls concatenated back in
/// so no byte is silently dropped. Not used by the hide/unhide substitution,
/// which must stay byte-exact.
pub fn rewrite_non_printable(s: &str) -> String {
    if s.chars().all(|c| (c as u32) <= 126) {
        return format!("\"{s}\"");
    }

    let mut out = String::new();
    let mut in_literal = false;
    let mut have_prev = false;
    for c in s.chars() {
        if (c as u32) <= 126 {
            if !in_literal {
                in_literal = true;
                if have_prev {
                    out.push_str(" & ");
                }
                out.push('"');
            }
            have_prev = true;
            out.push(c);
            continue;
        }
        if in_literal {
            out.push('"');
            have_prev = true;
        }
        in_literal = false;
        if have_prev {
            out.push_str(" & ");
        }
        have_prev = true;
        let _ = write!(out, "Chr(&H{:X})", c as u32);
    }
    if in_literal {
        out.push('"');
    }
    out
}
