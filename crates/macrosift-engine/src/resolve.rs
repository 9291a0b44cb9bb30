//! Argument resolution.
//!
//! Obfuscated macros hide payloads in places a straight evaluator never
//! looks: spreadsheet cells, drawing-object text, document variables and
//! metadata, form controls. `resolve` wraps evaluation in an ordered
//! fallback chain that tries each of those stores before giving up.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;
use macrosift_model::Value;
use regex::Regex;

use crate::ast::{Expr, NodeRef};
use crate::cache::is_literal_math_text;
use crate::context::{Binding, Context};
use crate::error::EngineError;
use crate::eval::call_procedure;
use crate::limits::RunState;
use crate::visit::has_free_variables;

const SHAPE_TEXT_SUFFIX: &str = ".TextFrame.TextRange.Text";

/// Property suffixes of form controls the document did not define. These
/// read as empty string rather than as their own text.
const FORM_FIELD_SUFFIXES: &[&str] = &[
    ".tag",
    ".boundvalue",
    ".column",
    ".caption",
    ".groupname",
    ".seltext",
    ".controltiptext",
    ".passwordchar",
    ".controlsource",
    ".value",
];

/// Resolve an expression to a concrete value.
///
/// When `treat_as_identifier` is set, text that looks like a plain variable
/// name but resolves to nothing degrades to the uninitialized sentinel
/// instead of its own text.
pub fn resolve(
    expr: &Expr,
    ctx: &mut dyn Context,
    st: &mut RunState,
    treat_as_identifier: bool,
) -> Result<Value, EngineError> {
    st.check_limits(true)?;

    let text = expr.to_string();

    // Spreadsheet cell and drawing-text reads come before plain evaluation
    // so `Sheets("x").Range("A1").Value` never degrades to member text.
    if let Some(v) = read_sheet_cell(expr, &text, ctx) {
        return Ok(v);
    }
    if let Some(v) = read_object_text(expr, &text, ctx, st)? {
        return Ok(v);
    }

    let cacheable =
        is_literal_math_text(&text) && !has_free_variables(NodeRef::Expr(expr), st)?;
    if cacheable {
        if let Some(v) = st.cache.get(&text) {
            return Ok(v);
        }
    }

    let result = match expr {
        Expr::Literal(Value::Str(s)) => {
            let s = s.clone();
            resolve_text(&s, ctx, st, treat_as_identifier)?
        }
        Expr::Literal(v) => v.clone(),
        _ => {
            let r = expr.eval(ctx, st)?;
            // Evaluation can surface a leftover Shapes() reference as text;
            // run that text back through the document-variable lookup.
            match &r {
                Value::Str(s) if s.starts_with("Shapes(") || s.starts_with("InlineShapes(") => {
                    let s = s.clone();
                    resolve_text(&s, ctx, st, treat_as_identifier)?
                }
                _ => r,
            }
        }
    };

    if cacheable {
        st.cache.set(&text, &result);
    }
    Ok(result)
}

/// Resolve each expression in a list. Short-circuits to plain clones when no
/// element needs evaluation.
pub fn resolve_many(
    args: &[Expr],
    ctx: &mut dyn Context,
    st: &mut RunState,
    treat_as_identifier: bool,
) -> Result<Vec<Value>, EngineError> {
    if args.iter().all(|a| matches!(a, Expr::Literal(_))) {
        return Ok(args
            .iter()
            .map(|a| match a {
                Expr::Literal(v) => v.clone(),
                _ => Value::Null,
            })
            .collect());
    }
    args.iter()
        .map(|a| resolve(a, ctx, st, treat_as_identifier))
        .collect()
}

/// Resolve a piece of leftover text through the string fallback chain,
/// ending with the identifier/form-field degradations.
pub fn resolve_text(
    text: &str,
    ctx: &mut dyn Context,
    st: &mut RunState,
    treat_as_identifier: bool,
) -> Result<Value, EngineError> {
    if let Some(v) = resolve_string_fallbacks(text, ctx, st)? {
        return Ok(v);
    }

    static IDENT: OnceLock<Regex> = OnceLock::new();
    let ident = IDENT.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid regex"));
    if treat_as_identifier && ident.is_match(text) {
        debug!("`{text}` unresolved, treating as uninitialized");
        return Ok(Value::Null);
    }

    let low = text.to_lowercase();
    if FORM_FIELD_SUFFIXES.iter().any(|s| low.ends_with(s)) {
        return Ok(Value::Str(String::new()));
    }

    Ok(Value::Str(text.to_string()))
}

/// The shared string fallback chain. Returns `None` when nothing resolved so
/// callers can apply their own last-resort behavior.
pub fn resolve_string_fallbacks(
    text: &str,
    ctx: &mut dyn Context,
    st: &mut RunState,
) -> Result<Option<Value>, EngineError> {
    let low = text.to_lowercase();

    // Drawing-text references reach here when they were produced as values
    // rather than parsed as member accesses.
    if low.contains("shapes(") {
        if let Some(base) = object_ref_in(text) {
            if let Some(v) = shape_doc_var(&base, ctx) {
                return Ok(Some(v));
            }
            if let Some(v) = shape_doc_var(&force_index_one(&base), ctx) {
                return Ok(Some(v));
            }
        }
    }

    // Simple case first. Is this a variable?
    match ctx.get(text, false) {
        Some(Binding::Value(v)) => return Ok(Some(v)),
        Some(Binding::Procedure(proc)) => {
            return Ok(Some(call_procedure(&proc, &[], ctx, st)?));
        }
        Some(Binding::Library(func)) => return Ok(Some(func.call(ctx, &[])?)),
        None => {}
    }

    // `X.nodeTypedValue` reads the value stored as `X.text`, with an implied
    // base64 decode when the stored text is valid base64.
    if low.contains("nodetypedvalue") {
        let alias = low.replace("nodetypedvalue", "text");
        if let Some(Binding::Value(v)) = ctx.get(&alias, false) {
            if let Value::Str(s) = &v {
                if let Ok(decoded) = BASE64.decode(s.trim()) {
                    let decoded: String = decoded
                        .into_iter()
                        .filter(|&b| b != 0)
                        .map(char::from)
                        .collect();
                    return Ok(Some(Value::Str(decoded)));
                }
            }
            return Ok(Some(v));
        }
    } else if low.contains(".selecteditem") {
        // Form drop-downs stash their value under `.rapt.value`.
        let alias = low.replace(".selecteditem", ".rapt.value");
        if let Some(Binding::Value(v)) = ctx.get(&alias, false) {
            return Ok(Some(v));
        }
    } else if low.contains('.') {
        if let Some(v) = ctx.get_doc_var(text) {
            return Ok(Some(v));
        }

        // Peel leading dotted segments, trying each suffix as a variable.
        let mut peeled = low.as_str();
        while let Some(dot) = peeled.find('.') {
            if let Some(Binding::Value(v)) = ctx.get(peeled, false) {
                if v != Value::Str(text.to_string()) {
                    return Ok(Some(v));
                }
            }
            peeled = &peeled[dot + 1..];
        }

        // Try the final segment as a zero-argument function.
        if let Some(last) = low.rsplit('.').next() {
            let last = last.trim_end_matches(['(', ')']);
            match ctx.get(last, false) {
                Some(Binding::Procedure(proc)) => {
                    return Ok(Some(call_procedure(&proc, &[], ctx, st)?));
                }
                Some(Binding::Library(func)) => return Ok(Some(func.call(ctx, &[])?)),
                _ => {}
            }
        }

        let tmp = low.trim();
        if let Some(prop) = strip_accessor(tmp, "activedocument.item(") {
            match ctx.read_metadata_item(&prop) {
                Some(v) => return Ok(Some(v)),
                None => {
                    ctx.report_general_error(&format!("metadata field `{prop}` not found"));
                    return Ok(Some(Value::Str(String::new())));
                }
            }
        }
        for pat in [
            "thisdocument.builtindocumentproperties(",
            "activeworkbook.builtindocumentproperties(",
        ] {
            if let Some(name) = strip_accessor(tmp, pat) {
                if let Some(v) = ctx.get_doc_var(&name) {
                    return Ok(Some(v));
                }
                if let Some(v) = ctx.read_metadata_item(&name) {
                    return Ok(Some(v));
                }
            }
        }
        for pat in [
            "activedocument.variables(",
            "activedocument.customdocumentproperties(",
        ] {
            if let Some(name) = strip_accessor(tmp, pat) {
                if let Some(v) = ctx.get_doc_var(&name) {
                    return Ok(Some(v));
                }
            }
        }

        // Last resort, scan for a wildcard-suffixed form variable.
        if let Some(dot) = tmp.find('.') {
            let prefix = &tmp[..dot];
            for i in 0..=10 {
                if let Some(Binding::Value(v)) = ctx.get(&format!("{prefix}*{i}"), false) {
                    debug!("found `{tmp}` as wildcard form variable `{prefix}*{i}`");
                    return Ok(Some(v));
                }
            }
        }
    }

    Ok(None)
}

/// Strip a known object-model accessor wrapper, leaving the bare key.
fn strip_accessor(text: &str, prefix: &str) -> Option<String> {
    if !text.starts_with(prefix) {
        return None;
    }
    Some(
        text[prefix.len()..]
            .replace([')', '(', '\'', '"'], "")
            .replace(".value", "")
            .trim()
            .to_string(),
    )
}

/// `Sheets(name).Range(ref)` / `Sheets(name).Cells(r, c)` reads against the
/// external workbook accessor.
fn read_sheet_cell(expr: &Expr, text: &str, ctx: &mut dyn Context) -> Option<Value> {
    if !matches!(expr, Expr::Member { .. }) {
        return None;
    }
    let low = text.to_lowercase();
    if !low.contains("sheets(") || !(low.contains("range(") || low.contains("cells(")) {
        return None;
    }

    let sheet = extract_paren_arg(text, &low, "sheets(")?;
    let index = extract_paren_arg(text, &low, "range(")
        .or_else(|| extract_paren_arg(text, &low, "cells("))?;

    match parse_cell_index(&index) {
        Some((row, col)) => {
            let v = ctx.sheet_cell(&sheet, row, col);
            if v.is_some() {
                debug!("read cell ({index}) from sheet {sheet}");
            }
            v
        }
        None => {
            ctx.report_general_error(&format!("cannot parse spreadsheet cell index `{index}`"));
            None
        }
    }
}

fn extract_paren_arg(text: &str, low: &str, marker: &str) -> Option<String> {
    let start = low.find(marker)? + marker.len();
    let end = start + low[start..].find(')')?;
    Some(text[start..end].replace(['"', '\''], "").trim().to_string())
}

/// A cell index is either a `row, col` numeric pair or column letters
/// followed by a 1-based row number.
fn parse_cell_index(index: &str) -> Option<(u32, u32)> {
    static PAIR: OnceLock<Regex> = OnceLock::new();
    let pair = PAIR.get_or_init(|| Regex::new(r"(\d+)\s*,\s*(\d+)").expect("valid regex"));

    if let Some(caps) = pair.captures(index) {
        let row: u32 = caps[1].parse().ok()?;
        let col: u32 = caps[2].parse().ok()?;
        return Some((row.checked_sub(1)?, col.checked_sub(1)?));
    }

    let letters: String = index.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    let digits: String = index.chars().filter(|c| c.is_ascii_digit()).collect();
    if letters.is_empty() || digits.is_empty() {
        return None;
    }
    let row: u32 = digits.parse().ok()?;
    let mut col: u32 = 0;
    for c in letters.chars() {
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    Some((row.checked_sub(1)?, col.checked_sub(1)?))
}

/// `Shapes(...)` / `InlineShapes(...)` text reads, stored by the document
/// loader as variables keyed `<object>.TextFrame.TextRange.Text`.
fn read_object_text(
    expr: &Expr,
    text: &str,
    ctx: &mut dyn Context,
    st: &mut RunState,
) -> Result<Option<Value>, EngineError> {
    let low = text.to_lowercase();
    // Shapes() references inside a function-call argument list are handled
    // when the argument itself resolves, not here.
    if !low.contains("shapes(") || matches!(expr, Expr::Call { .. }) {
        return Ok(None);
    }

    let mut base = object_ref_in(text).unwrap_or_else(|| "Shapes('1')".to_string());

    if let Expr::Member { parts } = expr {
        // Drop an ActiveDocument/ThisDocument prefix, then resolve the
        // leading element; a variable there often holds the real object
        // reference text.
        let mut head = parts.first();
        if let Some(Expr::Identifier(name)) = head {
            if name.eq_ignore_ascii_case("ActiveDocument")
                || name.eq_ignore_ascii_case("ThisDocument")
            {
                head = parts.get(1);
            }
        }
        if let Some(head) = head {
            let evaled = match head {
                Expr::Identifier(name) => match ctx.get(name, false) {
                    Some(Binding::Value(v)) => v,
                    _ => Value::Str(name.clone()),
                },
                _ => head.eval(ctx, st)?,
            };
            match evaled {
                Value::Null => {}
                other => {
                    let s = other.to_string();
                    if s.to_lowercase().contains("shapes(") {
                        base = s;
                    }
                }
            }
        }
    }

    if let Some(v) = shape_doc_var(&base, ctx) {
        return Ok(Some(v));
    }
    Ok(shape_doc_var(&force_index_one(&base), ctx))
}

/// Pull the `Shapes(...)`/`InlineShapes(...)` object reference out of a
/// piece of text, through the closing parenthesis.
fn object_ref_in(text: &str) -> Option<String> {
    let low = text.to_lowercase();
    let start = low.find("inlineshapes(").or_else(|| low.find("shapes("))?;
    let rest = &text[start..];
    let close = rest.find(')')?;
    Some(rest[..=close].to_string())
}

/// Rewrite a quoted object index to `'1'`, the retry used when a named
/// shape lookup misses.
fn force_index_one(base: &str) -> String {
    match (base.find('\''), base.rfind('\'')) {
        (Some(first), Some(last)) if first < last => {
            format!("{}'1{}", &base[..first], &base[last..])
        }
        _ => base.to_string(),
    }
}

fn shape_doc_var(base: &str, ctx: &mut dyn Context) -> Option<Value> {
    let name = format!("{base}{SHAPE_TEXT_SUFFIX}").replace(".TextFrame.TextFrame", ".TextFrame");
    ctx.get_doc_var(&name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryContext;
    use crate::limits::EmulationPolicy;
    use pretty_assertions::assert_eq;

    fn state() -> RunState {
        RunState::new(EmulationPolicy::default())
    }

    #[test]
    fn cell_index_numeric_pair_wins() {
        assert_eq!(parse_cell_index("10, 30"), Some((9, 29)));
        assert_eq!(parse_cell_index("J106"), Some((105, 9)));
        assert_eq!(parse_cell_index("AB3"), Some((2, 27)));
        assert_eq!(parse_cell_index("???"), None);
    }

    #[test]
    fn sheet_cell_read_through_member_access() {
        let mut ctx = InMemoryContext::new();
        ctx.set_sheet_cell("YHRPN", 105, 9, Value::from("cmd.exe"));
        let mut st = state();
        let expr = Expr::Member {
            parts: vec![
                Expr::ident("ThisWorkbook"),
                Expr::call("Sheets", vec![Expr::str_lit("YHRPN")]),
                Expr::call("Range", vec![Expr::str_lit("J106")]),
                Expr::ident("Value"),
            ],
        };
        let v = resolve(&expr, &mut ctx, &mut st, false).unwrap();
        assert_eq!(v, Value::from("cmd.exe"));
    }

    #[test]
    fn shape_text_resolves_from_doc_vars() {
        let mut ctx = InMemoryContext::new();
        ctx.set_doc_var("shapes('1').textframe.textrange.text", Value::from("hello"));
        let mut st = state();
        let v = resolve_text(
            "Shapes('1').TextFrame.TextRange.Text",
            &mut ctx,
            &mut st,
            false,
        )
        .unwrap();
        assert_eq!(v, Value::from("hello"));
    }

    #[test]
    fn doc_variable_accessor_pattern() {
        let mut ctx = InMemoryContext::new();
        ctx.set_doc_var("x", Value::from("payload"));
        let mut st = state();
        let v = resolve_text(
            "ActiveDocument.Variables(\"X\").Value",
            &mut ctx,
            &mut st,
            false,
        )
        .unwrap();
        assert_eq!(v, Value::from("payload"));
    }

    #[test]
    fn nodetypedvalue_auto_decodes_base64() {
        let mut ctx = InMemoryContext::new();
        ctx.set("obj.text", Value::from("aGVsbG8="), crate::context::Scope::Default);
        let mut st = state();
        let v = resolve_text("obj.nodeTypedValue", &mut ctx, &mut st, false).unwrap();
        assert_eq!(v, Value::from("hello"));
    }

    #[test]
    fn unresolved_identifier_degrades_to_null() {
        let mut ctx = InMemoryContext::new();
        let mut st = state();
        let v = resolve_text("missing_var", &mut ctx, &mut st, true).unwrap();
        assert_eq!(v, Value::Null);
        let v = resolve_text("missing_var", &mut ctx, &mut st, false).unwrap();
        assert_eq!(v, Value::from("missing_var"));
    }

    #[test]
    fn form_field_suffix_reads_empty() {
        let mut ctx = InMemoryContext::new();
        let mut st = state();
        let v = resolve_text("Label1.Caption", &mut ctx, &mut st, false).unwrap();
        assert_eq!(v, Value::Str(String::new()));
    }

    #[test]
    fn constant_math_served_from_cache() {
        let mut ctx = InMemoryContext::new();
        let mut st = state();
        let expr = Expr::binary(crate::ast::BinOp::Add, Expr::int_lit(2), Expr::int_lit(3));
        assert_eq!(resolve(&expr, &mut ctx, &mut st, false).unwrap(), Value::Int(5));
        assert_eq!(st.cache.hits(), 0);
        assert_eq!(resolve(&expr, &mut ctx, &mut st, false).unwrap(), Value::Int(5));
        assert_eq!(st.cache.hits(), 1);
    }
}
