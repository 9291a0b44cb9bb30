//! Compile-to-text rendering of macro code for analyst review.
//!
//! Unlike the bytecode fast path this never executes anything. The output
//! is self-contained target-dialect source: a fixed prologue defines the
//! handful of runtime helpers the rendered code leans on, so a reviewer can
//! read or run the text independently.

use std::fmt::Write;

use macrosift_model::Value;

use crate::ast::{BinOp, Expr, IfArm, NodeRef, Procedure, Stmt, UnOp};

/// Output language for rendered code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    JavaScript,
    Python,
}

/// Render a node as self-contained source text in the target dialect,
/// prologue included.
pub fn render(node: NodeRef<'_>, dialect: Dialect, indent: usize) -> String {
    let mut out = prologue(dialect, indent);
    out.push_str(&render_node(node, dialect, indent));
    out
}

/// Render a statement list as self-contained source text.
pub fn render_statements(body: &[Stmt], dialect: Dialect, indent: usize) -> String {
    let mut out = prologue(dialect, indent);
    out.push_str(&render_block(body, dialect, indent));
    out
}

/// Render a node without the helper prologue. Used for nested constructs.
pub fn render_node(node: NodeRef<'_>, dialect: Dialect, indent: usize) -> String {
    match node {
        NodeRef::Expr(expr) => render_expr(expr, dialect),
        NodeRef::Stmt(stmt) => render_stmt(stmt, dialect, indent),
        NodeRef::Proc(proc) => render_proc(proc, dialect, indent),
    }
}

/// Escape a string literal so no byte is silently dropped: backslash,
/// quote, and the common control characters get named escapes; everything
/// else outside printable ASCII becomes an explicit hex escape.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || (c as u32) >= 0x7f => {
                let code = c as u32;
                if code <= 0xff {
                    let _ = write!(out, "\\x{code:02x}");
                } else {
                    let _ = write!(out, "\\u{code:04x}");
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Helper functions the rendered code calls in place of macro intrinsics.
fn prologue(dialect: Dialect, indent: usize) -> String {
    let pad = " ".repeat(indent);
    match dialect {
        Dialect::JavaScript => format!(
            "{pad}function CLng(s) {{\n\
             {pad}    if (typeof(s) !== \"string\") return s;\n\
             {pad}    if (s.startsWith(\"&H\")) return parseInt(s.slice(2), 16);\n\
             {pad}    return parseInt(s);\n\
             {pad}}}\n\
             \n\
             {pad}function StrReverse(str) {{\n\
             {pad}    return str.split(\"\").reverse().join(\"\");\n\
             {pad}}}\n\
             \n\
             {pad}function Replace(s, sub, rep) {{\n\
             {pad}    return s.replaceAll(sub, rep);\n\
             {pad}}}\n\
             \n"
        ),
        Dialect::Python => format!(
            "{pad}def CLng(s):\n\
             {pad}    if not isinstance(s, str):\n\
             {pad}        return s\n\
             {pad}    if s.startswith(\"&H\"):\n\
             {pad}        return int(s[2:], 16)\n\
             {pad}    return int(float(s))\n\
             \n\
             {pad}def StrReverse(s):\n\
             {pad}    return s[::-1]\n\
             \n\
             {pad}def Replace(s, sub, rep):\n\
             {pad}    return s.replace(sub, rep)\n\
             \n"
        ),
    }
}

fn render_value(v: &Value, dialect: Dialect) -> String {
    match v {
        Value::Null => match dialect {
            Dialect::JavaScript => "null".to_string(),
            Dialect::Python => "None".to_string(),
        },
        Value::Bool(b) => match dialect {
            Dialect::JavaScript => b.to_string(),
            Dialect::Python => if *b { "True" } else { "False" }.to_string(),
        },
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => format!("\"{}\"", escape_string(s)),
        Value::List(items) => {
            let rendered: Vec<String> = items.iter().map(|v| render_value(v, dialect)).collect();
            format!("[{}]", rendered.join(", "))
        }
    }
}

fn binop_text(op: BinOp, dialect: Dialect) -> &'static str {
    match op {
        BinOp::Add | BinOp::Concat => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Gt => ">",
        BinOp::Lt => "<",
        BinOp::Ge => ">=",
        BinOp::Le => "<=",
        BinOp::And => match dialect {
            Dialect::JavaScript => "&&",
            Dialect::Python => "and",
        },
        BinOp::Or => match dialect {
            Dialect::JavaScript => "||",
            Dialect::Python => "or",
        },
        BinOp::Xor => "^",
        BinOp::IntDiv | BinOp::Pow => unreachable!("rendered as function form"),
    }
}

fn render_expr(expr: &Expr, dialect: Dialect) -> String {
    match expr {
        Expr::Literal(v) => render_value(v, dialect),
        Expr::Identifier(name) => sanitize_name(name),
        Expr::Binary { op, lhs, rhs } => {
            let l = render_expr(lhs, dialect);
            let r = render_expr(rhs, dialect);
            match (op, dialect) {
                (BinOp::IntDiv, Dialect::JavaScript) => format!("Math.floor({l} / {r})"),
                (BinOp::IntDiv, Dialect::Python) => format!("({l} // {r})"),
                (BinOp::Pow, Dialect::JavaScript) => format!("Math.pow({l}, {r})"),
                (BinOp::Pow, Dialect::Python) => format!("({l} ** {r})"),
                (op, dialect) => format!("({l} {} {r})", binop_text(*op, dialect)),
            }
        }
        Expr::Unary { op, operand } => {
            let v = render_expr(operand, dialect);
            match (op, dialect) {
                (UnOp::Not, Dialect::JavaScript) => format!("(!({v}))"),
                (UnOp::Not, Dialect::Python) => format!("(not ({v}))"),
                (UnOp::Neg, _) => format!("(-{v})"),
            }
        }
        Expr::Call { name, args } => {
            let args: Vec<String> = args.iter().map(|a| render_expr(a, dialect)).collect();
            format!("{}({})", sanitize_name(name), args.join(", "))
        }
        Expr::Member { parts } => {
            let parts: Vec<String> = parts.iter().map(|p| render_expr(p, dialect)).collect();
            parts.join(".")
        }
    }
}

fn render_stmt(stmt: &Stmt, dialect: Dialect, indent: usize) -> String {
    let pad = " ".repeat(indent);
    match stmt {
        Stmt::Let {
            target,
            index,
            value,
        } => {
            let value = render_expr(value, dialect);
            let target = sanitize_name(target);
            match index {
                Some(index) => {
                    let index = render_expr(index, dialect);
                    format!("{pad}{target}[{index}] = {value}\n")
                }
                None => format!("{pad}{target} = {value}\n"),
            }
        }
        Stmt::CallSub { name, args } => {
            let args: Vec<String> = args.iter().map(|a| render_expr(a, dialect)).collect();
            format!("{pad}{}({})\n", sanitize_name(name), args.join(", "))
        }
        Stmt::If { arms, else_body } => render_if(arms, else_body, dialect, indent),
        Stmt::For {
            var,
            start,
            end,
            step,
            body,
        } => {
            let var = sanitize_name(var);
            let start = render_expr(start, dialect);
            let end = render_expr(end, dialect);
            let step = step
                .as_ref()
                .map(|s| render_expr(s, dialect))
                .unwrap_or_else(|| "1".to_string());
            let body = render_block(body, dialect, indent + 4);
            match dialect {
                Dialect::JavaScript => format!(
                    "{pad}for (let {var} = {start}; {var} <= {end}; {var} += {step}) {{\n{body}{pad}}}\n"
                ),
                Dialect::Python => format!(
                    "{pad}for {var} in range({start}, {end} + 1, {step}):\n{body}"
                ),
            }
        }
        Stmt::DoLoop {
            cond,
            body,
            until,
            post_test,
        } => {
            let mut cond_text = render_expr(cond, dialect);
            if *until {
                cond_text = match dialect {
                    Dialect::JavaScript => format!("(!({cond_text}))"),
                    Dialect::Python => format!("(not ({cond_text}))"),
                };
            }
            let body = render_block(body, dialect, indent + 4);
            match (dialect, post_test) {
                (Dialect::JavaScript, false) => {
                    format!("{pad}while ({cond_text}) {{\n{body}{pad}}}\n")
                }
                (Dialect::JavaScript, true) => {
                    format!("{pad}do {{\n{body}{pad}}} while ({cond_text});\n")
                }
                (Dialect::Python, false) => format!("{pad}while {cond_text}:\n{body}"),
                (Dialect::Python, true) => {
                    // Python has no post-test loop; break out on the
                    // negated condition at the end of each pass.
                    let inner = " ".repeat(indent + 4);
                    format!(
                        "{pad}while True:\n{body}{inner}if not ({cond_text}):\n{inner}    break\n"
                    )
                }
            }
        }
        Stmt::Block(stmts) => render_block(stmts, dialect, indent),
        Stmt::ExitFor => match dialect {
            Dialect::JavaScript => format!("{pad}break;\n"),
            Dialect::Python => format!("{pad}break\n"),
        },
        Stmt::ExitProc => match dialect {
            Dialect::JavaScript => format!("{pad}return;\n"),
            Dialect::Python => format!("{pad}return\n"),
        },
        Stmt::Unparsed { text } => {
            let text = text.replace('\n', " ");
            match dialect {
                Dialect::JavaScript => format!("{pad}// unparsed: {text}\n"),
                Dialect::Python => format!("{pad}# unparsed: {text}\n"),
            }
        }
    }
}

fn render_if(arms: &[IfArm], else_body: &[Stmt], dialect: Dialect, indent: usize) -> String {
    if arms.is_empty() {
        return render_block(else_body, dialect, indent);
    }
    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (i, arm) in arms.iter().enumerate() {
        let cond = render_expr(&arm.cond, dialect);
        let body = render_block(&arm.body, dialect, indent + 4);
        match dialect {
            Dialect::JavaScript => {
                let kw = if i == 0 { "if" } else { "} else if" };
                let _ = write!(out, "{pad}{kw} ({cond}) {{\n{body}");
            }
            Dialect::Python => {
                let kw = if i == 0 { "if" } else { "elif" };
                let _ = write!(out, "{pad}{kw} {cond}:\n{body}");
            }
        }
    }
    if !else_body.is_empty() {
        let body = render_block(else_body, dialect, indent + 4);
        match dialect {
            Dialect::JavaScript => {
                let _ = write!(out, "{pad}}} else {{\n{body}");
            }
            Dialect::Python => {
                let _ = write!(out, "{pad}else:\n{body}");
            }
        }
    }
    if dialect == Dialect::JavaScript {
        let _ = writeln!(out, "{pad}}}");
    }
    out
}

fn render_block(body: &[Stmt], dialect: Dialect, indent: usize) -> String {
    if body.is_empty() && dialect == Dialect::Python {
        return format!("{}pass\n", " ".repeat(indent));
    }
    body.iter()
        .map(|s| render_stmt(s, dialect, indent))
        .collect()
}

fn render_proc(proc: &Procedure, dialect: Dialect, indent: usize) -> String {
    let pad = " ".repeat(indent);
    let name = sanitize_name(&proc.name);
    let params: Vec<String> = proc.params.iter().map(|p| sanitize_name(p)).collect();
    let params = params.join(", ");
    let body = render_block(&proc.body, dialect, indent + 4);
    match dialect {
        Dialect::JavaScript => format!("{pad}function {name}({params}) {{\n{body}{pad}}}\n"),
        Dialect::Python => format!("{pad}def {name}({params}):\n{body}"),
    }
}

/// Macro identifiers can contain characters the target dialects reject.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escapes_cover_quotes_and_non_printables() {
        assert_eq!(escape_string("a\"b"), "a\\\"b");
        assert_eq!(escape_string("a\\b"), "a\\\\b");
        assert_eq!(escape_string("\x01"), "\\x01");
        assert_eq!(escape_string("\u{e9}"), "\\xe9");
        assert_eq!(escape_string("\u{263a}"), "\\u263a");
        assert_eq!(escape_string("tab\there"), "tab\\there");
    }

    #[test]
    fn prologue_defines_helpers_once() {
        let stmt = Stmt::Let {
            target: "x".into(),
            index: None,
            value: Expr::call("StrReverse", vec![Expr::str_lit("abc")]),
        };
        let js = render(NodeRef::Stmt(&stmt), Dialect::JavaScript, 0);
        assert_eq!(js.matches("function StrReverse").count(), 1);
        assert!(js.contains("x = StrReverse(\"abc\")"));

        let py = render(NodeRef::Stmt(&stmt), Dialect::Python, 0);
        assert_eq!(py.matches("def StrReverse").count(), 1);
    }

    #[test]
    fn loops_render_in_both_dialects() {
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(10),
            step: None,
            body: vec![Stmt::Let {
                target: "n".into(),
                index: None,
                value: Expr::ident("i"),
            }],
        };
        let js = render_node(NodeRef::Stmt(&stmt), Dialect::JavaScript, 0);
        assert!(js.starts_with("for (let i = 1; i <= 10; i += 1) {"));
        let py = render_node(NodeRef::Stmt(&stmt), Dialect::Python, 0);
        assert!(py.starts_with("for i in range(1, 10 + 1, 1):"));
        assert!(py.contains("    n = i"));
    }

    #[test]
    fn post_test_loop_renders_without_native_do_while_in_python() {
        let stmt = Stmt::DoLoop {
            cond: Expr::binary(BinOp::Lt, Expr::ident("x"), Expr::int_lit(5)),
            body: vec![Stmt::Let {
                target: "x".into(),
                index: None,
                value: Expr::binary(BinOp::Add, Expr::ident("x"), Expr::int_lit(1)),
            }],
            until: false,
            post_test: true,
        };
        let py = render_node(NodeRef::Stmt(&stmt), Dialect::Python, 0);
        assert!(py.starts_with("while True:"));
        assert!(py.contains("if not ((x < 5)):"));
        let js = render_node(NodeRef::Stmt(&stmt), Dialect::JavaScript, 0);
        assert!(js.starts_with("do {"));
        assert!(js.ends_with("} while ((x < 5));\n"));
    }

    #[test]
    fn procedure_renders_as_function_definition() {
        let proc = Procedure {
            name: "Decode".into(),
            params: vec!["s".into()],
            body: vec![Stmt::Let {
                target: "Decode".into(),
                index: None,
                value: Expr::call("StrReverse", vec![Expr::ident("s")]),
            }],
            kind: crate::ast::ProcedureKind::Function,
            span: None,
        };
        let js = render_node(NodeRef::Proc(&proc), Dialect::JavaScript, 0);
        assert!(js.starts_with("function Decode(s) {"));
        let py = render_node(NodeRef::Proc(&proc), Dialect::Python, 0);
        assert!(py.starts_with("def Decode(s):"));
    }
}
