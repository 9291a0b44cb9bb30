use std::fmt;

use macrosift_model::Value;

/// Originating source span of a top-level node, attached by the parsing
/// front end when available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IntDiv => "\\",
            BinOp::Mod => "Mod",
            BinOp::Pow => "^",
            BinOp::Concat => "&",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Gt => ">",
            BinOp::Lt => "<",
            BinOp::Ge => ">=",
            BinOp::Le => "<=",
            BinOp::And => "And",
            BinOp::Or => "Or",
            BinOp::Xor => "Xor",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

/// One VBA expression. Trees are immutable once built by the parsing front
/// end; each variant enumerates its own children explicitly (see
/// [`NodeRef::children`]).
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Identifier(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    /// Function call or array element access, disambiguated at evaluation
    /// time by what `name` is bound to.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// Member access chain (`ActiveDocument.Shapes(1).TextFrame`). Parts
    /// are identifiers or calls, joined by `.` in source order.
    Member {
        parts: Vec<Expr>,
    },
}

impl Expr {
    pub fn ident(name: &str) -> Expr {
        Expr::Identifier(name.to_string())
    }

    pub fn str_lit(s: &str) -> Expr {
        Expr::Literal(Value::from(s))
    }

    pub fn int_lit(n: i64) -> Expr {
        Expr::Literal(Value::Int(n))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args,
        }
    }
}

/// An `If`/`ElseIf` arm.
#[derive(Clone, Debug, PartialEq)]
pub struct IfArm {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

/// One VBA statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// `target = value` / `target(index) = value`. Dotted targets store
    /// under the full dotted name, which is how form-control values live in
    /// the environment.
    Let {
        target: String,
        index: Option<Expr>,
        value: Expr,
    },
    CallSub {
        name: String,
        args: Vec<Expr>,
    },
    If {
        arms: Vec<IfArm>,
        else_body: Vec<Stmt>,
    },
    For {
        var: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    DoLoop {
        cond: Expr,
        body: Vec<Stmt>,
        /// `Do Until` rather than `Do While`.
        until: bool,
        /// Condition tested after the body (`Do ... Loop While c`).
        post_test: bool,
    },
    Block(Vec<Stmt>),
    ExitFor,
    ExitProc,
    /// Source the front end recognized but could not map to a supported
    /// construct. Skipped by evaluation.
    Unparsed {
        text: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcedureKind {
    Sub,
    Function,
}

/// A user-defined `Sub` or `Function`. Functions return by assigning to
/// their own name.
#[derive(Clone, Debug, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub kind: ProcedureKind,
    pub span: Option<Span>,
}

/// Polymorphic handle over any node of the tree, used by traversal and the
/// transpiler. Children are enumerated per variant in an exhaustive match,
/// so adding a variant without wiring its children fails to compile.
#[derive(Clone, Copy, Debug)]
pub enum NodeRef<'a> {
    Expr(&'a Expr),
    Stmt(&'a Stmt),
    Proc(&'a Procedure),
}

impl<'a> NodeRef<'a> {
    pub fn children(&self) -> Vec<NodeRef<'a>> {
        match self {
            NodeRef::Expr(expr) => match expr {
                Expr::Literal(_) | Expr::Identifier(_) => Vec::new(),
                Expr::Binary { lhs, rhs, .. } => {
                    vec![NodeRef::Expr(lhs), NodeRef::Expr(rhs)]
                }
                Expr::Unary { operand, .. } => vec![NodeRef::Expr(operand)],
                Expr::Call { args, .. } => args.iter().map(NodeRef::Expr).collect(),
                Expr::Member { parts } => parts.iter().map(NodeRef::Expr).collect(),
            },
            NodeRef::Stmt(stmt) => match stmt {
                Stmt::Let { index, value, .. } => {
                    let mut r: Vec<NodeRef<'a>> = Vec::new();
                    if let Some(index) = index {
                        r.push(NodeRef::Expr(index));
                    }
                    r.push(NodeRef::Expr(value));
                    r
                }
                Stmt::CallSub { args, .. } => args.iter().map(NodeRef::Expr).collect(),
                Stmt::If { arms, else_body } => {
                    let mut r: Vec<NodeRef<'a>> = Vec::new();
                    for arm in arms {
                        r.push(NodeRef::Expr(&arm.cond));
                        r.extend(arm.body.iter().map(NodeRef::Stmt));
                    }
                    r.extend(else_body.iter().map(NodeRef::Stmt));
                    r
                }
                Stmt::For {
                    start,
                    end,
                    step,
                    body,
                    ..
                } => {
                    let mut r = vec![NodeRef::Expr(start), NodeRef::Expr(end)];
                    if let Some(step) = step {
                        r.push(NodeRef::Expr(step));
                    }
                    r.extend(body.iter().map(NodeRef::Stmt));
                    r
                }
                Stmt::DoLoop { cond, body, .. } => {
                    let mut r = vec![NodeRef::Expr(cond)];
                    r.extend(body.iter().map(NodeRef::Stmt));
                    r
                }
                Stmt::Block(stmts) => stmts.iter().map(NodeRef::Stmt).collect(),
                Stmt::ExitFor | Stmt::ExitProc | Stmt::Unparsed { .. } => Vec::new(),
            },
            NodeRef::Proc(proc) => proc.body.iter().map(NodeRef::Stmt).collect(),
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            NodeRef::Stmt(Stmt::For { .. }) | NodeRef::Stmt(Stmt::DoLoop { .. })
        )
    }

    pub fn is_useless(&self) -> bool {
        matches!(self, NodeRef::Stmt(Stmt::Unparsed { .. }))
    }

    /// Canonical textual rendering, used as the constant-cache key and by
    /// the textual checks in the resolution engine and the JIT gate.
    pub fn text(&self) -> String {
        match self {
            NodeRef::Expr(expr) => expr.to_string(),
            NodeRef::Stmt(stmt) => stmt.to_string(),
            NodeRef::Proc(proc) => proc.to_string(),
        }
    }
}

fn quote_vba(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Str(s)) => write!(f, "{}", quote_vba(s)),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Identifier(name) => write!(f, "{name}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol()),
            Expr::Unary { op: UnOp::Not, operand } => write!(f, "Not {operand}"),
            Expr::Unary { op: UnOp::Neg, operand } => write!(f, "-{operand}"),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Member { parts } => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt]) -> fmt::Result {
    for stmt in body {
        writeln!(f, "{stmt}")?;
    }
    Ok(())
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Let {
                target,
                index,
                value,
            } => match index {
                Some(index) => write!(f, "{target}({index}) = {value}"),
                None => write!(f, "{target} = {value}"),
            },
            Stmt::CallSub { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Stmt::If { arms, else_body } => {
                for (i, arm) in arms.iter().enumerate() {
                    if i == 0 {
                        writeln!(f, "If {} Then", arm.cond)?;
                    } else {
                        writeln!(f, "ElseIf {} Then", arm.cond)?;
                    }
                    write_block(f, &arm.body)?;
                }
                if !else_body.is_empty() {
                    writeln!(f, "Else")?;
                    write_block(f, else_body)?;
                }
                write!(f, "End If")
            }
            Stmt::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                write!(f, "For {var} = {start} To {end}")?;
                if let Some(step) = step {
                    write!(f, " Step {step}")?;
                }
                writeln!(f)?;
                write_block(f, body)?;
                write!(f, "Next {var}")
            }
            Stmt::DoLoop {
                cond,
                body,
                until,
                post_test,
            } => {
                let keyword = if *until { "Until" } else { "While" };
                if *post_test {
                    writeln!(f, "Do")?;
                    write_block(f, body)?;
                    write!(f, "Loop {keyword} {cond}")
                } else {
                    writeln!(f, "Do {keyword} {cond}")?;
                    write_block(f, body)?;
                    write!(f, "Loop")
                }
            }
            Stmt::Block(stmts) => {
                for (i, stmt) in stmts.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{stmt}")?;
                }
                Ok(())
            }
            Stmt::ExitFor => write!(f, "Exit For"),
            Stmt::ExitProc => write!(f, "Exit Sub"),
            Stmt::Unparsed { text } => write!(f, "{text}"),
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self.kind {
            ProcedureKind::Sub => "Sub",
            ProcedureKind::Function => "Function",
        };
        writeln!(f, "{keyword} {}({})", self.name, self.params.join(", "))?;
        write_block(f, &self.body)?;
        write!(f, "End {keyword}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_canonical_text() {
        let expr = Expr::binary(
            BinOp::Add,
            Expr::int_lit(1),
            Expr::binary(BinOp::Mul, Expr::int_lit(2), Expr::int_lit(3)),
        );
        assert_eq!(expr.to_string(), "1 + 2 * 3");

        let member = Expr::Member {
            parts: vec![
                Expr::call("Shapes", vec![Expr::str_lit("x")]),
                Expr::ident("TextFrame"),
            ],
        };
        assert_eq!(member.to_string(), "Shapes(\"x\").TextFrame");
    }

    #[test]
    fn loops_are_flagged() {
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(10),
            step: None,
            body: vec![],
        };
        assert!(NodeRef::Stmt(&stmt).is_loop());
        assert!(!NodeRef::Expr(&Expr::int_lit(1)).is_loop());
    }

    #[test]
    fn children_cover_every_position() {
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::ident("n"),
            step: Some(Expr::int_lit(2)),
            body: vec![Stmt::Let {
                target: "x".into(),
                index: None,
                value: Expr::ident("i"),
            }],
        };
        assert_eq!(NodeRef::Stmt(&stmt).children().len(), 4);
    }
}
