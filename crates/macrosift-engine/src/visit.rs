//! Depth-first pre-order traversal and the analysis visitors built on it.
//!
//! Every traversal step consults the recursion/time guard, since visitor
//! passes run over adversarial trees just like evaluation does.

use std::collections::BTreeSet;

use crate::ast::{Expr, NodeRef, Stmt};
use crate::error::EngineError;
use crate::limits::RunState;

/// Analysis visitor. Returning `false` from `visit` prunes the node's
/// subtree.
pub trait Visitor<'a> {
    fn visit(&mut self, node: NodeRef<'a>) -> bool;
}

/// Walk `node` pre-order. With `skip_nested_loops`, a loop encountered while
/// already inside a loop is skipped entirely, which bounds the cost of
/// static collection passes over deeply nested loop pyramids.
pub fn accept<'a>(
    node: NodeRef<'a>,
    visitor: &mut dyn Visitor<'a>,
    skip_nested_loops: bool,
    st: &mut RunState,
) -> Result<(), EngineError> {
    accept_inner(node, visitor, skip_nested_loops, false, st)
}

fn accept_inner<'a>(
    node: NodeRef<'a>,
    visitor: &mut dyn Visitor<'a>,
    skip_nested_loops: bool,
    in_loop: bool,
    st: &mut RunState,
) -> Result<(), EngineError> {
    st.check_limits(true)?;

    if skip_nested_loops && in_loop && node.is_loop() {
        return Ok(());
    }

    if !visitor.visit(node) {
        return Ok(());
    }

    let in_loop = in_loop || node.is_loop();
    st.enter()?;
    let mut result = Ok(());
    for child in node.children() {
        result = accept_inner(child, visitor, skip_nested_loops, in_loop, st);
        if result.is_err() {
            break;
        }
    }
    st.leave();
    result
}

/// Collects every variable referenced in expression position: plain
/// identifiers plus the full dotted text of member-access chains.
#[derive(Default)]
pub struct VarCollector {
    pub vars: BTreeSet<String>,
}

impl<'a> Visitor<'a> for VarCollector {
    fn visit(&mut self, node: NodeRef<'a>) -> bool {
        match node {
            NodeRef::Expr(Expr::Identifier(name)) => {
                self.vars.insert(name.clone());
                true
            }
            NodeRef::Expr(expr @ Expr::Member { .. }) => {
                self.vars.insert(expr.to_string());
                // Member internals are resolved as one unit, not as
                // individual identifiers.
                false
            }
            _ => true,
        }
    }
}

/// Collects the names assigned to (left-hand sides).
#[derive(Default)]
pub struct LhsCollector {
    pub vars: BTreeSet<String>,
}

impl<'a> Visitor<'a> for LhsCollector {
    fn visit(&mut self, node: NodeRef<'a>) -> bool {
        if let NodeRef::Stmt(Stmt::Let { target, .. }) = node {
            self.vars.insert(target.clone());
        }
        true
    }
}

/// Collects the assignment statements whose target is a given variable,
/// used to infer a type for variables the environment has no value for.
pub struct LetCollector<'a> {
    target: String,
    pub assignments: Vec<&'a Stmt>,
}

impl<'a> LetCollector<'a> {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_ascii_lowercase(),
            assignments: Vec::new(),
        }
    }
}

impl<'a> Visitor<'a> for LetCollector<'a> {
    fn visit(&mut self, node: NodeRef<'a>) -> bool {
        if let NodeRef::Stmt(stmt @ Stmt::Let { target, .. }) = node {
            if target.eq_ignore_ascii_case(&self.target) {
                self.assignments.push(stmt);
            }
        }
        true
    }
}

/// Collects the names of every called function/sub in a subtree.
#[derive(Default)]
pub struct CallCollector {
    pub names: BTreeSet<String>,
}

impl<'a> Visitor<'a> for CallCollector {
    fn visit(&mut self, node: NodeRef<'a>) -> bool {
        match node {
            NodeRef::Expr(Expr::Call { name, .. }) => {
                self.names.insert(name.to_ascii_lowercase());
            }
            NodeRef::Stmt(Stmt::CallSub { name, .. }) => {
                self.names.insert(name.to_ascii_lowercase());
            }
            _ => {}
        }
        true
    }
}

/// Whether a subtree contains any variable reference. Constant-math cache
/// eligibility depends on this being exactly zero.
pub fn has_free_variables(node: NodeRef<'_>, st: &mut RunState) -> Result<bool, EngineError> {
    let mut collector = VarCollector::default();
    accept(node, &mut collector, false, st)?;
    Ok(!collector.vars.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;
    use crate::limits::EmulationPolicy;
    use pretty_assertions::assert_eq;

    fn state() -> RunState {
        RunState::new(EmulationPolicy::default())
    }

    fn loop_with_nested(inner_target: &str) -> Stmt {
        Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(3),
            step: None,
            body: vec![Stmt::For {
                var: "j".into(),
                start: Expr::int_lit(1),
                end: Expr::int_lit(3),
                step: None,
                body: vec![Stmt::Let {
                    target: inner_target.into(),
                    index: None,
                    value: Expr::ident("j"),
                }],
            }],
        }
    }

    #[test]
    fn collects_free_variables() {
        let expr = Expr::binary(
            BinOp::Add,
            Expr::ident("x"),
            Expr::binary(BinOp::Mul, Expr::ident("y"), Expr::int_lit(2)),
        );
        let mut collector = VarCollector::default();
        accept(NodeRef::Expr(&expr), &mut collector, false, &mut state()).unwrap();
        assert_eq!(
            collector.vars.iter().cloned().collect::<Vec<_>>(),
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn skip_nested_loops_prunes_inner_loop() {
        let stmt = loop_with_nested("hidden");
        let mut collector = LhsCollector::default();
        accept(NodeRef::Stmt(&stmt), &mut collector, true, &mut state()).unwrap();
        assert!(collector.vars.is_empty());

        let mut collector = LhsCollector::default();
        accept(NodeRef::Stmt(&stmt), &mut collector, false, &mut state()).unwrap();
        assert_eq!(
            collector.vars.iter().cloned().collect::<Vec<_>>(),
            vec!["hidden".to_string()]
        );
    }

    #[test]
    fn member_chains_collect_as_one_unit() {
        let expr = Expr::Member {
            parts: vec![Expr::ident("frm"), Expr::ident("Tag")],
        };
        let mut collector = VarCollector::default();
        accept(NodeRef::Expr(&expr), &mut collector, false, &mut state()).unwrap();
        assert_eq!(
            collector.vars.iter().cloned().collect::<Vec<_>>(),
            vec!["frm.Tag".to_string()]
        );
    }
}
