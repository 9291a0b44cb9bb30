//! `macrosift-engine` is the emulation core behind macrosift's VBA/VBScript
//! triage: it walks a parsed macro tree, resolves the indirections malware
//! hides payloads behind, and records every externally visible action for
//! the analyst.
//!
//! This crate is **not** a full VBA implementation; it emulates the subset
//! that matters for deobfuscation, always preferring a degraded best-effort
//! value over aborting the run.
//!
//! The engine exposes:
//! - A node protocol and traversal framework over the parsed tree (`ast`,
//!   `visit`).
//! - The tree-walking evaluator and its argument resolution chain (`eval`,
//!   `resolve`).
//! - A bytecode fast path for hot loops (`jit`) and a compile-to-text
//!   renderer for review (`transpile`).
//! - The literal-hiding preprocessor (`preprocess`).
//! - Resource guards capping recursion depth and wall-clock time
//!   (`limits`).

pub mod ast;
pub mod cache;
pub mod context;
pub mod error;
pub mod eval;
pub mod jit;
pub mod limits;
pub mod preprocess;
pub mod resolve;
pub mod transpile;
pub mod visit;

pub use crate::ast::{
    BinOp, Expr, IfArm, NodeRef, Procedure, ProcedureKind, Span, Stmt, UnOp,
};
pub use crate::cache::ConstCache;
pub use crate::context::{
    Action, Binding, Context, InMemoryContext, LibraryFunc, ReturnType, Scope,
};
pub use crate::error::EngineError;
pub use crate::eval::Flow;
pub use crate::jit::JitOutcome;
pub use crate::limits::{EmulationPolicy, RunState};
pub use crate::preprocess::{unhide, PlaceholderMap, Preprocessor};
pub use crate::transpile::Dialect;
pub use crate::visit::Visitor;

/// Resolve an expression against a context with a fresh run state. The
/// entry point for one-shot evaluation; longer runs should build a
/// [`RunState`] once and use [`resolve::resolve`] directly.
pub fn resolve_expr(
    expr: &Expr,
    ctx: &mut dyn Context,
    policy: EmulationPolicy,
) -> Result<macrosift_model::Value, EngineError> {
    let mut st = RunState::new(policy);
    resolve::resolve(expr, ctx, &mut st, false)
}

/// Execute a statement list against a context with a fresh run state.
pub fn run_statements(
    body: &[Stmt],
    ctx: &mut dyn Context,
    policy: EmulationPolicy,
) -> Result<Flow, EngineError> {
    let mut st = RunState::new(policy);
    eval::exec_block(body, ctx, &mut st)
}
