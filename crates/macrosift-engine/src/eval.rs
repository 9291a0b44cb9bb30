//! The slow, always-correct tree-walking evaluator.
//!
//! Expression operands go through the argument resolution engine
//! ([`crate::resolve`]); loop statements are first offered to the JIT fast
//! path and fall back here when it declines.

use log::{debug, warn};
use macrosift_model::coerce::{int_convert, str_convert, to_int, to_num};
use macrosift_model::{ops, Value};

use crate::ast::{BinOp, Expr, Procedure, Stmt, UnOp};
use crate::context::{Binding, Context, Scope};
use crate::error::EngineError;
use crate::jit::{self, JitOutcome};
use crate::limits::RunState;
use crate::resolve;

/// Control-flow signal produced by statement execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Normal,
    ExitLoop,
    ExitProc,
}

/// VBA truthiness for loop and branch conditions.
pub fn truthy(value: &Value) -> bool {
    if value.is_wildcard() {
        return true;
    }
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
    }
}

impl Expr {
    /// Evaluate this expression. Unresolvable references degrade to the
    /// uninitialized sentinel; only the guard aborts propagate as fatal.
    pub fn eval(&self, ctx: &mut dyn Context, st: &mut RunState) -> Result<Value, EngineError> {
        st.enter()?;
        let result = self.eval_inner(ctx, st);
        st.leave();
        result
    }

    fn eval_inner(&self, ctx: &mut dyn Context, st: &mut RunState) -> Result<Value, EngineError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Identifier(name) => match ctx.get(name, false) {
                Some(Binding::Value(v)) => Ok(v),
                // A bare function name evaluates as a zero-argument call.
                Some(Binding::Procedure(proc)) => call_procedure(&proc, &[], ctx, st),
                Some(Binding::Library(func)) => func.call(ctx, &[]),
                None => {
                    debug!("`{name}` not found, treating as uninitialized");
                    Ok(Value::Null)
                }
            },
            Expr::Binary { op, lhs, rhs } => {
                let l = resolve::resolve(lhs, ctx, st, false)?;
                let r = resolve::resolve(rhs, ctx, st, false)?;
                eval_binop(*op, &l, &r, ctx)
            }
            Expr::Unary { op, operand } => {
                let v = resolve::resolve(operand, ctx, st, false)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(ops::logical_not(&v, true))),
                    UnOp::Neg => Ok(match int_convert(&v) {
                        Value::Int(n) => Value::Int(-n),
                        other => other,
                    }),
                }
            }
            Expr::Call { name, args } => eval_call(name, args, ctx, st),
            Expr::Member { .. } => self.eval_member(ctx, st),
        }
    }

    fn eval_member(&self, ctx: &mut dyn Context, st: &mut RunState) -> Result<Value, EngineError> {
        let full = self.to_string();
        if let Some(Binding::Value(v)) = ctx.get(&full, false) {
            return Ok(v);
        }

        // `obj.Method(args)` where the trailing member is a known routine:
        // the object prefix is decoration (`wscript.shell.Run "cmd"`).
        if let Expr::Member { parts } = self {
            if let Some(last) = parts.last() {
                let callee = match last {
                    Expr::Call { name, .. } => Some(name.as_str()),
                    Expr::Identifier(name) => Some(name.as_str()),
                    _ => None,
                };
                if let Some(name) = callee {
                    match ctx.get(name, false) {
                        Some(Binding::Procedure(_)) | Some(Binding::Library(_)) => {
                            return last.eval(ctx, st);
                        }
                        _ => {}
                    }
                }
            }
        }

        let fallback = resolve::resolve_string_fallbacks(&full, ctx, st)?;
        if let Some(v) = fallback {
            return Ok(v);
        }

        // Unresolved member accesses evaluate to their own text, which lets
        // the resolution engine recognize leftover Shapes() references.
        Ok(Value::Str(full))
    }
}

fn eval_call(
    name: &str,
    args: &[Expr],
    ctx: &mut dyn Context,
    st: &mut RunState,
) -> Result<Value, EngineError> {
    match ctx.get(name, false) {
        Some(Binding::Procedure(proc)) => {
            let args = resolve::resolve_many(args, ctx, st, false)?;
            call_procedure(&proc, &args, ctx, st)
        }
        Some(Binding::Library(func)) => {
            let args = resolve::resolve_many(args, ctx, st, false)?;
            func.call(ctx, &args)
        }
        // Array element access spelled like a call.
        Some(Binding::Value(Value::List(items))) => {
            let index = match args.first() {
                Some(arg) => resolve::resolve(arg, ctx, st, false)?,
                None => return Ok(Value::List(items)),
            };
            let index = to_int(&index)
                .map_err(|e| EngineError::Runtime(format!("bad array index: {e}")))?;
            Ok(items.get(index.max(0) as usize).cloned().unwrap_or(Value::Null))
        }
        Some(Binding::Value(_)) | None => {
            warn!("call target `{name}` not found");
            Ok(Value::Null)
        }
    }
}

pub(crate) fn eval_binop(
    op: BinOp,
    l: &Value,
    r: &Value,
    ctx: &mut dyn Context,
) -> Result<Value, EngineError> {
    match op {
        BinOp::Add => Ok(ops::add(l, r)),
        BinOp::Concat => Ok(Value::Str(str_convert(l) + &str_convert(r))),
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::IntDiv | BinOp::Mod | BinOp::Pow => {
            eval_arith(op, l, r, ctx)
        }
        BinOp::Eq => Ok(Value::Bool(ops::equals(l, r))),
        BinOp::Ne => Ok(Value::Bool(ops::not_equals(l, r))),
        BinOp::Gt => Ok(Value::Bool(ops::greater_than(l, r))),
        BinOp::Lt => Ok(Value::Bool(ops::less_than(l, r))),
        BinOp::Ge => Ok(Value::Bool(ops::greater_or_equal(l, r))),
        BinOp::Le => Ok(Value::Bool(ops::less_or_equal(l, r))),
        BinOp::And | BinOp::Or | BinOp::Xor => {
            let a = match int_convert(l) {
                Value::Int(n) => n,
                _ => i64::from(truthy(l)),
            };
            let b = match int_convert(r) {
                Value::Int(n) => n,
                _ => i64::from(truthy(r)),
            };
            Ok(Value::Int(match op {
                BinOp::And => a & b,
                BinOp::Or => a | b,
                _ => a ^ b,
            }))
        }
    }
}

fn eval_arith(
    op: BinOp,
    l: &Value,
    r: &Value,
    ctx: &mut dyn Context,
) -> Result<Value, EngineError> {
    // Arithmetic wants numbers; anything unconvertible degrades through the
    // lenient conversion rather than raising.
    let l = to_num(l).unwrap_or_else(|_| int_convert(l));
    let r = to_num(r).unwrap_or_else(|_| int_convert(r));
    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(Value::Null),
    };
    let ints = matches!((&l, &r), (Value::Int(_), Value::Int(_)));

    if matches!(op, BinOp::Div | BinOp::IntDiv | BinOp::Mod) && b == 0.0 {
        ctx.report_general_error(&format!("division by zero: {l} {} {r}", op.symbol()));
        return Ok(Value::Null);
    }

    Ok(match op {
        BinOp::Sub if ints => Value::Int((a as i64).wrapping_sub(b as i64)),
        BinOp::Sub => Value::Float(a - b),
        BinOp::Mul if ints => Value::Int((a as i64).wrapping_mul(b as i64)),
        BinOp::Mul => Value::Float(a * b),
        BinOp::Div => Value::Float(a / b),
        BinOp::IntDiv => Value::Int((a / b).floor() as i64),
        BinOp::Mod => Value::Int((a as i64).wrapping_rem(b as i64)),
        BinOp::Pow => Value::Float(a.powf(b)),
        _ => unreachable!("non-arithmetic operator"),
    })
}

impl Stmt {
    /// Execute this statement against the context.
    pub fn exec(&self, ctx: &mut dyn Context, st: &mut RunState) -> Result<Flow, EngineError> {
        st.enter()?;
        let result = self.exec_inner(ctx, st);
        st.leave();
        result
    }

    fn exec_inner(&self, ctx: &mut dyn Context, st: &mut RunState) -> Result<Flow, EngineError> {
        match self {
            Stmt::Let {
                target,
                index,
                value,
            } => {
                let rhs = resolve::resolve(value, ctx, st, false)?;
                match index {
                    Some(index) => {
                        let idx = resolve::resolve(index, ctx, st, false)?;
                        let idx = to_int(&idx).unwrap_or(0).max(0) as usize;
                        let current = match ctx.get(target, false) {
                            Some(Binding::Value(Value::List(items))) => items,
                            _ => Vec::new(),
                        };
                        ctx.set(target, update_array(current, idx, rhs), Scope::Default);
                    }
                    None => ctx.set(target, rhs, Scope::Default),
                }
                Ok(Flow::Normal)
            }
            Stmt::CallSub { name, args } => {
                match ctx.get(name, false) {
                    Some(Binding::Procedure(proc)) => {
                        let args = resolve::resolve_many(args, ctx, st, false)?;
                        call_procedure(&proc, &args, ctx, st)?;
                    }
                    Some(Binding::Library(func)) => {
                        let args = resolve::resolve_many(args, ctx, st, false)?;
                        func.call(ctx, &args)?;
                    }
                    _ => warn!("sub `{name}` not found, skipping call"),
                }
                Ok(Flow::Normal)
            }
            Stmt::If { arms, else_body } => {
                for arm in arms {
                    let cond = resolve::resolve(&arm.cond, ctx, st, false)?;
                    if truthy(&cond) {
                        return exec_block(&arm.body, ctx, st);
                    }
                }
                exec_block(else_body, ctx, st)
            }
            Stmt::For { .. } | Stmt::DoLoop { .. } => self.exec_loop(ctx, st),
            Stmt::Block(stmts) => exec_block(stmts, ctx, st),
            Stmt::ExitFor => Ok(Flow::ExitLoop),
            Stmt::ExitProc => Ok(Flow::ExitProc),
            Stmt::Unparsed { text } => {
                debug!("skipping unparsed statement: {text}");
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_loop(&self, ctx: &mut dyn Context, st: &mut RunState) -> Result<Flow, EngineError> {
        // Offer the loop to the JIT first; fall back to tree-walking when it
        // declines or fails for any recoverable reason.
        if ctx.do_jit() {
            st.jit_attempts += 1;
            if jit::emulate_loop(self, ctx, st)? == JitOutcome::Handled {
                st.jit_handled += 1;
                return Ok(Flow::Normal);
            }
        }

        match self {
            Stmt::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                let start = resolve::resolve(start, ctx, st, false)?;
                let end = resolve::resolve(end, ctx, st, false)?;
                let step = match step {
                    Some(step) => resolve::resolve(step, ctx, st, false)?,
                    None => Value::Int(1),
                };
                let mut i = to_int(&start).unwrap_or(0);
                let end = to_int(&end).unwrap_or(0);
                let step = to_int(&step).unwrap_or(1);

                let mut iterations: u64 = 0;
                loop {
                    if step >= 0 && i > end {
                        break;
                    }
                    if step < 0 && i < end {
                        break;
                    }
                    if self.loop_budget_spent(&mut iterations, ctx, st)? {
                        break;
                    }
                    ctx.set(var, Value::Int(i), Scope::ForceLocal);
                    match exec_block(body, ctx, st)? {
                        Flow::Normal => {}
                        Flow::ExitLoop => break,
                        Flow::ExitProc => return Ok(Flow::ExitProc),
                    }
                    // Respect updates the body made to its own counter.
                    if let Some(Binding::Value(v)) = ctx.get(var, false) {
                        i = to_int(&v).unwrap_or(i);
                    }
                    i = match i.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                }
                ctx.set(var, Value::Int(i), Scope::ForceLocal);
                Ok(Flow::Normal)
            }
            Stmt::DoLoop {
                cond,
                body,
                until,
                post_test,
            } => {
                let mut iterations: u64 = 0;
                let mut first = true;
                loop {
                    if !(first && *post_test) {
                        let c = resolve::resolve(cond, ctx, st, false)?;
                        let mut keep_going = truthy(&c);
                        if *until {
                            keep_going = !keep_going;
                        }
                        if !keep_going {
                            break;
                        }
                    }
                    first = false;
                    if self.loop_budget_spent(&mut iterations, ctx, st)? {
                        break;
                    }
                    match exec_block(body, ctx, st)? {
                        Flow::Normal => {}
                        Flow::ExitLoop => break,
                        Flow::ExitProc => return Ok(Flow::ExitProc),
                    }
                }
                Ok(Flow::Normal)
            }
            _ => unreachable!("exec_loop on non-loop statement"),
        }
    }

    fn loop_budget_spent(
        &self,
        iterations: &mut u64,
        ctx: &mut dyn Context,
        st: &mut RunState,
    ) -> Result<bool, EngineError> {
        // The non-throwing guard check lets a loop wind down gracefully
        // instead of aborting the whole run mid-iteration.
        if st.check_limits(false)? {
            warn!("resource limits reached, short-circuiting loop");
            return Ok(true);
        }
        *iterations += 1;
        if *iterations > st.policy.max_loop_iterations {
            ctx.report_general_error("loop iteration budget exceeded, terminating loop");
            return Ok(true);
        }
        Ok(false)
    }
}

/// Execute a statement list in source order.
pub fn exec_block(
    body: &[Stmt],
    ctx: &mut dyn Context,
    st: &mut RunState,
) -> Result<Flow, EngineError> {
    for stmt in body {
        if matches!(stmt, Stmt::Unparsed { .. }) {
            continue;
        }
        match stmt.exec(ctx, st)? {
            Flow::Normal => {}
            flow => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

/// Call a user-defined procedure. Parameters bind as locals; a `Function`
/// returns whatever was assigned to its own name.
pub fn call_procedure(
    proc: &Procedure,
    args: &[Value],
    ctx: &mut dyn Context,
    st: &mut RunState,
) -> Result<Value, EngineError> {
    st.enter()?;
    let result = (|| {
        for (i, param) in proc.params.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or(Value::Null);
            ctx.set(param, value, Scope::ForceLocal);
        }
        ctx.set(&proc.name, Value::Null, Scope::ForceLocal);
        exec_block(&proc.body, ctx, st)?;
        Ok(match ctx.get(&proc.name, false) {
            Some(Binding::Value(v)) => v,
            _ => Value::Null,
        })
    })();
    st.leave();
    result
}

/// Store into a list at `index`, growing it with zeros as needed.
pub fn update_array(mut items: Vec<Value>, index: usize, value: Value) -> Value {
    if index >= items.len() {
        items.resize(index + 1, Value::Int(0));
    }
    items[index] = value;
    Value::List(items)
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
    fn update_array_extends_with_zeros() {
        let out = update_array(vec![Value::Int(9)], 3, Value::Int(7));
        assert_eq!(
            out,
            Value::List(vec![
                Value::Int(9),
                Value::Int(0),
                Value::Int(0),
                Value::Int(7)
            ])
        );
    }

    #[test]
    fn for_loop_counts_and_exits() {
        let mut ctx = InMemoryContext::new();
        let mut st = state();
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(5),
            step: None,
            body: vec![Stmt::Let {
                target: "total".into(),
                index: None,
                value: Expr::binary(BinOp::Add, Expr::ident("total"), Expr::ident("i")),
            }],
        };
        stmt.exec(&mut ctx, &mut st).unwrap();
        assert_eq!(ctx.value_of("total"), Some(Value::Int(15)));
    }

    #[test]
    fn for_loop_counter_at_int_max_terminates() {
        let mut ctx = InMemoryContext::new();
        let mut st = state();
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(i64::MAX),
            end: Expr::int_lit(i64::MAX),
            step: None,
            body: vec![Stmt::Let {
                target: "n".into(),
                index: None,
                value: Expr::binary(BinOp::Add, Expr::ident("n"), Expr::int_lit(1)),
            }],
        };
        stmt.exec(&mut ctx, &mut st).unwrap();
        assert_eq!(ctx.value_of("n"), Some(Value::Int(1)));
    }

    #[test]
    fn division_by_zero_degrades_to_null() {
        let mut ctx = InMemoryContext::new();
        let v = eval_binop(BinOp::Div, &Value::Int(1), &Value::Int(0), &mut ctx).unwrap();
        assert_eq!(v, Value::Null);
        assert_eq!(ctx.errors.len(), 1);
    }
}
