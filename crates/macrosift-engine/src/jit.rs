//! The loop fast path.
//!
//! Tree-walking a million-iteration decode loop is hopeless, so eligible
//! loops are compiled to a small stack bytecode and run in an isolated
//! virtual machine over a private variable table. The VM never executes
//! anything the compiler did not emit; a loop it cannot express falls back
//! to the tree-walking evaluator, which is always correct.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{info, warn};
use macrosift_model::coerce::to_int;
use macrosift_model::Value;

use crate::ast::{BinOp, Expr, NodeRef, Stmt, UnOp};
use crate::context::{Binding, Context, ReturnType, Scope};
use crate::error::EngineError;
use crate::eval::{self, truthy};
use crate::limits::RunState;
use crate::visit::{accept, CallCollector, LetCollector, LhsCollector, VarCollector};

/// What the fast path did with a loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JitOutcome {
    /// The loop was fully emulated; the caller must not also tree-walk it.
    Handled,
    /// Ineligible or failed recoverably; the caller tree-walks the loop.
    NotHandled,
}

/// Calls that splice new code into the run at emulation time. The VM cannot
/// reproduce their effect, so loops reaching them stay on the slow path.
const DYNAMIC_CODE_CALLS: &[&str] = &["Execute(", "ExecuteGlobal(", "Eval("];

/// Try to emulate a loop on the fast path. Never raises past its own
/// boundary except for the unrecoverable recursion/time abort.
pub fn emulate_loop(
    stmt: &Stmt,
    ctx: &mut dyn Context,
    st: &mut RunState,
) -> Result<JitOutcome, EngineError> {
    let text = stmt.to_string();
    let head: String = text.chars().take(20).collect();
    info!("starting fast-path emulation of `{}...`", head.replace('\n', "\\n"));

    if DYNAMIC_CODE_CALLS.iter().any(|p| text.contains(p)) {
        warn!("loop executes dynamic code, staying on slow path");
        return Ok(JitOutcome::NotHandled);
    }
    if called_code_is_dynamic(stmt, ctx, st)? {
        warn!("a function called by the loop executes dynamic code, staying on slow path");
        return Ok(JitOutcome::NotHandled);
    }

    let program = match Compiler::compile_loop(stmt) {
        Ok(program) => program,
        Err(EngineError::Unsupported(what)) => {
            info!("loop not expressible in bytecode ({what}), staying on slow path");
            return Ok(JitOutcome::NotHandled);
        }
        Err(e) => return Err(e),
    };

    // Extended-ASCII string handling differs between the dialects and the
    // fast path only reproduces the generic-script decoding.
    if !ctx.is_vbscript() && program.has_extended_ascii_strings() {
        warn!("code contains dialect-specific extended ASCII strings, staying on slow path");
        return Ok(JitOutcome::NotHandled);
    }

    let mut vm = Vm::new(&program);
    vm.seed_free_variables(stmt, ctx, st)?;

    match vm.run(ctx, st) {
        Ok(()) => {
            for name in &program.writeback {
                if let Some(v) = vm.vars.get(name) {
                    ctx.save_intermediate_iocs(v);
                    ctx.set(name, v.clone(), Scope::Default);
                }
            }
            info!("done fast-path emulation of `{}...`", head.replace('\n', "\\n"));
            Ok(JitOutcome::Handled)
        }
        Err(EngineError::InfiniteLoop) => {
            warn!("detected infinite loop, terminating loop");
            Ok(JitOutcome::Handled)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("fast-path emulation failed ({e}), falling back to slow path");
            Ok(JitOutcome::NotHandled)
        }
    }
}

/// Walk one level into every procedure the loop calls, looking for a
/// dynamic-code call hidden behind a function boundary.
fn called_code_is_dynamic(
    stmt: &Stmt,
    ctx: &mut dyn Context,
    st: &mut RunState,
) -> Result<bool, EngineError> {
    let mut pending: Vec<String> = {
        let mut calls = CallCollector::default();
        accept(NodeRef::Stmt(stmt), &mut calls, false, st)?;
        calls.names.into_iter().collect()
    };
    let mut seen: HashSet<String> = HashSet::new();

    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(Binding::Procedure(proc)) = ctx.get(&name, false) {
            let body_text = proc.to_string();
            if DYNAMIC_CODE_CALLS.iter().any(|p| body_text.contains(p)) {
                return Ok(true);
            }
            let mut calls = CallCollector::default();
            accept(NodeRef::Proc(&proc), &mut calls, false, st)?;
            pending.extend(calls.names);
        }
    }
    Ok(false)
}

/// True if an assigned expression is string shaped: a string literal, a
/// concatenation, or a call to a string-returning builtin.
fn assigns_string(expr: &Expr, ctx: &mut dyn Context) -> bool {
    match expr {
        Expr::Literal(Value::Str(_)) => true,
        Expr::Binary {
            op: BinOp::Concat, ..
        } => true,
        Expr::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
        } => assigns_string(lhs, ctx) || assigns_string(rhs, ctx),
        Expr::Call { name, .. } => matches!(
            ctx.get(name, false),
            Some(Binding::Library(f)) if matches!(f.return_type(), ReturnType::String)
        ),
        _ => false,
    }
}

/// One instruction of the restricted loop bytecode.
#[derive(Clone, Debug)]
enum Op {
    /// Push `consts[idx]`.
    Const(usize),
    /// Push the variable `names[idx]`, or the uninitialized sentinel.
    Load(usize),
    /// Pop into the variable `names[idx]`.
    Store(usize),
    /// Pop an index then a value, store into the list `names[idx]`.
    StoreIndex(usize),
    Bin(BinOp),
    Un(UnOp),
    /// Pop `argc` arguments and call `names[idx]`, pushing the result.
    Call(usize, usize),
    Jump(usize),
    JumpIfFalse(usize),
    JumpIfTrue(usize),
    Pop,
    /// Fault-isolation marker. A recoverable error before `resume` skips
    /// the rest of the statement and continues at `resume`.
    Guard(usize),
    /// Loop back-edge counter for loop number `idx`; trips the
    /// infinite-loop sentinel when the iteration budget runs out.
    IterCheck(usize),
    Halt,
}

struct Program {
    ops: Vec<Op>,
    consts: Vec<Value>,
    names: Vec<String>,
    loop_count: usize,
    /// Variables whose final values are copied back into the context.
    writeback: BTreeSet<String>,
}

impl Program {
    fn has_extended_ascii_strings(&self) -> bool {
        self.consts.iter().any(|v| match v {
            Value::Str(s) => s.chars().any(|c| c as u32 >= 0x7f),
            _ => false,
        })
    }
}

struct Compiler {
    ops: Vec<Op>,
    consts: Vec<Value>,
    names: Vec<String>,
    name_index: HashMap<String, usize>,
    loop_count: usize,
    /// Patch sites for `Exit For` jumps, one list per active loop.
    exit_sites: Vec<Vec<usize>>,
    writeback: BTreeSet<String>,
}

impl Compiler {
    fn compile_loop(stmt: &Stmt) -> Result<Program, EngineError> {
        let mut c = Compiler {
            ops: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            name_index: HashMap::new(),
            loop_count: 0,
            exit_sites: Vec::new(),
            writeback: BTreeSet::new(),
        };
        c.stmt(stmt)?;
        c.ops.push(Op::Halt);
        Ok(Program {
            ops: c.ops,
            consts: c.consts,
            names: c.names,
            loop_count: c.loop_count,
            writeback: c.writeback,
        })
    }

    fn name(&mut self, name: &str) -> usize {
        let key = name.to_lowercase();
        if let Some(&idx) = self.name_index.get(&key) {
            return idx;
        }
        let idx = self.names.len();
        self.names.push(key.clone());
        self.name_index.insert(key, idx);
        idx
    }

    fn constant(&mut self, value: Value) -> usize {
        self.consts.push(value);
        self.consts.len() - 1
    }

    fn here(&self) -> usize {
        self.ops.len()
    }

    fn patch(&mut self, site: usize, target: usize) {
        match &mut self.ops[site] {
            Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfTrue(t) | Op::Guard(t) => *t = target,
            _ => {}
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), EngineError> {
        match expr {
            Expr::Literal(v) => {
                let idx = self.constant(v.clone());
                self.ops.push(Op::Const(idx));
            }
            Expr::Identifier(name) => {
                let idx = self.name(name);
                self.ops.push(Op::Load(idx));
            }
            Expr::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.ops.push(Op::Bin(*op));
            }
            Expr::Unary { op, operand } => {
                self.expr(operand)?;
                self.ops.push(Op::Un(*op));
            }
            Expr::Call { name, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let idx = self.name(name);
                self.ops.push(Op::Call(idx, args.len()));
            }
            Expr::Member { .. } => {
                return Err(EngineError::Unsupported("member access".into()));
            }
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), EngineError> {
        match stmt {
            Stmt::Let {
                target,
                index,
                value,
            } => {
                self.writeback.insert(target.to_lowercase());
                self.expr(value)?;
                let idx = self.name(target);
                match index {
                    Some(index) => {
                        self.expr(index)?;
                        self.ops.push(Op::StoreIndex(idx));
                    }
                    None => self.ops.push(Op::Store(idx)),
                }
            }
            Stmt::CallSub { name, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let idx = self.name(name);
                self.ops.push(Op::Call(idx, args.len()));
                self.ops.push(Op::Pop);
            }
            Stmt::If { arms, else_body } => {
                let mut end_sites = Vec::new();
                for arm in arms {
                    self.expr(&arm.cond)?;
                    let next = self.here();
                    self.ops.push(Op::JumpIfFalse(0));
                    self.body(&arm.body)?;
                    end_sites.push(self.here());
                    self.ops.push(Op::Jump(0));
                    let target = self.here();
                    self.patch(next, target);
                }
                self.body(else_body)?;
                let end = self.here();
                for site in end_sites {
                    self.patch(site, end);
                }
            }
            Stmt::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                let loop_id = self.loop_count;
                self.loop_count += 1;
                self.writeback.insert(var.to_lowercase());

                let var_idx = self.name(var);
                let end_idx = self.name(&format!("#end{loop_id}"));
                let step_idx = self.name(&format!("#step{loop_id}"));

                self.expr(start)?;
                self.ops.push(Op::Store(var_idx));
                self.expr(end)?;
                self.ops.push(Op::Store(end_idx));
                match step {
                    Some(step) => self.expr(step)?,
                    None => {
                        let one = self.constant(Value::Int(1));
                        self.ops.push(Op::Const(one));
                    }
                }
                self.ops.push(Op::Store(step_idx));

                let head = self.here();
                self.ops.push(Op::IterCheck(loop_id));

                // Continue while var <= end for a non-negative step, or
                // var >= end for a negative one.
                let zero = self.constant(Value::Int(0));
                self.ops.push(Op::Load(step_idx));
                self.ops.push(Op::Const(zero));
                self.ops.push(Op::Bin(BinOp::Ge));
                let neg_branch = self.here();
                self.ops.push(Op::JumpIfFalse(0));
                self.ops.push(Op::Load(var_idx));
                self.ops.push(Op::Load(end_idx));
                self.ops.push(Op::Bin(BinOp::Le));
                let cond_done = self.here();
                self.ops.push(Op::Jump(0));
                let neg_target = self.here();
                self.patch(neg_branch, neg_target);
                self.ops.push(Op::Load(var_idx));
                self.ops.push(Op::Load(end_idx));
                self.ops.push(Op::Bin(BinOp::Ge));
                let after_cond = self.here();
                self.patch(cond_done, after_cond);
                let exit_site = self.here();
                self.ops.push(Op::JumpIfFalse(0));

                self.exit_sites.push(vec![exit_site]);
                self.guarded_body(body)?;

                self.ops.push(Op::Load(var_idx));
                self.ops.push(Op::Load(step_idx));
                self.ops.push(Op::Bin(BinOp::Add));
                self.ops.push(Op::Store(var_idx));
                self.ops.push(Op::Jump(head));

                let end_pc = self.here();
                for site in self.exit_sites.pop().into_iter().flatten() {
                    self.patch(site, end_pc);
                }
            }
            Stmt::DoLoop {
                cond,
                body,
                until,
                post_test,
            } => {
                let loop_id = self.loop_count;
                self.loop_count += 1;

                let head = self.here();
                self.ops.push(Op::IterCheck(loop_id));
                self.exit_sites.push(Vec::new());

                if *post_test {
                    self.guarded_body(body)?;
                    self.expr(cond)?;
                    if *until {
                        self.ops.push(Op::Un(UnOp::Not));
                    }
                    self.ops.push(Op::JumpIfTrue(head));
                } else {
                    self.expr(cond)?;
                    if *until {
                        self.ops.push(Op::Un(UnOp::Not));
                    }
                    let exit_site = self.here();
                    self.ops.push(Op::JumpIfFalse(0));
                    self.guarded_body(body)?;
                    self.ops.push(Op::Jump(head));
                    if let Some(sites) = self.exit_sites.last_mut() {
                        sites.push(exit_site);
                    }
                }

                let end_pc = self.here();
                for site in self.exit_sites.pop().into_iter().flatten() {
                    self.patch(site, end_pc);
                }
            }
            Stmt::Block(stmts) => self.body(stmts)?,
            Stmt::ExitFor => {
                let site = self.here();
                self.ops.push(Op::Jump(0));
                match self.exit_sites.last_mut() {
                    Some(sites) => sites.push(site),
                    None => return Err(EngineError::Unsupported("exit outside a loop".into())),
                }
            }
            Stmt::ExitProc => self.ops.push(Op::Halt),
            Stmt::Unparsed { .. } => {}
        }
        Ok(())
    }

    fn body(&mut self, body: &[Stmt]) -> Result<(), EngineError> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    /// Compile a loop body with each statement fault-isolated: a statement
    /// that fails at run time is skipped, the rest of the body still runs.
    fn guarded_body(&mut self, body: &[Stmt]) -> Result<(), EngineError> {
        for stmt in body {
            let guard = self.here();
            self.ops.push(Op::Guard(0));
            self.stmt(stmt)?;
            let resume = self.here();
            self.patch(guard, resume);
        }
        Ok(())
    }
}

struct Vm<'p> {
    program: &'p Program,
    vars: HashMap<String, Value>,
    stack: Vec<Value>,
    iterations: Vec<u64>,
}

impl<'p> Vm<'p> {
    fn new(program: &'p Program) -> Self {
        Vm {
            program,
            vars: HashMap::new(),
            stack: Vec::new(),
            iterations: vec![0; program.loop_count],
        }
    }

    /// Bind every free variable of the loop to its current resolved value,
    /// so the isolated run starts from the real context state.
    fn seed_free_variables(
        &mut self,
        stmt: &Stmt,
        ctx: &mut dyn Context,
        st: &mut RunState,
    ) -> Result<(), EngineError> {
        let mut vars = VarCollector::default();
        accept(NodeRef::Stmt(stmt), &mut vars, false, st)?;
        let mut lhs = LhsCollector::default();
        accept(NodeRef::Stmt(stmt), &mut lhs, false, st)?;

        for name in vars.vars.iter().chain(lhs.vars.iter()) {
            let key = name.to_lowercase();
            if self.vars.contains_key(&key) {
                continue;
            }
            match ctx.get(&key, false) {
                Some(Binding::Value(v)) => {
                    self.vars.insert(key, v);
                }
                // Procedures and builtins stay callable through `Op::Call`.
                Some(_) => {}
                None => {
                    // An undefined variable starts as "" when the loop only
                    // ever assigns it string-shaped values, 0 otherwise.
                    let mut lets = LetCollector::new(name);
                    accept(NodeRef::Stmt(stmt), &mut lets, false, st)?;
                    let stringy = lets.assignments.iter().any(|s| match s {
                        Stmt::Let { value, .. } => assigns_string(value, ctx),
                        _ => false,
                    });
                    let seed = if stringy {
                        Value::Str(String::new())
                    } else {
                        Value::Int(0)
                    };
                    self.vars.insert(key, seed);
                }
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, EngineError> {
        self.stack
            .pop()
            .ok_or_else(|| EngineError::Runtime("bytecode stack underflow".into()))
    }

    fn run(&mut self, ctx: &mut dyn Context, st: &mut RunState) -> Result<(), EngineError> {
        let mut pc = 0usize;
        // Innermost active fault-isolation scopes: (resume pc, stack depth).
        let mut guards: Vec<(usize, usize)> = Vec::new();
        let mut steps: u64 = 0;

        while pc < self.program.ops.len() {
            steps += 1;
            if steps % 1024 == 0 {
                st.check_limits(true)?;
            }
            while matches!(guards.last(), Some(&(resume, _)) if pc >= resume) {
                guards.pop();
            }
            if let Op::Guard(resume) = &self.program.ops[pc] {
                guards.push((*resume, self.stack.len()));
                pc += 1;
                continue;
            }

            match self.step(pc, ctx, st) {
                Ok(Some(next)) => pc = next,
                Ok(None) => return Ok(()),
                Err(e) if e.is_fatal() || matches!(e, EngineError::InfiniteLoop) => return Err(e),
                Err(e) => match guards.pop() {
                    Some((resume, depth)) => {
                        warn!("statement failed during fast-path emulation, skipping: {e}");
                        self.stack.truncate(depth);
                        pc = resume;
                    }
                    None => return Err(e),
                },
            }
        }
        Ok(())
    }

    fn step(
        &mut self,
        pc: usize,
        ctx: &mut dyn Context,
        st: &mut RunState,
    ) -> Result<Option<usize>, EngineError> {
        let op = &self.program.ops[pc];
        match op {
            Op::Const(idx) => self.stack.push(self.program.consts[*idx].clone()),
            Op::Load(idx) => {
                let name = &self.program.names[*idx];
                let v = match self.vars.get(name) {
                    Some(v) => v.clone(),
                    None => Value::Null,
                };
                self.stack.push(v);
            }
            Op::Store(idx) => {
                let v = self.pop()?;
                self.vars.insert(self.program.names[*idx].clone(), v);
            }
            Op::StoreIndex(idx) => {
                let index = self.pop()?;
                let value = self.pop()?;
                let name = &self.program.names[*idx];
                let index = to_int(&index).unwrap_or(0).max(0) as usize;
                let items = match self.vars.get(name) {
                    Some(Value::List(items)) => items.clone(),
                    _ => Vec::new(),
                };
                self.vars
                    .insert(name.clone(), eval::update_array(items, index, value));
            }
            Op::Bin(op) => {
                let r = self.pop()?;
                let l = self.pop()?;
                self.stack.push(eval::eval_binop(*op, &l, &r, ctx)?);
            }
            Op::Un(op) => {
                let v = self.pop()?;
                let out = match op {
                    UnOp::Not => Value::Bool(!truthy(&v)),
                    UnOp::Neg => match to_int(&v) {
                        Ok(n) => Value::Int(-n),
                        Err(_) => Value::Null,
                    },
                };
                self.stack.push(out);
            }
            Op::Call(idx, argc) => {
                let mut args = Vec::with_capacity(*argc);
                for _ in 0..*argc {
                    args.push(self.pop()?);
                }
                args.reverse();
                let name = self.program.names[*idx].clone();
                let result = self.call(&name, &args, ctx, st)?;
                self.stack.push(result);
            }
            Op::Jump(target) => return Ok(Some(*target)),
            Op::JumpIfFalse(target) => {
                let v = self.pop()?;
                if !truthy(&v) {
                    return Ok(Some(*target));
                }
            }
            Op::JumpIfTrue(target) => {
                let v = self.pop()?;
                if truthy(&v) {
                    return Ok(Some(*target));
                }
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Guard(_) => {}
            Op::IterCheck(idx) => {
                self.iterations[*idx] += 1;
                if self.iterations[*idx] > st.policy.max_loop_iterations {
                    return Err(EngineError::InfiniteLoop);
                }
            }
            Op::Halt => return Ok(None),
        }
        Ok(Some(pc + 1))
    }

    /// Indexing a local list, or calling back into the routine library and
    /// user procedures through the slow path.
    fn call(
        &mut self,
        name: &str,
        args: &[Value],
        ctx: &mut dyn Context,
        st: &mut RunState,
    ) -> Result<Value, EngineError> {
        if let Some(Value::List(items)) = self.vars.get(name) {
            let index = match args.first() {
                Some(v) => to_int(v).unwrap_or(0).max(0) as usize,
                None => return Ok(Value::List(items.clone())),
            };
            return Ok(items.get(index).cloned().unwrap_or(Value::Null));
        }
        match ctx.get(name, false) {
            Some(Binding::Procedure(proc)) => eval::call_procedure(&proc, args, ctx, st),
            Some(Binding::Library(func)) => func.call(ctx, args),
            Some(Binding::Value(Value::List(items))) => {
                let index = match args.first() {
                    Some(v) => to_int(v).unwrap_or(0).max(0) as usize,
                    None => return Ok(Value::List(items)),
                };
                Ok(items.get(index).cloned().unwrap_or(Value::Null))
            }
            _ => Err(EngineError::Runtime(format!("call target `{name}` not found"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::IfArm;
    use crate::context::InMemoryContext;
    use crate::limits::EmulationPolicy;
    use pretty_assertions::assert_eq;

    fn state() -> RunState {
        RunState::new(EmulationPolicy::default())
    }

    fn counting_loop(n: i64) -> Stmt {
        Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(n),
            step: None,
            body: vec![Stmt::Let {
                target: "total".into(),
                index: None,
                value: Expr::binary(BinOp::Add, Expr::ident("total"), Expr::ident("i")),
            }],
        }
    }

    #[test]
    fn simple_loop_runs_in_bytecode() {
        let mut ctx = InMemoryContext::new().with_jit();
        ctx.set("total", Value::Int(0), Scope::Default);
        let mut st = state();
        let outcome = emulate_loop(&counting_loop(100), &mut ctx, &mut st).unwrap();
        assert_eq!(outcome, JitOutcome::Handled);
        assert_eq!(ctx.value_of("total"), Some(Value::Int(5050)));
    }

    #[test]
    fn dynamic_code_loop_is_rejected() {
        let mut ctx = InMemoryContext::new().with_jit();
        let mut st = state();
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(10),
            step: None,
            body: vec![Stmt::CallSub {
                name: "Execute".into(),
                args: vec![Expr::str_lit("x = 1")],
            }],
        };
        let outcome = emulate_loop(&stmt, &mut ctx, &mut st).unwrap();
        assert_eq!(outcome, JitOutcome::NotHandled);
    }

    #[test]
    fn extended_ascii_strings_rejected_outside_vbscript() {
        let mut ctx = InMemoryContext::new().with_jit();
        let mut st = state();
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(3),
            step: None,
            body: vec![Stmt::Let {
                target: "s".into(),
                index: None,
                value: Expr::str_lit("caf\u{e9}"),
            }],
        };
        assert_eq!(
            emulate_loop(&stmt, &mut ctx, &mut st).unwrap(),
            JitOutcome::NotHandled
        );

        let mut ctx = InMemoryContext::new().with_jit().with_vbscript();
        assert_eq!(
            emulate_loop(&stmt, &mut ctx, &mut st).unwrap(),
            JitOutcome::Handled
        );
    }

    #[test]
    fn infinite_loop_trips_sentinel_and_counts_as_handled() {
        let mut ctx = InMemoryContext::new().with_jit();
        let mut st = RunState::new(EmulationPolicy::default().with_max_loop_iterations(1000));
        let stmt = Stmt::DoLoop {
            cond: Expr::Literal(Value::Bool(true)),
            body: vec![Stmt::Let {
                target: "x".into(),
                index: None,
                value: Expr::binary(BinOp::Add, Expr::ident("x"), Expr::int_lit(1)),
            }],
            until: false,
            post_test: false,
        };
        let outcome = emulate_loop(&stmt, &mut ctx, &mut st).unwrap();
        assert_eq!(outcome, JitOutcome::Handled);
        // The sentinel terminates the loop without copying values back.
        assert_eq!(ctx.value_of("x"), None);
    }

    #[test]
    fn failing_statement_is_skipped_not_fatal() {
        let mut ctx = InMemoryContext::new().with_jit();
        let mut st = state();
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(3),
            step: None,
            body: vec![
                Stmt::CallSub {
                    name: "NoSuchSub".into(),
                    args: vec![],
                },
                Stmt::Let {
                    target: "ok".into(),
                    index: None,
                    value: Expr::binary(BinOp::Add, Expr::ident("ok"), Expr::int_lit(1)),
                },
            ],
        };
        let outcome = emulate_loop(&stmt, &mut ctx, &mut st).unwrap();
        assert_eq!(outcome, JitOutcome::Handled);
        assert_eq!(ctx.value_of("ok"), Some(Value::Int(3)));
    }

    #[test]
    fn exit_for_and_branches_compile() {
        let mut ctx = InMemoryContext::new().with_jit();
        let mut st = state();
        let stmt = Stmt::For {
            var: "i".into(),
            start: Expr::int_lit(1),
            end: Expr::int_lit(100),
            step: None,
            body: vec![Stmt::If {
                arms: vec![IfArm {
                    cond: Expr::binary(BinOp::Gt, Expr::ident("i"), Expr::int_lit(5)),
                    body: vec![Stmt::ExitFor],
                }],
                else_body: vec![Stmt::Let {
                    target: "n".into(),
                    index: None,
                    value: Expr::ident("i"),
                }],
            }],
        };
        let outcome = emulate_loop(&stmt, &mut ctx, &mut st).unwrap();
        assert_eq!(outcome, JitOutcome::Handled);
        assert_eq!(ctx.value_of("n"), Some(Value::Int(5)));
    }
}
