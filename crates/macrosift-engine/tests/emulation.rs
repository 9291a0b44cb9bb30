use std::rc::Rc;

use macrosift_engine::{
    resolve, BinOp, Context, EmulationPolicy, EngineError, Expr, InMemoryContext, LibraryFunc,
    ReturnType, RunState, Scope, Stmt,
};
use macrosift_model::coerce::{str_convert, to_int};
use macrosift_model::Value;
use pretty_assertions::assert_eq;

struct Chr;
impl LibraryFunc for Chr {
    fn call(&self, _ctx: &mut dyn Context, args: &[Value]) -> Result<Value, EngineError> {
        let code = to_int(args.first().unwrap_or(&Value::Null)).unwrap_or(0);
        let c = char::from_u32(code.clamp(0, 0x10ffff) as u32).unwrap_or('\0');
        Ok(Value::from(c.to_string()))
    }

    fn return_type(&self) -> ReturnType {
        ReturnType::String
    }
}

struct Asc;
impl LibraryFunc for Asc {
    fn call(&self, _ctx: &mut dyn Context, args: &[Value]) -> Result<Value, EngineError> {
        let s = str_convert(args.first().unwrap_or(&Value::Null));
        Ok(Value::Int(s.chars().next().map(|c| c as i64).unwrap_or(0)))
    }
}

struct Mid;
impl LibraryFunc for Mid {
    fn call(&self, _ctx: &mut dyn Context, args: &[Value]) -> Result<Value, EngineError> {
        let s = str_convert(args.first().unwrap_or(&Value::Null));
        let start = to_int(args.get(1).unwrap_or(&Value::Null)).unwrap_or(1).max(1) as usize;
        let len = to_int(args.get(2).unwrap_or(&Value::Null)).unwrap_or(0).max(0) as usize;
        let out: String = s.chars().skip(start - 1).take(len).collect();
        Ok(Value::from(out))
    }

    fn return_type(&self) -> ReturnType {
        ReturnType::String
    }
}

struct Shell;
impl LibraryFunc for Shell {
    fn call(&self, ctx: &mut dyn Context, args: &[Value]) -> Result<Value, EngineError> {
        ctx.report_action("Run", args, "Shell");
        Ok(Value::Int(0))
    }
}

struct Len;
impl LibraryFunc for Len {
    fn call(&self, _ctx: &mut dyn Context, args: &[Value]) -> Result<Value, EngineError> {
        let s = str_convert(args.first().unwrap_or(&Value::Null));
        Ok(Value::Int(s.chars().count() as i64))
    }
}

fn string_library(ctx: &mut InMemoryContext) {
    ctx.add_library_func("Chr", Rc::new(Chr));
    ctx.add_library_func("Asc", Rc::new(Asc));
    ctx.add_library_func("Mid", Rc::new(Mid));
    ctx.add_library_func("Len", Rc::new(Len));
    ctx.add_library_func("Shell", Rc::new(Shell));
}

/// `out = out & Chr(Asc(Mid(data, i, 1)) - 1)`, the classic Caesar decode.
fn decode_loop(data_var: &str, count: i64) -> Stmt {
    Stmt::For {
        var: "i".into(),
        start: Expr::int_lit(1),
        end: Expr::int_lit(count),
        step: None,
        body: vec![Stmt::Let {
            target: "out".into(),
            index: None,
            value: Expr::binary(
                BinOp::Concat,
                Expr::ident("out"),
                Expr::call(
                    "Chr",
                    vec![Expr::binary(
                        BinOp::Sub,
                        Expr::call(
                            "Asc",
                            vec![Expr::call(
                                "Mid",
                                vec![Expr::ident(data_var), Expr::ident("i"), Expr::int_lit(1)],
                            )],
                        ),
                        Expr::int_lit(1),
                    )],
                ),
            ),
        }],
    }
}

fn shifted(plain: &str) -> String {
    plain.chars().map(|c| char::from(c as u8 + 1)).collect()
}

#[test]
fn decode_loop_runs_on_the_fast_path() {
    let mut ctx = InMemoryContext::new().with_jit();
    string_library(&mut ctx);
    let plain = "cmd /c powershell -enc SQBFAFgA";
    ctx.set("data", Value::from(shifted(plain)), Scope::Default);
    ctx.set("out", Value::from(""), Scope::Default);

    let mut st = RunState::new(EmulationPolicy::default());
    let stmt = decode_loop("data", plain.chars().count() as i64);
    stmt.exec(&mut ctx, &mut st).unwrap();

    assert_eq!(ctx.value_of("out"), Some(Value::from(plain)));
    assert_eq!(st.jit_attempts, 1);
    assert_eq!(st.jit_handled, 1);
    // The decoded command was offered to the IOC scanner.
    assert!(ctx.iocs.contains(&Value::from(plain)));
}

#[test]
fn same_loop_decodes_identically_on_the_slow_path() {
    let mut ctx = InMemoryContext::new();
    string_library(&mut ctx);
    let plain = "http://evil.example/payload.bin";
    ctx.set("data", Value::from(shifted(plain)), Scope::Default);
    ctx.set("out", Value::from(""), Scope::Default);

    let mut st = RunState::new(EmulationPolicy::default());
    let stmt = decode_loop("data", plain.chars().count() as i64);
    stmt.exec(&mut ctx, &mut st).unwrap();

    assert_eq!(ctx.value_of("out"), Some(Value::from(plain)));
    assert_eq!(st.jit_attempts, 0);
}

#[test]
fn loops_calling_dynamic_code_never_take_the_fast_path() {
    let mut ctx = InMemoryContext::new().with_jit();
    string_library(&mut ctx);
    ctx.set("n", Value::Int(0), Scope::Default);

    let stmt = Stmt::For {
        var: "i".into(),
        start: Expr::int_lit(1),
        end: Expr::int_lit(4),
        step: None,
        body: vec![
            Stmt::CallSub {
                name: "Execute".into(),
                args: vec![Expr::str_lit("payload")],
            },
            Stmt::Let {
                target: "n".into(),
                index: None,
                value: Expr::binary(BinOp::Add, Expr::ident("n"), Expr::int_lit(1)),
            },
        ],
    };
    let mut st = RunState::new(EmulationPolicy::default());
    stmt.exec(&mut ctx, &mut st).unwrap();

    // The loop was offered to the fast path and declined; all updates came
    // from tree-walking.
    assert_eq!(st.jit_attempts, 1);
    assert_eq!(st.jit_handled, 0);
    assert_eq!(ctx.value_of("n"), Some(Value::Int(4)));
}

#[test]
fn recursion_guard_trips_deterministically() {
    let mut deep = Expr::int_lit(1);
    for _ in 0..600 {
        deep = Expr::binary(BinOp::Add, deep, Expr::int_lit(1));
    }

    for _ in 0..2 {
        let mut ctx = InMemoryContext::new();
        let mut st = RunState::new(EmulationPolicy::default().with_max_depth(1000));
        let err = resolve::resolve(&deep, &mut ctx, &mut st, false).unwrap_err();
        assert!(matches!(err, EngineError::RecursionLimit), "got {err:?}");
        assert!(err.is_fatal());
    }
}

#[test]
fn shape_text_resolves_end_to_end() {
    let mut ctx = InMemoryContext::new();
    ctx.set_doc_var("shapes('1').textframe.textrange.text", "hello");
    let mut st = RunState::new(EmulationPolicy::default());
    let v = resolve::resolve_text(
        "Shapes('1').TextFrame.TextRange.Text",
        &mut ctx,
        &mut st,
        false,
    )
    .unwrap();
    assert_eq!(v, Value::from("hello"));
}

#[test]
fn document_variable_accessor_resolves_end_to_end() {
    let mut ctx = InMemoryContext::new();
    ctx.set_doc_var("x", "payload");
    let mut st = RunState::new(EmulationPolicy::default());
    let v = resolve::resolve_text(
        "ActiveDocument.Variables(\"X\").Value",
        &mut ctx,
        &mut st,
        false,
    )
    .unwrap();
    assert_eq!(v, Value::from("payload"));
}

#[test]
fn shell_invocations_are_recorded_as_actions() {
    let mut ctx = InMemoryContext::new();
    string_library(&mut ctx);
    let body = vec![Stmt::CallSub {
        name: "Shell".into(),
        args: vec![Expr::str_lit("cmd /c whoami")],
    }];
    macrosift_engine::run_statements(&body, &mut ctx, EmulationPolicy::default()).unwrap();

    assert_eq!(ctx.actions.len(), 1);
    assert_eq!(ctx.actions[0].action, "Run");
    assert_eq!(ctx.actions[0].params, vec![Value::from("cmd /c whoami")]);
}

#[test]
fn unknown_calls_and_unparsed_statements_do_not_abort_the_run() {
    let mut ctx = InMemoryContext::new();
    let body = vec![
        Stmt::CallSub {
            name: "NoSuchSub".into(),
            args: vec![],
        },
        Stmt::Unparsed {
            text: "On Error Resume Next".into(),
        },
        Stmt::Let {
            target: "reached".into(),
            index: None,
            value: Expr::int_lit(1),
        },
    ];
    macrosift_engine::run_statements(&body, &mut ctx, EmulationPolicy::default()).unwrap();
    assert_eq!(ctx.value_of("reached"), Some(Value::Int(1)));
}

#[test]
fn repeated_constant_expressions_come_from_the_cache() {
    let mut ctx = InMemoryContext::new();
    let mut st = RunState::new(EmulationPolicy::default());
    let expr = Expr::binary(
        BinOp::Mul,
        Expr::binary(BinOp::Add, Expr::int_lit(17), Expr::int_lit(4)),
        Expr::int_lit(3),
    );

    let first = resolve::resolve(&expr, &mut ctx, &mut st, false).unwrap();
    assert_eq!(st.cache.hits(), 0);
    let second = resolve::resolve(&expr, &mut ctx, &mut st, false).unwrap();
    assert_eq!(first, second);
    assert_eq!(second, Value::Int(63));
    assert_eq!(st.cache.hits(), 1);
}

#[test]
fn function_procedures_return_their_own_name() {
    use macrosift_engine::{Procedure, ProcedureKind};

    let mut ctx = InMemoryContext::new();
    string_library(&mut ctx);
    ctx.add_procedure(Procedure {
        name: "Twice".into(),
        params: vec!["s".into()],
        body: vec![Stmt::Let {
            target: "Twice".into(),
            index: None,
            value: Expr::binary(BinOp::Concat, Expr::ident("s"), Expr::ident("s")),
        }],
        kind: ProcedureKind::Function,
        span: None,
    });

    let mut st = RunState::new(EmulationPolicy::default());
    let call = Expr::call("Twice", vec![Expr::str_lit("ab")]);
    let v = call.eval(&mut ctx, &mut st).unwrap();
    assert_eq!(v, Value::from("abab"));
}
