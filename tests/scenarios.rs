//! In-process scenarios covering the observable behavior of built programs:
//! arithmetic, null propagation, boxing, structured exception handling,
//! by-reference write-back, budgets, and concurrent execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use lightvm::compiler::{assemble, InstructionList, ProgramSource, Registry};
use lightvm::config::RuntimeConfig;
use lightvm::vm::{
    BinaryOp, BuildError, Category, ErrorKind, Exception, Instruction, Interpreter, Jump, NativeMethod,
    NumericKind, Program, Value, Verifier,
};

fn build_with(source: serde_json::Value, registry: &Registry) -> Arc<Program> {
    let source: ProgramSource = serde_json::from_value(source).unwrap();
    let program = assemble(&source, registry).unwrap();
    Verifier::new().verify(&program).unwrap();
    Arc::new(program)
}

fn eval_with(source: serde_json::Value, registry: &Registry) -> Result<Option<Value>, Exception> {
    Interpreter::new(build_with(source, registry)).invoke(Vec::new(), Vec::new())
}

fn eval(source: serde_json::Value) -> Result<Option<Value>, Exception> {
    eval_with(source, &Registry::standard())
}

/// A host method that counts its calls.
fn counter(name: &str, count: &Arc<AtomicUsize>) -> Arc<NativeMethod> {
    let count = count.clone();
    Arc::new(
        NativeMethod::new(name, 0, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .void(),
    )
}

// Arithmetic

#[test]
fn test_add_constants() {
    let mut list = InstructionList::new();
    list.emit_load(Value::I32(3)).unwrap();
    list.emit_load(Value::I32(4)).unwrap();
    list.emit_binary(BinaryOp::Add, NumericKind::I32, false).unwrap();
    assert_eq!(list.stack_depth(), 1);
    list.emit_return(true).unwrap();
    assert_eq!(list.stack_depth(), 0);

    let program = Arc::new(list.finish("add", 0, 0).unwrap());
    assert_eq!(program.max_stack_depth(), 2);
    Verifier::new().verify(&program).unwrap();
    let result = Interpreter::new(program).invoke(Vec::new(), Vec::new());
    assert_eq!(result.unwrap(), Some(Value::I32(7)));
}

#[test]
fn test_checked_overflow_raises() {
    let error = eval(json!({"body": [
        {"op": "const", "value": i32::MAX},
        {"op": "const", "value": 1},
        {"op": "binary", "operator": "add", "kind": "i32", "checked": true},
        {"op": "return", "value": true}
    ]}))
    .unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::Overflow);
}

#[test]
fn test_unchecked_overflow_wraps() {
    let result = eval(json!({"body": [
        {"op": "const", "value": i32::MAX},
        {"op": "const", "value": 1},
        {"op": "binary", "operator": "add", "kind": "i32"},
        {"op": "return", "value": true}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::I32(i32::MIN)));
}

#[test]
fn test_null_propagates() {
    let result = eval(json!({"body": [
        {"op": "const", "kind": "i32", "value": null},
        {"op": "const", "value": 1},
        {"op": "binary", "operator": "mul", "kind": "i32", "checked": true},
        {"op": "return", "value": true}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::Null));
}

#[test]
fn test_nullable_bool_and() {
    let result = eval(json!({"body": [
        {"op": "const", "kind": "bool", "value": null},
        {"op": "const", "value": false},
        {"op": "binary", "operator": "and", "kind": "bool"},
        {"op": "return", "value": true}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::Bool(false)));
}

// Control flow

#[test]
fn test_forward_branch_offset() {
    let mut list = InstructionList::new();
    let end = list.make_label();
    list.emit_load(Value::Bool(true)).unwrap();
    let branch = list.emit_branch_true(end).unwrap();
    for _ in 0..3 {
        list.emit_load(Value::I32(0)).unwrap();
        list.emit_pop().unwrap();
    }
    list.mark_label(end).unwrap();
    let target = list.count();
    let program = list.finish("branch", 0, 0).unwrap();
    match &program.instructions()[branch] {
        Instruction::BranchTrue(Jump::Offset(offset)) => {
            assert_eq!(*offset, (target - branch) as isize)
        }
        other => panic!("unexpected {}", other),
    }
}

#[test]
fn test_fall_through_returns_null() {
    let result = eval(json!({"body": [
        {"op": "const", "value": false},
        {"op": "branch_false", "label": "end"},
        {"op": "const", "value": 1},
        {"op": "return", "value": true},
        {"op": "label", "name": "end"}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::Null));
}

// Boxing and closures

#[test]
fn test_closure_writes_through_box() {
    // let x = 1; (|| x = 2)(); x
    let result = eval(json!({"body": [
        {"op": "const", "value": 1}, {"op": "let", "name": "x"},
        {"op": "closure", "captures": ["x"], "body": [
            {"op": "const", "value": 2}, {"op": "store", "name": "x"}
        ]},
        {"op": "invoke", "argc": 0},
        {"op": "pop"},
        {"op": "load", "name": "x"},
        {"op": "return", "value": true}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::I32(2)));
}

#[test]
fn test_shadowed_variable_is_separate() {
    let result = eval(json!({"body": [
        {"op": "const", "value": 1}, {"op": "let", "name": "x"},
        {"op": "block", "body": [
            {"op": "const", "value": 10}, {"op": "let", "name": "x"},
            {"op": "closure", "captures": ["x"], "body": [
                {"op": "const", "value": 20}, {"op": "store", "name": "x"}
            ]},
            {"op": "invoke", "argc": 0},
            {"op": "pop"}
        ]},
        {"op": "load", "name": "x"},
        {"op": "return", "value": true}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::I32(1)));
}

#[test]
fn test_counter_closure() {
    // let count = 0; let inc = || { count = count + 1; count }; inc(); inc()
    let result = eval(json!({"body": [
        {"op": "const", "value": 0}, {"op": "let", "name": "count"},
        {"op": "closure", "captures": ["count"], "body": [
            {"op": "load", "name": "count"}, {"op": "const", "value": 1},
            {"op": "binary", "operator": "add", "kind": "i32", "checked": true},
            {"op": "assign", "name": "count"},
            {"op": "return", "value": true}
        ]},
        {"op": "let", "name": "inc"},
        {"op": "load", "name": "inc"}, {"op": "invoke", "argc": 0}, {"op": "pop"},
        {"op": "load", "name": "inc"}, {"op": "invoke", "argc": 0},
        {"op": "return", "value": true}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::I32(2)));
}

// Exceptions

#[test]
fn test_filter_error_declines() {
    let result = eval(json!({"body": [
        {"op": "try",
         "body": [
            {"op": "const", "value": "boom"}, {"op": "throw"}
         ],
         "catches": [
            {"filter": [
                {"op": "const", "value": 1}, {"op": "const", "value": 0},
                {"op": "binary", "operator": "div", "kind": "i32"}
             ],
             "body": [{"op": "const", "value": "first"}, {"op": "return", "value": true}]},
            {"body": [{"op": "const", "value": "second"}, {"op": "return", "value": true}]}
         ]}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::str("second")));
}

#[test]
fn test_failed_filter_leaves_one_trace_entry() {
    let error = eval(json!({"body": [
        {"op": "try",
         "body": [{"op": "const", "value": "boom"}, {"op": "throw"}],
         "catches": [
            {"filter": [
                {"op": "const", "value": 1}, {"op": "const", "value": 0},
                {"op": "binary", "operator": "div", "kind": "i32"}
             ],
             "body": []}
         ]}
    ]}))
    .unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::User);
    let trace = error.trace();
    assert_eq!(trace.len(), 1, "{:?}", trace);
    assert_eq!(trace[0].instruction, 2);
}

#[test]
fn test_filter_reads_payload() {
    let source = |thrown: i64| {
        json!({"body": [
            {"op": "try",
             "body": [{"op": "const", "kind": "i64", "value": thrown}, {"op": "throw"}],
             "catches": [
                {"category": "user", "variable": "e",
                 "filter": [
                    {"op": "load", "name": "e"}, {"op": "error_payload"},
                    {"op": "const", "kind": "i64", "value": 42},
                    {"op": "equal"}
                 ],
                 "body": [{"op": "const", "value": "matched"}, {"op": "return", "value": true}]}
             ]}
        ]})
    };
    assert_eq!(eval(source(42)).unwrap(), Some(Value::str("matched")));
    let error = eval(source(7)).unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::User);
    assert_eq!(*error.payload(), Value::I64(7));
}

#[test]
fn test_finally_return_wins_over_return() {
    let result = eval(json!({"body": [
        {"op": "try",
         "body": [{"op": "const", "value": 1}, {"op": "return", "value": true}],
         "finally": [{"op": "const", "value": 2}, {"op": "return", "value": true}]}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::I32(2)));
}

#[test]
fn test_finally_return_discards_error() {
    let result = eval(json!({"body": [
        {"op": "try",
         "body": [{"op": "const", "value": "lost"}, {"op": "throw"}],
         "finally": [{"op": "const", "value": 5}, {"op": "return", "value": true}]}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::I32(5)));
}

#[test]
fn test_finally_runs_and_error_propagates() {
    let count = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::standard();
    registry.register(counter("cleanup", &count));
    let error = eval_with(
        json!({"body": [
            {"op": "try",
             "body": [{"op": "const", "value": "fail"}, {"op": "throw"}],
             "finally": [{"op": "call", "method": "cleanup"}]}
        ]}),
        &registry,
    )
    .unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::User);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_return_through_nested_finally() {
    let count = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::standard();
    registry.register(counter("cleanup", &count));
    let result = eval_with(
        json!({"body": [
            {"op": "try",
             "body": [
                {"op": "try",
                 "body": [{"op": "const", "value": 9}, {"op": "return", "value": true}],
                 "finally": [{"op": "call", "method": "cleanup"}]}
             ],
             "finally": [{"op": "call", "method": "cleanup"}]},
            {"op": "const", "value": 0},
            {"op": "return", "value": true}
        ]}),
        &registry,
    );
    assert_eq!(result.unwrap(), Some(Value::I32(9)));
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_branch_out_of_try_is_rejected() {
    let source = |leave: &str| {
        json!({"body": [
            {"op": "const", "value": 0}, {"op": "let", "name": "x"},
            {"op": "try",
             "body": [{"op": leave, "label": "out"}],
             "finally": [{"op": "const", "value": 1}, {"op": "store", "name": "x"}]},
            {"op": "label", "name": "out"},
            {"op": "load", "name": "x"},
            {"op": "return", "value": true}
        ]})
    };
    let branch: ProgramSource = serde_json::from_value(source("branch")).unwrap();
    assert!(matches!(
        assemble(&branch, &Registry::standard()),
        Err(BuildError::BranchAcrossRegion(_))
    ));

    // A goto runs the finally block before reaching the label.
    assert_eq!(eval(source("goto")).unwrap(), Some(Value::I32(1)));
}

#[test]
fn test_rethrow_preserves_identity() {
    let original = Exception::new(ErrorKind::Custom("io".into()), "disk unavailable");

    let mut list = InstructionList::new();
    let mut outer = list.begin_try(false).unwrap();
    let mut inner = list.begin_try(false).unwrap();
    list.emit_load(Value::Error(original.clone())).unwrap();
    list.emit_throw().unwrap();
    list.begin_catch(&mut inner, Category::Any).unwrap();
    list.emit_pop().unwrap();
    list.emit_rethrow().unwrap();
    list.end_try(inner).unwrap();
    list.begin_catch(&mut outer, Category::Kind(ErrorKind::Custom("io".into())))
        .unwrap();
    list.emit_return(true).unwrap();
    list.end_try(outer).unwrap();

    let program = Arc::new(list.finish("rethrow", 0, 0).unwrap());
    Verifier::new().verify(&program).unwrap();
    match Interpreter::new(program).invoke(Vec::new(), Vec::new()) {
        Ok(Some(Value::Error(caught))) => assert!(caught.ptr_eq(&original)),
        other => panic!("unexpected result {:?}", other.map(|v| v.map(|v| v.to_string()))),
    }
}

#[test]
fn test_uncaught_error_has_trace_lines() {
    let error = eval(json!({"body": [
        {"op": "line", "start": 3},
        {"op": "const", "value": 1},
        {"op": "const", "value": 0},
        {"op": "binary", "operator": "rem", "kind": "i32"},
        {"op": "return", "value": true}
    ]}))
    .unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::DivideByZero);
    let trace = error.trace();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].instruction, 2);
    assert_eq!(trace[0].lines, Some((3, 3)));
}

// By-reference calls

#[test]
fn test_by_ref_write_back_after_failure() {
    let mut registry = Registry::standard();
    registry.register(Arc::new(NativeMethod::new("set_and_fail", 1, |args| {
        args[0] = Value::I32(99);
        Err(Exception::new(ErrorKind::Custom("host".into()), "boom"))
    })));
    let result = eval_with(
        json!({"body": [
            {"op": "const", "value": 10}, {"op": "const", "value": 20}, {"op": "const", "value": 30},
            {"op": "new_array_init", "count": 3},
            {"op": "let", "name": "arr"},
            {"op": "const", "value": 2}, {"op": "let", "name": "i"},
            {"op": "try",
             "body": [
                {"op": "load", "name": "arr"}, {"op": "load", "name": "i"}, {"op": "get_item"},
                {"op": "call_by_ref", "method": "set_and_fail", "refs": [
                    {"kind": "element", "argument": 0, "array": "arr", "index": "i"}
                ]},
                {"op": "pop"}
             ],
             "catches": [{"category": "host", "body": []}]},
            {"op": "load", "name": "arr"},
            {"op": "return", "value": true}
        ]}),
        &registry,
    );
    let Some(Value::Array(array)) = result.unwrap() else {
        panic!("expected an array");
    };
    assert_eq!(
        array.to_vec(),
        vec![Value::I32(10), Value::I32(20), Value::I32(99)]
    );
}

#[test]
fn test_by_ref_local() {
    let mut registry = Registry::standard();
    registry.register(Arc::new(
        NativeMethod::new("bump", 1, |args| {
            if let Value::I32(n) = args[0] {
                args[0] = Value::I32(n + 1);
            }
            Ok(Value::Null)
        })
        .void(),
    ));
    let result = eval_with(
        json!({"body": [
            {"op": "const", "value": 41}, {"op": "let", "name": "n"},
            {"op": "load", "name": "n"},
            {"op": "call_by_ref", "method": "bump", "refs": [
                {"kind": "local", "argument": 0, "name": "n"}
            ]},
            {"op": "load", "name": "n"},
            {"op": "return", "value": true}
        ]}),
        &registry,
    );
    assert_eq!(result.unwrap(), Some(Value::I32(42)));
}

// Objects

#[test]
fn test_object_members() {
    let result = eval(json!({"body": [
        {"op": "const", "value": "Point"}, {"op": "call", "method": "new_object"},
        {"op": "let", "name": "p"},
        {"op": "load", "name": "p"}, {"op": "const", "value": 3}, {"op": "set_field", "name": "x"},
        {"op": "load", "name": "p"}, {"op": "const", "value": 4}, {"op": "set_property", "name": "y"},
        {"op": "load", "name": "p"}, {"op": "get_field", "name": "x"},
        {"op": "load", "name": "p"}, {"op": "get_property", "name": "y"},
        {"op": "binary", "operator": "add", "kind": "i32"},
        {"op": "return", "value": true}
    ]}));
    assert_eq!(result.unwrap(), Some(Value::I32(7)));
}

#[test]
fn test_read_only_property() {
    let error = eval(json!({"body": [
        {"op": "const", "value": "Point"}, {"op": "call", "method": "new_object"},
        {"op": "const", "value": 1}, {"op": "set_property", "name": "id", "read_only": true}
    ]}))
    .unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn test_oversized_array_is_catchable() {
    let past_limit = i64::from(i32::MAX) + 1;
    let lengths = [
        json!({"op": "const", "kind": "i64", "value": i64::MAX}),
        json!({"op": "const", "kind": "i64", "value": past_limit}),
        json!({"op": "const", "value": -1}),
    ];
    for length in lengths {
        let result = eval(json!({"body": [
            {"op": "try",
             "body": [length, {"op": "new_array"}, {"op": "pop"}],
             "catches": [{"category": "invalid_array_length",
                          "body": [{"op": "const", "value": "caught"}, {"op": "return", "value": true}]}]},
            {"op": "const", "value": "allocated"}, {"op": "return", "value": true}
        ]}));
        assert_eq!(result.unwrap(), Some(Value::str("caught")));
    }
}

// Budget and concurrency

#[test]
fn test_budget_abort_is_not_caught() {
    let caught = Arc::new(AtomicUsize::new(0));
    let cleaned = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::standard();
    registry.register(counter("caught", &caught));
    registry.register(counter("cleanup", &cleaned));
    let program = build_with(
        json!({"body": [
            {"op": "try",
             "body": [{"op": "label", "name": "spin"}, {"op": "branch", "label": "spin"}],
             "catches": [{"body": [{"op": "call", "method": "caught"}]}],
             "finally": [{"op": "call", "method": "cleanup"}]}
        ]}),
        &registry,
    );
    let config = RuntimeConfig {
        instruction_budget: Some(1_000),
        ..Default::default()
    };
    let error = Interpreter::with_config(program, config)
        .invoke(Vec::new(), Vec::new())
        .unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::Aborted);
    assert_eq!(caught.load(Ordering::SeqCst), 0);
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shared_program_across_threads() {
    let source: ProgramSource = serde_json::from_value(json!({
        "name": "square",
        "parameters": ["n"],
        "body": [
            {"op": "load", "name": "n"}, {"op": "load", "name": "n"},
            {"op": "binary", "operator": "mul", "kind": "i64", "checked": true},
            {"op": "return", "value": true}
        ]
    }))
    .unwrap();
    let program = Arc::new(assemble(&source, &Registry::standard()).unwrap());
    let interpreter = Interpreter::new(program);

    let handles: Vec<_> = (0..8i64)
        .map(|n| {
            let interpreter = interpreter.clone();
            std::thread::spawn(move || interpreter.invoke(vec![Value::I64(n)], Vec::new()))
        })
        .collect();
    for (n, handle) in handles.into_iter().enumerate() {
        let n = n as i64;
        assert_eq!(handle.join().unwrap().unwrap(), Some(Value::I64(n * n)));
    }
}

#[test]
fn test_wrong_argument_count() {
    let source: ProgramSource = serde_json::from_value(json!({
        "parameters": ["a", "b"],
        "body": [{"op": "load", "name": "a"}, {"op": "return", "value": true}]
    }))
    .unwrap();
    let program = Arc::new(assemble(&source, &Registry::standard()).unwrap());
    let error = Interpreter::new(program)
        .invoke(vec![Value::I32(1)], Vec::new())
        .unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::InvalidOperation);
}
