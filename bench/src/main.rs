use lightvm::compiler::{assemble, ProgramSource, Registry};
use lightvm::vm::{Interpreter, Value, Verifier};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    interpreter_secs: f64,
    rust_time_secs: f64,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

// Rust reference implementations

fn rust_sum_loop(n: i64) -> i64 {
    let mut sum: i64 = 0;
    for i in 1..=n {
        sum += i;
    }
    sum
}

fn rust_guarded_loop(n: i64) -> i64 {
    let mut sum: i64 = 0;
    for i in 1..=n {
        sum = sum.checked_add(i).unwrap_or(0);
    }
    sum
}

fn time_rust<F>(f: F) -> f64
where
    F: FnOnce() -> i64,
{
    let start = Instant::now();
    eprintln!("{}", f());
    start.elapsed().as_secs_f64()
}

/// sum = 0; i = 1; while i <= n { sum += i; i += 1 }; return sum
fn sum_loop_source(checked_in_try: bool) -> ProgramSource {
    let step = json!([
        {"op": "load", "name": "sum"}, {"op": "load", "name": "i"},
        {"op": "binary", "operator": "add", "kind": "i64", "checked": true},
        {"op": "store", "name": "sum"}
    ]);
    let step = if checked_in_try {
        json!([{"op": "try", "body": step, "catches": [{"body": [
            {"op": "const", "kind": "i64", "value": 0}, {"op": "store", "name": "sum"}
        ]}]}])
    } else {
        step
    };
    let mut body = vec![
        json!({"op": "const", "kind": "i64", "value": 0}), json!({"op": "let", "name": "sum"}),
        json!({"op": "const", "kind": "i64", "value": 1}), json!({"op": "let", "name": "i"}),
        json!({"op": "label", "name": "top"}),
        json!({"op": "load", "name": "i"}), json!({"op": "load", "name": "n"}),
        json!({"op": "compare", "operator": "le", "kind": "i64"}),
        json!({"op": "branch_false", "label": "done"}),
    ];
    body.extend(step.as_array().cloned().unwrap_or_default());
    body.extend([
        json!({"op": "load", "name": "i"}),
        json!({"op": "unary", "operator": "increment", "kind": "i64"}),
        json!({"op": "store", "name": "i"}),
        json!({"op": "branch", "label": "top"}),
        json!({"op": "label", "name": "done"}),
        json!({"op": "load", "name": "sum"}),
        json!({"op": "return", "value": true}),
    ]);
    serde_json::from_value(json!({"name": "sum_loop", "parameters": ["n"], "body": body}))
        .expect("benchmark source")
}

fn run_interpreter_benchmark(source: &ProgramSource, n: i64) -> f64 {
    let program = assemble(source, &Registry::standard()).expect("benchmark assembles");
    Verifier::new().verify(&program).expect("benchmark verifies");
    let interpreter = Interpreter::new(Arc::new(program));

    let start = Instant::now();
    match interpreter.invoke(vec![Value::I64(n)], Vec::new()) {
        Ok(result) => eprintln!("{}", result.unwrap_or(Value::Null)),
        Err(e) => eprintln!("benchmark {} failed: {}", source.name, e),
    }
    start.elapsed().as_secs_f64()
}

fn main() {
    const N: i64 = 1_000_000;
    let mut results = Vec::new();

    let rust_time = time_rust(|| rust_sum_loop(N));
    let interpreted = run_interpreter_benchmark(&sum_loop_source(false), N);
    results.push(BenchmarkResult {
        name: "sum_loop".to_string(),
        interpreter_secs: interpreted,
        rust_time_secs: rust_time,
    });

    let rust_time = time_rust(|| rust_guarded_loop(N));
    let interpreted = run_interpreter_benchmark(&sum_loop_source(true), N);
    results.push(BenchmarkResult {
        name: "guarded_loop".to_string(),
        interpreter_secs: interpreted,
        rust_time_secs: rust_time,
    });

    let output = BenchmarkOutput { results };
    println!("{}", serde_json::to_string_pretty(&output).unwrap());
}
