//! # scriptbridge benchmarks
//!
//! Criterion.rs benchmarks.
//!
//! ## Groups
//! - `load`: application script loading, source vs bytecode
//! - `bridge`: host-to-script call round trips
//!
//! ## Usage
//! ```bash
//! cargo bench          # everything
//! cargo bench load     # loading only
//! ```

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use serde_json::json;

use scriptbridge::bytecode::{BytecodeLoader, ScriptSource};
use scriptbridge::engine::quickjs::QUICKJS_BYTECODE_VERSION;
use scriptbridge::executor::Executor;

const BUNDLE: &str = r#"
    var Store = {
        items: [],
        add: function (name, price) {
            this.items.push({ name: name, price: price });
            return this.items.length;
        },
        total: function () {
            return this.items.reduce(function (sum, item) { return sum + item.price; }, 0);
        }
    };
    function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }
"#;

fn bench_load_source(c: &mut Criterion) {
    c.bench_function("load_source", |b| {
        b.iter_batched(
            || Executor::initialize(false, false).unwrap(),
            |executor| {
                executor
                    .execute_application_script(ScriptSource::from_text(BUNDLE, "bundle.js"))
                    .unwrap();
                executor
            },
            BatchSize::PerIteration,
        )
    });
}

fn bench_load_bytecode(c: &mut Criterion) {
    let bundle = Executor::initialize(false, false)
        .unwrap()
        .compile_bytecode(BUNDLE, "bundle.js")
        .unwrap();
    let source = ScriptSource::new(bundle, "bundle.jsbc");

    c.bench_function("load_bytecode", |b| {
        b.iter_batched(
            || Executor::initialize(false, true).unwrap(),
            |executor| {
                executor.execute_application_script(source.clone()).unwrap();
                executor
            },
            BatchSize::PerIteration,
        )
    });
}

fn bench_plan(c: &mut Criterion) {
    let loader = BytecodeLoader::new(QUICKJS_BYTECODE_VERSION, true);
    let text = BUNDLE.as_bytes();
    c.bench_function("plan_source", |b| b.iter(|| loader.plan(black_box(text))));
}

fn bench_call_round_trip(c: &mut Criterion) {
    let executor = Executor::initialize(false, false).unwrap();
    executor
        .execute_application_script(ScriptSource::from_text(BUNDLE, "bundle.js"))
        .unwrap();

    c.bench_function("call_store_add", |b| {
        b.iter(|| {
            executor
                .call("Store", "add", vec![json!("apple"), json!(3)])
                .unwrap()
                .wait()
                .unwrap()
        })
    });

    executor.bind_global("Math", "fib", "fib");
    c.bench_function("call_fib_20", |b| {
        b.iter(|| {
            executor
                .call("Math", "fib", vec![black_box(json!(20))])
                .unwrap()
                .wait()
                .unwrap()
        })
    });
}

criterion_group!(load, bench_load_source, bench_load_bytecode, bench_plan);

criterion_group!(bridge, bench_call_round_trip);

criterion_main!(load, bridge);
