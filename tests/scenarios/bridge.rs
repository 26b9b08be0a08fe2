//! Host-to-script calls through the public API

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use serde_json::json;

use scriptbridge::bridge::Handler;
use scriptbridge::bytecode::ScriptSource;
use scriptbridge::errors::BridgeError;
use scriptbridge::executor::Executor;

const BUNDLE: &str = r#"
    function add(a, b) { return a + b; }
    var Greeter = {
        prefix: "Hello, ",
        greet: function (name) { return this.prefix + name; },
        explode: function () { throw new RangeError("too far"); }
    };
"#;

fn ready() -> Executor {
    let executor = Executor::initialize(false, false).unwrap();
    executor
        .execute_application_script(ScriptSource::from_text(BUNDLE, "bundle.js"))
        .unwrap();
    executor
}

#[test]
fn test_math_add_through_binding() {
    let executor = ready();
    executor.bind_global("Math", "add", "add");

    let (tx, rx) = channel::bounded(1);
    executor
        .call_function_on_module("Math", "add", vec![json!(2), json!(3)], move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result, Ok(json!(5)));
}

#[test]
fn test_method_sees_its_module_as_this() {
    let executor = ready();
    let result = executor
        .call("Greeter", "greet", vec![json!("Ada")])
        .unwrap()
        .wait();
    assert_eq!(result, Ok(json!("Hello, Ada")));
}

#[test]
fn test_unknown_module_is_not_found() {
    let executor = ready();
    match executor.call("Ghost", "method", vec![]).unwrap().wait() {
        Err(BridgeError::NotFound { module, method }) => {
            assert_eq!(module, "Ghost");
            assert_eq!(method, "method");
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[test]
fn test_thrown_error_reaches_callback() {
    let executor = ready();
    let err = executor
        .call("Greeter", "explode", vec![])
        .unwrap()
        .wait()
        .unwrap_err();
    assert_eq!(err.message(), "RangeError: too far");
    assert!(err.diagnostic().is_some());

    // The context keeps working after a failed call.
    let ok = executor.call("Greeter", "greet", vec![json!("again")]).unwrap().wait();
    assert_eq!(ok, Ok(json!("Hello, again")));
}

#[test]
fn test_host_handler_mixes_with_script() {
    let executor = ready();
    executor.register_handler(
        "Host",
        "version",
        Handler::native(|_| Ok(json!(scriptbridge::VERSION))),
    );
    let result = executor.call("Host", "version", vec![]).unwrap().wait();
    assert_eq!(result, Ok(json!(env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_concurrent_callers_each_get_their_result() {
    let executor = Arc::new(ready());
    executor.bind_global("Math", "add", "add");

    let workers: Vec<_> = (0..16)
        .map(|i| {
            let executor = executor.clone();
            thread::spawn(move || {
                (0..10)
                    .map(|j| {
                        executor
                            .call("Math", "add", vec![json!(i), json!(j)])
                            .unwrap()
                            .wait()
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for (i, worker) in workers.into_iter().enumerate() {
        let expected: Vec<_> = (0..10).map(|j| json!(i as i64 + j)).collect();
        assert_eq!(worker.join().unwrap(), expected);
    }
}
