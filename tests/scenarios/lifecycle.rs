//! Executor lifecycle across threads

use std::sync::Arc;
use std::thread;

use serde_json::json;

use scriptbridge::bytecode::ScriptSource;
use scriptbridge::errors::BridgeError;
use scriptbridge::executor::{ContextProvider, Executor, ExecutorState};

#[test]
fn test_provider_prewarms_for_another_thread() {
    let provider = Arc::new(ContextProvider::new(false, true).unwrap());

    let remote = provider.clone();
    let result = thread::spawn(move || {
        let executor = Executor::from_provider(&remote).unwrap();
        executor
            .execute_application_script(ScriptSource::from_text(
                "var Ping = { pong: function () { return 'pong'; } };",
                "ping.js",
            ))
            .unwrap();
        executor.call("Ping", "pong", vec![]).unwrap().wait()
    })
    .join()
    .unwrap();

    assert_eq!(result, Ok(json!("pong")));
    assert_eq!(
        Executor::from_provider(&provider).unwrap_err(),
        BridgeError::AlreadyConsumed
    );
}

#[test]
fn test_teardown_then_reject() {
    let executor = Executor::initialize(false, false).unwrap();
    assert_eq!(executor.state(), ExecutorState::Ready);
    executor.teardown();
    executor.teardown();
    assert_eq!(executor.state(), ExecutorState::TornDown);

    let err = executor.call("Any", "thing", vec![]).unwrap_err();
    assert!(err.is_misuse());
}

#[test]
fn test_drop_from_other_thread() {
    let executor = Executor::initialize(false, false).unwrap();
    thread::spawn(move || drop(executor)).join().unwrap();
}
