//! Bytecode fast path and source fallback

use serde_json::json;

use scriptbridge::bytecode::{FallbackReason, LoadedScript, ScriptSource, HEADER_LEN};
use scriptbridge::errors::BridgeError;
use scriptbridge::executor::Executor;

const MODULE_BUNDLE: &str = "globalThis.Shop = { total: function (a, b) { return a * b; } };";

fn compile(source: &str) -> Vec<u8> {
    Executor::initialize(false, false)
        .unwrap()
        .compile_bytecode(source, "shop.js")
        .unwrap()
}

#[test]
fn test_bytecode_loads_on_fresh_executor() {
    let bundle = compile(MODULE_BUNDLE);
    assert_eq!(&bundle[..4], b"JSBC");
    assert!(bundle.len() > HEADER_LEN);

    let executor = Executor::initialize(false, true).unwrap();
    let loaded = executor
        .execute_application_script(ScriptSource::new(bundle, "shop.jsbc"))
        .unwrap();
    assert!(loaded.is_bytecode());
    assert_eq!(
        executor.call("Shop", "total", vec![json!(6), json!(7)]).unwrap().wait(),
        Ok(json!(42))
    );
}

#[test]
fn test_source_with_bytecode_enabled() {
    let executor = Executor::initialize(false, true).unwrap();
    let loaded = executor
        .execute_application_script(ScriptSource::from_text(MODULE_BUNDLE, "shop.js"))
        .unwrap();
    assert_eq!(
        loaded,
        LoadedScript::Source {
            fallback: FallbackReason::NoMagic
        }
    );
}

#[test]
fn test_version_mismatch_falls_back_and_fails() {
    let mut bundle = compile(MODULE_BUNDLE);
    bundle[4..8].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

    let executor = Executor::initialize(false, true).unwrap();
    let err = executor
        .execute_application_script(ScriptSource::new(bundle, "stale.jsbc"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Script(_)));
    assert!(executor.is_valid());
}

#[test]
fn test_bytecode_disabled_treats_bundle_as_source() {
    let bundle = compile(MODULE_BUNDLE);
    let executor = Executor::initialize(false, false).unwrap();
    let result = executor.execute_application_script(ScriptSource::new(bundle, "shop.jsbc"));
    assert!(matches!(result, Err(BridgeError::Script(_))));
}

#[test]
fn test_custom_runtime_loads_bytecode() {
    let bundle = compile(MODULE_BUNDLE);
    let executor = Executor::initialize(true, true).unwrap();
    assert!(executor.use_custom_runtime());
    let loaded = executor
        .execute_application_script(ScriptSource::new(bundle, "shop.jsbc"))
        .unwrap();
    assert!(loaded.is_bytecode());
}
