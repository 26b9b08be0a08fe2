//! Command-line interface

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn scriptbridge(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_scriptbridge"))
        .args(args)
        .env_remove("SCRIPTBRIDGE_TRY_BYTECODE")
        .env_remove("SCRIPTBRIDGE_CUSTOM_RUNTIME")
        .env("XDG_CONFIG_HOME", std::env::temp_dir().join("scriptbridge-cli-tests"))
        .output()
        .expect("failed to spawn scriptbridge")
}

fn write_bundle(dir: &Path) -> String {
    let path = dir.join("calc.js");
    fs::write(
        &path,
        "globalThis.Calc = { mul: function (a, b) { return a * b; } };",
    )
    .unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_version() {
    let output = scriptbridge(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_and_call() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path());
    let output = scriptbridge(&["run", &bundle, "--call", "Calc.mul", "--args", "[6, 7]"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");
}

#[test]
fn test_compile_inspect_and_run_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path());
    let compiled = dir.path().join("calc.jsbc");
    let compiled = compiled.to_string_lossy().into_owned();

    let output = scriptbridge(&["compile", &bundle, "-o", &compiled]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let output = scriptbridge(&["inspect", &compiled]);
    assert!(output.status.success());
    let report = String::from_utf8_lossy(&output.stdout);
    assert!(report.contains("magic:           0x4a534243"));
    assert!(report.contains("load path:       bytecode"));

    let output = scriptbridge(&[
        "run",
        &compiled,
        "--bytecode",
        "--call",
        "Calc.mul",
        "--args",
        "[3, 5]",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "15");
}

#[test]
fn test_damaged_bundle_is_not_loaded_as_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path());
    let compiled = dir.path().join("calc.jsbc");
    let compiled_arg = compiled.to_string_lossy().into_owned();
    assert!(scriptbridge(&["compile", &bundle, "-o", &compiled_arg]).status.success());

    let mut bytes = fs::read(&compiled).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&compiled, &bytes).unwrap();

    let output = scriptbridge(&["inspect", &compiled_arg]);
    assert!(output.status.success());
    let report = String::from_utf8_lossy(&output.stdout);
    assert!(report.contains("payload sha256:  "));
    assert!(report.contains("load path:       source (bytecode payload checksum mismatch)"));

    let output = scriptbridge(&["run", &compiled_arg, "--bytecode"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn test_inspect_plain_source() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path());
    let output = scriptbridge(&["inspect", &bundle]);
    assert!(output.status.success());
    let report = String::from_utf8_lossy(&output.stdout);
    assert!(report.contains("header:          none"));
    assert!(report.contains("load path:       source"));
}

#[test]
fn test_config_file_enables_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path());
    let compiled = dir.path().join("calc.jsbc");
    let compiled = compiled.to_string_lossy().into_owned();
    assert!(scriptbridge(&["compile", &bundle, "-o", &compiled]).status.success());

    let config = dir.path().join("config.toml");
    fs::write(&config, "[engine]\ntry_bytecode = true\n").unwrap();
    let config = config.to_string_lossy().into_owned();

    let output = scriptbridge(&[
        "run",
        &compiled,
        "--config",
        &config,
        "--call",
        "Calc.mul",
        "--args",
        "[2, 2]",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "4");
}

#[test]
fn test_missing_function_fails() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path());
    let output = scriptbridge(&["run", &bundle, "--call", "Ghost.walk"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Not found: Ghost.walk"), "{}", stderr);
}

#[test]
fn test_bad_call_target() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path());
    let output = scriptbridge(&["run", &bundle, "--call", "nodot"]);
    assert!(!output.status.success());
}
