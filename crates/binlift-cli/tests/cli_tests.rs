use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const FIXTURE: &str = "tests/fixtures/program.json";

fn binlift() -> Command {
    Command::cargo_bin("binlift").unwrap()
}

#[test]
fn test_lift_prints_text_ir() {
    binlift()
        .args(["lift", FIXTURE, "--no-color"])
        .assert()
        .success()
        .stdout(predicate::str::contains("; module program (x86_64-linux"))
        .stdout(predicate::str::contains("global @g_counter:"))
        .stdout(predicate::str::contains("entry(@sub_1000)"))
        .stdout(predicate::str::contains("constructors = [@__binlift_init]"));
}

#[test]
fn test_lift_legacy_mode_with_annotations() {
    binlift()
        .args([
            "lift",
            FIXTURE,
            "--no-color",
            "--legacy-mode",
            "--pc-annotation",
            "pc",
            "--pcs",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Legacy dialect"))
        .stdout(predicate::str::contains("annotations under !pc"))
        .stdout(predicate::str::contains("read_reg").not())
        .stdout(predicate::str::contains("; pc 0x1000"));
}

#[test]
fn test_lift_writes_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("program.ir.json");

    binlift()
        .args(["lift", FIXTURE, "--format", "json", "-o"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("SUCCESS:"));

    let module = binlift_core::ir_persist::load_module(&out).unwrap();
    assert!(module.get_function("compute").is_some());
    assert!(module.get_global_variable("g_counter").is_some());
    module.verify().unwrap();
}

#[test]
fn test_lift_object_requires_output() {
    binlift()
        .args(["lift", FIXTURE, "--format", "object"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("object output needs --output"));
}

#[test]
fn test_lift_writes_object_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("program.o");

    binlift()
        .args(["lift", FIXTURE, "--format", "object", "-o"])
        .arg(&out)
        .assert()
        .success();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(&bytes[..4], b"\x7fELF");
}

#[test]
fn test_validate_accepts_fixture() {
    binlift()
        .args(["validate", FIXTURE, "-v"])
        .assert()
        .success()
        .stdout(predicate::str::contains("VALID"))
        .stdout(predicate::str::contains("2 functions, 1 variables, 1 segments"));
}

#[test]
fn test_validate_rejects_ambiguous_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ambiguous.json");
    fs::write(
        &path,
        r#"{
            "name": "ambiguous",
            "arch": "x86_64",
            "functions": [ { "ea": "0x2000", "name": "f", "exported": true } ],
            "variables": [ { "ea": "0x2000", "name": "v", "size": 8, "exported": true } ],
            "segments": [ { "ea": "0x2000", "name": ".data", "data": "0000000000000000" } ]
        }"#,
    )
    .unwrap();

    binlift()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("exported both as a function and as a variable"));
}

#[test]
fn test_missing_input_fails() {
    binlift()
        .args(["lift", "does/not/exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}

#[test]
fn test_inspect_lists_entities() {
    binlift()
        .args(["inspect", FIXTURE])
        .assert()
        .success()
        .stdout(predicate::str::contains("0x1000 compute [exported]"))
        .stdout(predicate::str::contains("0x9000 puts(1 args)"))
        .stdout(predicate::str::contains("0x2000 g_counter (8 bytes) [exported]"))
        .stdout(predicate::str::contains("SHA-256:"));
}
