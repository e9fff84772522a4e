//! End-to-end runs of the `rsplc` binary.

use std::path::PathBuf;
use std::process::Command;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rsplc-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn rsplc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rsplc"))
}

#[test]
fn writes_assembly_next_to_source() {
    let dir = scratch_dir("write");
    let src = dir.join("noop.rspl");
    std::fs::write(&src, "include \"rsp_queue.inc\";\ncommand<0> Noop() { }\n").unwrap();

    let status = rsplc().arg(&src).arg("--no-color").status().unwrap();
    assert!(status.success());
    let asm = std::fs::read_to_string(dir.join("noop.S")).unwrap();
    assert!(asm.contains("RSPQ_DefineCommand Noop, 4"));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn includes_and_defines_resolve_from_source_dir() {
    let dir = scratch_dir("include");
    std::fs::write(dir.join("consts.h"), "#define IDX 1\n").unwrap();
    std::fs::write(dir.join("rspl.toml"), "[compile]\ndispatch_wrapper = true\n\n[defines]\nNAME = \"CmdOne\"\n").unwrap();
    let src = dir.join("main.rspl");
    std::fs::write(&src, "#include \"consts.h\"\ninclude \"rsp_queue.inc\";\ncommand<IDX> NAME() { }\n").unwrap();

    let output = rsplc().arg(&src).arg("--stdout").arg("--no-color").output().unwrap();
    assert!(output.status.success());
    let asm = String::from_utf8(output.stdout).unwrap();
    assert!(asm.contains("RSPQ_DefineCommand CmdOne, 4"));
    assert!(asm.contains("## Warning: unused command index 0"));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("warning[W0001]"));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn errors_exit_with_failure() {
    let dir = scratch_dir("error");
    let src = dir.join("bad.rspl");
    std::fs::write(&src, "function f() {\n  u32<$t0> a;\n  a = b;\n}\n").unwrap();

    let output = rsplc().arg(&src).arg("--no-color").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error[E0100]"));
    assert!(stderr.contains("bad.rspl:3"));
    assert!(!dir.join("bad.S").exists());

    std::fs::remove_dir_all(&dir).unwrap();
}
