//! Black-box tests for the `rox` binary: exit codes, script output, the
//! interactive prompt, and the `.lox` test-file enumerator.

use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};

fn rox() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rox"))
}

#[test]
fn runs_a_script_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.lox");
    fs::write(&path, "print \"hi\" + \" there\";\n").unwrap();

    let output = rox().arg(&path).output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hi there\n");
}

#[test]
fn compile_errors_exit_65() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.lox");
    fs::write(&path, "var;\n").unwrap();

    let output = rox().arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(65));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Expect variable name."));
}

#[test]
fn runtime_errors_exit_70_with_a_trace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boom.lox");
    fs::write(&path, "print missing;\n").unwrap();

    let output = rox().arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(70));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Undefined variable 'missing'."));
    assert!(stderr.contains("[line 1] in script"));
}

#[test]
fn unreadable_files_exit_74() {
    let output = rox().arg("definitely/not/a/real/file.lox").output().unwrap();
    assert_eq!(output.status.code(), Some(74));
}

#[test]
fn output_before_a_runtime_error_is_still_printed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.lox");
    fs::write(&path, "print \"before\";\nprint missing;\n").unwrap();

    let output = rox().arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(70));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "before\n");
}

#[test]
fn repl_interprets_lines_until_q() {
    let mut child = rox()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"var x = 20;\nprint x + 1;\nquit\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("21"));
}

#[test]
fn repl_survives_errors() {
    let mut child = rox()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"print missing;\nprint \"ok\";\nq\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("ok"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Undefined variable 'missing'."));
}

#[test]
fn test_subcommand_enumerates_lox_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("alpha.lox"), "print 1;").unwrap();
    fs::write(dir.path().join("beta.lox"), "print 2;").unwrap();
    fs::write(dir.path().join("notes.txt"), "not a test").unwrap();
    fs::create_dir(dir.path().join("nested.lox")).unwrap();

    let output = rox().arg("test").arg(dir.path()).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout,
        "File   1: alpha.lox\nFile   2: beta.lox\nTotal files: 2\n"
    );
}

#[test]
fn usage_errors_exit_64() {
    let output = rox().arg("--no-such-flag").output().unwrap();
    assert_eq!(output.status.code(), Some(64));
}
