//! Exercises the `ember` binary's file-mode CLI surface (spec §6): reading
//! a script from a path argument and exiting with the documented codes.

use std::io::Write;
use std::process::Command;

fn ember_bin() -> &'static str {
    env!("CARGO_BIN_EXE_ember")
}

#[test]
fn running_a_script_file_prints_its_output_and_exits_zero() {
    let mut file = tempfile::Builder::new().suffix(".em").tempfile().unwrap();
    writeln!(file, "print 1 + 2 * 3;").unwrap();

    let output = Command::new(ember_bin()).arg(file.path()).output().unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "7\n");
}

#[test]
fn a_runtime_error_exits_70() {
    let mut file = tempfile::Builder::new().suffix(".em").tempfile().unwrap();
    writeln!(file, "print -\"x\";").unwrap();

    let output = Command::new(ember_bin()).arg(file.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(70));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Operand must be a number."));
}

#[test]
fn a_compile_error_exits_65() {
    let mut file = tempfile::Builder::new().suffix(".em").tempfile().unwrap();
    writeln!(file, "{{ var a; var a; }}").unwrap();

    let output = Command::new(ember_bin()).arg(file.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(65));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Already a variable"));
}

#[test]
fn too_many_arguments_exits_64() {
    let output = Command::new(ember_bin()).arg("one").arg("two").output().unwrap();

    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn a_missing_file_exits_74() {
    let output = Command::new(ember_bin()).arg("/nonexistent/path/to/script.em").output().unwrap();

    assert_eq!(output.status.code(), Some(74));
}
