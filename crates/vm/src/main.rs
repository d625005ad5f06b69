//! `ember` — the command-line entry point described in spec §6. Zero args
//! start a line-oriented REPL, one path arg reads and runs a script, and
//! anything else is a usage error. This file is a thin presentation layer
//! over `ember_vm::Vm`: it owns stdin/stdout/exit codes, nothing else.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;

use ember_vm::{InterpretResult, Vm, VmConfig};

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => repl(),
        [path] => run_file(path),
        _ => {
            eprintln!("Usage: ember [path]");
            ExitCode::from(64)
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("EMBER_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_config(script_dir: Option<&Path>) -> VmConfig {
    let toml_path = script_dir.map(|dir| dir.join("ember.toml")).filter(|p| p.exists());
    match toml_path {
        Some(path) => VmConfig::default().merge_toml_file(&path),
        None => VmConfig::from_env(),
    }
}

fn repl() -> ExitCode {
    let mut vm = Vm::new(load_config(None));
    let stdin = io::stdin();
    let mut out = io::stdout();
    loop {
        print!("> ");
        if out.flush().is_err() {
            return ExitCode::from(70);
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return ExitCode::SUCCESS;
            }
            Ok(_) => report(vm.interpret(&line)),
            Err(err) => {
                eprintln!("Error reading stdin: {err}");
                return ExitCode::from(74);
            }
        }
    }
}

fn run_file(path: &str) -> ExitCode {
    let path = Path::new(path);
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {err}", path.display());
            return ExitCode::from(74);
        }
    };
    let mut vm = Vm::new(load_config(path.parent()));
    match vm.interpret(&source) {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError(errors) => {
            for error in &errors {
                eprintln!("{error}");
            }
            ExitCode::from(65)
        }
        InterpretResult::RuntimeError(error) => {
            eprintln!("{error}");
            ExitCode::from(70)
        }
    }
}

/// Prints a REPL line's result to stderr but never exits the process —
/// a bad line in the REPL just surfaces its error and waits for the next one.
fn report(result: InterpretResult) {
    match result {
        InterpretResult::Ok => {}
        InterpretResult::CompileError(errors) => {
            for error in &errors {
                eprintln!("{error}");
            }
        }
        InterpretResult::RuntimeError(error) => eprintln!("{error}"),
    }
}
