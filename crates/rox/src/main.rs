//! Command-line driver: interactive prompt, file interpreter, and a small
//! `.lox` test-file enumerator.
//!
//! Exit codes follow sysexits: 64 for usage errors, 65 for compile errors,
//! 70 for runtime errors, 74 for unreadable files.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rox::Vm;

#[derive(Parser)]
#[command(
    name = "rox",
    version,
    about = "Bytecode compiler and VM for the Lox scripting language",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Script to interpret; omit it for an interactive prompt.
    script: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List the .lox files under a directory.
    Test { dir: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit();
        }
        Err(err) => {
            let _ = err.print();
            process::exit(64);
        }
    };

    match cli.command {
        Some(Command::Test { dir }) => list_test_files(&dir),
        None => match cli.script {
            Some(path) => run_file(&path),
            None => repl(),
        },
    }
}

/// Interpret a whole file, printing its output and mapping any error to the
/// conventional exit code.
fn run_file(path: &Path) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read \"{}\": {err}", path.display());
            process::exit(74);
        }
    };

    let mut vm = Vm::new();
    let result = vm.interpret(&source);
    for line in vm.take_output() {
        println!("{line}");
    }
    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(err.exit_code());
    }
}

/// Read-eval-print loop against one persistent machine. Each line is a
/// complete program; globals carry over. A line starting with `q` quits.
fn repl() {
    let mut vm = Vm::new();
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.trim_start().starts_with('q') {
            break;
        }
        let result = vm.interpret(&line);
        for printed in vm.take_output() {
            println!("{printed}");
        }
        if let Err(err) = result {
            eprintln!("{err}");
        }
    }
}

/// Enumerate regular `*.lox` files directly under `dir`, numbered, with a
/// total. Sorted by name so the listing is stable.
fn list_test_files(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            eprintln!("Could not read directory \"{}\": {err}", dir.display());
            process::exit(74);
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".lox"))
        .collect();
    names.sort();

    for (index, name) in names.iter().enumerate() {
        println!("File {:3}: {name}", index + 1);
    }
    println!("Total files: {}", names.len());
}
