use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;

use loxcraft::diagnostics::exit_code;

/// A tree-walking interpreter and bytecode virtual machine for the Lox
/// programming language.
#[derive(ClapParser)]
#[command(name = "loxcraft", version)]
struct Args {
    /// Source file to run. Omit to start an interactive session.
    ///
    /// More than one path is a usage error, not a batch run: Lox has
    /// no notion of running several files in one session.
    paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .init();

    let args = Args::parse();
    let result = match args.paths.as_slice() {
        [] => loxcraft::run_prompt(),
        [path] => loxcraft::run_file(path),
        _ => {
            eprintln!("Usage: loxcraft [path]");
            Err(exit_code::USAGE)
        }
    };

    match result {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(code) => ExitCode::from(code as u8),
    }
}
