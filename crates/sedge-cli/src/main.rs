use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sedge_lang::{Engine, Error, Value};
use tracing_subscriber::EnvFilter;

/// Evaluate a Sedge script file.
#[derive(Parser)]
#[command(name = "sedge", version, about)]
struct Args {
    /// Script file to evaluate.
    script: PathBuf,

    /// Named syntax descriptor ("sedge" or "basic", plus anything the
    /// script's own `%%syntax` directive selects).
    #[arg(long)]
    syntax: Option<String>,

    /// Log engine internals.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let mut engine = Engine::new();
    let result = match &args.syntax {
        Some(name) => std::fs::read_to_string(&args.script)
            .map_err(Error::from)
            .and_then(|src| engine.eval_with_syntax(name, &src)),
        None => engine.eval_file(&args.script),
    };

    match result {
        Ok(Value::Empty) => ExitCode::SUCCESS,
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
