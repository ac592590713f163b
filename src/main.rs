use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use lightvm::compiler::{self, ProgramSource, Registry};
use lightvm::config::RuntimeConfig;
use lightvm::vm::{Interpreter, Program, Value, Verifier};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lightvm")]
#[command(about = "A stack-machine interpreter for lowered expression trees", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble, verify, and run a JSON program
    Run {
        /// The program file
        file: PathBuf,

        /// Arguments, each parsed as a JSON value
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Runtime configuration file (TOML)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Abort after this many instructions
        #[arg(long)]
        budget: Option<u64>,

        /// Log every executed instruction
        #[arg(long)]
        trace: bool,
    },
    /// Assemble and verify a program without running it
    Check {
        file: PathBuf,
    },
    /// Print the assembled instructions
    Dump {
        file: PathBuf,
    },
}

fn init_tracing(trace: bool) {
    let default = if trace { "lightvm=trace" } else { "warn" };
    let filter = EnvFilter::try_from_env("LIGHTVM_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_program(path: &Path, config: &RuntimeConfig) -> Result<Program, String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("error: failed to read '{}': {}", path.display(), e))?;
    let source = ProgramSource::from_json(&source)
        .map_err(|e| format!("error: {}: {}", path.display(), e))?;
    let program = compiler::assemble(&source, &Registry::standard())
        .map_err(|e| format!("error: {}: {}", path.display(), e))?;
    let verifier = Verifier {
        max_stack_depth: config.max_stack_depth,
    };
    verifier
        .verify(&program)
        .map_err(|e| format!("error: {}: {}", path.display(), e))?;
    Ok(program)
}

fn parse_args(args: &[String]) -> Result<Vec<Value>, String> {
    args.iter()
        .map(|arg| {
            let json: serde_json::Value = serde_json::from_str(arg)
                .unwrap_or_else(|_| serde_json::Value::String(arg.clone()));
            compiler::json_value(&json).map_err(|e| format!("error: argument '{}': {}", arg, e))
        })
        .collect()
}

fn run(
    file: &Path,
    args: &[String],
    config_path: Option<&Path>,
    budget: Option<u64>,
    trace: bool,
) -> Result<(), String> {
    let mut config = match config_path {
        Some(path) => RuntimeConfig::load(path).map_err(|e| format!("error: {}", e))?,
        None => RuntimeConfig::default(),
    };
    if budget.is_some() {
        config.instruction_budget = budget;
    }
    config.trace_execution |= trace;

    let program = Arc::new(load_program(file, &config)?);
    let args = parse_args(args)?;
    let interpreter = Interpreter::with_config(program, config);
    match interpreter.invoke(args, Vec::new()) {
        Ok(Some(value)) => {
            println!("{}", value);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(error) => {
            let mut message = format!("error: {}", error);
            for frame in error.trace() {
                message.push_str(&format!("\n    {}", frame));
            }
            Err(message)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            args,
            config,
            budget,
            trace,
        } => {
            init_tracing(trace);
            run(&file, &args, config.as_deref(), budget, trace)
        }
        Commands::Check { file } => {
            init_tracing(false);
            load_program(&file, &RuntimeConfig::default()).map(|program| {
                println!(
                    "{}: ok ({} instructions, max stack depth {})",
                    program.name(),
                    program.len(),
                    program.max_stack_depth()
                );
            })
        }
        Commands::Dump { file } => {
            init_tracing(false);
            load_program(&file, &RuntimeConfig::default()).map(|program| print!("{}", program))
        }
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
