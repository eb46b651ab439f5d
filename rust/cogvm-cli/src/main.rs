//! cogvm CLI: assemble programs, run them, and drive persisted executions
//! one cognitive call at a time.

mod colors;
mod config;

use clap::{Parser, Subcommand};
use cogvm_provider_fs::SandboxedFs;
use cogvm_runtime::sandbox::{FileAccessor, NoFileAccess};
use cogvm_runtime::store::{DurableStore, FileStore, MemoryStore};
use cogvm_vm::{Assembler, Compiler, Engine, SessionError, SessionOrchestrator, StepOutcome};
use colors::{cyan, execution_status, gray, green, red, status_label, yellow};
use config::{CogvmConfig, StoreBackend};
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cogvm",
    version,
    about = "A resumable stack VM whose programs pause to ask for decisions"
)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of searching for cogvm.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a program and report diagnostics
    Check {
        #[arg()]
        file: PathBuf,
    },
    /// Run a program to completion, answering prompts from stdin
    Run {
        #[arg()]
        file: PathBuf,

        /// Answer for the next prompt, in order (JSON, or plain text)
        #[arg(long = "answer", short = 'a')]
        answers: Vec<String>,
    },
    /// Compile a program and store it
    Load {
        #[arg()]
        file: PathBuf,

        /// Program id (default: the file stem)
        #[arg(long)]
        id: Option<String>,
    },
    /// Create an execution of a stored program
    Start {
        #[arg()]
        program: String,

        /// Execution id (default: a fresh UUID)
        #[arg(long)]
        id: Option<String>,
    },
    /// Run an execution until it needs an answer or finishes
    Next {
        #[arg()]
        execution: String,
    },
    /// Answer the pending prompt of an execution
    Answer {
        #[arg()]
        execution: String,

        /// The answer (JSON, or plain text)
        #[arg()]
        value: String,
    },
    /// Copy an execution under a new id
    Fork {
        #[arg()]
        execution: String,

        #[arg(long)]
        id: Option<String>,
    },
    /// Delete an execution
    Cancel {
        #[arg()]
        execution: String,
    },
    /// Print the stored state of an execution as JSON
    Inspect {
        #[arg()]
        execution: String,
    },
    /// List stored programs and executions
    List,
    /// Write a default cogvm.toml to the current directory
    Init,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => CogvmConfig::load_from(path),
        None => CogvmConfig::load(),
    }
    .unwrap_or_else(|e| fail(&e));

    match cli.command {
        Commands::Check { file } => cmd_check(&file),
        Commands::Run { file, answers } => cmd_run(&config, &file, answers),
        Commands::Init => cmd_init(),
        command => {
            let session = open_session(&config).unwrap_or_else(|e| fail(&e.to_string()));
            if let Err(e) = dispatch(&session, command) {
                fail(&e.to_string());
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(message: &str) -> ! {
    eprintln!("{} {}", red("error:"), message);
    std::process::exit(1);
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_engine(config: &CogvmConfig) -> Engine {
    let files: Arc<dyn FileAccessor> = if config.sandbox.roots.is_empty() {
        Arc::new(NoFileAccess)
    } else {
        Arc::new(SandboxedFs::new(&config.sandbox.roots).with_writes(config.sandbox.allow_write))
    };
    Engine::new(files).with_options(config.engine_options())
}

fn open_session(config: &CogvmConfig) -> Result<SessionOrchestrator, SessionError> {
    let store: Arc<dyn DurableStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("memory store configured: nothing persists between invocations");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::File if config.store.compress => {
            Arc::new(FileStore::new_compressed(&config.store.dir)?)
        }
        StoreBackend::File => Arc::new(FileStore::new(&config.store.dir)?),
    };
    Ok(SessionOrchestrator::new(store, build_engine(config)))
}

fn read_source(file: &Path) -> String {
    std::fs::read_to_string(file)
        .unwrap_or_else(|e| fail(&format!("cannot read '{}': {}", file.display(), e)))
}

fn program_id(file: &Path) -> String {
    file.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string())
}

/// Answers are JSON when they parse as JSON, otherwise plain text.
fn parse_answer(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

fn report(outcome: &StepOutcome) -> bool {
    match outcome {
        StepOutcome::Completed { result, output } => {
            for line in output {
                println!("{}", line);
            }
            println!("{} {}", status_label("Completed"), gray(&result.to_string()));
            true
        }
        StepOutcome::AwaitingInput { prompt } => {
            println!("{} {}", status_label("Awaiting"), cyan(prompt));
            true
        }
        StepOutcome::Failed { message } => {
            eprintln!("{} {}", red("execution failed:"), message);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_check(file: &Path) {
    let source = read_source(file);
    match Assembler.compile(&source) {
        Ok(program) => println!(
            "{} {} ({} instructions)",
            status_label("Checked"),
            file.display(),
            program.len()
        ),
        Err(errors) => {
            for e in &errors {
                eprintln!("{}:{}: {}", file.display(), e.line, e.message);
            }
            fail(&format!("{} error(s) in {}", errors.len(), file.display()));
        }
    }
}

fn cmd_init() {
    let path = Path::new(config::CONFIG_FILE);
    if path.exists() {
        fail(&format!("{} already exists", path.display()));
    }
    if let Err(e) = std::fs::write(path, CogvmConfig::default_template()) {
        fail(&format!("cannot write {}: {}", path.display(), e));
    }
    println!("{} {}", status_label("Created"), path.display());
}

/// Run in-process against a memory store. Prompts take `--answer` values
/// first, then lines from stdin.
fn cmd_run(config: &CogvmConfig, file: &Path, answers: Vec<String>) {
    let source = read_source(file);
    let session = SessionOrchestrator::new(Arc::new(MemoryStore::new()), build_engine(config));
    let id = program_id(file);
    let run = || -> Result<StepOutcome, SessionError> {
        session.load_program(&id, &source)?;
        session.start_execution(&id, "run")?;
        let mut answers: VecDeque<String> = answers.into();
        let stdin = std::io::stdin();
        let mut outcome = session.get_next("run")?;
        while let StepOutcome::AwaitingInput { prompt } = &outcome {
            let answer = match answers.pop_front() {
                Some(answer) => answer,
                None => {
                    eprint!("{} ", yellow(&format!("{} >", prompt)));
                    std::io::stderr().flush().ok();
                    let mut line = String::new();
                    match stdin.lock().read_line(&mut line) {
                        Ok(0) | Err(_) => fail(&format!("no answer for prompt {:?}", prompt)),
                        Ok(_) => line.trim_end_matches(['\r', '\n']).to_string(),
                    }
                }
            };
            outcome = session.submit_answer("run", &parse_answer(&answer))?;
        }
        Ok(outcome)
    };
    match run() {
        Ok(outcome) => {
            if !report(&outcome) {
                std::process::exit(1);
            }
        }
        Err(SessionError::Compile(errors)) => {
            for e in &errors {
                eprintln!("{}:{}: {}", file.display(), e.line, e.message);
            }
            fail("compilation failed");
        }
        Err(e) => fail(&e.to_string()),
    }
}

fn dispatch(session: &SessionOrchestrator, command: Commands) -> Result<(), SessionError> {
    match command {
        Commands::Load { file, id } => {
            let id = id.unwrap_or_else(|| program_id(&file));
            let program = session.load_program(&id, &read_source(&file))?;
            println!(
                "{} {} {}",
                status_label("Loaded"),
                green(&id),
                gray(&program.source_sha256[..12])
            );
        }
        Commands::Start { program, id } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            session.start_execution(&program, &id)?;
            println!("{} {}", status_label("Started"), id);
        }
        Commands::Next { execution } => {
            if !report(&session.get_next(&execution)?) {
                std::process::exit(1);
            }
        }
        Commands::Answer { execution, value } => {
            if !report(&session.submit_answer(&execution, &parse_answer(&value))?) {
                std::process::exit(1);
            }
        }
        Commands::Fork { execution, id } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            session.fork_execution(&execution, &id)?;
            println!("{} {} -> {}", status_label("Forked"), execution, id);
        }
        Commands::Cancel { execution } => {
            session.cancel_execution(&execution)?;
            println!("{} {}", status_label("Cancelled"), execution);
        }
        Commands::Inspect { execution } => {
            let stored = session.inspect_execution(&execution)?;
            let text = serde_json::to_string_pretty(&stored)
                .map_err(|e| SessionError::Encoding(e.to_string()))?;
            println!("{}", text);
        }
        Commands::List => {
            println!("{}", cyan("programs"));
            for id in session.list_programs()? {
                println!("  {}", id);
            }
            println!("{}", cyan("executions"));
            for id in session.list_executions()? {
                let status = session.inspect_execution(&id)?.status();
                println!("  {} {}", id, execution_status(status));
            }
        }
        Commands::Check { .. } | Commands::Run { .. } | Commands::Init => {}
    }
    Ok(())
}
