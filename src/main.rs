// src/main.rs
//
// =============================================================================
// TINIFLOW: CLI ENTRY POINT
// =============================================================================
//
// Three subcommands:
// 1. TRANSPILE: Reads a `.tf` source file, writes the generated Rust
//    program that would rebuild and run the same workflow.
// 2. CHECK:     Parses and builds the workflow graph without running it;
//    reports shebang/grammar/classification errors.
// 3. RUN:       Parses, builds, and executes the workflow graph for real.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tiniflow::dsl::transpile::RenderOptions;
use tiniflow::dsl::{interpret, transpile};

#[derive(Parser)]
#[command(name = "tiniflow", version, about = "A tiny DSL that transpiles to a graph of shell commands wired by pipes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit the Rust program that rebuilds and runs this workflow.
    Transpile {
        /// Path to a `.tf` source file.
        file: PathBuf,

        /// Suppress the prologue import/setup line(s).
        #[arg(long)]
        disable_prologue: bool,

        /// Suppress the epilogue that invokes the workflow runner.
        #[arg(long)]
        disable_epilogue: bool,

        /// Write the generated source here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse and build the workflow graph without running it.
    Check {
        /// Path to a `.tf` source file.
        file: PathBuf,
    },

    /// Parse, build, and execute the workflow graph.
    Run {
        /// Path to a `.tf` source file.
        file: PathBuf,

        /// Suppress the prologue a `transpile` of this file would carry
        /// (has no runtime effect on `run`; accepted for symmetry with
        /// `transpile`).
        #[arg(long)]
        disable_prologue: bool,

        /// Suppress the epilogue a `transpile` of this file would carry
        /// (has no runtime effect on `run`; accepted for symmetry with
        /// `transpile`).
        #[arg(long)]
        disable_epilogue: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Transpile { file, disable_prologue, disable_epilogue, output } => {
            run_transpile(file, disable_prologue, disable_epilogue, output)
        }
        Commands::Check { file } => run_check(file),
        Commands::Run { file, .. } => run_run(file),
    }
}

fn run_transpile(file: PathBuf, disable_prologue: bool, disable_epilogue: bool, output: Option<PathBuf>) -> Result<()> {
    let source = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let filename = file.display().to_string();
    let opts = RenderOptions { disable_prologue, disable_epilogue };
    let rendered = transpile::render(&source, &filename, &opts).with_context(|| format!("transpiling {}", file.display()))?;

    match output {
        Some(path) => {
            fs::write(&path, rendered).with_context(|| format!("writing {}", path.display()))?;
            log::info!("wrote generated program to {}", path.display());
        }
        None => {
            std::io::stdout().write_all(rendered.as_bytes())?;
        }
    }
    Ok(())
}

fn run_check(file: PathBuf) -> Result<()> {
    let source = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let filename = file.display().to_string();
    let group = interpret::execute(&source).with_context(|| format!("checking {}", file.display()))?;
    log::info!("{}: {} workflow(s) parsed successfully", filename, group.workflow_count());
    Ok(())
}

/// Builds the graph with `dsl::interpret` (the graph's `Rc<RefCell<_>>`
/// handles are not `Send`, so it must be built and run on this thread) and
/// runs it to completion. A background thread carries a minimal
/// single-threaded runtime solely to await `Ctrl-C`; it touches none of the
/// graph's non-`Send` state, only logs and exits the process, mirroring the
/// terminal's own default of delivering `SIGINT` to every process in the
/// foreground group (this executor's children included).
fn run_run(file: PathBuf) -> Result<()> {
    spawn_ctrl_c_watcher();

    let source = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let filename = file.display().to_string();
    let group = interpret::execute(&source).with_context(|| format!("building workflow from {}", file.display()))?;

    group.run(&filename).map_err(anyhow::Error::from)
}

fn spawn_ctrl_c_watcher() {
    std::thread::spawn(|| {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                log::warn!("could not install Ctrl-C watcher: {e}");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted; terminating");
                std::process::exit(130);
            }
        });
    });
}
