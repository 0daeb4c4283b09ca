//! The `eikobot` command line.

mod package;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eiko_compiler::{Compiler, Error as CompileError, ExtensionRegistry};
use eiko_runtime::{Deployer, HandlerRegistry};

#[derive(Parser, Debug)]
#[command(name = "eikobot")]
#[command(about = "Desired-state infrastructure orchestration with the Eiko language")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a model and report the result.
    Compile {
        /// Entry point .eiko file.
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Print the compiled model as JSON.
        #[arg(long)]
        output_model: bool,
        /// Show host backtraces for plugin failures.
        #[arg(long)]
        enable_plugin_stacktrace: bool,
    },
    /// Compile and deploy a model.
    Deploy {
        /// Entry point .eiko file.
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Only read current state; never create or update.
        #[arg(long)]
        dry_run: bool,
        /// Verbose logging.
        #[arg(long)]
        debug: bool,
    },
    /// Project management.
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
    /// Package management.
    Package {
        #[command(subcommand)]
        command: PackageCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    /// Create an eiko.toml in the current directory.
    Init,
}

#[derive(Subcommand, Debug)]
enum PackageCommand {
    /// Install a package: `GH://owner/name`, a local path, or `.`.
    Install {
        /// Package spec; defaults to the requirements in eiko.toml.
        spec: Option<String>,
        /// Editable install: link instead of copy.
        #[arg(short = 'e', long = "editable")]
        editable: bool,
    },
    /// Release the current package on GitHub (tags v<version>).
    Release {
        /// Release target; only `github` is supported.
        target: String,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Compile {
            file,
            output_model,
            enable_plugin_stacktrace,
        } => {
            init_tracing(false);
            run_compile(&file, output_model, enable_plugin_stacktrace)
        }
        Command::Deploy {
            file,
            dry_run,
            debug,
        } => {
            init_tracing(debug);
            run_deploy(&file, dry_run).await
        }
        Command::Project {
            command: ProjectCommand::Init,
        } => {
            init_tracing(false);
            package::project_init()
        }
        Command::Package { command } => {
            init_tracing(false);
            match command {
                PackageCommand::Install { spec, editable } => {
                    package::install(spec.as_deref(), editable).await
                }
                PackageCommand::Release { target } => package::release(&target).await,
            }
        }
    }
}

fn compile(
    file: &Path,
    plugin_stacktrace: bool,
) -> Result<eiko_compiler::Compilation, ExitCode> {
    let mut compiler = Compiler::new(ExtensionRegistry::new());
    compiler.set_plugin_stacktrace(plugin_stacktrace);
    compiler.compile_file(file).map_err(|failure| {
        eprintln!("{}", failure.render());
        for err in &failure.errors {
            if let CompileError::PluginInternal {
                trace: Some(trace), ..
            } = err
            {
                eprintln!("plugin backtrace:\n{trace}");
            }
        }
        ExitCode::FAILURE
    })
}

fn run_compile(file: &Path, output_model: bool, plugin_stacktrace: bool) -> ExitCode {
    let compilation = match compile(file, plugin_stacktrace) {
        Ok(c) => c,
        Err(code) => return code,
    };
    info!(
        resources = compilation.resources.len(),
        "compiled successfully"
    );
    if output_model {
        match serde_json::to_string_pretty(&compilation.model_json()) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("failed to serialize model: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

async fn run_deploy(file: &Path, dry_run_flag: bool) -> ExitCode {
    let compilation = match compile(file, false) {
        Ok(c) => c,
        Err(code) => return code,
    };

    // Handlers come from host extensions; an embedding binary registers
    // its own. The stock CLI starts with an empty registry.
    let handlers = HandlerRegistry::new();
    let graph = match eiko_runtime::export(&compilation, &handlers) {
        Ok(graph) => graph,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let dry_run = dry_run_flag || compilation.settings.dry_run;
    let deployer = Deployer::new()
        .with_dry_run(dry_run)
        .with_command_timeout(Duration::from_secs(compilation.settings.ssh_timeout));

    let report = deployer.deploy(&graph).await;
    for (task_id, result) in &report.results {
        info!(task = %task_id, state = ?result.state, "task finished");
    }
    if report.success() {
        info!("deploy succeeded");
        ExitCode::SUCCESS
    } else {
        if let Some(err) = report.first_error() {
            error!("{err}");
        }
        error!("deploy failed");
        ExitCode::FAILURE
    }
}
