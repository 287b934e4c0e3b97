//! vmstack CLI entrypoint.
//!
//! This is the main entrypoint for the vmstack command-line tool.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use vmstack::adapters::{http, queue};
use vmstack::cli::{Cli, Commands, OutputFormatter};
use vmstack::config::{Intent, RequestParser, Settings};
use vmstack::engine::{Engine, LocalEngine, PluginRegistry, StackKey};
use vmstack::error::{Result, StackError};
use vmstack::identity::{self, Clock, SystemClock};
use vmstack::linode::LinodeProvider;
use vmstack::orchestrator::{CancelHandle, Orchestrator, cancel_pair};

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// Logs go to stderr so stdout carries only command output.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);

    Settings::load_dotenv(None)?;
    let mut settings = Settings::from_env()?;
    if let Some(workspace) = cli.workspace {
        settings.workspace_dir = workspace;
    }
    debug!("Workspace: {}", settings.workspace_dir.display());

    match cli.command {
        Commands::Up { request } => cmd_run(settings, &request, Intent::Create, &formatter).await,
        Commands::Destroy { request } => {
            cmd_run(settings, &request, Intent::Destroy, &formatter).await
        }
        Commands::StackName { identity, os, date } => {
            let date = date.unwrap_or_else(|| SystemClock.today());
            let name = identity::stack_name_on(&identity, &os, date);
            print!("{}", formatter.format_stack_name(&name));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                settings.listen_addr = listen;
            }
            cmd_serve(settings).await
        }
        Commands::Queue => cmd_queue(settings).await,
        Commands::Show { stack, project } => cmd_show(&settings, stack, project, &formatter).await,
        Commands::Plugins => cmd_plugins(&settings, &formatter).await,
    }
}

/// Builds the engine with the Linode provider registered.
fn build_engine(settings: &Settings) -> Result<LocalEngine> {
    let provider = LinodeProvider::new().map_err(|e| StackError::internal(e.to_string()))?;
    let registry = PluginRegistry::new().with(Arc::new(provider));
    Ok(LocalEngine::new(settings.workspace_dir.clone(), registry))
}

/// Builds the orchestrator over a fresh engine.
fn build_orchestrator(settings: Settings) -> Result<Arc<Orchestrator>> {
    let engine: Arc<dyn Engine> = Arc::new(build_engine(&settings)?);
    Ok(Arc::new(Orchestrator::new(engine, Arc::new(settings))))
}

/// Cancels `handle` on Ctrl-C.
fn cancel_on_interrupt(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            handle.cancel();
        }
    });
}

/// Create or destroy the stack for a request file.
async fn cmd_run(
    settings: Settings,
    request: &Path,
    intent: Intent,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let input = RequestParser::new().load_file(request)?;
    let timeout = settings.run_timeout;
    let orchestrator = build_orchestrator(settings)?;

    let (handle, cancel) = cancel_pair();
    cancel_on_interrupt(handle);

    let report = orchestrator
        .execute(&input, Some(intent), &cancel.with_timeout(timeout))
        .await;
    print!("{}", formatter.format_report(&report));

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Serve the HTTP entry point until Ctrl-C.
async fn cmd_serve(settings: Settings) -> Result<ExitCode> {
    let addr = settings.listen_addr;
    let orchestrator = build_orchestrator(settings)?;

    http::serve(orchestrator, addr, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
        }
    })
    .await?;
    Ok(ExitCode::SUCCESS)
}

/// Answer requests from stdin until end of input or Ctrl-C.
async fn cmd_queue(settings: Settings) -> Result<ExitCode> {
    let orchestrator = build_orchestrator(settings)?;
    let (handle, cancel) = cancel_pair();
    cancel_on_interrupt(handle);

    let answered = queue::run_queue(
        &orchestrator,
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        &cancel,
    )
    .await?;
    debug!("Answered {} request(s)", answered);
    Ok(ExitCode::SUCCESS)
}

/// Show recorded stack state.
async fn cmd_show(
    settings: &Settings,
    stack: String,
    project: String,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let engine = build_engine(settings)?;
    let key = StackKey::new(stack, project);

    match engine
        .stack_state(&key)
        .await
        .map_err(|e| StackError::internal(e.to_string()))?
    {
        Some(state) => {
            print!("{}", formatter.format_state(&state));
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("Stack {key} not found.");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// List installed plugins.
async fn cmd_plugins(settings: &Settings, formatter: &OutputFormatter) -> Result<ExitCode> {
    let manifest = build_engine(settings)?
        .installed_plugins()
        .await
        .map_err(|e| StackError::internal(e.to_string()))?;
    print!("{}", formatter.format_plugins(&manifest.plugins));
    Ok(ExitCode::SUCCESS)
}
