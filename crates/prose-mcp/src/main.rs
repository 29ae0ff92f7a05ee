use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prose_core::{
    IdentityStore, ProseConfig, StateLoad, TelemetrySetting, ToolDispatcher, ToolInvocation,
};
use rmcp::ServiceExt;
use tracing_subscriber::{EnvFilter, fmt};

mod server;

/// How long a one-shot command waits for its usage event before exiting.
const TELEMETRY_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

use server::ProseServer;

#[derive(Parser)]
#[command(
    name = "openprose",
    version,
    about = "OpenProse MCP server -- hands .prose programs to your agent"
)]
struct Cli {
    /// Project root. State, reference documents and relative program paths resolve here.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Path to openprose.toml (default: <project>/openprose.toml, then ~/.config/openprose/)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve prose_boot, prose_run and prose_compile over MCP stdio
    Serve,
    /// Print what prose_boot returns
    Boot,
    /// Print what prose_run returns for a program
    Run {
        /// Path to the .prose file
        file: String,
    },
    /// Print what prose_compile returns for a program
    Compile {
        /// Path to the .prose file
        file: String,
    },
    /// Show or change anonymous usage reporting
    Telemetry {
        #[command(subcommand)]
        action: TelemetryAction,
    },
}

#[derive(Subcommand)]
enum TelemetryAction {
    /// Show the current setting and identifiers
    Status,
    /// Turn usage reporting on
    Enable,
    /// Turn usage reporting off
    Disable,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr so they don't interfere with MCP stdio transport on stdout
    fmt()
        .with_env_filter(EnvFilter::from_env("OPENPROSE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let project_root = match cli.project {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let config = ProseConfig::discover(&project_root, cli.config.as_deref())?;
    let dispatcher = ToolDispatcher::from_config(project_root, &config);

    match cli.command {
        Command::Serve => serve(dispatcher).await,
        Command::Boot => print_invocation(&dispatcher, ToolInvocation::Boot).await,
        Command::Run { file } => {
            print_invocation(&dispatcher, ToolInvocation::Run { file_path: file }).await
        }
        Command::Compile { file } => {
            print_invocation(&dispatcher, ToolInvocation::Compile { file_path: file }).await
        }
        Command::Telemetry { action } => telemetry(dispatcher.store(), action).await,
    }
}

async fn serve(dispatcher: ToolDispatcher) -> Result<()> {
    tracing::info!(
        project = %dispatcher.working_dir().display(),
        "Starting OpenProse MCP server"
    );

    let server = ProseServer::new(Arc::new(dispatcher));
    let stdio = rmcp::transport::io::stdio();
    let running = server.serve(stdio).await?;

    tracing::info!("OpenProse serving on stdio");

    // Run until the agent disconnects
    running.waiting().await?;

    tracing::info!("OpenProse shutting down");
    Ok(())
}

async fn print_invocation(dispatcher: &ToolDispatcher, invocation: ToolInvocation) -> Result<()> {
    let text = dispatcher.dispatch(&invocation).await;
    println!("{text}");
    dispatcher.flush_telemetry(TELEMETRY_FLUSH_TIMEOUT).await;
    Ok(())
}

async fn telemetry(store: &IdentityStore, action: TelemetryAction) -> Result<()> {
    let state = match action {
        TelemetryAction::Status => {
            let load = store.load().await;
            if let StateLoad::Degraded { reason, .. } = &load {
                eprintln!("State file unusable ({reason}); telemetry is off for this run.");
            }
            load.into_state()
        }
        TelemetryAction::Enable => store
            .set_telemetry(TelemetrySetting::Enabled)
            .await
            .with_context(|| format!("failed to update {}", store.path().display()))?,
        TelemetryAction::Disable => store
            .set_telemetry(TelemetrySetting::Disabled)
            .await
            .with_context(|| format!("failed to update {}", store.path().display()))?,
    };

    println!("Telemetry: {}", state.telemetry);
    println!("User: {}", state.user_id);
    println!("Session: {}", state.session_id);
    Ok(())
}
