mod config;
mod console;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use launcher_core::{PhaseId, CONFIG_FILE};
use orchestrator::{CommandProbe, LifecycleFlow, PhaseTarget};
use server::{create_router, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "launcher")]
#[command(about = "Install, start and maintain a local project stack", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding launcher.toml
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default launcher.toml
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Serve the HTTP API and event stream
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        bind: Option<String>,
    },
    /// Run the pipeline, or one phase, in this terminal
    Run {
        /// Only run this phase
        #[arg(long)]
        phase: Option<PhaseId>,

        /// Ask the advisor for help when a phase fails
        #[arg(long)]
        ai: bool,
    },
    /// Detect the configured tools
    Check,
    /// List the configured phases
    Phases,
    /// Run a lifecycle chain: stop, update or uninstall
    Lifecycle { flow: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Some(Commands::Init { force }) => init_project(&dir, force).await,
        Some(Commands::Serve { port, bind }) => serve(&dir, port, bind).await,
        Some(Commands::Run { phase, ai }) => run(&dir, phase, ai).await,
        Some(Commands::Check) => check(&dir).await,
        Some(Commands::Phases) => phases(&dir).await,
        Some(Commands::Lifecycle { flow }) => lifecycle(&dir, &flow).await,
        None => serve(&dir, None, None).await,
    }
}

async fn init_project(dir: &Path, force: bool) -> Result<()> {
    let project_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("my-project")
        .to_string();

    if !config::write_default(dir, &project_name, force).await? {
        println!("{} already exists in {}", CONFIG_FILE, dir.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    println!();
    println!("Initialized launcher for '{}'", project_name);
    println!();
    println!("Created:");
    println!("  {}", dir.join(CONFIG_FILE).display());
    println!();
    println!("Next steps:");
    println!("  1. Review the [[phases]] and [[tools]] in {}", CONFIG_FILE);
    println!("  2. Run 'launcher check' to detect the required tools");
    println!("  3. Run 'launcher serve' or 'launcher run'");

    Ok(())
}

async fn serve(dir: &Path, port: Option<u16>, bind: Option<String>) -> Result<()> {
    init_tracing();

    let loaded = config::load(dir).await?;
    if !loaded.from_file {
        tracing::info!("No {} found, using the default pipeline", CONFIG_FILE);
    }

    let port = port.unwrap_or(loaded.config.server.port);
    let bind = bind.unwrap_or_else(|| loaded.config.server.bind.clone());
    let project_name = loaded
        .config
        .project
        .name
        .clone()
        .unwrap_or_else(|| "project".to_string());
    tracing::info!("Project root: {}", loaded.project_root.display());

    let state = AppState::new(loaded.config, &loaded.project_root);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", bind, port))?;

    println!();
    println!("Launcher - {}", project_name);
    println!("════════════════════════════════════════");
    println!();
    println!("  API Server:  http://localhost:{}", port);
    println!("  OpenAPI:     http://localhost:{}/api/openapi.json", port);
    println!("  Events:      http://localhost:{}/api/events", port);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run(dir: &Path, phase: Option<PhaseId>, ai: bool) -> Result<()> {
    init_tracing();

    let loaded = config::load(dir).await?;
    let has_detached = loaded.config.phases.iter().any(|p| p.is_detached());
    let state = AppState::new(loaded.config, &loaded.project_root);
    let printer = console::spawn_printer(state.event_bus.subscribe());

    let success = match phase {
        Some(id) => {
            let ticket = state.orchestrator.run_phase(PhaseTarget::Id(id)).await?;
            match ticket.wait().await {
                Ok(()) => true,
                Err(e) => {
                    eprintln!("{} {}", "Phase failed:".red().bold(), e);
                    false
                }
            }
        }
        None => {
            let report = state.orchestrator.run_pipeline(ai).await?.wait().await?;
            println!();
            for (id, status) in &report.statuses {
                println!("  phase {:<3} {}", id, console::status_label(*status));
            }
            report.success
        }
    };

    if success && phase.is_none() && has_detached {
        println!();
        println!("Services are running. Press Ctrl+C to stop them.");
        shutdown_signal().await;
    }

    drop(state);
    tokio::task::yield_now().await;
    printer.abort();

    if !success {
        bail!("pipeline did not complete");
    }
    Ok(())
}

async fn check(dir: &Path) -> Result<()> {
    let loaded = config::load(dir).await?;
    let probe = CommandProbe::new(&loaded.project_root);

    let checks = orchestrator::check_all(&probe, &loaded.config.tools).await;
    println!();
    println!("Tools:");
    console::print_checks(&checks);
    println!();

    let missing: Vec<&str> = checks
        .iter()
        .filter(|c| !c.is_installed())
        .map(|c| c.name.as_str())
        .collect();
    if !missing.is_empty() {
        bail!("missing tools: {}", missing.join(", "));
    }
    Ok(())
}

async fn phases(dir: &Path) -> Result<()> {
    let loaded = config::load(dir).await?;

    println!();
    println!("Phases ({}):", loaded.config.phases.len());
    for phase in &loaded.config.phases {
        let kind = if phase.is_detached() {
            "detached".yellow()
        } else {
            "terminating".normal()
        };
        println!(
            "  {:<3} {:<28} {:<12} {}",
            phase.id,
            phase.name,
            kind,
            phase.command_line().dimmed()
        );
        if !phase.requires.is_empty() {
            println!("      requires: {}", phase.requires.join(", "));
        }
    }
    println!();

    Ok(())
}

async fn lifecycle(dir: &Path, flow: &str) -> Result<()> {
    let flow = LifecycleFlow::parse(flow)
        .with_context(|| format!("Unknown lifecycle flow '{}'; expected stop, update or uninstall", flow))?;
    init_tracing();

    let loaded = config::load(dir).await?;
    let state = AppState::new(loaded.config, &loaded.project_root);
    let printer = console::spawn_printer(state.event_bus.subscribe());

    let outcome = state.lifecycle.run(flow).await;
    drop(state);
    tokio::task::yield_now().await;
    printer.abort();

    if let Some(reason) = outcome.abort {
        bail!(reason);
    }
    if !outcome.success {
        bail!("{} finished with errors", flow.as_str());
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "launcher=info,server=info,orchestrator=info,tower_http=info".into()
            }),
        )
        .init();
}
