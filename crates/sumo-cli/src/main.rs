//! `sumo` – Sumo robot bridge command line.
//!
//! ```bash
//! # Write ~/.sumo/config.toml with every default spelled out
//! sumo init-config
//!
//! # Bridge, joystick teleop and WebSocket gateway in one process
//! sumo run
//!
//! # Only one of the loops (the gateway always runs)
//! sumo bridge
//! sumo teleop
//! ```
//!
//! Ctrl-C sets a shared shutdown flag; both loops poll it and exit cleanly.
//! A robot that cannot be reached at startup makes the process exit with a
//! non-zero status.

mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

use sumo_hal::SimSumo;
use sumo_middleware::{EventBus, ParamStore, WsGateway};
use sumo_runtime::{TeleopNode, init_tracing, run_bridge};
use sumo_types::SumoError;

/// Sumo robot telemetry/command bridge
#[derive(Parser, Debug)]
#[command(name = "sumo")]
#[command(about = "Telemetry/command bridge and joystick teleop for a jumping robot", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.sumo/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Run the bridge, the teleop node and the gateway (default)
    Run,
    /// Run only the bridge and the gateway
    Bridge,
    /// Run only the teleop node and the gateway
    Teleop,
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    fn runs_bridge(self) -> bool {
        matches!(self, Commands::Run | Commands::Bridge)
    }

    fn runs_teleop(self) -> bool {
        matches!(self, Commands::Run | Commands::Teleop)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);
    let path = cli.config.unwrap_or_else(config::config_path);

    // Tracing first: the OTLP exporter must be set up outside the runtime.
    let _guard = init_tracing("sumo");

    if let Commands::InitConfig { force } = command {
        return exit_with(init_config(&path, force));
    }

    print_banner();

    let cfg = match config::load_or_default(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };
    info!(path = %path.display(), ?cfg, "configuration loaded");

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };
    exit_with(runtime.block_on(serve(command, cfg, shutdown)))
}

/// Start the gateway plus the loops selected by `command` and wait for them.
async fn serve(
    command: Commands,
    cfg: config::Config,
    shutdown: Arc<AtomicBool>,
) -> Result<(), SumoError> {
    let bus = Arc::new(EventBus::default());
    let params = ParamStore::new();

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.gateway_port));
    let gateway = WsGateway::new(Arc::clone(&bus), params.clone());
    let gateway = tokio::spawn(async move {
        if let Err(e) = gateway.run(addr).await {
            error!(error = %e, "gateway stopped");
        }
    });
    println!("  Gateway listening on {}", format!("ws://{addr}").bold());

    let teleop = command.runs_teleop().then(|| {
        println!("  {} teleop node", "▶".green());
        let node = TeleopNode::new(Arc::clone(&bus), cfg.teleop.clone());
        tokio::spawn(node.run(Arc::clone(&shutdown)))
    });

    let result = if command.runs_bridge() {
        let driver = if cfg.bridge.connect_fails {
            SimSumo::unreachable()
        } else {
            SimSumo::new()
        };
        println!("  {} bridge (simulated robot)", "▶".green());
        run_bridge(driver, Arc::clone(&bus), params, &cfg.bridge, Arc::clone(&shutdown)).await
    } else {
        while !shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    };

    // A failed bridge start also stops the teleop node.
    shutdown.store(true, Ordering::SeqCst);
    if let Some(teleop) = teleop
        && let Err(e) = teleop.await
    {
        warn!(error = %e, "teleop task ended abnormally");
    }
    gateway.abort();
    result
}

fn init_config(path: &std::path::Path, force: bool) -> Result<(), SumoError> {
    if path.exists() && !force {
        return Err(SumoError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    config::save_to(&config::Config::default(), path)?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

fn exit_with(result: Result<(), SumoError>) -> ExitCode {
    match result {
        Ok(()) => {
            println!("{}", "  ✓ Exiting sumo.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {e}", "Error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "sumo".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Jumping robot telemetry/command bridge");
    println!();
}
