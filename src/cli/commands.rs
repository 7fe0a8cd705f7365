use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::app::{build_dispatcher, AppDispatcher, AppState, EnvSettings};
use crate::config::{AppConfig, Environment};
use crate::logging::init_logging;
use crate::server::{HttpServer, ServerHandle};

/// Command-line interface for the GenAI API service
#[derive(Parser)]
#[command(name = "genai-api")]
#[command(about = "Toy GenAI HTTP API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server until SIGINT or SIGTERM
    Serve {
        /// Listen address (overrides GENAI_ADDR)
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Deployment environment (overrides GENAI_ENV)
        #[arg(long, value_enum)]
        env: Option<Environment>,

        /// Worker threads (overrides GENAI_WORKERS)
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        workers: Option<u16>,
    },
    /// Print every route with its dependency evaluation order
    Routes,
}

pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { addr, env, workers } => {
            let mut config = AppConfig::from_env().context("invalid configuration")?;
            if let Some(addr) = addr {
                config.addr = addr;
            }
            if let Some(env) = env {
                config.environment = env;
            }
            if let Some(workers) = workers {
                config.workers = usize::from(workers);
            }
            serve(config)
        }
        Commands::Routes => {
            let state = Arc::new(AppState::new(Box::new(EnvSettings))?);
            let dispatcher = build_dispatcher(state, &AppConfig::default())?;
            for line in route_table(&dispatcher) {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn serve(config: AppConfig) -> anyhow::Result<()> {
    let _log_guard = init_logging(&config.log)?;

    let state = Arc::new(AppState::new(Box::new(EnvSettings))?);
    let dispatcher = Arc::new(build_dispatcher(state, &config)?);
    let handle = HttpServer::new(dispatcher, config.workers)
        .start(config.addr)
        .with_context(|| format!("failed to start server on {}", config.addr))?;

    wait_for_shutdown(handle)
}

#[cfg(unix)]
fn wait_for_shutdown(handle: ServerHandle) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    handle.stop();
    info!("Server stopped");
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown(handle: ServerHandle) -> anyhow::Result<()> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("an HTTP worker panicked"))
}

/// One line per route: method, pattern, handler and dependency order.
pub fn route_table(dispatcher: &AppDispatcher) -> Vec<String> {
    let mut routes: Vec<_> = dispatcher.routes().collect();
    routes.sort_by(|a, b| {
        a.path_pattern
            .cmp(&b.path_pattern)
            .then_with(|| a.method.as_str().cmp(b.method.as_str()))
    });
    routes
        .into_iter()
        .map(|route| {
            let deps = match dispatcher.plan(&route.handler_name) {
                Some(Ok(order)) if order.is_empty() => "-".to_string(),
                Some(Ok(order)) => order.join(" -> "),
                Some(Err(err)) => format!("<{err}>"),
                None => "<unregistered>".to_string(),
            };
            format!(
                "{:<7} {:<36} {:<24} {}",
                route.method.as_str(),
                route.path_pattern,
                route.handler_name,
                deps
            )
        })
        .collect()
}
