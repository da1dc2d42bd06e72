//! PR Sentinel - MCP agent that supervises a pull request's path to merge
//!
//! Runs as a stdio MCP server. Because stdout carries the JSON-RPC
//! stream, logs go to a file under the data directory unless --print-logs
//! redirects them to stderr.

mod cli;
mod config;
mod github;
mod mcp;
mod monitor;
mod skill;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load local .env for developer workflows; the process environment
    // still takes precedence over .env values.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(&cli);
    install_panic_hook();

    let config = Arc::new(config::Config::load()?);

    match cli.command {
        Some(Command::Skill(args)) => {
            if args.path {
                println!("{}", skill::install_path().display());
            } else {
                print!("{}", skill::DOCUMENT);
            }
            Ok(())
        }
        Some(Command::Config) => {
            println!("{}", toml::to_string_pretty(config.as_ref())?);
            Ok(())
        }
        Some(Command::Serve) | None => serve(config).await,
    }
}

async fn serve(config: Arc<config::Config>) -> anyhow::Result<()> {
    let server = Arc::new(mcp::McpServer::new_stdio(config));

    tokio::select! {
        result = Arc::clone(&server).run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; shutting down sessions");
            monitor::registry::shutdown_all().await;
            Ok(())
        }
    }
}

/// Record panics to the fallback debug log before the default handler
/// runs. Panics in session helper tasks are caught by the runtime and the
/// session continues; this covers whatever escapes.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("panic: {info}");
        if let Some(dir) = config::Config::data_dir() {
            let line = format!("[{}] panic: {info}\n", chrono::Local::now().to_rfc3339());
            let _ = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("pr-sentinel.debug.log"))
                .and_then(|mut f| std::io::Write::write_all(&mut f, line.as_bytes()));
        }
        default_hook(info);
    }));
}

fn init_tracing(cli: &Cli) {
    let level = cli.log_level.as_deref().unwrap_or("INFO").to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if cli.print_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        return;
    }

    // stdout is the JSON-RPC stream: log to a file under the data dir
    let log_dir = config::Config::data_dir().unwrap_or_else(std::env::temp_dir);
    let _ = std::fs::create_dir_all(&log_dir);
    match std::fs::File::create(log_dir.join("pr-sentinel.log")) {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false),
                )
                .init();
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
