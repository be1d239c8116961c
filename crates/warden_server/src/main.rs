//! WARDEN Server
//!
//! Authenticated HTTP endpoint for running policy evaluation commands.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use warden_server::{ApiServer, CommandDispatcher, DispatcherConfig, ServerConfig};

#[derive(Parser)]
#[command(name = "warden-server")]
#[command(about = "WARDEN policy evaluation server", long_about = None)]
struct Args {
    /// Bind host
    #[arg(long, env = "API_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Bind port
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    port: u16,

    /// Verbose logging; any value other than `true` (case-insensitive) disables it
    #[arg(
        long,
        env = "API_DEBUG",
        default_value = "true",
        action = clap::ArgAction::Set,
        value_parser = parse_debug
    )]
    debug: bool,

    /// Evaluation binary invoked for each request
    #[arg(long, env = "WARDEN_CLI_BIN", default_value = "warden")]
    cli_bin: PathBuf,

    /// Working directory of the evaluation binary
    #[arg(long, env = "WARDEN_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Deadline for one evaluation command, in seconds
    #[arg(long, env = "WARDEN_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

fn parse_debug(value: &str) -> Result<bool, String> {
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "warden=debug,tower_http=debug"
    } else {
        "warden=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let workdir = match args.workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to resolve working directory")?,
    };

    let dispatcher = CommandDispatcher::new(
        DispatcherConfig::default()
            .with_program(args.cli_bin)
            .with_working_dir(workdir)
            .with_timeout(Duration::from_secs(args.timeout_secs)),
    );
    let config = ServerConfig::default()
        .with_host(args.host)
        .with_port(args.port)
        .with_debug(args.debug);

    let server = ApiServer::new(config, dispatcher);
    server.serve().await?;

    Ok(())
}
