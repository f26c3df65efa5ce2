//! `rpcgate-routes`: validate router configurations and dry-run routing.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rpcgate_core::MessageMetadata;
use rpcgate_proxy::config::RouterConfig;
use rpcgate_proxy::route::RouteTable;
use rpcgate_proxy::ResolvedRoute;
use rpcgate_proxy::telemetry::{init_tracing, LogFormat};

#[derive(Parser)]
#[command(name = "rpcgate-routes")]
#[command(about = "Validate rpcgate route configurations and test routing decisions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "RPCGATE_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a router configuration file
    Check {
        /// Path to the JSON router configuration
        config: PathBuf,
    },

    /// Resolve the route for a single call
    Route {
        /// Path to the JSON router configuration
        config: PathBuf,

        /// Method name, optionally prefixed with `service:`
        #[arg(short, long)]
        method: String,

        /// Request header as `name=value` (can be specified multiple times)
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Random value used for weighted cluster selection
        #[arg(long, default_value = "0")]
        random: u64,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

fn load_table(path: &Path) -> anyhow::Result<(RouterConfig, RouteTable)> {
    let config = RouterConfig::from_json_file(path)?;
    let table = RouteTable::from_config(&config.route_config)
        .with_context(|| format!("invalid routes in {}", path.display()))?;
    Ok((config, table))
}

/// Human-readable lines describing where a call would go.
fn describe_route(metadata: &MessageMetadata, route: &ResolvedRoute) -> Vec<String> {
    let mut lines = vec![format!("cluster: {}", route.cluster_name())];
    if let Some(service) = metadata.service_name() {
        lines.push(format!("service: {service}"));
    }
    if route.strip_service_name() {
        let mut stripped = metadata.clone();
        stripped.strip_service_name();
        lines.push(format!("upstream method: {}", stripped.method_name()));
    }
    if let Some(criteria) = route.metadata_match() {
        for (key, value) in criteria.iter() {
            lines.push(format!("metadata_match: {key}={value}"));
        }
    }
    if !route.rate_limit_policy().is_empty() {
        lines.push("rate limits: configured".to_string());
    }
    lines
}

fn run(command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Check { config } => {
            let (config, table) = load_table(&config)?;
            println!(
                "ok: route table '{}' with {} rule(s), stat prefix '{}'",
                table.name(),
                table.len(),
                config.stat_prefix
            );
            Ok(true)
        }
        Commands::Route {
            config,
            method,
            headers,
            random,
        } => {
            let (_, table) = load_table(&config)?;
            let mut metadata = MessageMetadata::call(method);
            for (name, value) in headers {
                metadata.headers.add(name, value);
            }

            let Some(route) = table.route(&metadata, random) else {
                println!("no route");
                return Ok(false);
            };

            for line in describe_route(&metadata, &route) {
                println!("{line}");
            }
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("failed to initialise logging: {e}");
    }

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
