//! Operator commands for the ClinView FHIR client layer.
//!
//! Run with: `clinview <command>`
//!
//! Configuration comes from `CLINVIEW_*` variables (a `.env` file is read
//! first) or a `clinview.{json,toml}` file. This is a CLI tool, so
//! `println!` and `eprintln!` are used for user-facing output; diagnostics go
//! through `tracing` on stderr.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::env;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clinview_domain::Config;
use clinview_infra::fhir::{EnhancedClientOptions, EnhancedFhirClient};
use clinview_infra::observability::init_tracing;
use clinview_infra::offline::{ConnectivityConfig, ConnectivityMonitor, OfflineStore};

#[tokio::main]
async fn main() -> ExitCode {
    let command = env::args().nth(1);

    let result = match command.as_deref() {
        Some("check") => run_check().await,
        Some("queue") => run_queue(),
        Some("sync") => run_sync().await,
        Some("help") | None => {
            print_help();
            Ok(())
        }
        Some(unknown) => {
            eprintln!("Unknown command: {unknown}");
            eprintln!();
            print_help();
            Err(anyhow!("Unknown command"))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Command failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    println!("ClinView FHIR client");
    println!();
    println!("USAGE:");
    println!("    clinview <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    check     Probe the FHIR server and the health endpoint");
    println!("    queue     Show queued offline operations");
    println!("    sync      Replay queued offline operations against the server");
    println!("    help      Show this help message");
}

/// Load `.env`, then configuration, then install tracing
fn setup() -> anyhow::Result<Config> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            return Err(err).context("Failed to read .env");
        }
    }

    let config = clinview_infra::config::load().context("Failed to load configuration")?;
    // A subscriber installed by a caller wins.
    if let Err(err) = init_tracing(&config.logging) {
        eprintln!("Logging not initialized: {err}");
    }
    Ok(config)
}

fn open_store(config: &Config) -> anyhow::Result<OfflineStore> {
    OfflineStore::open(&config.offline).context("Failed to open offline storage")
}

fn build_client(config: &Config) -> anyhow::Result<EnhancedFhirClient> {
    let store = open_store(config)?;
    EnhancedFhirClient::new(EnhancedClientOptions::from_config(config), store)
        .context("Failed to build FHIR client")
}

async fn run_check() -> anyhow::Result<()> {
    let config = setup()?;
    let client = build_client(&config)?;

    let monitor = ConnectivityMonitor::with_http_probe(ConnectivityConfig::from_config(&config), true)
        .context("Failed to build connectivity probe")?;
    let reachable = monitor.recheck_connectivity().await;
    let connected = client.check_connection().await;

    println!("server:        {}", config.fhir.base_url);
    println!("health probe:  {}", if reachable { "online" } else { "offline" });
    println!("metadata:      {}", if connected { "ok" } else { "unavailable" });
    println!("queued:        {}", client.get_queue_size());

    if connected {
        Ok(())
    } else {
        Err(anyhow!("FHIR server is not reachable"))
    }
}

fn run_queue() -> anyhow::Result<()> {
    let config = setup()?;
    let store = open_store(&config)?;
    let pending = store.pending_operations();

    println!("{} queued operation(s)", pending.len());
    for operation in pending {
        let target = match (operation.data.get("resourceType"), operation.data.get("id")) {
            (Some(resource_type), Some(id)) => format!("{}/{}", json_text(resource_type), json_text(id)),
            (Some(resource_type), None) => json_text(resource_type),
            _ => "-".to_string(),
        };
        println!(
            "  {}  {:<6}  {:<24}  attempts={}  queued={}",
            operation.id,
            operation.operation_type,
            target,
            operation.attempts,
            operation.timestamp.to_rfc3339()
        );
    }
    Ok(())
}

async fn run_sync() -> anyhow::Result<()> {
    let config = setup()?;
    let client = build_client(&config)?;

    let report = client.process_offline_queue().await;
    println!(
        "processed={} failed={} remaining={}",
        report.processed, report.failed, report.remaining
    );

    if report.failed > 0 {
        return Err(anyhow!("{} operation(s) could not be replayed", report.failed));
    }
    Ok(())
}

fn json_text(value: &serde_json::Value) -> String {
    value.as_str().map_or_else(|| value.to_string(), str::to_string)
}
