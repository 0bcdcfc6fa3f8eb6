//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator CLI for interacting with ONQL modules over the bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use onql_common::{init_tracing, SdkConfig};
use onql_sdk::Sdk;

mod bus;

const DEFAULT_CONFIG_CANDIDATES: &[&str] = &["onql.toml", "/etc/onql/onql.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "ONQL bus control utility",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to ONQL_CONFIG, ./onql.toml, /etc/onql/onql.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Module suffix this CLI registers as, giving subject `<namespace>.<name>`.
    #[arg(long, global = true, default_value = "onqlctl")]
    name: String,

    /// Override the bus URL from configuration.
    #[arg(long = "bus-url", global = true, value_name = "URL")]
    bus_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a request and print the reply as JSON.
    Request(bus::RequestCommand),
    /// Broadcast a response on this module's response subject.
    Respond(bus::RespondCommand),
    /// Answer requests on a subject until interrupted.
    Serve(bus::ServeCommand),
}

fn load_config(cli: &Cli) -> Result<SdkConfig> {
    let mut config = match &cli.config {
        Some(path) => SdkConfig::load_file(path)?.config,
        None => SdkConfig::load(DEFAULT_CONFIG_CANDIDATES)?,
    };
    if let Some(url) = &cli.bus_url {
        config.bus.url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing("onqlctl", &config.logging)?;

    let sdk = Sdk::new(config);
    sdk.initialize(&cli.name)
        .await
        .with_context(|| format!("unable to initialize module '{}'", cli.name))?;

    let outcome = match cli.command {
        Commands::Request(cmd) => cmd.execute(&sdk).await,
        Commands::Respond(cmd) => cmd.execute(&sdk).await,
        Commands::Serve(cmd) => cmd.execute(&sdk).await,
    };
    sdk.shutdown().await;
    outcome
}
