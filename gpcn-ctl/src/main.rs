//! # gpcn-ctl
//!
//! Command-line host for the GPCN provisioner. Reads desired configuration
//! from YAML or JSON files, drives the lifecycle operation, and prints the
//! resulting state as JSON.
//!
//! ## Usage
//! ```bash
//! export GPCN_HOST=https://api.gpcn.example GPCN_API_KEY=...
//! gpcn-ctl network create --desired net.yaml
//! gpcn-ctl machine update vm-123 --prior old.yaml --desired new.yaml
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gpcn_provisioner::{Provisioner, RestApi};

mod cli;
mod commands;
mod config;

use cli::Args;
use config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref(), None)?.with_cli_overrides(&args)?;
    gpcn_common::init_logging_with_format(&settings.log_level, settings.log_format)?;
    settings.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %settings.host,
        "Starting gpcn-ctl"
    );

    let api = RestApi::new(&settings.api_config()).context("Failed to build API client")?;

    let cancel = CancellationToken::new();
    let ctx = Provisioner::new(Arc::new(api), settings.polling.clone()).with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling in-flight polls");
            cancel.cancel();
        }
    });

    if let Err(e) = commands::run(ctx, args.command).await {
        error!(error = %format!("{:#}", e), "Command failed");
        return Err(e);
    }

    Ok(())
}
