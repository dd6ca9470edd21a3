//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// GPCN control-plane client
#[derive(Parser, Debug)]
#[command(name = "gpcn-ctl")]
#[command(about = "Create, read, update, delete and import GPCN cloud resources")]
#[command(version)]
pub struct Args {
    /// Path to a YAML configuration file (defaults to ~/.config/gpcn/ctl.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Control plane base URL, overrides configuration
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage networks
    Network {
        #[command(subcommand)]
        action: Action,
    },
    /// Manage virtual machines
    Machine {
        #[command(subcommand)]
        action: Action,
    },
    /// Manage volumes
    Volume {
        #[command(subcommand)]
        action: Action,
    },
    /// List datacenters
    Datacenters,
}

/// Lifecycle action. Desired and prior configuration files are YAML or JSON.
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Create from a desired configuration file
    Create {
        #[arg(long)]
        desired: PathBuf,
    },
    /// Print current state
    Read {
        id: String,
        /// Last applied configuration, used to keep desired-only fields
        #[arg(long)]
        desired: Option<PathBuf>,
    },
    /// Move from the prior configuration to the desired one
    Update {
        id: String,
        #[arg(long)]
        prior: PathBuf,
        #[arg(long)]
        desired: PathBuf,
    },
    /// Delete, using the last applied configuration
    Delete {
        id: String,
        #[arg(long)]
        prior: PathBuf,
    },
    /// Adopt an existing resource by identifier
    Import { id: String },
}
