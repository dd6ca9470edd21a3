//! Command dispatch.
//!
//! Every command prints a JSON document on stdout; logs go to stderr.

use std::path::Path;

use anyhow::{Context, Result};
use gpcn_provisioner::{
    CloudApi, MachineResource, ManagedResource, NetworkResource, Provisioner, VolumeResource, Warning,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{Action, Command};

/// Read a YAML or JSON configuration document.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    // JSON is a subset of YAML, one parser covers both.
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_warnings(id: &str, warnings: &[Warning]) {
    for warning in warnings {
        warn!(resource_id = %id, summary = %warning.summary, detail = %warning.detail, "Completed with warning");
    }
}

pub async fn run(ctx: Provisioner, command: Command) -> Result<()> {
    match command {
        Command::Network { action } => run_action(&NetworkResource::new(ctx), action).await,
        Command::Machine { action } => run_action(&MachineResource::new(ctx), action).await,
        Command::Volume { action } => run_action(&VolumeResource::new(ctx), action).await,
        Command::Datacenters => {
            let datacenters = ctx.api().list_datacenters().await?;
            info!(count = datacenters.len(), "Datacenters listed");
            print_json(&datacenters)
        }
    }
}

/// Drive one lifecycle action against a resource kind.
pub async fn run_action<R>(resource: &R, action: Action) -> Result<()>
where
    R: ManagedResource,
    R::Desired: DeserializeOwned,
    R::State: Serialize,
{
    let kind = R::KIND;
    match action {
        Action::Create { desired } => {
            let desired: R::Desired = read_document(&desired)?;
            let applied = resource
                .create(&desired)
                .await
                .with_context(|| format!("Failed to create {}", kind))?;
            print_json(&applied)
        }
        Action::Read { id, desired } => {
            let desired: Option<R::Desired> = desired.as_deref().map(read_document::<R::Desired>).transpose()?;
            let state = resource
                .read(&id, desired.as_ref())
                .await
                .with_context(|| format!("Failed to read {} {}", kind, id))?;
            if state.is_none() {
                info!(resource_id = %id, "{} no longer exists", kind);
            }
            print_json(&state)
        }
        Action::Update { id, prior, desired } => {
            let prior: R::Desired = read_document(&prior)?;
            let desired: R::Desired = read_document(&desired)?;
            let applied = resource
                .update(&id, &prior, &desired)
                .await
                .with_context(|| format!("Failed to update {} {}", kind, id))?;
            print_json(&applied)
        }
        Action::Delete { id, prior } => {
            let prior: R::Desired = read_document(&prior)?;
            let warnings = resource
                .delete(&id, &prior)
                .await
                .with_context(|| format!("Failed to delete {} {}", kind, id))?;
            log_warnings(&id, &warnings);
            print_json(&json!({ "deleted": id, "warnings": warnings }))
        }
        Action::Import { id } => {
            let state = resource
                .import(&id)
                .await
                .with_context(|| format!("Failed to import {} {}", kind, id))?;
            print_json(&state)
        }
    }
}
