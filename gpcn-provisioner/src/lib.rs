//! # GPCN Provisioner
//!
//! Control-plane client and reconciliation engine for GPCN cloud networks,
//! virtual machines and volumes.
//!
//! Every backend mutation is asynchronous: it answers with a job handle that
//! is long-polled to completion before the resource is re-read.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  ManagedResource (Network/Machine/Volume)   │
//! └──────────────────────┬──────────────────────┘
//!                        ▼
//! ┌─────────────────────────────────────────────┐
//! │  Orchestrator  (StepPlan, ListDiff,         │
//! │                 primary-interface election) │
//! └──────────────────────┬──────────────────────┘
//!                        ▼
//! ┌─────────────────────────────────────────────┐
//! │  Resource ops ─▶ JobPoller / StatusPoller   │
//! └──────────────────────┬──────────────────────┘
//!                        ▼
//!              CloudApi trait
//!         ┌──────────────┴──────────────┐
//!         ▼                             ▼
//! ┌───────────────────┐       ┌───────────────────┐
//! │     RestApi       │       │    MockCloud      │
//! │  (reqwest, JSON)  │       │   (in-memory)     │
//! └───────────────────┘       └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gpcn_provisioner::{ApiConfig, ManagedResource, NetworkResource, PollingConfig, Provisioner, RestApi};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let api = RestApi::new(&ApiConfig::new("https://api.gpcn.example", "key"))?;
//!     let ctx = Provisioner::new(Arc::new(api), PollingConfig::default());
//!
//!     let networks = NetworkResource::new(ctx);
//!     let state = networks.import("net-123").await?;
//!     println!("{}", state.cidr_block);
//!     Ok(())
//! }
//! ```

pub mod diff;
pub mod error;
pub mod interfaces;
pub mod manager;
pub mod mock;
pub mod polling;
pub mod provider;
pub mod reconcile;
pub mod resources;
pub mod rest;
pub mod state;
pub mod steps;
pub mod traits;
pub mod types;

pub use diff::ListDiff;
pub use error::{ProvisionError, ResourceKind, Result, StepContext, Warning};
pub use interfaces::{InterfaceOps, InterfaceSet};
pub use manager::Provisioner;
pub use mock::{MockCloud, MockFailure};
pub use polling::{JobPoller, PollingConfig, StatusPoller};
pub use provider::{MachineResource, ManagedResource, NetworkResource, VolumeResource};
pub use reconcile::Orchestrator;
pub use rest::{ApiConfig, HttpTransport, RestApi};
pub use state::{MachineState, NetworkState, VolumeState};
pub use steps::{Applied, StepPlan, StepPolicy};
pub use traits::CloudApi;
pub use types::*;
