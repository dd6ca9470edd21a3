//! Per-kind resource operations.
//!
//! Each operation composes a request, submits it, awaits the job, and then
//! re-reads the resource; the create response itself is never trusted for
//! final state.

pub mod machine;
pub mod network;
pub mod volume;

pub use machine::MachineOps;
pub use network::{first_host, network_request, NetworkOps};
pub use volume::{resolve_size_id, VolumeOps};
