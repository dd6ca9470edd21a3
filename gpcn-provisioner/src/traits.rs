//! Control-plane API abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// The outbound surface of the GPCN control plane.
///
/// Every mutating call returns a [`JobHandle`] to be awaited by the job
/// poller; reads are idempotent and never mutate backend state. Implemented
/// over HTTP by [`crate::RestApi`] and in memory by [`crate::MockCloud`].
#[async_trait]
pub trait CloudApi: Send + Sync {
    // =========================================================================
    // Jobs & Catalog
    // =========================================================================

    /// Query the status of one or more jobs in a single batch.
    async fn job_status(&self, job_ids: &[String]) -> Result<Vec<Job>>;

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>>;

    /// Machine images available in a datacenter.
    async fn list_images(&self, datacenter_id: &str) -> Result<Vec<MachineImage>>;

    /// Machine sizes available for an image in a datacenter.
    async fn list_sizes(&self, datacenter_id: &str, image_id: i64) -> Result<Vec<MachineSize>>;

    /// Volume types and the sizes each one is offered in.
    async fn volume_catalog(&self, datacenter_id: &str) -> Result<Vec<VolumeTypeOffering>>;

    // =========================================================================
    // Networks
    // =========================================================================

    async fn create_network(&self, request: &NetworkRequest) -> Result<JobHandle>;

    async fn get_network(&self, network_id: &str) -> Result<Network>;

    /// Update mutable network attributes. Datacenter and type are ignored.
    async fn update_network(&self, network_id: &str, request: &NetworkRequest) -> Result<JobHandle>;

    async fn delete_network(&self, network_id: &str) -> Result<JobHandle>;

    /// Machines that currently hold an interface on the network.
    async fn network_machines(&self, network_id: &str) -> Result<Vec<AttachedMachine>>;

    // =========================================================================
    // Virtual Machines
    // =========================================================================

    async fn create_machine(&self, request: &MachineRequest) -> Result<JobHandle>;

    async fn get_machine(&self, machine_id: &str) -> Result<Machine>;

    async fn rename_machine(&self, machine_id: &str, name: &str) -> Result<JobHandle>;

    async fn resize_machine(&self, machine_id: &str, configuration_id: i64) -> Result<JobHandle>;

    /// Request a power-on. Convergence is observed through `get_machine`.
    async fn start_machine(&self, machine_id: &str) -> Result<()>;

    /// Request a power-off. Convergence is observed through `get_machine`.
    async fn stop_machine(&self, machine_id: &str) -> Result<()>;

    async fn delete_machine(&self, machine_id: &str) -> Result<JobHandle>;

    // =========================================================================
    // Network Interfaces
    // =========================================================================

    async fn list_interfaces(&self, machine_id: &str) -> Result<Vec<NetworkInterface>>;

    async fn attach_interface(&self, machine_id: &str, network_id: &str) -> Result<JobHandle>;

    /// Mark an interface primary. The backend demotes the previous primary.
    async fn set_primary_interface(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle>;

    async fn detach_interface(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle>;

    async fn allocate_public_ip(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle>;

    async fn release_public_ip(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle>;

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn create_volume(&self, request: &VolumeRequest) -> Result<JobHandle>;

    async fn get_volume(&self, volume_id: &str) -> Result<Volume>;

    async fn resize_volume(&self, volume_id: &str, size_gb: i64) -> Result<JobHandle>;

    async fn delete_volume(&self, volume_id: &str) -> Result<JobHandle>;

    async fn attach_volume(&self, volume_id: &str, machine_id: &str) -> Result<JobHandle>;

    async fn detach_volume(&self, volume_id: &str) -> Result<JobHandle>;
}
