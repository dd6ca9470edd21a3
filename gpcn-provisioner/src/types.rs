//! Domain types for jobs, resource snapshots and desired resource shapes.
//!
//! Snapshots (`Network`, `Machine`, `Volume`) are produced by read calls and
//! never mutated afterwards; every read replaces the previous value. Specs
//! (`NetworkSpec`, `MachineSpec`, `VolumeSpec`) describe desired state as
//! handed to us by the host.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// JOBS
// =============================================================================

/// The only three states a job can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Succeeded,
    Failed,
}

/// An asynchronous unit of backend work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub is_completed: bool,
    pub has_failed: bool,
    pub resource_id: Option<String>,
    pub resource_name: Option<String>,
    pub resource_type: Option<String>,
}

impl Job {
    /// A job that has been accepted but not yet reported on.
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the resource this job produces.
    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Classify the job. A failure flag wins over the completion flag.
    pub fn state(&self) -> JobState {
        if self.has_failed {
            JobState::Failed
        } else if self.is_completed {
            JobState::Succeeded
        } else {
            JobState::Pending
        }
    }
}

/// The jobs returned by a mutating call. Empty when the call completed
/// synchronously.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobHandle {
    pub jobs: Vec<Job>,
}

impl JobHandle {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn single(job: Job) -> Self {
        Self { jobs: vec![job] }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.id.clone()).collect()
    }

    /// The first resource identifier announced by any job in the handle.
    pub fn resource_id(&self) -> Option<&str> {
        self.jobs
            .iter()
            .find_map(|j| j.resource_id.as_deref().filter(|id| !id.is_empty()))
    }
}

// =============================================================================
// LOCATION & CATALOG
// =============================================================================

/// Where a resource lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub datacenter_id: String,
    pub datacenter: String,
    pub region: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    pub id: String,
    pub name: String,
    pub region_id: i64,
    pub region_name: String,
    pub country_id: i64,
    pub country_name: String,
    pub country_abbreviation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineImage {
    pub id: i64,
    pub name: String,
}

/// A machine configuration tier offered for an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSize {
    pub id: i64,
    pub name: String,
    pub cpu: i64,
    pub ram: i64,
    pub disk: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSizeOffering {
    pub id: i64,
    pub size_gb: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTypeOffering {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub sizes: Vec<VolumeSizeOffering>,
}

// =============================================================================
// NETWORKS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Managed network: gateway, DHCP, DNS and SNAT are provided.
    Standard,
    /// Bare layer-2 network.
    Custom,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Standard => "standard",
            NetworkType::Custom => "custom",
        }
    }

    /// Parse the backend's spelling, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("standard") {
            Some(NetworkType::Standard)
        } else if value.eq_ignore_ascii_case("custom") {
            Some(NetworkType::Custom)
        } else {
            None
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired network shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub datacenter_id: String,
    pub network_type: NetworkType,
    #[serde(default)]
    pub cidr_block: Option<String>,
    #[serde(default)]
    pub dhcp_start_address: Option<String>,
    #[serde(default)]
    pub dhcp_end_address: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

/// Request body for network create/update, composed from a `NetworkSpec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub name: String,
    pub description: String,
    pub datacenter_id: String,
    pub network_type: NetworkType,
    pub cidr_block: String,
    pub default_route: String,
    pub default_route_enabled: bool,
    pub dhcp_start_address: String,
    pub dhcp_end_address: String,
    pub dhcp_server_enabled: bool,
    pub dns_servers: Vec<String>,
    pub serve_dns_servers_enabled: bool,
    pub snat_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPool {
    pub start: String,
    pub end: String,
}

/// Network snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub description: String,
    pub network_type: String,
    pub cidr_block: String,
    pub gateway_ip: String,
    pub snat: String,
    pub dns_nameservers: String,
    pub connected_machines: String,
    pub allocation_pools: Vec<AllocationPool>,
    pub location: Location,
    pub created_at: String,
    pub updated_at: String,
}

/// A machine attached to a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedMachine {
    pub id: String,
    pub name: String,
}

// =============================================================================
// MACHINES
// =============================================================================

fn default_true() -> bool {
    true
}

/// Desired virtual machine shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub name: String,
    pub datacenter_id: String,
    /// Image name as listed by the datacenter catalog.
    pub image: String,
    /// Size (configuration) name as listed for the image.
    pub size: String,
    /// Network identifiers. The first one becomes the primary interface.
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub allocate_public_ip: bool,
    #[serde(default = "default_true")]
    pub wait_for_startup: bool,
}

/// Request body for machine creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRequest {
    pub name: String,
    pub datacenter_id: String,
    pub image_id: i64,
    pub configuration_id: i64,
    pub allocate_public_ip: bool,
    pub network_ids: Vec<String>,
}

/// Virtual machine snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image: String,
    pub configuration_id: i64,
    pub configuration: String,
    pub cpu: i64,
    pub ram: i64,
    pub disk: i64,
    pub username: String,
    pub location: Location,
    pub created_at: String,
    pub updated_at: String,
}

impl Machine {
    pub const RUNNING: &'static str = "Running";
    pub const SHUTOFF: &'static str = "Shutoff";

    /// Whether the reported status matches any target, ignoring case.
    pub fn status_in(&self, targets: &[&str]) -> bool {
        targets.iter().any(|t| t.eq_ignore_ascii_case(&self.status))
    }
}

/// Attachment of a machine to a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub id: String,
    /// Interface slot index on the machine.
    pub slot: i64,
    pub is_primary: bool,
    pub public_ip: String,
    pub public_ip_id: String,
    pub private_ip: String,
    pub network_name: String,
    pub network_id: String,
    pub cidr_block: String,
    pub gateway_ip: String,
    pub network_type: String,
}

impl NetworkInterface {
    pub fn has_public_ip(&self) -> bool {
        !self.public_ip.is_empty()
    }
}

// =============================================================================
// VOLUMES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeType {
    #[serde(rename = "SSD", alias = "ssd")]
    Ssd,
    #[serde(rename = "NVMe", alias = "nvme", alias = "NVME")]
    Nvme,
}

impl VolumeType {
    /// Backend identifier of the volume type.
    pub fn type_id(&self) -> i64 {
        match self {
            VolumeType::Ssd => 1,
            VolumeType::Nvme => 2,
        }
    }

    pub fn from_type_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(VolumeType::Ssd),
            2 => Some(VolumeType::Nvme),
            _ => None,
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeType::Ssd => write!(f, "SSD"),
            VolumeType::Nvme => write!(f, "NVMe"),
        }
    }
}

/// Desired volume shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub datacenter_id: String,
    pub volume_type: VolumeType,
    pub size_gb: i64,
}

/// Request body for volume creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRequest {
    pub name: String,
    pub datacenter_id: String,
    pub volume_type_id: i64,
    pub volume_size_id: i64,
    pub size_gb: i64,
}

/// Volume snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub size_gb: i64,
    pub volume_size_id: i64,
    pub volume_type_id: i64,
    pub volume_type: String,
    pub location: Location,
    pub machine_id: Option<String>,
    pub machine_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
