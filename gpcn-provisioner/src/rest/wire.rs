//! JSON shapes exchanged with the control plane.
//!
//! These mirror the backend payloads field for field and are converted into
//! the crate's own types at the edge; nothing outside `rest` sees them.

use serde::Deserialize;

use crate::types::{
    AllocationPool, AttachedMachine, Datacenter, Job, JobHandle, Location, Machine, MachineImage, MachineSize,
    Network, NetworkInterface, Volume, VolumeSizeOffering, VolumeTypeOffering,
};

/// `{"success": bool, "message": str, "data": ...}`
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

fn default_success() -> bool {
    true
}

// =============================================================================
// Jobs
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct JobBody {
    pub job_id: String,
    pub is_completed: bool,
    pub has_failed: bool,
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: String,
}

impl From<JobBody> for Job {
    fn from(body: JobBody) -> Self {
        let non_empty = |s: String| Some(s).filter(|s| !s.is_empty());
        Job {
            id: body.job_id,
            is_completed: body.is_completed,
            has_failed: body.has_failed,
            resource_id: non_empty(body.resource_id),
            resource_name: non_empty(body.resource_name),
            resource_type: non_empty(body.resource_type),
        }
    }
}

/// A mutation answers with either one job or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum JobPayload {
    Batch { jobs: Vec<JobBody> },
    Single(JobBody),
}

impl JobPayload {
    pub fn into_jobs(self) -> Vec<Job> {
        let bodies = match self {
            JobPayload::Batch { jobs } => jobs,
            JobPayload::Single(body) => vec![body],
        };
        bodies
            .into_iter()
            .filter(|b| !b.job_id.is_empty())
            .map(Job::from)
            .collect()
    }

    pub fn into_handle(payload: Option<Self>) -> JobHandle {
        JobHandle {
            jobs: payload.map(Self::into_jobs).unwrap_or_default(),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct DatacenterBody {
    pub id: String,
    pub name: String,
    pub region_id: i64,
    pub region_name: String,
    pub country_id: i64,
    pub country_name: String,
    pub country_abbreviation: String,
}

impl From<DatacenterBody> for Datacenter {
    fn from(b: DatacenterBody) -> Self {
        Datacenter {
            id: b.id,
            name: b.name,
            region_id: b.region_id,
            region_name: b.region_name,
            country_id: b.country_id,
            country_name: b.country_name,
            country_abbreviation: b.country_abbreviation,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ImageBody {
    pub id: i64,
    pub name: String,
}

impl From<ImageBody> for MachineImage {
    fn from(b: ImageBody) -> Self {
        MachineImage { id: b.id, name: b.name }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SizeBody {
    pub id: i64,
    pub name: String,
    pub cpu: i64,
    pub ram: i64,
    pub disk: i64,
}

impl From<SizeBody> for MachineSize {
    fn from(b: SizeBody) -> Self {
        MachineSize {
            id: b.id,
            name: b.name,
            cpu: b.cpu,
            ram: b.ram,
            disk: b.disk,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct VolumeCatalogBody {
    #[serde(rename = "datacenterid")]
    pub datacenter_id: String,
    pub volume_types: Vec<VolumeTypeBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct VolumeTypeBody {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub available_sizes: Vec<VolumeSizeBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct VolumeSizeBody {
    pub id: i64,
    pub size_gb: i64,
}

impl From<VolumeTypeBody> for VolumeTypeOffering {
    fn from(b: VolumeTypeBody) -> Self {
        VolumeTypeOffering {
            id: b.id,
            name: b.name,
            description: b.description,
            sizes: b
                .available_sizes
                .into_iter()
                .map(|s| VolumeSizeOffering { id: s.id, size_gb: s.size_gb })
                .collect(),
        }
    }
}

// =============================================================================
// Networks
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct NamedRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DatacenterRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct NetworkBody {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
    pub snat: String,
    pub cidr_block: String,
    pub gateway_ip: String,
    pub connected_vms: String,
    pub network_type: String,
    pub country: NamedRef,
    pub region: NamedRef,
    pub datacenter: DatacenterRef,
    pub dns_nameservers: String,
    pub allocation_pools: Vec<AllocationPoolBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AllocationPoolBody {
    pub start: String,
    pub end: String,
}

impl From<NetworkBody> for Network {
    fn from(b: NetworkBody) -> Self {
        Network {
            id: b.id,
            name: b.name,
            description: b.description,
            network_type: b.network_type,
            cidr_block: b.cidr_block,
            gateway_ip: b.gateway_ip,
            snat: b.snat,
            dns_nameservers: b.dns_nameservers,
            connected_machines: b.connected_vms,
            allocation_pools: b
                .allocation_pools
                .into_iter()
                .map(|p| AllocationPool { start: p.start, end: p.end })
                .collect(),
            location: Location {
                datacenter_id: b.datacenter.id,
                datacenter: b.datacenter.name,
                region: b.region.name,
                country: b.country.name,
            },
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AttachedMachineBody {
    pub id: String,
    pub name: String,
}

impl From<AttachedMachineBody> for AttachedMachine {
    fn from(b: AttachedMachineBody) -> Self {
        AttachedMachine { id: b.id, name: b.name }
    }
}

// =============================================================================
// Virtual machines
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MachineEnvelopeData {
    pub virtualmachine: MachineBody,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct MachineBody {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
    pub configuration_id: i64,
    pub configuration: String,
    pub cpu: i64,
    pub ram: i64,
    pub disk: i64,
    pub image: String,
    pub username: String,
    pub datacenter_id: String,
    pub datacenter: String,
    pub region: String,
    pub country: String,
}

impl From<MachineEnvelopeData> for Machine {
    fn from(data: MachineEnvelopeData) -> Self {
        let b = data.virtualmachine;
        Machine {
            id: b.id,
            name: b.name,
            status: data.status,
            image: b.image,
            configuration_id: b.configuration_id,
            configuration: b.configuration,
            cpu: b.cpu,
            ram: b.ram,
            disk: b.disk,
            username: b.username,
            location: Location {
                datacenter_id: b.datacenter_id,
                datacenter: b.datacenter,
                region: b.region,
                country: b.country,
            },
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct InterfaceBody {
    pub id: String,
    pub network_interface: i64,
    pub is_primary: i64,
    pub public_ip: String,
    pub public_ip_id: String,
    pub private_ip: String,
    pub network_name: String,
    pub network_id: String,
    pub cidr_block: String,
    pub gateway_ip: String,
    pub network_type: String,
}

impl From<InterfaceBody> for NetworkInterface {
    fn from(b: InterfaceBody) -> Self {
        NetworkInterface {
            id: b.id,
            slot: b.network_interface,
            is_primary: b.is_primary == 1,
            public_ip: b.public_ip,
            public_ip_id: b.public_ip_id,
            private_ip: b.private_ip,
            network_name: b.network_name,
            network_id: b.network_id,
            cidr_block: b.cidr_block,
            gateway_ip: b.gateway_ip,
            network_type: b.network_type,
        }
    }
}

// =============================================================================
// Volumes
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct VolumeTypeRef {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct VolumeDatacenterRef {
    pub id: String,
    pub name: String,
    pub region: String,
    pub country_abbr: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct VolumeBody {
    pub id: String,
    pub name: String,
    pub size_gb: i64,
    pub volume_size_id: i64,
    pub volume_type: VolumeTypeRef,
    pub datacenter: VolumeDatacenterRef,
    pub virtual_machine_id: String,
    pub virtual_machine_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<VolumeBody> for Volume {
    fn from(b: VolumeBody) -> Self {
        let non_empty = |s: String| Some(s).filter(|s| !s.is_empty());
        Volume {
            id: b.id,
            name: b.name,
            size_gb: b.size_gb,
            volume_size_id: b.volume_size_id,
            volume_type_id: b.volume_type.id,
            volume_type: b.volume_type.name,
            location: Location {
                datacenter_id: b.datacenter.id,
                datacenter: b.datacenter.name,
                region: b.datacenter.region,
                country: b.datacenter.country_abbr,
            },
            machine_id: non_empty(b.virtual_machine_id),
            machine_name: non_empty(b.virtual_machine_name),
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}
