//! Host-facing state documents built from authoritative reads.
//!
//! Each document is built by a short pipeline of by-value steps
//! (`seeded` → `with_snapshot` → `with_interfaces`), so a later step never
//! observes a half-filled value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interfaces::InterfaceSet;
use crate::types::{Location, Machine, MachineSpec, Network, NetworkInterface, NetworkType, Volume, VolumeType};

/// Rendered when a backend timestamp does not parse.
pub const UNKNOWN_TIME: &str = "unknown";

/// Reformat an RFC 3339 timestamp as RFC 850 (`Monday, 02-Jan-06 15:04:05 UTC`).
pub fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| {
            t.with_timezone(&Utc)
                .format("%A, %d-%b-%y %H:%M:%S UTC")
                .to_string()
        })
        .unwrap_or_else(|_| UNKNOWN_TIME.to_string())
}

pub fn location_map(location: &Location) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("country".to_string(), location.country.clone()),
        ("region".to_string(), location.region.clone()),
        ("datacenter".to_string(), location.datacenter.clone()),
    ])
}

fn configuration_map(machine: &Machine) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("name".to_string(), machine.configuration.clone()),
        ("cpu".to_string(), format!("{} cores", machine.cpu)),
        ("ram".to_string(), format!("{} GB", machine.ram)),
        ("base_storage".to_string(), format!("{} GB", machine.disk)),
    ])
}

// =============================================================================
// Network
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub id: String,
    pub name: String,
    pub description: String,
    pub network_type: String,
    pub datacenter_id: String,
    pub cidr_block: String,
    pub gateway: String,
    pub snat: String,
    pub connected_vms: String,
    pub dns_servers: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_start_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_end_address: Option<String>,
    pub location: BTreeMap<String, String>,
    pub created_time: String,
    pub last_updated: String,
}

impl NetworkState {
    pub fn from_snapshot(network: &Network) -> Self {
        let standard = NetworkType::parse(&network.network_type) == Some(NetworkType::Standard);
        let pool = network.allocation_pools.first().filter(|_| standard);
        Self {
            id: network.id.clone(),
            name: network.name.clone(),
            description: network.description.clone(),
            network_type: network.network_type.to_lowercase(),
            datacenter_id: network.location.datacenter_id.clone(),
            cidr_block: network.cidr_block.clone(),
            gateway: network.gateway_ip.clone(),
            snat: network.snat.clone(),
            connected_vms: network.connected_machines.clone(),
            dns_servers: network.dns_nameservers.clone(),
            dhcp_start_address: pool.map(|p| p.start.clone()),
            dhcp_end_address: pool.map(|p| p.end.clone()),
            location: location_map(&network.location),
            created_time: format_timestamp(&network.created_at),
            last_updated: format_timestamp(&network.updated_at),
        }
    }
}

// =============================================================================
// Machine
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub id: String,
    pub name: String,
    pub datacenter_id: String,
    pub image: String,
    pub size: String,
    pub status: String,
    pub allocate_public_ip: bool,
    pub wait_for_startup: bool,
    pub network_ids: Vec<String>,
    pub volume_ids: Vec<String>,
    pub configuration: BTreeMap<String, String>,
    pub location: BTreeMap<String, String>,
    pub interfaces: Vec<NetworkInterface>,
    pub created_time: String,
    pub last_updated: String,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            datacenter_id: String::new(),
            image: String::new(),
            size: String::new(),
            status: String::new(),
            allocate_public_ip: false,
            wait_for_startup: true,
            network_ids: Vec::new(),
            volume_ids: Vec::new(),
            configuration: BTreeMap::new(),
            location: BTreeMap::new(),
            interfaces: Vec::new(),
            created_time: UNKNOWN_TIME.to_string(),
            last_updated: UNKNOWN_TIME.to_string(),
        }
    }
}

impl MachineState {
    /// Start from the desired configuration.
    pub fn seeded(spec: &MachineSpec) -> Self {
        Self {
            name: spec.name.clone(),
            datacenter_id: spec.datacenter_id.clone(),
            image: spec.image.clone(),
            size: spec.size.clone(),
            allocate_public_ip: spec.allocate_public_ip,
            wait_for_startup: spec.wait_for_startup,
            network_ids: spec.networks.clone(),
            volume_ids: spec.volumes.clone(),
            ..Self::default()
        }
    }

    /// Overlay a machine read. Desired fields already set are kept.
    pub fn with_snapshot(self, machine: &Machine) -> Self {
        Self {
            id: machine.id.clone(),
            name: or_observed(self.name, &machine.name),
            datacenter_id: or_observed(self.datacenter_id, &machine.location.datacenter_id),
            image: or_observed(self.image, &machine.image),
            size: or_observed(self.size, &machine.configuration),
            status: machine.status.clone(),
            configuration: configuration_map(machine),
            location: location_map(&machine.location),
            created_time: format_timestamp(&machine.created_at),
            last_updated: format_timestamp(&machine.updated_at),
            ..self
        }
    }

    /// Record live interfaces. With no known network list (import), the
    /// networks and public IP flag are derived from them.
    pub fn with_interfaces(self, interfaces: InterfaceSet) -> Self {
        let derive = self.network_ids.is_empty();
        let network_ids = if derive { interfaces.network_ids() } else { self.network_ids };
        let allocate_public_ip = if derive {
            interfaces.has_public_ip()
        } else {
            self.allocate_public_ip
        };
        Self {
            network_ids,
            allocate_public_ip,
            interfaces: interfaces.into_vec(),
            ..self
        }
    }
}

fn or_observed(current: String, observed: &str) -> String {
    if current.is_empty() {
        observed.to_string()
    } else {
        current
    }
}

// =============================================================================
// Volume
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeState {
    pub id: String,
    pub name: String,
    pub datacenter_id: String,
    pub volume_type: String,
    pub volume_type_id: i64,
    pub size_gb: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    pub location: BTreeMap<String, String>,
    pub created_time: String,
    pub last_updated: String,
}

impl VolumeState {
    pub fn from_snapshot(volume: &Volume) -> Self {
        let volume_type = VolumeType::from_type_id(volume.volume_type_id)
            .map(|t| t.to_string())
            .unwrap_or_else(|| volume.volume_type.clone());
        Self {
            id: volume.id.clone(),
            name: volume.name.clone(),
            datacenter_id: volume.location.datacenter_id.clone(),
            volume_type,
            volume_type_id: volume.volume_type_id,
            size_gb: volume.size_gb,
            machine_id: volume.machine_id.clone().filter(|id| !id.is_empty()),
            location: location_map(&volume.location),
            created_time: format_timestamp(&volume.created_at),
            last_updated: format_timestamp(&volume.updated_at),
        }
    }
}
