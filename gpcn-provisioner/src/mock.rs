//! In-memory control plane for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::resources::first_host;
use crate::traits::CloudApi;
use crate::types::*;

/// Failure to inject into the next call of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// The call is answered with this HTTP status.
    Status(u16),
    /// The call is accepted but its job reports failure. The change is not applied.
    JobFailed,
}

/// Mock control plane.
///
/// Every mutation is applied as soon as it is called and answers with a job
/// that completes on its first status query, unless scripted otherwise. The
/// backend enforces the same invariants the real one does:
/// - a machine has exactly one primary interface while it has any,
/// - the primary interface cannot be detached while others remain,
/// - a network with attached machines cannot be deleted,
/// - an attached volume cannot be deleted,
/// - a running machine cannot be deleted.
pub struct MockCloud {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    counters: HashMap<&'static str, u64>,
    datacenters: Vec<Datacenter>,
    images: Vec<MachineImage>,
    sizes: Vec<MachineSize>,
    volume_types: Vec<VolumeTypeOffering>,
    max_interfaces: usize,
    networks: BTreeMap<String, Network>,
    machines: BTreeMap<String, MockMachine>,
    volumes: BTreeMap<String, Volume>,
    jobs: HashMap<String, MockJob>,
    next_job_phases: VecDeque<Vec<(bool, bool)>>,
    status_scripts: HashMap<String, VecDeque<String>>,
    failures: HashMap<String, VecDeque<MockFailure>>,
    calls: Vec<String>,
}

struct MockMachine {
    machine: Machine,
    interfaces: Vec<NetworkInterface>,
    next_slot: i64,
}

struct MockJob {
    /// (is_completed, has_failed) per query; the last phase repeats.
    phases: Vec<(bool, bool)>,
    queries: usize,
    resource_id: Option<String>,
}

const READ_OPS: &[&str] = &[
    "job_status",
    "list_datacenters",
    "list_images",
    "list_sizes",
    "volume_catalog",
    "get_network",
    "network_machines",
    "get_machine",
    "list_interfaces",
    "get_volume",
];

fn http(op: &str, status: u16, body: impl Into<String>) -> ProvisionError {
    ProvisionError::HttpStatus {
        method: "MOCK".to_string(),
        path: op.to_string(),
        status,
        body: body.into(),
    }
}

fn not_found(kind: &str, id: &str) -> ProvisionError {
    http(kind, 404, format!("{} {} not found", kind, id))
}

impl MockCloud {
    /// Create a mock control plane with a single datacenter `dc-1` and a
    /// small catalog of images, sizes and volume offerings.
    pub fn new() -> Self {
        info!("Creating mock control plane");
        let state = MockState {
            datacenters: vec![Datacenter {
                id: "dc-1".to_string(),
                name: "DAL1".to_string(),
                region_id: 1,
                region_name: "US Central".to_string(),
                country_id: 1,
                country_name: "United States".to_string(),
                country_abbreviation: "US".to_string(),
            }],
            images: vec![
                MachineImage { id: 1, name: "Ubuntu 22.04".to_string() },
                MachineImage { id: 2, name: "Debian 12".to_string() },
            ],
            sizes: vec![
                MachineSize { id: 10, name: "Small".to_string(), cpu: 1, ram: 2, disk: 25 },
                MachineSize { id: 11, name: "Standard".to_string(), cpu: 2, ram: 4, disk: 50 },
                MachineSize { id: 12, name: "Large".to_string(), cpu: 4, ram: 8, disk: 100 },
            ],
            volume_types: vec![
                VolumeTypeOffering {
                    id: 1,
                    name: "SSD".to_string(),
                    description: "General purpose SSD".to_string(),
                    sizes: vec![
                        VolumeSizeOffering { id: 101, size_gb: 50 },
                        VolumeSizeOffering { id: 102, size_gb: 100 },
                        VolumeSizeOffering { id: 103, size_gb: 200 },
                    ],
                },
                VolumeTypeOffering {
                    id: 2,
                    name: "NVMe".to_string(),
                    description: "High performance NVMe".to_string(),
                    sizes: vec![
                        VolumeSizeOffering { id: 201, size_gb: 100 },
                        VolumeSizeOffering { id: 202, size_gb: 500 },
                    ],
                },
            ],
            max_interfaces: 5,
            ..Default::default()
        };
        Self { state: Mutex::new(state) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| ProvisionError::Internal("Lock poisoned".to_string()))
    }

    fn guard(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Register a job with explicit `(is_completed, has_failed)` phases.
    pub fn script_job(&self, job_id: &str, phases: &[(bool, bool)]) {
        self.guard().jobs.insert(
            job_id.to_string(),
            MockJob {
                phases: phases.to_vec(),
                queries: 0,
                resource_id: None,
            },
        );
    }

    /// Phases for the job of the next mutating call.
    pub fn script_next_job(&self, phases: &[(bool, bool)]) {
        self.guard().next_job_phases.push_back(phases.to_vec());
    }

    /// Statuses returned by the next reads of a machine, before its real status.
    pub fn script_statuses(&self, machine_id: &str, statuses: &[&str]) {
        self.guard()
            .status_scripts
            .entry(machine_id.to_string())
            .or_default()
            .extend(statuses.iter().map(|s| s.to_string()));
    }

    /// Fail the next call of `op` (a `CloudApi` method name).
    pub fn fail_next(&self, op: &str, failure: MockFailure) {
        self.fail_times(op, failure, 1);
    }

    pub fn fail_times(&self, op: &str, failure: MockFailure, times: usize) {
        let mut state = self.guard();
        let queue = state.failures.entry(op.to_string()).or_default();
        queue.extend(std::iter::repeat(failure).take(times));
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Insert a network directly, bypassing the job flow.
    pub fn seed_network(&self, name: &str, network_type: NetworkType, cidr_block: &str) -> String {
        let mut state = self.guard();
        let id = state.next_id("net");
        let location = state.location("dc-1");
        let gateway = match network_type {
            NetworkType::Standard => gateway_of(cidr_block),
            NetworkType::Custom => String::new(),
        };
        state.networks.insert(
            id.clone(),
            Network {
                id: id.clone(),
                name: name.to_string(),
                network_type: network_type.as_str().to_string(),
                cidr_block: cidr_block.to_string(),
                gateway_ip: gateway,
                location,
                created_at: "2024-05-01T10:00:00Z".to_string(),
                updated_at: "2024-05-01T10:00:00Z".to_string(),
                ..Default::default()
            },
        );
        id
    }

    /// Insert a machine directly with one interface per network. The first
    /// network becomes the primary interface.
    pub fn seed_machine(&self, name: &str, network_ids: &[&str], status: &str) -> String {
        let mut state = self.guard();
        let id = state.next_id("vm");
        let location = state.location("dc-1");
        state.machines.insert(
            id.clone(),
            MockMachine {
                machine: Machine {
                    id: id.clone(),
                    name: name.to_string(),
                    status: status.to_string(),
                    image: "Ubuntu 22.04".to_string(),
                    configuration_id: 11,
                    configuration: "Standard".to_string(),
                    cpu: 2,
                    ram: 4,
                    disk: 50,
                    username: "gpcn".to_string(),
                    location,
                    created_at: "2024-05-01T10:00:00Z".to_string(),
                    updated_at: "2024-05-01T10:00:00Z".to_string(),
                },
                interfaces: Vec::new(),
                next_slot: 0,
            },
        );
        for network_id in network_ids {
            // Seeding only references networks the caller created.
            let _ = state.add_interface(&id, network_id);
        }
        id
    }

    /// Insert a volume directly.
    pub fn seed_volume(&self, name: &str, volume_type: VolumeType, size_gb: i64) -> String {
        let mut state = self.guard();
        let id = state.next_id("vol");
        let location = state.location("dc-1");
        let size_id = state.volume_size_id(volume_type.type_id(), size_gb).unwrap_or_default();
        state.volumes.insert(
            id.clone(),
            Volume {
                id: id.clone(),
                name: name.to_string(),
                size_gb,
                volume_size_id: size_id,
                volume_type_id: volume_type.type_id(),
                volume_type: volume_type.to_string(),
                location,
                created_at: "2024-05-01T10:00:00Z".to_string(),
                updated_at: "2024-05-01T10:00:00Z".to_string(),
                ..Default::default()
            },
        );
        id
    }

    /// Attach a seeded volume to a seeded machine, bypassing the job flow.
    pub fn seed_attachment(&self, volume_id: &str, machine_id: &str) {
        let mut state = self.guard();
        let name = state.machines.get(machine_id).map(|m| m.machine.name.clone());
        if let Some(volume) = state.volumes.get_mut(volume_id) {
            volume.machine_id = Some(machine_id.to_string());
            volume.machine_name = name;
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every call made so far, formatted as `op arg1 arg2`.
    pub fn calls(&self) -> Vec<String> {
        self.guard().calls.clone()
    }

    /// Calls that change backend state, in order.
    pub fn mutations(&self) -> Vec<String> {
        self.guard()
            .calls
            .iter()
            .filter(|c| {
                let op = c.split_whitespace().next().unwrap_or_default();
                !READ_OPS.contains(&op)
            })
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.guard().calls.clear();
    }

    /// How many times a job's status has been queried.
    pub fn job_queries(&self, job_id: &str) -> usize {
        self.guard().jobs.get(job_id).map(|j| j.queries).unwrap_or(0)
    }

    pub fn interfaces_of(&self, machine_id: &str) -> Vec<NetworkInterface> {
        self.guard()
            .machines
            .get(machine_id)
            .map(|m| m.interfaces.clone())
            .unwrap_or_default()
    }

    pub fn machine(&self, machine_id: &str) -> Option<Machine> {
        self.guard().machines.get(machine_id).map(|m| m.machine.clone())
    }

    pub fn volume(&self, volume_id: &str) -> Option<Volume> {
        self.guard().volumes.get(volume_id).cloned()
    }

    pub fn network(&self, network_id: &str) -> Option<Network> {
        self.guard().networks.get(network_id).cloned()
    }
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// First host address of a CIDR block, or empty when it does not parse.
fn gateway_of(cidr_block: &str) -> String {
    first_host(cidr_block).unwrap_or_default()
}

impl MockState {
    fn next_id(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{}-{}", prefix, counter)
    }

    fn location(&self, datacenter_id: &str) -> Location {
        self.datacenters
            .iter()
            .find(|dc| dc.id == datacenter_id)
            .map(|dc| Location {
                datacenter_id: dc.id.clone(),
                datacenter: dc.name.clone(),
                region: dc.region_name.clone(),
                country: dc.country_name.clone(),
            })
            .unwrap_or_else(|| Location {
                datacenter_id: datacenter_id.to_string(),
                ..Default::default()
            })
    }

    fn volume_size_id(&self, type_id: i64, size_gb: i64) -> Option<i64> {
        self.volume_types
            .iter()
            .find(|t| t.id == type_id)
            .and_then(|t| t.sizes.iter().find(|s| s.size_gb == size_gb))
            .map(|s| s.id)
    }

    fn record(&mut self, op: &str, args: &[&str]) {
        let mut entry = op.to_string();
        for arg in args {
            entry.push(' ');
            entry.push_str(arg);
        }
        debug!(call = %entry, "Mock call");
        self.calls.push(entry);
    }

    fn take_failure(&mut self, op: &str) -> Option<MockFailure> {
        self.failures.get_mut(op).and_then(|q| q.pop_front())
    }

    /// Record a call and apply any injected failure.
    ///
    /// `Ok(Some(handle))` means the call was accepted with a failing job and
    /// must not be applied.
    fn begin(&mut self, op: &str, args: &[&str]) -> Result<Option<JobHandle>> {
        self.record(op, args);
        match self.take_failure(op) {
            Some(MockFailure::Status(status)) => Err(http(op, status, "injected failure")),
            Some(MockFailure::JobFailed) => {
                let id = self.next_id("job");
                self.jobs.insert(
                    id.clone(),
                    MockJob {
                        phases: vec![(true, true)],
                        queries: 0,
                        resource_id: None,
                    },
                );
                Ok(Some(JobHandle::single(Job::pending(id))))
            }
            None => Ok(None),
        }
    }

    /// Record a read and apply any injected status failure.
    fn begin_read(&mut self, op: &str, args: &[&str]) -> Result<()> {
        self.record(op, args);
        match self.take_failure(op) {
            Some(MockFailure::Status(status)) => Err(http(op, status, "injected failure")),
            Some(MockFailure::JobFailed) | None => Ok(()),
        }
    }

    fn job(&mut self, resource_id: Option<&str>) -> JobHandle {
        let id = self.next_id("job");
        let phases = self
            .next_job_phases
            .pop_front()
            .unwrap_or_else(|| vec![(true, false)]);
        self.jobs.insert(
            id.clone(),
            MockJob {
                phases,
                queries: 0,
                resource_id: resource_id.map(str::to_string),
            },
        );
        let job = Job::pending(id);
        JobHandle::single(match resource_id {
            Some(rid) => job.with_resource(rid),
            None => job,
        })
    }

    fn machine_mut(&mut self, machine_id: &str) -> Result<&mut MockMachine> {
        self.machines
            .get_mut(machine_id)
            .ok_or_else(|| not_found("virtual-machines", machine_id))
    }

    fn add_interface(&mut self, machine_id: &str, network_id: &str) -> Result<()> {
        let network = self
            .networks
            .get(network_id)
            .cloned()
            .ok_or_else(|| not_found("networks", network_id))?;
        let max = self.max_interfaces;
        let nic_id = self.next_id("nic");
        let entry = self.machine_mut(machine_id)?;
        if entry.interfaces.len() >= max {
            return Err(http(
                "attach_interface",
                409,
                format!("machine already has the maximum of {} interfaces", max),
            ));
        }
        let slot = entry.next_slot;
        entry.next_slot += 1;
        let is_primary = entry.interfaces.is_empty();
        entry.interfaces.push(NetworkInterface {
            id: nic_id,
            slot,
            is_primary,
            private_ip: format!("10.0.{}.{}", slot, 10 + slot),
            network_name: network.name.clone(),
            network_id: network.id.clone(),
            cidr_block: network.cidr_block.clone(),
            gateway_ip: network.gateway_ip.clone(),
            network_type: network.network_type.clone(),
            ..Default::default()
        });
        Ok(())
    }
}

#[async_trait]
impl CloudApi for MockCloud {
    // =========================================================================
    // Jobs & Catalog
    // =========================================================================

    async fn job_status(&self, job_ids: &[String]) -> Result<Vec<Job>> {
        let mut state = self.lock()?;
        let joined = job_ids.join(",");
        state.begin_read("job_status", &[joined.as_str()])?;
        let mut jobs = Vec::new();
        for id in job_ids {
            if let Some(job) = state.jobs.get_mut(id) {
                job.queries += 1;
                let idx = (job.queries - 1).min(job.phases.len().saturating_sub(1));
                let (is_completed, has_failed) = job.phases.get(idx).copied().unwrap_or((true, false));
                jobs.push(Job {
                    id: id.clone(),
                    is_completed,
                    has_failed,
                    resource_id: job.resource_id.clone(),
                    ..Default::default()
                });
            }
        }
        Ok(jobs)
    }

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>> {
        let mut state = self.lock()?;
        state.begin_read("list_datacenters", &[])?;
        Ok(state.datacenters.clone())
    }

    async fn list_images(&self, datacenter_id: &str) -> Result<Vec<MachineImage>> {
        let mut state = self.lock()?;
        state.begin_read("list_images", &[datacenter_id])?;
        if !state.datacenters.iter().any(|dc| dc.id == datacenter_id) {
            return Err(not_found("data-centers", datacenter_id));
        }
        Ok(state.images.clone())
    }

    async fn list_sizes(&self, datacenter_id: &str, image_id: i64) -> Result<Vec<MachineSize>> {
        let mut state = self.lock()?;
        let image = image_id.to_string();
        state.begin_read("list_sizes", &[datacenter_id, image.as_str()])?;
        if !state.datacenters.iter().any(|dc| dc.id == datacenter_id) {
            return Err(not_found("data-centers", datacenter_id));
        }
        Ok(state.sizes.clone())
    }

    async fn volume_catalog(&self, datacenter_id: &str) -> Result<Vec<VolumeTypeOffering>> {
        let mut state = self.lock()?;
        state.begin_read("volume_catalog", &[datacenter_id])?;
        Ok(state.volume_types.clone())
    }

    // =========================================================================
    // Networks
    // =========================================================================

    async fn create_network(&self, request: &NetworkRequest) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("create_network", &[request.name.as_str()])? {
            return Ok(failed);
        }
        let id = state.next_id("net");
        let location = state.location(&request.datacenter_id);
        let allocation_pools = if request.dhcp_server_enabled {
            vec![AllocationPool {
                start: request.dhcp_start_address.clone(),
                end: request.dhcp_end_address.clone(),
            }]
        } else {
            Vec::new()
        };
        state.networks.insert(
            id.clone(),
            Network {
                id: id.clone(),
                name: request.name.clone(),
                description: request.description.clone(),
                network_type: request.network_type.as_str().to_string(),
                cidr_block: request.cidr_block.clone(),
                gateway_ip: request.default_route.clone(),
                snat: if request.snat_enabled { "Enabled" } else { "Disabled" }.to_string(),
                dns_nameservers: request.dns_servers.join(","),
                connected_machines: "0".to_string(),
                allocation_pools,
                location,
                created_at: "2024-05-01T10:00:00Z".to_string(),
                updated_at: "2024-05-01T10:00:00Z".to_string(),
            },
        );
        info!(network_id = %id, "Mock network created");
        Ok(state.job(Some(&id)))
    }

    async fn get_network(&self, network_id: &str) -> Result<Network> {
        let mut state = self.lock()?;
        state.begin_read("get_network", &[network_id])?;
        let attached = state
            .machines
            .values()
            .filter(|m| m.interfaces.iter().any(|i| i.network_id == network_id))
            .count();
        let mut network = state
            .networks
            .get(network_id)
            .cloned()
            .ok_or_else(|| not_found("networks", network_id))?;
        network.connected_machines = attached.to_string();
        Ok(network)
    }

    async fn update_network(&self, network_id: &str, request: &NetworkRequest) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("update_network", &[network_id])? {
            return Ok(failed);
        }
        let network = state
            .networks
            .get_mut(network_id)
            .ok_or_else(|| not_found("networks", network_id))?;
        network.name = request.name.clone();
        network.description = request.description.clone();
        network.cidr_block = request.cidr_block.clone();
        network.gateway_ip = request.default_route.clone();
        network.dns_nameservers = request.dns_servers.join(",");
        network.snat = if request.snat_enabled { "Enabled" } else { "Disabled" }.to_string();
        network.allocation_pools = if request.dhcp_server_enabled {
            vec![AllocationPool {
                start: request.dhcp_start_address.clone(),
                end: request.dhcp_end_address.clone(),
            }]
        } else {
            Vec::new()
        };
        network.updated_at = "2024-05-02T10:00:00Z".to_string();
        Ok(state.job(Some(network_id)))
    }

    async fn delete_network(&self, network_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("delete_network", &[network_id])? {
            return Ok(failed);
        }
        if !state.networks.contains_key(network_id) {
            return Err(not_found("networks", network_id));
        }
        let in_use = state
            .machines
            .values()
            .any(|m| m.interfaces.iter().any(|i| i.network_id == network_id));
        if in_use {
            return Err(http("delete_network", 409, "network still has attached machines"));
        }
        state.networks.remove(network_id);
        Ok(state.job(Some(network_id)))
    }

    async fn network_machines(&self, network_id: &str) -> Result<Vec<AttachedMachine>> {
        let mut state = self.lock()?;
        state.begin_read("network_machines", &[network_id])?;
        if !state.networks.contains_key(network_id) {
            return Err(not_found("networks", network_id));
        }
        Ok(state
            .machines
            .values()
            .filter(|m| m.interfaces.iter().any(|i| i.network_id == network_id))
            .map(|m| AttachedMachine {
                id: m.machine.id.clone(),
                name: m.machine.name.clone(),
            })
            .collect())
    }

    // =========================================================================
    // Virtual Machines
    // =========================================================================

    async fn create_machine(&self, request: &MachineRequest) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("create_machine", &[request.name.as_str()])? {
            return Ok(failed);
        }
        let image = state
            .images
            .iter()
            .find(|i| i.id == request.image_id)
            .cloned()
            .ok_or_else(|| http("create_machine", 400, "unknown image"))?;
        let size = state
            .sizes
            .iter()
            .find(|s| s.id == request.configuration_id)
            .cloned()
            .ok_or_else(|| http("create_machine", 400, "unknown configuration"))?;
        for network_id in &request.network_ids {
            if !state.networks.contains_key(network_id) {
                return Err(not_found("networks", network_id));
            }
        }

        let id = state.next_id("vm");
        let location = state.location(&request.datacenter_id);
        state.machines.insert(
            id.clone(),
            MockMachine {
                machine: Machine {
                    id: id.clone(),
                    name: request.name.clone(),
                    status: Machine::SHUTOFF.to_string(),
                    image: image.name,
                    configuration_id: size.id,
                    configuration: size.name,
                    cpu: size.cpu,
                    ram: size.ram,
                    disk: size.disk,
                    username: "gpcn".to_string(),
                    location,
                    created_at: "2024-05-01T10:00:00Z".to_string(),
                    updated_at: "2024-05-01T10:00:00Z".to_string(),
                },
                interfaces: Vec::new(),
                next_slot: 0,
            },
        );
        for network_id in &request.network_ids {
            state.add_interface(&id, network_id)?;
        }
        if request.allocate_public_ip {
            let pip = state.next_id("pip");
            let entry = state.machine_mut(&id)?;
            if let Some(primary) = entry.interfaces.iter_mut().find(|i| i.is_primary) {
                primary.public_ip = "203.0.113.10".to_string();
                primary.public_ip_id = pip;
            }
        }
        info!(machine_id = %id, "Mock virtual machine created");
        Ok(state.job(Some(&id)))
    }

    async fn get_machine(&self, machine_id: &str) -> Result<Machine> {
        let mut state = self.lock()?;
        state.begin_read("get_machine", &[machine_id])?;
        let scripted = state
            .status_scripts
            .get_mut(machine_id)
            .and_then(|q| q.pop_front());
        let mut machine = state
            .machines
            .get(machine_id)
            .map(|m| m.machine.clone())
            .ok_or_else(|| not_found("virtual-machines", machine_id))?;
        if let Some(status) = scripted {
            machine.status = status;
        }
        Ok(machine)
    }

    async fn rename_machine(&self, machine_id: &str, name: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("rename_machine", &[machine_id, name])? {
            return Ok(failed);
        }
        state.machine_mut(machine_id)?.machine.name = name.to_string();
        Ok(JobHandle::none())
    }

    async fn resize_machine(&self, machine_id: &str, configuration_id: i64) -> Result<JobHandle> {
        let mut state = self.lock()?;
        let configuration = configuration_id.to_string();
        if let Some(failed) = state.begin("resize_machine", &[machine_id, configuration.as_str()])? {
            return Ok(failed);
        }
        let size = state
            .sizes
            .iter()
            .find(|s| s.id == configuration_id)
            .cloned()
            .ok_or_else(|| http("resize_machine", 400, "unknown configuration"))?;
        let entry = state.machine_mut(machine_id)?;
        if entry.machine.status.eq_ignore_ascii_case(Machine::RUNNING) {
            return Err(http("resize_machine", 409, "machine must be stopped to resize"));
        }
        entry.machine.configuration_id = size.id;
        entry.machine.configuration = size.name;
        entry.machine.cpu = size.cpu;
        entry.machine.ram = size.ram;
        entry.machine.disk = size.disk;
        Ok(state.job(Some(machine_id)))
    }

    async fn start_machine(&self, machine_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.begin_read("start_machine", &[machine_id])?;
        state.machine_mut(machine_id)?.machine.status = Machine::RUNNING.to_string();
        Ok(())
    }

    async fn stop_machine(&self, machine_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.begin_read("stop_machine", &[machine_id])?;
        state.machine_mut(machine_id)?.machine.status = Machine::SHUTOFF.to_string();
        Ok(())
    }

    async fn delete_machine(&self, machine_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("delete_machine", &[machine_id])? {
            return Ok(failed);
        }
        let running = state
            .machine_mut(machine_id)?
            .machine
            .status
            .eq_ignore_ascii_case(Machine::RUNNING);
        if running {
            return Err(http("delete_machine", 409, "machine must be stopped before deletion"));
        }
        state.machines.remove(machine_id);
        for volume in state.volumes.values_mut() {
            if volume.machine_id.as_deref() == Some(machine_id) {
                volume.machine_id = None;
                volume.machine_name = None;
            }
        }
        Ok(state.job(Some(machine_id)))
    }

    // =========================================================================
    // Network Interfaces
    // =========================================================================

    async fn list_interfaces(&self, machine_id: &str) -> Result<Vec<NetworkInterface>> {
        let mut state = self.lock()?;
        state.begin_read("list_interfaces", &[machine_id])?;
        Ok(state.machine_mut(machine_id)?.interfaces.clone())
    }

    async fn attach_interface(&self, machine_id: &str, network_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("attach_interface", &[machine_id, network_id])? {
            return Ok(failed);
        }
        state.add_interface(machine_id, network_id)?;
        Ok(state.job(Some(machine_id)))
    }

    async fn set_primary_interface(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("set_primary_interface", &[machine_id, interface_id])? {
            return Ok(failed);
        }
        let entry = state.machine_mut(machine_id)?;
        if !entry.interfaces.iter().any(|i| i.id == interface_id) {
            return Err(not_found("network-interfaces", interface_id));
        }
        for nic in entry.interfaces.iter_mut() {
            nic.is_primary = nic.id == interface_id;
        }
        Ok(JobHandle::none())
    }

    async fn detach_interface(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("detach_interface", &[machine_id, interface_id])? {
            return Ok(failed);
        }
        let entry = state.machine_mut(machine_id)?;
        let idx = entry
            .interfaces
            .iter()
            .position(|i| i.id == interface_id)
            .ok_or_else(|| not_found("network-interfaces", interface_id))?;
        if entry.interfaces[idx].is_primary && entry.interfaces.len() > 1 {
            return Err(http("detach_interface", 409, "cannot detach the primary interface"));
        }
        entry.interfaces.remove(idx);
        Ok(state.job(Some(machine_id)))
    }

    async fn allocate_public_ip(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("allocate_public_ip", &[machine_id, interface_id])? {
            return Ok(failed);
        }
        let pip = state.next_id("pip");
        let entry = state.machine_mut(machine_id)?;
        let nic = entry
            .interfaces
            .iter_mut()
            .find(|i| i.id == interface_id)
            .ok_or_else(|| not_found("network-interfaces", interface_id))?;
        if nic.network_type.eq_ignore_ascii_case("custom") {
            return Err(http("allocate_public_ip", 400, "public IPs require a standard network"));
        }
        nic.public_ip = "203.0.113.20".to_string();
        nic.public_ip_id = pip;
        Ok(state.job(Some(machine_id)))
    }

    async fn release_public_ip(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("release_public_ip", &[machine_id, interface_id])? {
            return Ok(failed);
        }
        let entry = state.machine_mut(machine_id)?;
        let nic = entry
            .interfaces
            .iter_mut()
            .find(|i| i.id == interface_id)
            .ok_or_else(|| not_found("network-interfaces", interface_id))?;
        nic.public_ip.clear();
        nic.public_ip_id.clear();
        Ok(state.job(Some(machine_id)))
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn create_volume(&self, request: &VolumeRequest) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("create_volume", &[request.name.as_str()])? {
            return Ok(failed);
        }
        if state.volume_size_id(request.volume_type_id, request.size_gb) != Some(request.volume_size_id) {
            return Err(http("create_volume", 400, "size is not offered for this volume type"));
        }
        let id = state.next_id("vol");
        let location = state.location(&request.datacenter_id);
        let type_name = VolumeType::from_type_id(request.volume_type_id)
            .map(|t| t.to_string())
            .unwrap_or_default();
        state.volumes.insert(
            id.clone(),
            Volume {
                id: id.clone(),
                name: request.name.clone(),
                size_gb: request.size_gb,
                volume_size_id: request.volume_size_id,
                volume_type_id: request.volume_type_id,
                volume_type: type_name,
                location,
                created_at: "2024-05-01T10:00:00Z".to_string(),
                updated_at: "2024-05-01T10:00:00Z".to_string(),
                ..Default::default()
            },
        );
        Ok(state.job(Some(&id)))
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        let mut state = self.lock()?;
        state.begin_read("get_volume", &[volume_id])?;
        state
            .volumes
            .get(volume_id)
            .cloned()
            .ok_or_else(|| not_found("volumes", volume_id))
    }

    async fn resize_volume(&self, volume_id: &str, size_gb: i64) -> Result<JobHandle> {
        let mut state = self.lock()?;
        let size = size_gb.to_string();
        if let Some(failed) = state.begin("resize_volume", &[volume_id, size.as_str()])? {
            return Ok(failed);
        }
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volumes", volume_id))?;
        if size_gb < volume.size_gb {
            return Err(http("resize_volume", 400, "volumes cannot shrink"));
        }
        volume.size_gb = size_gb;
        Ok(state.job(Some(volume_id)))
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("delete_volume", &[volume_id])? {
            return Ok(failed);
        }
        let attached = state
            .volumes
            .get(volume_id)
            .ok_or_else(|| not_found("volumes", volume_id))?
            .machine_id
            .is_some();
        if attached {
            return Err(http("delete_volume", 409, "volume is attached to a machine"));
        }
        state.volumes.remove(volume_id);
        Ok(state.job(Some(volume_id)))
    }

    async fn attach_volume(&self, volume_id: &str, machine_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("attach_volume", &[volume_id, machine_id])? {
            return Ok(failed);
        }
        let name = state.machine_mut(machine_id)?.machine.name.clone();
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volumes", volume_id))?;
        if volume.machine_id.is_some() {
            return Err(http("attach_volume", 409, "volume is already attached"));
        }
        volume.machine_id = Some(machine_id.to_string());
        volume.machine_name = Some(name);
        Ok(state.job(Some(volume_id)))
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<JobHandle> {
        let mut state = self.lock()?;
        if let Some(failed) = state.begin("detach_volume", &[volume_id])? {
            return Ok(failed);
        }
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volumes", volume_id))?;
        volume.machine_id = None;
        volume.machine_name = None;
        Ok(state.job(Some(volume_id)))
    }
}
