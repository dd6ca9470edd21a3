//! [`CloudApi`] over the control plane's JSON REST API.
//!
//! ```text
//!   RestApi ── HttpTransport ──▶ {host}/v1/resource/...
//!      │                              │
//!      └── wire::* ◀── Envelope<T> ◀──┘
//! ```

mod transport;
mod wire;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::Result;
use crate::traits::CloudApi;
use crate::types::{
    AttachedMachine, Datacenter, Job, JobHandle, Machine, MachineImage, MachineRequest, MachineSize, Network,
    NetworkInterface, NetworkRequest, Volume, VolumeRequest, VolumeTypeOffering,
};

pub use transport::{ApiConfig, HttpTransport, API_KEY_HEADER, REQUEST_ID_HEADER};

use wire::{
    AttachedMachineBody, DatacenterBody, ImageBody, InterfaceBody, JobPayload, MachineEnvelopeData, NetworkBody,
    SizeBody, VolumeBody, VolumeCatalogBody,
};

pub const JOBS_PATH: &str = "/v1/resource/jobs/status";
pub const NETWORKS_PATH: &str = "/v1/resource/networks/";
pub const MACHINES_PATH: &str = "/v1/resource/virtual-machines/";
pub const VOLUMES_PATH: &str = "/v1/resource/volumes/";
pub const DATACENTERS_PATH: &str = "/v1/resource/data-centers/";

fn network_body(request: &NetworkRequest, include_immutable: bool) -> Value {
    let mut body = json!({
        "cidrBlock": request.cidr_block,
        "defaultRoute": request.default_route,
        "defaultRouteEnabled": request.default_route_enabled,
        "description": request.description,
        "dhcpStartAddress": request.dhcp_start_address,
        "dhcpEndAddress": request.dhcp_end_address,
        "dhcpServerEnabled": request.dhcp_server_enabled,
        "dnsServers": request.dns_servers,
        "name": request.name,
        "serveDNSServersEnabled": request.serve_dns_servers_enabled,
        "snatEnabled": request.snat_enabled,
    });
    if include_immutable {
        body["datacenterId"] = json!(request.datacenter_id);
        body["networkType"] = json!(request.network_type.as_str());
    }
    body
}

/// Control plane client.
#[derive(Clone)]
pub struct RestApi {
    http: HttpTransport,
}

impl RestApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            http: HttpTransport::new(config)?,
        })
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.http
    }

    /// Submit a mutation and return whatever jobs it started.
    async fn mutate(&self, method: Method, path: &str, body: Option<Value>) -> Result<JobHandle> {
        let payload: Option<JobPayload> = self.http.call(method, path, body.as_ref()).await?;
        let handle = JobPayload::into_handle(payload);
        debug!(path = %path, jobs = ?handle.ids(), "Mutation accepted");
        Ok(handle)
    }

    async fn list<B, T>(&self, path: &str) -> Result<Vec<T>>
    where
        B: serde::de::DeserializeOwned + Into<T>,
    {
        let items: Option<Vec<B>> = self.http.call(Method::GET, path, None).await?;
        Ok(items.unwrap_or_default().into_iter().map(Into::into).collect())
    }

    fn interface_path(machine_id: &str, interface_id: &str) -> String {
        format!("{}{}/network-interfaces/{}", MACHINES_PATH, machine_id, interface_id)
    }
}

#[async_trait]
impl CloudApi for RestApi {
    // =========================================================================
    // Jobs and catalog
    // =========================================================================

    async fn job_status(&self, job_ids: &[String]) -> Result<Vec<Job>> {
        let body = json!({ "jobIds": job_ids });
        let payload: Option<JobPayload> = self.http.call(Method::POST, JOBS_PATH, Some(&body)).await?;
        Ok(payload.map(JobPayload::into_jobs).unwrap_or_default())
    }

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>> {
        self.list::<DatacenterBody, _>(&format!("{}?page=1&limit=100", DATACENTERS_PATH.trim_end_matches('/')))
            .await
    }

    async fn list_images(&self, datacenter_id: &str) -> Result<Vec<MachineImage>> {
        self.list::<ImageBody, _>(&format!("{}{}/virtual-machine-images", DATACENTERS_PATH, datacenter_id))
            .await
    }

    async fn list_sizes(&self, datacenter_id: &str, image_id: i64) -> Result<Vec<MachineSize>> {
        self.list::<SizeBody, _>(&format!(
            "{}{}/virtual-machine-sizes?imageId={}",
            DATACENTERS_PATH, datacenter_id, image_id
        ))
        .await
    }

    async fn volume_catalog(&self, datacenter_id: &str) -> Result<Vec<VolumeTypeOffering>> {
        let path = format!("{}{}/volume-sizes", DATACENTERS_PATH, datacenter_id);
        let catalog: Option<VolumeCatalogBody> = self.http.call(Method::GET, &path, None).await?;
        Ok(catalog
            .map(|c| c.volume_types.into_iter().map(Into::into).collect())
            .unwrap_or_default())
    }

    // =========================================================================
    // Networks
    // =========================================================================

    async fn create_network(&self, request: &NetworkRequest) -> Result<JobHandle> {
        self.mutate(Method::POST, NETWORKS_PATH, Some(network_body(request, true)))
            .await
    }

    async fn get_network(&self, network_id: &str) -> Result<Network> {
        let path = format!("{}{}", NETWORKS_PATH, network_id);
        let body: NetworkBody = self.http.fetch(Method::GET, &path, None).await?;
        Ok(body.into())
    }

    async fn update_network(&self, network_id: &str, request: &NetworkRequest) -> Result<JobHandle> {
        let path = format!("{}{}", NETWORKS_PATH, network_id);
        self.mutate(Method::PUT, &path, Some(network_body(request, false)))
            .await
    }

    async fn delete_network(&self, network_id: &str) -> Result<JobHandle> {
        self.mutate(Method::DELETE, &format!("{}{}", NETWORKS_PATH, network_id), None)
            .await
    }

    async fn network_machines(&self, network_id: &str) -> Result<Vec<AttachedMachine>> {
        self.list::<AttachedMachineBody, _>(&format!("{}{}/virtual-machines", NETWORKS_PATH, network_id))
            .await
    }

    // =========================================================================
    // Virtual machines
    // =========================================================================

    async fn create_machine(&self, request: &MachineRequest) -> Result<JobHandle> {
        let mut body = json!({
            "allocatePublicIp": request.allocate_public_ip,
            "configurationId": request.configuration_id,
            "datacenterId": request.datacenter_id,
            "imageId": request.image_id,
            "name": request.name,
            "numberOfInstances": 1,
        });
        if !request.network_ids.is_empty() {
            let interfaces: Vec<Value> = request
                .network_ids
                .iter()
                .enumerate()
                .map(|(index, id)| json!({ "networkId": id, "primary": index == 0 }))
                .collect();
            body["networkInterfaces"] = json!(interfaces);
        }
        self.mutate(Method::POST, MACHINES_PATH, Some(body)).await
    }

    async fn get_machine(&self, machine_id: &str) -> Result<Machine> {
        let path = format!("{}{}", MACHINES_PATH, machine_id);
        let data: MachineEnvelopeData = self.http.fetch(Method::GET, &path, None).await?;
        Ok(data.into())
    }

    async fn rename_machine(&self, machine_id: &str, name: &str) -> Result<JobHandle> {
        let path = format!("{}{}", MACHINES_PATH, machine_id);
        self.mutate(Method::PUT, &path, Some(json!({ "name": name }))).await
    }

    async fn resize_machine(&self, machine_id: &str, configuration_id: i64) -> Result<JobHandle> {
        let path = format!("{}{}/size", MACHINES_PATH, machine_id);
        self.mutate(Method::PUT, &path, Some(json!({ "configurationId": configuration_id })))
            .await
    }

    async fn start_machine(&self, machine_id: &str) -> Result<()> {
        let path = format!("{}{}/start", MACHINES_PATH, machine_id);
        self.http.send(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn stop_machine(&self, machine_id: &str) -> Result<()> {
        let path = format!("{}{}/stop", MACHINES_PATH, machine_id);
        self.http.send(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn delete_machine(&self, machine_id: &str) -> Result<JobHandle> {
        self.mutate(Method::DELETE, &format!("{}{}", MACHINES_PATH, machine_id), None)
            .await
    }

    // =========================================================================
    // Network interfaces
    // =========================================================================

    async fn list_interfaces(&self, machine_id: &str) -> Result<Vec<NetworkInterface>> {
        self.list::<InterfaceBody, _>(&format!("{}{}/network-interfaces", MACHINES_PATH, machine_id))
            .await
    }

    async fn attach_interface(&self, machine_id: &str, network_id: &str) -> Result<JobHandle> {
        let path = format!("{}{}/network-interfaces", MACHINES_PATH, machine_id);
        self.mutate(Method::POST, &path, Some(json!({ "networkId": network_id })))
            .await
    }

    async fn set_primary_interface(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle> {
        let path = Self::interface_path(machine_id, interface_id);
        self.mutate(Method::PUT, &path, Some(json!({ "setPrimary": true }))).await
    }

    async fn detach_interface(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle> {
        self.mutate(Method::DELETE, &Self::interface_path(machine_id, interface_id), None)
            .await
    }

    async fn allocate_public_ip(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle> {
        let path = format!("{}/public-ip", Self::interface_path(machine_id, interface_id));
        self.mutate(Method::POST, &path, None).await
    }

    async fn release_public_ip(&self, machine_id: &str, interface_id: &str) -> Result<JobHandle> {
        let path = format!("{}/public-ip", Self::interface_path(machine_id, interface_id));
        self.mutate(Method::DELETE, &path, None).await
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn create_volume(&self, request: &VolumeRequest) -> Result<JobHandle> {
        let body = json!({
            "datacenterId": request.datacenter_id,
            "name": request.name,
            "volumeSizeId": request.volume_size_id,
            "volumeTypeId": request.volume_type_id,
            "sizeGb": request.size_gb,
        });
        self.mutate(Method::POST, VOLUMES_PATH, Some(body)).await
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        let path = format!("{}{}", VOLUMES_PATH, volume_id);
        let body: VolumeBody = self.http.fetch(Method::GET, &path, None).await?;
        Ok(body.into())
    }

    async fn resize_volume(&self, volume_id: &str, size_gb: i64) -> Result<JobHandle> {
        let path = format!("{}{}/resize", VOLUMES_PATH, volume_id);
        self.mutate(Method::PUT, &path, Some(json!({ "newSizeGb": size_gb }))).await
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<JobHandle> {
        self.mutate(Method::DELETE, &format!("{}{}", VOLUMES_PATH, volume_id), None)
            .await
    }

    async fn attach_volume(&self, volume_id: &str, machine_id: &str) -> Result<JobHandle> {
        let path = format!("{}{}/attach", VOLUMES_PATH, volume_id);
        self.mutate(Method::PUT, &path, Some(json!({ "virtualMachineId": machine_id })))
            .await
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<JobHandle> {
        self.mutate(Method::PUT, &format!("{}{}/detach", VOLUMES_PATH, volume_id), None)
            .await
    }
}
