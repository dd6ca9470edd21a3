//! Network operations.

use ipnet::Ipv4Net;
use tracing::{info, instrument};

use crate::error::{ProvisionError, Result, StepContext};
use crate::manager::Provisioner;
use crate::types::{AttachedMachine, Network, NetworkRequest, NetworkSpec, NetworkType};

/// First usable host address of an IPv4 CIDR block (`10.0.0.0/24` -> `10.0.0.1`).
pub fn first_host(cidr_block: &str) -> Result<String> {
    let net: Ipv4Net = cidr_block
        .trim()
        .parse()
        .map_err(|e| ProvisionError::Validation(format!("invalid cidr_block '{}': {}", cidr_block, e)))?;
    net.hosts()
        .next()
        .map(|ip| ip.to_string())
        .ok_or_else(|| ProvisionError::Validation(format!("cidr_block '{}' has no usable host addresses", cidr_block)))
}

fn required<'s>(value: &'s Option<String>, field: &str, name: &str) -> Result<&'s str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProvisionError::Validation(format!(
            "{} is required for standard network '{}'",
            field, name
        ))),
    }
}

/// Compose the create/update body for a network.
///
/// Standard networks get a gateway on the first host of their CIDR block with
/// DHCP, DNS serving and SNAT enabled. Custom networks get none of these.
pub fn network_request(spec: &NetworkSpec) -> Result<NetworkRequest> {
    match spec.network_type {
        NetworkType::Standard => {
            let cidr_block = required(&spec.cidr_block, "cidr_block", &spec.name)?;
            let dhcp_start = required(&spec.dhcp_start_address, "dhcp_start_address", &spec.name)?;
            let dhcp_end = required(&spec.dhcp_end_address, "dhcp_end_address", &spec.name)?;
            if spec.dns_servers.is_empty() {
                return Err(ProvisionError::Validation(format!(
                    "dns_servers is required for standard network '{}'",
                    spec.name
                )));
            }
            Ok(NetworkRequest {
                name: spec.name.clone(),
                description: spec.description.clone(),
                datacenter_id: spec.datacenter_id.clone(),
                network_type: spec.network_type,
                cidr_block: cidr_block.to_string(),
                default_route: first_host(cidr_block)?,
                default_route_enabled: true,
                dhcp_start_address: dhcp_start.to_string(),
                dhcp_end_address: dhcp_end.to_string(),
                dhcp_server_enabled: true,
                dns_servers: spec.dns_servers.clone(),
                serve_dns_servers_enabled: true,
                snat_enabled: true,
            })
        }
        NetworkType::Custom => Ok(NetworkRequest {
            name: spec.name.clone(),
            description: spec.description.clone(),
            datacenter_id: spec.datacenter_id.clone(),
            network_type: spec.network_type,
            cidr_block: spec.cidr_block.clone().unwrap_or_default(),
            default_route: String::new(),
            default_route_enabled: false,
            dhcp_start_address: spec.dhcp_start_address.clone().unwrap_or_default(),
            dhcp_end_address: spec.dhcp_end_address.clone().unwrap_or_default(),
            dhcp_server_enabled: false,
            dns_servers: spec.dns_servers.clone(),
            serve_dns_servers_enabled: false,
            snat_enabled: false,
        }),
    }
}

/// Network create, read, update and single-shot delete.
pub struct NetworkOps<'a> {
    ctx: &'a Provisioner,
}

impl<'a> NetworkOps<'a> {
    pub fn new(ctx: &'a Provisioner) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, network_type = %spec.network_type))]
    pub async fn create(&self, spec: &NetworkSpec) -> Result<Network> {
        let request = network_request(spec)?;
        info!("Creating network");

        let created = async {
            let handle = self.ctx.api().create_network(&request).await?;
            self.ctx.jobs().await_resource(&handle, "create network").await
        }
        .await
        .step(|| format!("create network '{}'", spec.name))?;

        info!(network_id = %created, "Network created");
        self.get(&created).await
    }

    pub async fn get(&self, network_id: &str) -> Result<Network> {
        self.ctx
            .api()
            .get_network(network_id)
            .await
            .step(|| format!("read network {}", network_id))
    }

    /// Update name, description, addressing and DNS. Type and datacenter
    /// changes require replacement and are rejected by the caller.
    #[instrument(skip(self, spec), fields(network_id = %network_id))]
    pub async fn update(&self, network_id: &str, spec: &NetworkSpec) -> Result<Network> {
        let request = network_request(spec)?;
        info!("Updating network");

        async {
            let handle = self.ctx.api().update_network(network_id, &request).await?;
            self.ctx.jobs().await_handle(&handle, "update network").await
        }
        .await
        .step(|| format!("update network {}", network_id))?;

        self.get(network_id).await
    }

    /// Issue one delete call and await its job.
    pub async fn delete_once(&self, network_id: &str) -> Result<()> {
        let handle = self.ctx.api().delete_network(network_id).await?;
        self.ctx.jobs().await_handle(&handle, "delete network").await?;
        Ok(())
    }

    pub async fn attached_machines(&self, network_id: &str) -> Result<Vec<AttachedMachine>> {
        self.ctx
            .api()
            .network_machines(network_id)
            .await
            .step(|| format!("list machines attached to network {}", network_id))
    }
}
