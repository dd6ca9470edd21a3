//! Composite machine create, update and delete.

use std::collections::HashSet;

use tracing::{info, instrument, warn};

use crate::diff::ListDiff;
use crate::error::{ProvisionError, Result, StepContext, Warning};
use crate::interfaces::InterfaceSet;
use crate::steps::{Applied, StepPlan};
use crate::types::{Machine, MachineRequest, MachineSize, MachineSpec, Network, NetworkType};

use super::Orchestrator;

/// Reject a public IP on a custom primary network.
///
/// `primary` is the first network in the desired list. The check is pure so
/// callers can run it before any mutation.
pub fn check_public_ip(allocate_public_ip: bool, primary: Option<&Network>) -> Result<()> {
    let Some(network) = primary.filter(|_| allocate_public_ip) else {
        return Ok(());
    };
    if NetworkType::parse(&network.network_type) == Some(NetworkType::Custom) {
        return Err(ProvisionError::Validation(format!(
            "a public IP cannot be allocated on custom network '{}' ({}); choose a standard network as the first network",
            network.name, network.id
        )));
    }
    Ok(())
}

/// Interfaces left after applying `diff`. Removed networks are matched to
/// interfaces case-insensitively, so each interface counts once.
fn resulting_interface_count(current: &InterfaceSet, diff: &ListDiff) -> usize {
    let removed: HashSet<&str> = diff
        .removed
        .iter()
        .filter_map(|n| current.find_by_network(n))
        .map(|nic| nic.id.as_str())
        .collect();
    current.len().saturating_sub(removed.len()) + diff.added.len()
}

impl<'a> Orchestrator<'a> {
    async fn check_primary_network(&self, spec: &MachineSpec) -> Result<()> {
        if !spec.allocate_public_ip {
            return Ok(());
        }
        let primary = match spec.networks.first() {
            Some(network_id) => Some(self.ctx.networks().get(network_id).await?),
            None => None,
        };
        check_public_ip(spec.allocate_public_ip, primary.as_ref())
    }

    fn check_interface_count(&self, count: usize) -> Result<()> {
        let cap = self.ctx.polling().max_network_interfaces;
        if count > cap {
            return Err(ProvisionError::Validation(format!(
                "a virtual machine can hold at most {} network interfaces, {} requested",
                cap, count
            )));
        }
        Ok(())
    }

    /// Create a machine, attach its volumes and start it.
    ///
    /// Volume attaches and the start are best effort: their failures come
    /// back as warnings on an otherwise successful create.
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn create_machine(&self, spec: &MachineSpec) -> Result<Applied<Machine>> {
        self.check_interface_count(spec.networks.len())?;
        self.check_primary_network(spec).await?;

        let machines = self.ctx.machines();
        let volumes = self.ctx.volumes();
        let image = machines.resolve_image(&spec.datacenter_id, &spec.image).await?;
        let size = machines.resolve_size(&spec.datacenter_id, image.id, &spec.size).await?;

        let request = MachineRequest {
            name: spec.name.clone(),
            datacenter_id: spec.datacenter_id.clone(),
            image_id: image.id,
            configuration_id: size.id,
            allocate_public_ip: spec.allocate_public_ip,
            network_ids: spec.networks.clone(),
        };
        let machine_id = machines
            .submit_create(&request)
            .await
            .step(|| format!("create virtual machine '{}'", spec.name))?;
        machines.await_provisioned(&machine_id).await?;

        let mut plan = StepPlan::new();
        for volume_id in &spec.volumes {
            plan = plan.warn_only(
                format!("attach volume {} to virtual machine {}", volume_id, machine_id),
                volumes.attach(volume_id, &machine_id),
            );
        }
        plan = plan.warn_only(
            format!("start virtual machine {}", machine_id),
            machines.start(&machine_id, spec.wait_for_startup),
        );
        let warnings = plan.run().await?;

        let machine = machines.get(&machine_id).await?;
        info!(machine_id = %machine.id, status = %machine.status, "Virtual machine created");
        Ok(Applied::new(machine, warnings))
    }

    /// Move a machine from `prior` to `desired`.
    ///
    /// Validation runs first and issues no mutation. The machine is stopped
    /// once if networks, volumes or size change, and started again only when
    /// every change succeeded.
    #[instrument(skip(self, prior, desired), fields(machine_id = %machine_id))]
    pub async fn update_machine(
        &self,
        machine_id: &str,
        prior: &MachineSpec,
        desired: &MachineSpec,
    ) -> Result<Applied<Machine>> {
        let machines = self.ctx.machines();
        let interfaces = self.ctx.interfaces();

        let networks = ListDiff::between(&prior.networks, &desired.networks);
        let volumes = ListDiff::between(&prior.volumes, &desired.volumes);
        let size_changed = !prior.size.eq_ignore_ascii_case(&desired.size);
        let name_changed = prior.name != desired.name;
        let public_ip_changed = prior.allocate_public_ip != desired.allocate_public_ip;

        if desired.networks.is_empty() && !prior.networks.is_empty() {
            return Err(ProvisionError::Validation(format!(
                "cannot remove every network from virtual machine {}",
                machine_id
            )));
        }
        if public_ip_changed || prior.networks.first() != desired.networks.first() {
            self.check_primary_network(desired).await?;
        }
        if !networks.is_empty() {
            let current = interfaces.list(machine_id).await?;
            self.check_interface_count(resulting_interface_count(&current, &networks))?;
        }
        let new_size = if size_changed {
            Some(self.check_size_upgrade(machine_id, desired).await?)
        } else {
            None
        };

        let needs_stop = !networks.is_empty() || !volumes.is_empty() || size_changed;
        info!(
            needs_stop,
            networks = !networks.is_empty(),
            volumes = !volumes.is_empty(),
            size_changed,
            name_changed,
            public_ip_changed,
            "Updating virtual machine"
        );

        let public_ip = async {
            if desired.allocate_public_ip {
                interfaces.allocate_public_ip(machine_id).await
            } else {
                interfaces.release_public_ip(machine_id).await
            }
        };
        let resize = async {
            match &new_size {
                Some(size) => machines.resize(machine_id, size).await,
                None => Ok(()),
            }
        };

        let mut plan = StepPlan::new()
            .fatal_if(needs_stop, "stop virtual machine", machines.stop(machine_id))
            .fatal_if(
                !networks.is_empty(),
                "update network interfaces",
                self.update_network_interfaces(machine_id, &prior.networks, &desired.networks),
            )
            .fatal_if(public_ip_changed, "update public IP", public_ip)
            .fatal_if(size_changed, format!("resize to {}", desired.size), resize)
            .fatal_if(name_changed, "rename virtual machine", machines.rename(machine_id, &desired.name))
            .fatal_if(!volumes.is_empty(), "update volumes", self.update_volumes(machine_id, &volumes));
        if needs_stop {
            plan = plan.warn_only(
                "start virtual machine",
                machines.start(machine_id, desired.wait_for_startup),
            );
        }
        let warnings = plan
            .run()
            .await
            .step(|| format!("update virtual machine {}", machine_id))?;

        let machine = machines.get(machine_id).await?;
        Ok(Applied::new(machine, warnings))
    }

    /// Resolve the desired size and refuse anything with fewer CPUs than the
    /// machine has now.
    async fn check_size_upgrade(&self, machine_id: &str, desired: &MachineSpec) -> Result<MachineSize> {
        let machines = self.ctx.machines();
        let image = machines.resolve_image(&desired.datacenter_id, &desired.image).await?;
        let size = machines
            .resolve_size(&desired.datacenter_id, image.id, &desired.size)
            .await?;
        let current = machines.get(machine_id).await?;
        if size.cpu < current.cpu {
            return Err(ProvisionError::Validation(format!(
                "size '{}' has {} CPUs but virtual machine {} has {}; downsizing requires replacement",
                size.name, size.cpu, machine_id, current.cpu
            )));
        }
        Ok(size)
    }

    /// Stop the machine, detach secondary interfaces and volumes, then delete.
    ///
    /// Detach failures become warnings. An already deleted machine is a
    /// no-op.
    #[instrument(skip(self, volume_ids), fields(machine_id = %machine_id))]
    pub async fn delete_machine(&self, machine_id: &str, volume_ids: &[String]) -> Result<Vec<Warning>> {
        let machines = self.ctx.machines();
        let interfaces = self.ctx.interfaces();
        let volumes = self.ctx.volumes();

        let machine = match machines.get(machine_id).await {
            Ok(machine) => machine,
            Err(err) if err.is_not_found() => {
                warn!("Virtual machine already deleted");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };
        let secondary: Vec<_> = interfaces
            .list(machine_id)
            .await?
            .into_vec()
            .into_iter()
            .filter(|nic| !nic.is_primary)
            .collect();

        let mut plan = StepPlan::new().fatal_if(
            !machine.status_in(&[Machine::SHUTOFF]),
            "stop virtual machine",
            machines.stop(machine_id),
        );
        for nic in &secondary {
            plan = plan.warn_only(
                format!("detach network {} from virtual machine {}", nic.network_id, machine_id),
                interfaces.detach(machine_id, &nic.id),
            );
        }
        for volume_id in volume_ids {
            plan = plan.warn_only(
                format!("detach volume {} from virtual machine {}", volume_id, machine_id),
                volumes.detach(volume_id),
            );
        }
        plan = plan.fatal("delete virtual machine", machines.delete_once(machine_id));

        plan.run()
            .await
            .step(|| format!("delete virtual machine {}", machine_id))
    }
}
