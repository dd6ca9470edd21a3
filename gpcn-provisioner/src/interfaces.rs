//! Network interfaces of a machine and the primary-election transition.
//!
//! The backend keeps exactly one primary interface per machine. The only
//! place this crate changes which interface is primary is
//! [`InterfaceOps::elect_new_primary`]; every flow that is about to remove
//! the primary goes through it first.

use tracing::{info, instrument, warn};

use crate::error::{ProvisionError, Result};
use crate::manager::Provisioner;
use crate::types::NetworkInterface;

/// Snapshot of a machine's interfaces in backend order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSet {
    interfaces: Vec<NetworkInterface>,
}

impl InterfaceSet {
    pub fn new(interfaces: Vec<NetworkInterface>) -> Self {
        Self { interfaces }
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkInterface> {
        self.interfaces.iter()
    }

    pub fn into_vec(self) -> Vec<NetworkInterface> {
        self.interfaces
    }

    pub fn primary(&self) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|i| i.is_primary)
    }

    /// The interface attached to `network_id`, compared case-insensitively.
    pub fn find_by_network(&self, network_id: &str) -> Option<&NetworkInterface> {
        self.interfaces
            .iter()
            .find(|i| i.network_id.eq_ignore_ascii_case(network_id))
    }

    /// Network identifiers with the primary interface's network first.
    pub fn network_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.primary().map(|p| p.network_id.clone()).into_iter().collect();
        ids.extend(
            self.interfaces
                .iter()
                .filter(|i| !i.is_primary)
                .map(|i| i.network_id.clone()),
        );
        ids
    }

    /// Whether the primary interface carries a public IP.
    pub fn has_public_ip(&self) -> bool {
        self.primary().map(NetworkInterface::has_public_ip).unwrap_or(false)
    }

    /// Whether the primary interface sits on one of `networks`.
    pub fn primary_in(&self, networks: &[String]) -> bool {
        self.primary()
            .map(|p| networks.iter().any(|n| n.eq_ignore_ascii_case(&p.network_id)))
            .unwrap_or(false)
    }

    /// The interface that should become primary when the interfaces in
    /// `excluding` go away: the first one, in backend order, that is neither
    /// primary nor excluded.
    pub fn election_candidate(&self, excluding: &[&str]) -> Option<&NetworkInterface> {
        self.interfaces
            .iter()
            .find(|i| !i.is_primary && !excluding.contains(&i.id.as_str()))
    }
}

/// Interface operations on one machine.
pub struct InterfaceOps<'a> {
    ctx: &'a Provisioner,
}

impl<'a> InterfaceOps<'a> {
    pub fn new(ctx: &'a Provisioner) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, machine_id: &str) -> Result<InterfaceSet> {
        Ok(InterfaceSet::new(self.ctx.api().list_interfaces(machine_id).await?))
    }

    #[instrument(skip(self), fields(machine_id = %machine_id, network_id = %network_id))]
    pub async fn attach(&self, machine_id: &str, network_id: &str) -> Result<()> {
        info!("Attaching network interface");
        let handle = self.ctx.api().attach_interface(machine_id, network_id).await?;
        self.ctx
            .jobs()
            .await_handle(&handle, "attach network interface")
            .await?;
        info!("Network interface attached");
        Ok(())
    }

    #[instrument(skip(self), fields(machine_id = %machine_id, interface_id = %interface_id))]
    pub async fn detach(&self, machine_id: &str, interface_id: &str) -> Result<()> {
        info!("Detaching network interface");
        let handle = self.ctx.api().detach_interface(machine_id, interface_id).await?;
        self.ctx
            .jobs()
            .await_handle(&handle, "detach network interface")
            .await?;
        info!("Network interface detached");
        Ok(())
    }

    /// Move the primary designation away from the current primary.
    ///
    /// `excluding` lists interfaces that must not be chosen, typically the
    /// ones about to be removed.
    #[instrument(skip(self, current, excluding), fields(machine_id = %machine_id))]
    pub async fn elect_new_primary(
        &self,
        machine_id: &str,
        current: &InterfaceSet,
        excluding: &[&str],
    ) -> Result<NetworkInterface> {
        let candidate = current.election_candidate(excluding).cloned().ok_or_else(|| {
            ProvisionError::Validation(format!(
                "virtual machine {} has no other network interface that could become primary",
                machine_id
            ))
        })?;

        info!(
            interface_id = %candidate.id,
            network_id = %candidate.network_id,
            "Electing new primary network interface"
        );
        let handle = self
            .ctx
            .api()
            .set_primary_interface(machine_id, &candidate.id)
            .await?;
        self.ctx.jobs().await_handle(&handle, "set primary interface").await?;
        Ok(candidate)
    }

    /// Detach the machine's interface on `network_id`, electing a new
    /// primary first when that interface is primary and others remain.
    ///
    /// Fails when the machine has no interface on the network.
    pub async fn detach_network(&self, machine_id: &str, network_id: &str) -> Result<()> {
        let current = self.list(machine_id).await?;
        let target = current.find_by_network(network_id).cloned().ok_or_else(|| {
            ProvisionError::InconsistentState(format!(
                "virtual machine {} is reported on network {} but has no interface for it",
                machine_id, network_id
            ))
        })?;

        if target.is_primary && current.len() > 1 {
            self.elect_new_primary(machine_id, &current, &[target.id.as_str()])
                .await?;
        }
        self.detach(machine_id, &target.id).await
    }

    /// Allocate a public IP on the primary interface.
    pub async fn allocate_public_ip(&self, machine_id: &str) -> Result<()> {
        let current = self.list(machine_id).await?;
        let primary = self.require_primary(machine_id, &current)?;
        if primary.has_public_ip() {
            warn!(machine_id = %machine_id, "Primary interface already has a public IP");
            return Ok(());
        }
        let handle = self.ctx.api().allocate_public_ip(machine_id, &primary.id).await?;
        self.ctx.jobs().await_handle(&handle, "allocate public IP").await?;
        info!(machine_id = %machine_id, "Public IP allocated");
        Ok(())
    }

    /// Release the public IP of the primary interface.
    pub async fn release_public_ip(&self, machine_id: &str) -> Result<()> {
        let current = self.list(machine_id).await?;
        let primary = self.require_primary(machine_id, &current)?;
        if !primary.has_public_ip() {
            return Ok(());
        }
        let handle = self.ctx.api().release_public_ip(machine_id, &primary.id).await?;
        self.ctx.jobs().await_handle(&handle, "release public IP").await?;
        info!(machine_id = %machine_id, "Public IP released");
        Ok(())
    }

    fn require_primary<'s>(&self, machine_id: &str, set: &'s InterfaceSet) -> Result<&'s NetworkInterface> {
        set.primary().ok_or_else(|| {
            ProvisionError::InconsistentState(format!(
                "virtual machine {} has no primary network interface",
                machine_id
            ))
        })
    }
}
