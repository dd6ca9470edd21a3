//! Host-facing resource entry points.
//!
//! A host runtime drives each resource kind through [`ManagedResource`]:
//! it hands over desired configuration and receives a complete state
//! document after every mutating call.

use async_trait::async_trait;
use tracing::info;

use crate::error::{ProvisionError, ResourceKind, Result, Warning};
use crate::manager::Provisioner;
use crate::state::{MachineState, NetworkState, VolumeState};
use crate::steps::Applied;
use crate::types::{Machine, MachineSpec, NetworkSpec, VolumeSpec};

/// Create/read/update/delete/import for one resource kind.
#[async_trait]
pub trait ManagedResource: Send + Sync {
    /// Configuration supplied by the host.
    type Desired: Send + Sync;
    /// Document returned to the host.
    type State: Send;

    const KIND: ResourceKind;

    async fn create(&self, desired: &Self::Desired) -> Result<Applied<Self::State>>;

    /// Read current state. `None` means the resource no longer exists.
    ///
    /// `desired` is the host's last known configuration, when it has one.
    async fn read(&self, id: &str, desired: Option<&Self::Desired>) -> Result<Option<Self::State>>;

    async fn update(&self, id: &str, prior: &Self::Desired, desired: &Self::Desired) -> Result<Applied<Self::State>>;

    async fn delete(&self, id: &str, prior: &Self::Desired) -> Result<Vec<Warning>>;

    /// Adopt an existing resource by identifier.
    async fn import(&self, id: &str) -> Result<Self::State> {
        self.read(id, None).await?.ok_or_else(|| {
            ProvisionError::Validation(format!("cannot import {} {}: it does not exist", Self::KIND, id))
        })
    }
}

/// Fields that cannot change in place.
fn require_in_place(kind: ResourceKind, changed: &[(&str, bool)]) -> Result<()> {
    let fields: Vec<&str> = changed.iter().filter(|(_, c)| *c).map(|(f, _)| *f).collect();
    if fields.is_empty() {
        return Ok(());
    }
    Err(ProvisionError::Validation(format!(
        "changing {} of a {} requires replacement",
        fields.join(", "),
        kind
    )))
}

fn absent_when_gone<T>(read: Result<T>) -> Result<Option<T>> {
    match read {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

// =============================================================================
// Network
// =============================================================================

pub struct NetworkResource {
    ctx: Provisioner,
}

impl NetworkResource {
    pub fn new(ctx: Provisioner) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ManagedResource for NetworkResource {
    type Desired = NetworkSpec;
    type State = NetworkState;

    const KIND: ResourceKind = ResourceKind::Network;

    async fn create(&self, desired: &NetworkSpec) -> Result<Applied<NetworkState>> {
        let network = self.ctx.networks().create(desired).await?;
        Ok(Applied::clean(NetworkState::from_snapshot(&network)))
    }

    async fn read(&self, id: &str, _desired: Option<&NetworkSpec>) -> Result<Option<NetworkState>> {
        let network = absent_when_gone(self.ctx.networks().get(id).await)?;
        Ok(network.as_ref().map(NetworkState::from_snapshot))
    }

    async fn update(&self, id: &str, prior: &NetworkSpec, desired: &NetworkSpec) -> Result<Applied<NetworkState>> {
        require_in_place(
            Self::KIND,
            &[
                ("network_type", prior.network_type != desired.network_type),
                ("datacenter_id", prior.datacenter_id != desired.datacenter_id),
            ],
        )?;
        let network = self.ctx.networks().update(id, desired).await?;
        Ok(Applied::clean(NetworkState::from_snapshot(&network)))
    }

    async fn delete(&self, id: &str, _prior: &NetworkSpec) -> Result<Vec<Warning>> {
        self.ctx.orchestrator().delete_network(id).await?;
        Ok(Vec::new())
    }
}

// =============================================================================
// Virtual machine
// =============================================================================

pub struct MachineResource {
    ctx: Provisioner,
}

impl MachineResource {
    pub fn new(ctx: Provisioner) -> Self {
        Self { ctx }
    }

    async fn project(&self, seed: MachineState, machine: &Machine) -> Result<MachineState> {
        let interfaces = self.ctx.interfaces().list(&machine.id).await?;
        Ok(seed.with_snapshot(machine).with_interfaces(interfaces))
    }
}

#[async_trait]
impl ManagedResource for MachineResource {
    type Desired = MachineSpec;
    type State = MachineState;

    const KIND: ResourceKind = ResourceKind::Machine;

    async fn create(&self, desired: &MachineSpec) -> Result<Applied<MachineState>> {
        let applied = self.ctx.orchestrator().create_machine(desired).await?;
        let state = self.project(MachineState::seeded(desired), &applied.state).await?;
        Ok(Applied::new(state, applied.warnings))
    }

    async fn read(&self, id: &str, desired: Option<&MachineSpec>) -> Result<Option<MachineState>> {
        let Some(machine) = absent_when_gone(self.ctx.machines().get(id).await)? else {
            return Ok(None);
        };
        let seed = desired.map(MachineState::seeded).unwrap_or_default();
        self.project(seed, &machine).await.map(Some)
    }

    async fn update(&self, id: &str, prior: &MachineSpec, desired: &MachineSpec) -> Result<Applied<MachineState>> {
        require_in_place(
            Self::KIND,
            &[
                ("image", !prior.image.eq_ignore_ascii_case(&desired.image)),
                ("datacenter_id", prior.datacenter_id != desired.datacenter_id),
            ],
        )?;
        let applied = self.ctx.orchestrator().update_machine(id, prior, desired).await?;
        let state = self.project(MachineState::seeded(desired), &applied.state).await?;
        Ok(Applied::new(state, applied.warnings))
    }

    async fn delete(&self, id: &str, prior: &MachineSpec) -> Result<Vec<Warning>> {
        let warnings = self.ctx.orchestrator().delete_machine(id, &prior.volumes).await?;
        info!(machine_id = %id, warnings = warnings.len(), "Virtual machine removed");
        Ok(warnings)
    }
}

// =============================================================================
// Volume
// =============================================================================

pub struct VolumeResource {
    ctx: Provisioner,
}

impl VolumeResource {
    pub fn new(ctx: Provisioner) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ManagedResource for VolumeResource {
    type Desired = VolumeSpec;
    type State = VolumeState;

    const KIND: ResourceKind = ResourceKind::Volume;

    async fn create(&self, desired: &VolumeSpec) -> Result<Applied<VolumeState>> {
        let volume = self.ctx.volumes().create(desired).await?;
        Ok(Applied::clean(VolumeState::from_snapshot(&volume)))
    }

    async fn read(&self, id: &str, _desired: Option<&VolumeSpec>) -> Result<Option<VolumeState>> {
        let volume = absent_when_gone(self.ctx.volumes().get(id).await)?;
        Ok(volume.as_ref().map(VolumeState::from_snapshot))
    }

    async fn update(&self, id: &str, prior: &VolumeSpec, desired: &VolumeSpec) -> Result<Applied<VolumeState>> {
        require_in_place(
            Self::KIND,
            &[
                ("volume_type", prior.volume_type != desired.volume_type),
                ("datacenter_id", prior.datacenter_id != desired.datacenter_id),
                ("name", prior.name != desired.name),
            ],
        )?;
        let volumes = self.ctx.volumes();
        let current = volumes.get(id).await?;
        let volume = volumes.resize(&current, desired).await?;
        Ok(Applied::clean(VolumeState::from_snapshot(&volume)))
    }

    async fn delete(&self, id: &str, _prior: &VolumeSpec) -> Result<Vec<Warning>> {
        match self.ctx.volumes().delete(id).await {
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            other => other.map(|()| Vec::new()),
        }
    }
}
