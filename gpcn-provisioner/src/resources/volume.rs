//! Volume operations.

use tracing::{info, instrument, warn};

use crate::error::{ProvisionError, Result, StepContext};
use crate::manager::Provisioner;
use crate::types::{Volume, VolumeRequest, VolumeSpec, VolumeType, VolumeTypeOffering};

/// Find the catalog size id for a type and size.
pub fn resolve_size_id(catalog: &[VolumeTypeOffering], volume_type: VolumeType, size_gb: i64) -> Result<i64> {
    let offering = catalog
        .iter()
        .find(|t| t.id == volume_type.type_id())
        .ok_or_else(|| {
            ProvisionError::Validation(format!(
                "volume type {} is not offered in this datacenter. Valid types are: {}",
                volume_type,
                catalog.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
            ))
        })?;
    offering
        .sizes
        .iter()
        .find(|s| s.size_gb == size_gb)
        .map(|s| s.id)
        .ok_or_else(|| {
            ProvisionError::Validation(format!(
                "{} GB is not a valid size for {} volumes. Valid sizes are: {}",
                size_gb,
                volume_type,
                offering
                    .sizes
                    .iter()
                    .map(|s| format!("{} GB", s.size_gb))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

/// Volume create, read, resize, attach, detach and delete.
pub struct VolumeOps<'a> {
    ctx: &'a Provisioner,
}

impl<'a> VolumeOps<'a> {
    pub fn new(ctx: &'a Provisioner) -> Self {
        Self { ctx }
    }

    async fn size_id(&self, spec: &VolumeSpec) -> Result<i64> {
        let catalog = self
            .ctx
            .api()
            .volume_catalog(&spec.datacenter_id)
            .await
            .step(|| format!("list volume sizes in datacenter {}", spec.datacenter_id))?;
        resolve_size_id(&catalog, spec.volume_type, spec.size_gb)
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, size_gb = spec.size_gb))]
    pub async fn create(&self, spec: &VolumeSpec) -> Result<Volume> {
        let request = VolumeRequest {
            name: spec.name.clone(),
            datacenter_id: spec.datacenter_id.clone(),
            volume_type_id: spec.volume_type.type_id(),
            volume_size_id: self.size_id(spec).await?,
            size_gb: spec.size_gb,
        };
        info!("Creating volume");

        let volume_id = async {
            let handle = self.ctx.api().create_volume(&request).await?;
            self.ctx.jobs().await_resource(&handle, "create volume").await
        }
        .await
        .step(|| format!("create volume '{}'", spec.name))?;

        info!(volume_id = %volume_id, "Volume created");
        self.get(&volume_id).await
    }

    pub async fn get(&self, volume_id: &str) -> Result<Volume> {
        self.ctx
            .api()
            .get_volume(volume_id)
            .await
            .step(|| format!("read volume {}", volume_id))
    }

    /// Grow a volume. Shrinking is refused before any call is made.
    #[instrument(skip(self, current, spec), fields(volume_id = %current.id))]
    pub async fn resize(&self, current: &Volume, spec: &VolumeSpec) -> Result<Volume> {
        if spec.size_gb < current.size_gb {
            return Err(ProvisionError::Validation(format!(
                "volume {} cannot shrink from {} GB to {} GB; replace it instead",
                current.id, current.size_gb, spec.size_gb
            )));
        }
        if spec.size_gb == current.size_gb {
            return Ok(current.clone());
        }
        self.size_id(spec).await?;
        info!(from_gb = current.size_gb, to_gb = spec.size_gb, "Resizing volume");

        async {
            let handle = self.ctx.api().resize_volume(&current.id, spec.size_gb).await?;
            self.ctx.jobs().await_handle(&handle, "resize volume").await
        }
        .await
        .step(|| format!("resize volume {}", current.id))?;

        self.get(&current.id).await
    }

    pub async fn attach(&self, volume_id: &str, machine_id: &str) -> Result<()> {
        info!(volume_id = %volume_id, machine_id = %machine_id, "Attaching volume");
        let handle = self.ctx.api().attach_volume(volume_id, machine_id).await?;
        self.ctx.jobs().await_handle(&handle, "attach volume").await?;
        Ok(())
    }

    pub async fn detach(&self, volume_id: &str) -> Result<()> {
        info!(volume_id = %volume_id, "Detaching volume");
        let handle = self.ctx.api().detach_volume(volume_id).await?;
        self.ctx.jobs().await_handle(&handle, "detach volume").await?;
        Ok(())
    }

    /// Detach from any machine, then delete.
    #[instrument(skip(self), fields(volume_id = %volume_id))]
    pub async fn delete(&self, volume_id: &str) -> Result<()> {
        let current = self.get(volume_id).await?;
        if let Some(machine_id) = current.machine_id.as_deref().filter(|id| !id.is_empty()) {
            warn!(machine_id = %machine_id, "Volume is attached, detaching before delete");
            self.detach(volume_id)
                .await
                .step(|| format!("detach volume {} from virtual machine {}", volume_id, machine_id))?;
        }

        async {
            let handle = self.ctx.api().delete_volume(volume_id).await?;
            self.ctx.jobs().await_handle(&handle, "delete volume").await
        }
        .await
        .step(|| format!("delete volume {}", volume_id))?;

        info!("Volume deleted");
        Ok(())
    }
}
