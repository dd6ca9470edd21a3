//! Virtual machine operations.

use tracing::{info, instrument};

use crate::error::{ProvisionError, Result, StepContext};
use crate::manager::Provisioner;
use crate::types::{Machine, MachineImage, MachineRequest, MachineSize};

fn names<T>(items: &[T], name: impl Fn(&T) -> &str) -> String {
    items.iter().map(|i| name(i)).collect::<Vec<_>>().join(", ")
}

/// Single-resource machine calls: catalog resolution, create, lifecycle,
/// rename, resize and delete.
pub struct MachineOps<'a> {
    ctx: &'a Provisioner,
}

impl<'a> MachineOps<'a> {
    pub fn new(ctx: &'a Provisioner) -> Self {
        Self { ctx }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Find an image by name (case-insensitive) in a datacenter.
    pub async fn resolve_image(&self, datacenter_id: &str, name: &str) -> Result<MachineImage> {
        let images = self
            .ctx
            .api()
            .list_images(datacenter_id)
            .await
            .step(|| format!("list images in datacenter {}", datacenter_id))?;
        images
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| {
                ProvisionError::Validation(format!(
                    "image '{}' is not available in datacenter {}. Valid images are: {}",
                    name,
                    datacenter_id,
                    names(&images, |i| i.name.as_str())
                ))
            })
    }

    /// Find a size by name (case-insensitive) for an image in a datacenter.
    pub async fn resolve_size(&self, datacenter_id: &str, image_id: i64, name: &str) -> Result<MachineSize> {
        let sizes = self
            .ctx
            .api()
            .list_sizes(datacenter_id, image_id)
            .await
            .step(|| format!("list sizes in datacenter {}", datacenter_id))?;
        sizes
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| {
                ProvisionError::Validation(format!(
                    "size '{}' is not available in datacenter {}. Valid sizes are: {}",
                    name,
                    datacenter_id,
                    names(&sizes, |s| s.name.as_str())
                ))
            })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Submit a create and wait for its job. Returns the new machine id.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn submit_create(&self, request: &MachineRequest) -> Result<String> {
        info!("Creating virtual machine");
        let handle = self.ctx.api().create_machine(request).await?;
        let machine_id = self
            .ctx
            .jobs()
            .await_resource(&handle, "create virtual machine")
            .await?;
        info!(machine_id = %machine_id, "Virtual machine create job completed");
        Ok(machine_id)
    }

    pub async fn get(&self, machine_id: &str) -> Result<Machine> {
        self.ctx
            .api()
            .get_machine(machine_id)
            .await
            .step(|| format!("read virtual machine {}", machine_id))
    }

    /// Wait for a freshly created machine to settle as Running or Shutoff.
    pub async fn await_provisioned(&self, machine_id: &str) -> Result<Machine> {
        self.ctx
            .status()
            .await_machine(
                machine_id,
                &[Machine::RUNNING, Machine::SHUTOFF],
                self.ctx.polling().provisioning_timeout(),
            )
            .await
    }

    /// Power on. With `wait`, block until the machine reports Running.
    #[instrument(skip(self), fields(machine_id = %machine_id))]
    pub async fn start(&self, machine_id: &str, wait: bool) -> Result<()> {
        info!("Starting virtual machine");
        self.ctx.api().start_machine(machine_id).await?;
        if wait {
            self.ctx
                .status()
                .await_machine(machine_id, &[Machine::RUNNING], self.ctx.polling().start_timeout())
                .await?;
        }
        Ok(())
    }

    /// Power off and wait for Shutoff.
    #[instrument(skip(self), fields(machine_id = %machine_id))]
    pub async fn stop(&self, machine_id: &str) -> Result<()> {
        info!("Stopping virtual machine");
        self.ctx.api().stop_machine(machine_id).await?;
        self.ctx
            .status()
            .await_machine(machine_id, &[Machine::SHUTOFF], self.ctx.polling().provisioning_timeout())
            .await?;
        Ok(())
    }

    pub async fn rename(&self, machine_id: &str, name: &str) -> Result<()> {
        info!(machine_id = %machine_id, name = %name, "Renaming virtual machine");
        let handle = self.ctx.api().rename_machine(machine_id, name).await?;
        self.ctx.jobs().await_handle(&handle, "rename virtual machine").await?;
        Ok(())
    }

    pub async fn resize(&self, machine_id: &str, size: &MachineSize) -> Result<()> {
        info!(machine_id = %machine_id, size = %size.name, cpu = size.cpu, "Resizing virtual machine");
        let handle = self.ctx.api().resize_machine(machine_id, size.id).await?;
        self.ctx.jobs().await_handle(&handle, "resize virtual machine").await?;
        Ok(())
    }

    /// Issue the delete call and await its job.
    pub async fn delete_once(&self, machine_id: &str) -> Result<()> {
        let handle = self.ctx.api().delete_machine(machine_id).await?;
        self.ctx.jobs().await_handle(&handle, "delete virtual machine").await?;
        info!(machine_id = %machine_id, "Virtual machine deleted");
        Ok(())
    }
}
