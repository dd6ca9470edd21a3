//! Network deletion with dependent detaches and retry.

use tracing::{info, instrument, warn};

use crate::error::{Result, StepContext};
use crate::polling::pause;

use super::Orchestrator;

impl<'a> Orchestrator<'a> {
    /// Detach every machine from the network, then delete it.
    ///
    /// The delete call is retried with a fixed backoff because it commonly
    /// races a concurrent attach or detach. Timeouts and cancellation are not
    /// retried.
    #[instrument(skip(self), fields(network_id = %network_id))]
    pub async fn delete_network(&self, network_id: &str) -> Result<()> {
        let networks = self.ctx.networks();
        let interfaces = self.ctx.interfaces();

        let attached = match networks.attached_machines(network_id).await {
            Ok(attached) => attached,
            Err(err) if err.is_not_found() => {
                info!("Network already deleted");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        info!(machines = attached.len(), "Detaching machines before delete");
        for machine in &attached {
            interfaces
                .detach_network(&machine.id, network_id)
                .await
                .step(|| format!("detach virtual machine {} from network {}", machine.id, network_id))?;
        }

        let polling = self.ctx.polling();
        let attempts = polling.delete_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match networks.delete_once(network_id).await {
                Ok(()) => {
                    info!(attempt, "Network deleted");
                    return Ok(());
                }
                Err(err) if attempt >= attempts || err.is_timeout() || err.is_cancelled() => {
                    return Err(err.in_step(format!(
                        "delete network {} (attempt {} of {})",
                        network_id, attempt, attempts
                    )));
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "Network delete failed, retrying");
                    pause(polling.delete_retry_backoff(), self.ctx.cancellation(), "network delete retry").await?;
                    attempt += 1;
                }
            }
        }
    }
}
