//! Network interface reconciliation for one machine.

use tracing::{info, warn};

use crate::diff::ListDiff;
use crate::error::{ProvisionError, Result, StepContext};

use super::{apply_list_change, Orchestrator};

impl<'a> Orchestrator<'a> {
    /// Move a machine from `prior` to `desired` networks.
    ///
    /// Order: at most one primary election, then every removal, then every
    /// addition, each awaited before the next. When the primary is being
    /// removed and no surviving interface can take over, the first added
    /// network is attached ahead of the election so it can be promoted.
    pub async fn update_network_interfaces(&self, machine_id: &str, prior: &[String], desired: &[String]) -> Result<()> {
        let diff = ListDiff::between(prior, desired);
        if diff.is_empty() {
            return Ok(());
        }
        info!(
            machine_id = %machine_id,
            removed = ?diff.removed,
            added = ?diff.added,
            "Network set changed, detaching before attaching"
        );

        let ops = self.ctx.interfaces();
        let ops = &ops;
        let mut current = ops.list(machine_id).await?;
        let mut additions = diff.added.clone();

        if current.primary_in(&diff.removed) {
            let removing: Vec<String> = diff
                .removed
                .iter()
                .filter_map(|n| current.find_by_network(n))
                .map(|nic| nic.id.clone())
                .collect();
            let excluding: Vec<&str> = removing.iter().map(String::as_str).collect();

            if current.election_candidate(&excluding).is_none() {
                let cap = self.ctx.polling().max_network_interfaces;
                let bridge = match additions.first() {
                    Some(first) if current.len() < cap => first.clone(),
                    Some(_) => {
                        return Err(ProvisionError::Validation(format!(
                            "virtual machine {} already holds {} interfaces; remove one before replacing its primary network",
                            machine_id,
                            current.len()
                        )))
                    }
                    None => {
                        return Err(ProvisionError::Validation(format!(
                            "cannot remove every network from virtual machine {}",
                            machine_id
                        )))
                    }
                };
                info!(network_id = %bridge, "No interface left to promote, attaching replacement first");
                ops.attach(machine_id, &bridge)
                    .await
                    .step(|| format!("add network interface {}", bridge))?;
                additions.retain(|n| n != &bridge);
                current = ops.list(machine_id).await?;
            }

            ops.elect_new_primary(machine_id, &current, &excluding)
                .await
                .step(|| format!("replace primary interface of virtual machine {}", machine_id))?;
        }

        let remaining = ListDiff {
            added: additions,
            removed: diff.removed.clone(),
        };
        let snapshot = &current;
        apply_list_change(
            "network interface",
            &remaining,
            move |network_id: String| async move {
                match snapshot.find_by_network(&network_id) {
                    Some(nic) => ops.detach(machine_id, &nic.id).await,
                    None => {
                        warn!(network_id = %network_id, "No interface for removed network, skipping");
                        Ok(())
                    }
                }
            },
            move |network_id: String| async move { ops.attach(machine_id, &network_id).await },
        )
        .await
    }
}
