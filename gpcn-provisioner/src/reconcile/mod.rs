//! Multi-step reconciliation across resources and sub-resources.
//!
//! Every sequence here is forward-only: a failure part way through leaves the
//! backend as it is, and the next read reconciles the local view.
//!
//! ```text
//!   Orchestrator
//!     ├── update_network_interfaces   elect ▶ remove* ▶ add*
//!     ├── update_volumes              detach* ▶ attach*
//!     ├── delete_network              detach per machine ▶ delete (retried)
//!     └── create/update/delete_machine  (StepPlan)
//! ```

mod interfaces;
mod machine;
mod network;

use std::future::Future;

use tracing::{info, warn};

use crate::diff::ListDiff;
use crate::error::{Result, StepContext};
use crate::manager::Provisioner;

pub use machine::check_public_ip;

/// Sequences changes that span several calls or resources.
pub struct Orchestrator<'a> {
    ctx: &'a Provisioner,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: &'a Provisioner) -> Self {
        Self { ctx }
    }

    /// Detach removed volumes, then attach added ones.
    pub async fn update_volumes(&self, machine_id: &str, diff: &ListDiff) -> Result<()> {
        let volumes = self.ctx.volumes();
        let volumes = &volumes;
        apply_list_change(
            "volume",
            diff,
            move |volume_id: String| async move { volumes.detach(&volume_id).await },
            move |volume_id: String| async move { volumes.attach(&volume_id, machine_id).await },
        )
        .await
    }
}

/// Drive removals then additions for one multi-valued attachment, one call
/// at a time.
///
/// A removal that fails with "not found" is treated as already done.
pub async fn apply_list_change<R, RF, A, AF>(what: &str, diff: &ListDiff, mut remove: R, mut add: A) -> Result<()>
where
    R: FnMut(String) -> RF,
    RF: Future<Output = Result<()>>,
    A: FnMut(String) -> AF,
    AF: Future<Output = Result<()>>,
{
    if diff.is_empty() {
        return Ok(());
    }
    info!(what, removed = ?diff.removed, added = ?diff.added, "Applying list change");

    for id in &diff.removed {
        match remove(id.clone()).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                warn!(what, id = %id, "Already gone, skipping removal");
            }
            Err(err) => return Err(err.in_step(format!("remove {} {}", what, id))),
        }
    }

    for id in &diff.added {
        add(id.clone()).await.step(|| format!("add {} {}", what, id))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::ProvisionError;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_removals_before_additions_and_404_skipped() {
        let log = Mutex::new(Vec::new());
        let log = &log;
        let diff = ListDiff::between(&ids(&["a", "b"]), &ids(&["b", "c", "d"]));
        apply_list_change(
            "volume",
            &diff,
            move |id: String| async move {
                log.lock().unwrap().push(format!("-{}", id));
                Err(ProvisionError::HttpStatus {
                    method: "PUT".to_string(),
                    path: format!("/v1/resource/volumes/{}/detach", id),
                    status: 404,
                    body: String::new(),
                })
            },
            move |id: String| async move {
                log.lock().unwrap().push(format!("+{}", id));
                Ok(())
            },
        )
        .await
        .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["-a", "+c", "+d"]);
    }

    #[tokio::test]
    async fn test_first_add_failure_aborts() {
        let log = Mutex::new(Vec::new());
        let log = &log;
        let diff = ListDiff::between(&ids(&[]), &ids(&["x", "y"]));
        let err = apply_list_change(
            "volume",
            &diff,
            |_id: String| async { Ok(()) },
            move |id: String| async move {
                log.lock().unwrap().push(id.clone());
                Err(ProvisionError::JobFailed { job_id: format!("job-{}", id) })
            },
        )
        .await
        .unwrap_err();
        assert_eq!(*log.lock().unwrap(), vec!["x"]);
        assert!(err.to_string().starts_with("add volume x: "));
    }
}
