//! Long-polling primitives.
//!
//! Every wait in this crate goes through [`poll_until`]: a fixed-interval loop
//! that runs a query, classifies the observation, and sleeps through a
//! cancellable pause until the classifier says done, failed, or the ceiling
//! is exceeded.
//!
//! ```text
//!   query ──▶ classify ──┬── Failed ──▶ Err
//!     ▲                  ├── Done ────▶ [settle ▶ query ▶ classify] ──▶ Ok
//!     │                  └── Pending
//!     └── pause(interval) ◀──┘   (elapsed > ceiling ──▶ Timeout)
//! ```
//!
//! The two pollers built on it:
//! - [`JobPoller`] watches the job subsystem (3 s interval, 600 s ceiling).
//! - [`StatusPoller`] watches a resource's own read endpoint (5 s interval,
//!   per-call ceiling) and confirms a match with one debounce re-read.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{ProvisionError, Result};
use crate::traits::CloudApi;
use crate::types::{Job, JobHandle, JobState, Machine};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Timing and limits for polling, retries and requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Sleep between job status queries.
    pub job_interval_secs: u64,
    /// Give up on a job after this long.
    pub job_timeout_secs: u64,
    /// Sleep between resource status reads.
    pub status_interval_secs: u64,
    /// Debounce delay after the first matching status read.
    pub settle_secs: u64,
    /// Ceiling for create, stop and delete convergence.
    pub provisioning_timeout_secs: u64,
    /// Ceiling for waiting on a machine to reach Running after start.
    pub start_timeout_secs: u64,
    /// Network delete attempts before surfacing the last error.
    pub delete_retry_attempts: u32,
    pub delete_retry_backoff_secs: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Maximum interfaces a machine may hold.
    pub max_network_interfaces: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            job_interval_secs: 3,
            job_timeout_secs: 600,
            status_interval_secs: 5,
            settle_secs: 5,
            provisioning_timeout_secs: 300,
            start_timeout_secs: 120,
            delete_retry_attempts: 5,
            delete_retry_backoff_secs: 5,
            request_timeout_secs: 60,
            max_network_interfaces: 5,
        }
    }
}

impl PollingConfig {
    pub fn job_interval(&self) -> Duration {
        Duration::from_secs(self.job_interval_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn delete_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.delete_retry_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values that would make a loop spin or never run.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("job_interval_secs", self.job_interval_secs),
            ("job_timeout_secs", self.job_timeout_secs),
            ("status_interval_secs", self.status_interval_secs),
            ("provisioning_timeout_secs", self.provisioning_timeout_secs),
            ("start_timeout_secs", self.start_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ProvisionError::InvalidConfig(format!(
                    "polling.{} must be greater than zero",
                    name
                )));
            }
        }
        if self.delete_retry_attempts == 0 {
            return Err(ProvisionError::InvalidConfig(
                "polling.delete_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_network_interfaces == 0 {
            return Err(ProvisionError::InvalidConfig(
                "polling.max_network_interfaces must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// POLL-UNTIL COMBINATOR
// =============================================================================

/// Classification of one observation.
#[derive(Debug)]
pub enum Verdict {
    Done,
    Pending,
    Failed(ProvisionError),
}

/// Parameters of one polling loop.
#[derive(Debug, Clone)]
pub struct PollSpec {
    /// Human-readable subject, used in logs and errors.
    pub what: String,
    pub interval: Duration,
    pub ceiling: Duration,
    /// When set, a `Done` observation is only trusted after this delay and
    /// a second read that still classifies as `Done`.
    pub settle: Option<Duration>,
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn pause(duration: Duration, cancel: &CancellationToken, what: &str) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled(what.to_string())),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Query until `classify` returns `Done` or `Failed`, or the ceiling passes.
///
/// Query errors are returned as-is; only the classifier decides what counts
/// as "not yet".
pub async fn poll_until<T, Q, Fut, C>(
    spec: &PollSpec,
    cancel: &CancellationToken,
    mut query: Q,
    classify: C,
) -> Result<T>
where
    Q: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&T) -> Verdict,
{
    let started = Instant::now();
    let mut iteration: u32 = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled(spec.what.clone()));
        }
        debug!(
            what = %spec.what,
            iteration,
            elapsed_secs = started.elapsed().as_secs(),
            "Polling"
        );

        let observed = query().await?;
        match classify(&observed) {
            Verdict::Failed(err) => return Err(err),
            Verdict::Done => match spec.settle {
                None => return Ok(observed),
                Some(settle) => {
                    debug!(what = %spec.what, settle_secs = settle.as_secs(), "Target observed, confirming");
                    pause(settle, cancel, &spec.what).await?;
                    let confirmed = query().await?;
                    match classify(&confirmed) {
                        Verdict::Done => return Ok(confirmed),
                        Verdict::Failed(err) => return Err(err),
                        Verdict::Pending => {
                            warn!(what = %spec.what, "Target state did not hold through debounce, continuing to poll");
                        }
                    }
                }
            },
            Verdict::Pending => {}
        }

        pause(spec.interval, cancel, &spec.what).await?;
        iteration += 1;

        let elapsed = started.elapsed();
        if elapsed > spec.ceiling {
            return Err(ProvisionError::Timeout {
                what: spec.what.clone(),
                elapsed_secs: elapsed.as_secs(),
            });
        }
    }
}

// =============================================================================
// JOB POLLER
// =============================================================================

/// Waits for backend jobs to reach a terminal state.
#[derive(Clone, Copy)]
pub struct JobPoller<'a> {
    api: &'a dyn CloudApi,
    config: &'a PollingConfig,
    cancel: &'a CancellationToken,
}

impl<'a> JobPoller<'a> {
    pub fn new(api: &'a dyn CloudApi, config: &'a PollingConfig, cancel: &'a CancellationToken) -> Self {
        Self { api, config, cancel }
    }

    /// Wait for a single job.
    pub async fn await_job(&self, job_id: &str, action: &str) -> Result<Job> {
        let mut jobs = self.await_jobs(&[job_id.to_string()], action).await?;
        jobs.pop().ok_or_else(|| {
            ProvisionError::InconsistentState(format!("job {} vanished from its own status report", job_id))
        })
    }

    /// Wait until every job in the batch has succeeded.
    ///
    /// Terminates immediately when any job reports failure.
    #[instrument(skip(self, job_ids), fields(action = %action, jobs = job_ids.len()))]
    pub async fn await_jobs(&self, job_ids: &[String], action: &str) -> Result<Vec<Job>> {
        info!("Waiting for jobs to complete");

        let spec = PollSpec {
            what: format!("{} (jobs {})", action, job_ids.join(", ")),
            interval: self.config.job_interval(),
            ceiling: self.config.job_timeout(),
            settle: None,
        };

        let jobs = poll_until(
            &spec,
            self.cancel,
            || self.api.job_status(job_ids),
            |reported: &Vec<Job>| classify_jobs(job_ids, reported),
        )
        .await?;

        info!("Jobs completed successfully");
        Ok(jobs)
    }

    /// Wait for every job in a handle. An empty handle has nothing to await.
    pub async fn await_handle(&self, handle: &JobHandle, action: &str) -> Result<Vec<Job>> {
        if handle.is_empty() {
            debug!(action = %action, "No job returned, nothing to await");
            return Ok(Vec::new());
        }
        self.await_jobs(&handle.ids(), action).await
    }

    /// Wait for a handle and return the identifier of the resource it produced.
    pub async fn await_resource(&self, handle: &JobHandle, action: &str) -> Result<String> {
        let jobs = self.await_handle(handle, action).await?;
        let completed = JobHandle { jobs };
        completed
            .resource_id()
            .or_else(|| handle.resource_id())
            .map(str::to_string)
            .ok_or_else(|| {
                ProvisionError::InconsistentState(format!(
                    "{} completed without reporting a resource identifier",
                    action
                ))
            })
    }
}

fn classify_jobs(queried: &[String], reported: &[Job]) -> Verdict {
    if let Some(failed) = reported.iter().find(|j| j.state() == JobState::Failed) {
        return Verdict::Failed(ProvisionError::JobFailed {
            job_id: failed.id.clone(),
        });
    }
    let all_done = queried.iter().all(|id| {
        reported
            .iter()
            .any(|j| &j.id == id && j.state() == JobState::Succeeded)
    });
    if all_done {
        Verdict::Done
    } else {
        Verdict::Pending
    }
}

// =============================================================================
// STATUS POLLER
// =============================================================================

/// Waits for a resource to report one of a set of states.
#[derive(Clone, Copy)]
pub struct StatusPoller<'a> {
    api: &'a dyn CloudApi,
    config: &'a PollingConfig,
    cancel: &'a CancellationToken,
}

impl<'a> StatusPoller<'a> {
    pub fn new(api: &'a dyn CloudApi, config: &'a PollingConfig, cancel: &'a CancellationToken) -> Self {
        Self { api, config, cancel }
    }

    /// Poll `query` until `reached` holds on two reads separated by the
    /// settle delay.
    pub async fn await_state<T, Q, Fut, M>(&self, what: String, ceiling: Duration, query: Q, reached: M) -> Result<T>
    where
        Q: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        M: Fn(&T) -> bool,
    {
        let spec = PollSpec {
            what,
            interval: self.config.status_interval(),
            ceiling,
            settle: Some(self.config.settle()),
        };
        poll_until(&spec, self.cancel, query, |observed| {
            if reached(observed) {
                Verdict::Done
            } else {
                Verdict::Pending
            }
        })
        .await
    }

    /// Wait for a machine to report any of `targets`, compared case-insensitively.
    #[instrument(skip(self, targets), fields(machine_id = %machine_id, targets = ?targets))]
    pub async fn await_machine(&self, machine_id: &str, targets: &[&str], ceiling: Duration) -> Result<Machine> {
        info!(ceiling_secs = ceiling.as_secs(), "Waiting for virtual machine status");
        let machine = self
            .await_state(
                format!("virtual machine {} to reach {}", machine_id, targets.join("/")),
                ceiling,
                || self.api.get_machine(machine_id),
                |m: &Machine| m.status_in(targets),
            )
            .await?;
        info!(status = %machine.status, "Virtual machine reached target status");
        Ok(machine)
    }
}
