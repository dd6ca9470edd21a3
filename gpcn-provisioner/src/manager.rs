//! Shared context for resource operations and orchestration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::interfaces::InterfaceOps;
use crate::polling::{JobPoller, PollingConfig, StatusPoller};
use crate::reconcile::Orchestrator;
use crate::resources::{MachineOps, NetworkOps, VolumeOps};
use crate::traits::CloudApi;

/// Owns the API handle, polling configuration and cancellation token, and
/// hands out borrowed views for each resource kind.
///
/// Cloning is cheap; clones share the API connection pool and the token.
#[derive(Clone)]
pub struct Provisioner {
    api: Arc<dyn CloudApi>,
    polling: PollingConfig,
    cancel: CancellationToken,
}

impl Provisioner {
    pub fn new(api: Arc<dyn CloudApi>, polling: PollingConfig) -> Self {
        Self {
            api,
            polling,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abort every in-flight wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn api(&self) -> &dyn CloudApi {
        self.api.as_ref()
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn jobs(&self) -> JobPoller<'_> {
        JobPoller::new(self.api.as_ref(), &self.polling, &self.cancel)
    }

    pub fn status(&self) -> StatusPoller<'_> {
        StatusPoller::new(self.api.as_ref(), &self.polling, &self.cancel)
    }

    pub fn interfaces(&self) -> InterfaceOps<'_> {
        InterfaceOps::new(self)
    }

    pub fn networks(&self) -> NetworkOps<'_> {
        NetworkOps::new(self)
    }

    pub fn machines(&self) -> MachineOps<'_> {
        MachineOps::new(self)
    }

    pub fn volumes(&self) -> VolumeOps<'_> {
        VolumeOps::new(self)
    }

    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(self)
    }
}
