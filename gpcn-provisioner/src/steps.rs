//! Ordered step plans for multi-step orchestration.
//!
//! A plan is a list of labelled futures, each tagged fatal or warn-only.
//! Steps run strictly in order. The first fatal failure stops the plan;
//! warn-only failures are collected and the plan continues.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, Warning};

/// Outcome of a mutating operation: the resulting value plus any
/// best-effort steps that need manual follow-up.
#[derive(Debug, Clone, Serialize)]
pub struct Applied<T> {
    pub state: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl<T> Applied<T> {
    pub fn new(state: T, warnings: Vec<Warning>) -> Self {
        Self { state, warnings }
    }

    pub fn clean(state: T) -> Self {
        Self::new(state, Vec::new())
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        Applied {
            state: f(self.state),
            warnings: self.warnings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    Fatal,
    WarnOnly,
}

struct Step<'a> {
    label: String,
    policy: StepPolicy,
    action: BoxFuture<'a, Result<()>>,
}

/// A sequence of steps executed by [`StepPlan::run`].
#[derive(Default)]
pub struct StepPlan<'a> {
    steps: Vec<Step<'a>>,
}

impl<'a> StepPlan<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step whose failure aborts the plan.
    pub fn fatal<F>(self, label: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        self.push(label, StepPolicy::Fatal, action)
    }

    /// Append a step whose failure becomes a warning.
    pub fn warn_only<F>(self, label: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        self.push(label, StepPolicy::WarnOnly, action)
    }

    /// Append a step only when `condition` holds.
    pub fn fatal_if<F>(self, condition: bool, label: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        if condition {
            self.fatal(label, action)
        } else {
            self
        }
    }

    pub fn push<F>(mut self, label: impl Into<String>, policy: StepPolicy, action: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        self.steps.push(Step {
            label: label.into(),
            policy,
            action: action.boxed(),
        });
        self
    }

    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label.as_str()).collect()
    }

    /// Run every step in order.
    ///
    /// Returns the accumulated warnings, or the first fatal error labelled
    /// with its step.
    pub async fn run(self) -> Result<Vec<Warning>> {
        let total = self.steps.len();
        let mut warnings = Vec::new();

        for (index, step) in self.steps.into_iter().enumerate() {
            debug!(step = %step.label, index = index + 1, total, "Running step");
            match (step.action.await, step.policy) {
                (Ok(()), _) => {}
                (Err(err), StepPolicy::Fatal) => {
                    warn!(step = %step.label, error = %err, "Step failed, aborting remaining steps");
                    return Err(err.in_step(step.label));
                }
                (Err(err), StepPolicy::WarnOnly) => {
                    warn!(step = %step.label, error = %err, "Best-effort step failed, continuing");
                    warnings.push(Warning::new(format!("{} needs manual follow-up", step.label), &err));
                }
            }
        }

        if !warnings.is_empty() {
            info!(warnings = warnings.len(), "Plan finished with warnings");
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::ProvisionError;

    fn record<'a>(log: &'a Mutex<Vec<&'static str>>, name: &'static str, fail: bool) -> impl Future<Output = Result<()>> + Send + 'a {
        async move {
            log.lock().unwrap().push(name);
            if fail {
                Err(ProvisionError::Internal(format!("{} broke", name)))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_fatal_stops_plan() {
        let log = Mutex::new(Vec::new());
        let err = StepPlan::new()
            .fatal("stop", record(&log, "stop", false))
            .fatal("resize", record(&log, "resize", true))
            .fatal("start", record(&log, "start", false))
            .run()
            .await
            .unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["stop", "resize"]);
        assert!(err.to_string().starts_with("resize: "));
    }

    #[tokio::test]
    async fn test_warnings_accumulate() {
        let log = Mutex::new(Vec::new());
        let warnings = StepPlan::new()
            .warn_only("attach volume v1", record(&log, "v1", true))
            .warn_only("attach volume v2", record(&log, "v2", false))
            .warn_only("start", record(&log, "start", true))
            .run()
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["v1", "v2", "start"]);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].summary.contains("attach volume v1"));
        assert!(warnings[1].detail.contains("start broke"));
    }

    #[tokio::test]
    async fn test_steps_are_lazy_and_conditional() {
        let log = Mutex::new(Vec::new());
        let plan = StepPlan::new()
            .fatal_if(false, "stop", record(&log, "stop", false))
            .fatal("rename", record(&log, "rename", false));
        assert_eq!(plan.labels(), vec!["rename"]);
        assert!(log.lock().unwrap().is_empty());

        plan.run().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["rename"]);
    }
}
