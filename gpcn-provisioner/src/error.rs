//! Error types for the provisioning layer.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while talking to the control plane or orchestrating
/// multi-step changes.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("Transport error on {method} {path}: {source}")]
    Transport {
        method: String,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a status >= 400.
    #[error("{method} {path} returned HTTP {status}: {body}")]
    HttpStatus {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    /// The response body was not the JSON we expected.
    #[error("Failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    /// The envelope carried `success: false`.
    #[error("Request to {path} was rejected: {message}")]
    Rejected { path: String, message: String },

    /// The backend marked a job as failed.
    #[error("Job {job_id} failed: job operation failed, please check parameters and retry operation")]
    JobFailed { job_id: String },

    /// A polling ceiling was exceeded. The mutation may still complete out-of-band.
    #[error("Timed out after {elapsed_secs}s waiting for {what}; the operation may still complete, verify its state manually")]
    Timeout { what: String, elapsed_secs: u64 },

    /// The caller cancelled while we were waiting.
    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),

    /// Desired state rejected before any mutating call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The backend reported something that contradicts its own invariants.
    #[error("Inconsistent backend state: {0}")]
    InconsistentState(String),

    /// A named step of an orchestrated operation failed.
    #[error("{step}: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<ProvisionError>,
    },

    /// Missing or malformed client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionError {
    /// Wrap this error with the label of the step that produced it.
    pub fn in_step(self, step: impl Into<String>) -> Self {
        ProvisionError::StepFailed {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through step labels.
    pub fn root_cause(&self) -> &ProvisionError {
        match self {
            ProvisionError::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True when the backend answered 404 for the resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), ProvisionError::HttpStatus { status: 404, .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), ProvisionError::Timeout { .. })
    }

    pub fn is_job_failure(&self) -> bool {
        matches!(self.root_cause(), ProvisionError::JobFailed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), ProvisionError::Cancelled(_))
    }
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Attach a step label to the error side of a result.
pub trait StepContext<T> {
    fn step<F, S>(self, label: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> StepContext<T> for Result<T> {
    fn step<F, S>(self, label: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.in_step(label()))
    }
}

/// The resource kinds managed by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Network,
    Machine,
    Volume,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Machine => write!(f, "virtual machine"),
            ResourceKind::Volume => write!(f, "volume"),
        }
    }
}

/// A best-effort sub-step that failed without failing the whole operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// What needs manual follow-up.
    pub summary: String,
    /// The underlying error message.
    pub detail: String,
}

impl Warning {
    pub fn new(summary: impl Into<String>, err: &ProvisionError) -> Self {
        Self {
            summary: summary.into(),
            detail: err.to_string(),
        }
    }
}
