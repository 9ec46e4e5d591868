//! Error types for cirrus-control.

use std::time::Duration;

use cirrus_compile::ConfigError;

use crate::types::OperationErrorEntry;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Control-plane messages with a known cause, rewritten for the user.
///
/// Each entry is `(needle, replacement)`; the first needle contained in the
/// upstream message wins.
pub const KNOWN_CAUSES: &[(&str, &str)] = &[(
    "project 1043443644444",
    "Incorrect configuration. Please change the 'project' key in the 'provider' block \
     in your service definition.",
)];

/// Errors that can occur while applying a deployment.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The service definition is invalid. Raised before any network call.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The deployment changed between listing and applying.
    ///
    /// Planning must restart from a fresh list.
    #[error("planning conflict on deployment {deployment}: {message}")]
    PlanningConflict {
        /// Deployment name.
        deployment: String,
        /// Upstream message.
        message: String,
    },

    /// The control plane rejected a request.
    #[error("control plane error ({status}): {message}")]
    ControlPlane {
        /// HTTP status code.
        status: u16,
        /// Upstream message, after known-cause remapping.
        message: String,
    },

    /// The operation finished with an error payload.
    #[error("operation {operation} failed: {}", describe_failures(failures))]
    OperationFailed {
        /// Operation name.
        operation: String,
        /// Resource-level failures reported by the control plane.
        failures: Vec<OperationErrorEntry>,
    },

    /// The operation did not finish in time. Its outcome is unknown.
    #[error("operation {operation} still running after {elapsed:?}")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// Monitoring was cancelled. The operation's outcome is unknown.
    #[error("monitoring of operation {operation} was cancelled")]
    Cancelled {
        /// Operation name.
        operation: String,
    },

    /// A function with declared IAM bindings is not deployed.
    #[error(
        "unable to set IAM bindings for \"{function}\": \
         function not found for project \"{project}\" in region \"{region}\""
    )]
    FunctionNotFound {
        /// Full function resource name.
        function: String,
        /// Cloud project.
        project: String,
        /// Region.
        region: String,
    },

    /// Object storage error.
    #[error("storage error: {0}")]
    Storage(#[from] object_store::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// Tool configuration could not be loaded.
    #[error("configuration error: {0}")]
    Settings(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a control-plane error, remapping known causes.
    #[must_use]
    pub fn control_plane(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = remap_known_cause(&message).map_or(message, ToOwned::to_owned);
        Self::ControlPlane { status, message }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the operation's real outcome is unknown.
    #[must_use]
    pub const fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

/// Look up a user-facing replacement for a control-plane message.
#[must_use]
pub fn remap_known_cause(message: &str) -> Option<&'static str> {
    KNOWN_CAUSES
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, replacement)| *replacement)
}

fn describe_failures(failures: &[OperationErrorEntry]) -> String {
    if failures.is_empty() {
        return "no details reported".to_owned();
    }
    failures
        .iter()
        .map(|f| match &f.location {
            Some(location) => format!("{location}: {}", f.message),
            None => f.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
