//! Error types for cirrus-compile.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`ConfigError`].
pub type CompileResult<T> = Result<T, ConfigError>;

/// Errors raised while validating or compiling a service definition.
///
/// Every variant is local and non-retryable: it aborts the pipeline before
/// any request reaches the control plane.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The function has no handler.
    #[error(
        "missing \"handler\" property for function \"{function}\": your function needs a handler"
    )]
    MissingHandler {
        /// Function name.
        function: String,
    },

    /// The function declares no trigger.
    #[error("missing \"events\" property for function \"{function}\": your function needs one event")]
    MissingEvents {
        /// Function name.
        function: String,
    },

    /// The function declares more than one trigger.
    #[error(
        "the function \"{function}\" has {count} events: only one event per function is supported"
    )]
    TooManyEvents {
        /// Function name.
        function: String,
        /// Number of declared events.
        count: usize,
    },

    /// The trigger key is not one of the supported event types.
    #[error(
        "event type \"{event}\" of function \"{function}\" not supported: supported event types are {}",
        supported.join(", ")
    )]
    UnsupportedEvent {
        /// Function name.
        function: String,
        /// The offending key.
        event: String,
        /// Supported keys.
        supported: &'static [&'static str],
    },

    /// The trigger body could not be read.
    #[error("invalid \"{event}\" event for function \"{function}\": {reason}")]
    InvalidEvent {
        /// Function name.
        function: String,
        /// Trigger key.
        event: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A fully-qualified VPC connector does not have the expected shape.
    #[error(
        "invalid VPC connector \"{connector}\" for function \"{function}\": \
         expected projects/{{project}}/locations/{{region}}/connectors/{{connector}} or a bare connector name"
    )]
    InvalidVpcConnector {
        /// Function name.
        function: String,
        /// Declared connector.
        connector: String,
    },

    /// A VPC egress or ingress value is not recognised.
    #[error("invalid {setting} value \"{value}\" for function \"{function}\"")]
    InvalidNetworkSetting {
        /// Function name.
        function: String,
        /// Which setting (`egress` or `ingress`).
        setting: &'static str,
        /// Declared value.
        value: String,
    },

    /// An IAM binding is missing its role or members.
    #[error("invalid IAM binding #{index} on {owner}: {reason}")]
    InvalidIamBinding {
        /// `function "name"` or `provider`.
        owner: String,
        /// Position of the binding in its list.
        index: usize,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The service name violates a naming rule.
    #[error("invalid service name \"{name}\": {reason}")]
    InvalidServiceName {
        /// Service name.
        name: String,
        /// Rule that was broken.
        reason: &'static str,
    },

    /// Provider permissions and an explicit service account were both set.
    #[error("cannot set both iam permissions and serviceAccountEmail on provider")]
    ConflictingServiceAccount,

    /// A provider permission group targets an unknown resource kind.
    #[error("IAM resource type not supported for permissions {permissions:?}")]
    UnsupportedIamTarget {
        /// Permissions in the offending group.
        permissions: Vec<String>,
    },

    /// Service definition file not found.
    #[error("service definition not found: {0}")]
    NotFound(PathBuf),

    /// Service definition could not be parsed.
    #[error("failed to parse service definition: {0}")]
    Parse(#[from] toml::de::Error),

    /// Template serialisation failed.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Name of the function this error refers to, if any.
    #[must_use]
    pub fn function(&self) -> Option<&str> {
        match self {
            Self::MissingHandler { function }
            | Self::MissingEvents { function }
            | Self::TooManyEvents { function, .. }
            | Self::UnsupportedEvent { function, .. }
            | Self::InvalidEvent { function, .. }
            | Self::InvalidVpcConnector { function, .. }
            | Self::InvalidNetworkSetting { function, .. } => Some(function),
            _ => None,
        }
    }
}
