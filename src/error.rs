use thiserror::Error;

/// Errors raised by the cluster manager, the template engine and the task tracker.
///
/// Validation-family variants are raised synchronously at the boundary and never
/// reach a running transition. `Provisioning` and `Timeout` are the only variants
/// the provisioning pool retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NexaError {
    /// A required input was absent
    #[error("Validation error: {0}")]
    Validation(String),

    /// An input was present but outside its domain (e.g. an empty quorum)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported cluster type: {0}")]
    UnsupportedClusterType(String),

    #[error("Unsupported role '{role}' for cluster type '{cluster_type}'")]
    UnsupportedRole { cluster_type: String, role: String },

    #[error("Missing property: {0}")]
    MissingProperty(String),

    #[error("The page size '{requested}' is not between '{min}' and '{max}'")]
    InvalidPageSize { requested: usize, min: usize, max: usize },

    #[error("Page link '{0}' has expired or is unknown")]
    PageExpired(String),

    #[error("Another operation is already in progress for cluster {0}")]
    ConcurrentOperation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NexaError>;

impl NexaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        NexaError::Validation(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        NexaError::InvalidArgument(msg.into())
    }

    pub fn missing_property(name: impl Into<String>) -> Self {
        NexaError::MissingProperty(name.into())
    }

    pub fn provisioning(msg: impl Into<String>) -> Self {
        NexaError::Provisioning(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        NexaError::Internal(msg.into())
    }

    /// Stable code reported to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            NexaError::Validation(_) => "ValidationError",
            NexaError::InvalidArgument(_) => "InvalidArgument",
            NexaError::UnsupportedClusterType(_) => "UnsupportedClusterType",
            NexaError::UnsupportedRole { .. } => "UnsupportedRole",
            NexaError::MissingProperty(_) => "MissingProperty",
            NexaError::InvalidPageSize { .. } => "InvalidPageSize",
            NexaError::PageExpired(_) => "PageExpired",
            NexaError::ConcurrentOperation(_) => "ConcurrentOperation",
            NexaError::InvalidState(_) => "InvalidState",
            NexaError::NotFound(_) => "NotFound",
            NexaError::Provisioning(_) => "ProvisioningError",
            NexaError::Timeout(_) => "Timeout",
            NexaError::Cancelled(_) => "Cancelled",
            NexaError::Config(_)
            | NexaError::Io(_)
            | NexaError::Yaml(_)
            | NexaError::Json(_)
            | NexaError::Internal(_) => "InternalError",
        }
    }

    /// Whether the provisioning pool may try the failed call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NexaError::Provisioning(_) | NexaError::Timeout(_))
    }

    /// Internal failures are logged but never shown verbatim to clients.
    pub fn is_internal(&self) -> bool {
        self.code() == "InternalError"
    }
}

impl From<std::io::Error> for NexaError {
    fn from(e: std::io::Error) -> Self {
        NexaError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for NexaError {
    fn from(e: serde_json::Error) -> Self {
        NexaError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for NexaError {
    fn from(e: serde_yaml::Error) -> Self {
        NexaError::Yaml(e.to_string())
    }
}

impl From<tokio::task::JoinError> for NexaError {
    fn from(e: tokio::task::JoinError) -> Self {
        NexaError::Internal(format!("worker task failed: {}", e))
    }
}
