use std::fmt;
use thiserror::Error;

/// Classification of a failed invocation.
///
/// Infrastructure failures (`Network`, `Timeout`, `Serialization`, `Unknown`)
/// are retry-eligible; `Business` failures come from application logic and are
/// never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FailureKind {
    #[default]
    Unknown,
    Network,
    Timeout,
    Serialization,
    Business,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Unknown => "Unknown",
            FailureKind::Network => "Network",
            FailureKind::Timeout => "Timeout",
            FailureKind::Serialization => "Serialization",
            FailureKind::Business => "Business",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone)]
pub enum MadrpcError {
    #[error("No endpoint available for {service}.{method}: {reason}")]
    NoEndpointAvailable {
        service: String,
        method: String,
        reason: String,
    },

    #[error("Business error: {0}")]
    Business(String),

    #[error("{kind} error: {message}")]
    Infrastructure { kind: FailureKind, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cluster invoker for {service} is already destroyed")]
    Destroyed { service: String },

    /// A failure raised by a cluster strategy, carrying the endpoints involved
    /// and the underlying cause.
    #[error("{message}")]
    Invocation {
        kind: FailureKind,
        message: String,
        endpoints: Vec<String>,
        #[source]
        source: Option<Box<MadrpcError>>,
    },
}

impl MadrpcError {
    pub fn business(message: impl Into<String>) -> Self {
        MadrpcError::Business(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        MadrpcError::Infrastructure {
            kind: FailureKind::Network,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        MadrpcError::Infrastructure {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        MadrpcError::Infrastructure {
            kind: FailureKind::Serialization,
            message: message.into(),
        }
    }

    /// Wraps `cause` into a strategy-level failure that keeps the cause's
    /// classification.
    pub fn invocation(
        message: impl Into<String>,
        endpoints: Vec<String>,
        cause: MadrpcError,
    ) -> Self {
        MadrpcError::Invocation {
            kind: cause.kind(),
            message: message.into(),
            endpoints,
            source: Some(Box::new(cause)),
        }
    }

    /// Returns the failure classification of this error.
    ///
    /// Errors that are not invocation outcomes (missing endpoints,
    /// configuration, teardown) classify as [`FailureKind::Unknown`].
    pub fn kind(&self) -> FailureKind {
        match self {
            MadrpcError::Business(_) => FailureKind::Business,
            MadrpcError::Infrastructure { kind, .. } | MadrpcError::Invocation { kind, .. } => {
                *kind
            }
            _ => FailureKind::Unknown,
        }
    }

    /// Returns `true` if the error originates from application logic.
    pub fn is_business(&self) -> bool {
        self.kind() == FailureKind::Business
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == FailureKind::Timeout
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, MadrpcError::Destroyed { .. })
    }

    /// Returns `true` when no endpoint was left to call once the endpoint
    /// list had been filtered.
    pub fn is_no_endpoint_available(&self) -> bool {
        matches!(self, MadrpcError::NoEndpointAvailable { .. })
    }

    /// Endpoint addresses recorded on a strategy-level failure.
    pub fn endpoints(&self) -> &[String] {
        match self {
            MadrpcError::Invocation { endpoints, .. } => endpoints,
            _ => &[],
        }
    }

    /// The underlying cause of a strategy-level failure.
    pub fn cause(&self) -> Option<&MadrpcError> {
        match self {
            MadrpcError::Invocation { source, .. } => source.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MadrpcError>;
