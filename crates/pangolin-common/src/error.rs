//! Error types for the Pangolin operator
//!
//! Errors carry enough context (object, operation) to be useful once they end
//! up in a Ready condition message, which is the only place operators see them.

use thiserror::Error;

/// Main error type for Pangolin operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid or unresolvable configuration on a custom resource
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// `namespace/name` of the offending object, or "unknown"
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// A call to the tunnel control plane failed
    #[error("control plane error [{operation}]: {message}")]
    ControlPlane {
        /// Control plane operation (e.g. "create-site")
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred (e.g. "runner", "registry")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a validation error without object context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: "unknown".to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific object
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a control plane error for the given operation
    pub fn control_plane(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ControlPlane {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Whether this error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Whether this error is an optimistic-concurrency conflict (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }
}
