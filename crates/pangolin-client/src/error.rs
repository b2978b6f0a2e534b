//! Client error type

use thiserror::Error;

/// Maximum number of response body bytes kept in an error
pub const BODY_EXCERPT_LIMIT: usize = 1024;

/// Errors returned by [`crate::PangolinClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP client could not be built
    #[error("failed to build http client: {0}")]
    Build(String),

    /// The request never produced a response (connect, TLS, timeout)
    #[error("{operation}: request failed: {source}")]
    Transport {
        /// Operation name, e.g. "list-orgs"
        operation: &'static str,
        /// Underlying reqwest error
        source: reqwest::Error,
    },

    /// Non-2xx response
    #[error("{operation}: status {status}: {body}")]
    Status {
        /// Operation name
        operation: &'static str,
        /// HTTP status code
        status: u16,
        /// Body excerpt
        body: String,
    },

    /// Response was not JSON (typically an HTML error page from a proxy)
    #[error("{operation}: unexpected content-type {content_type:?} (status {status}): {body}")]
    ContentType {
        /// Operation name
        operation: &'static str,
        /// Content-Type header, empty when absent
        content_type: String,
        /// HTTP status code
        status: u16,
        /// Body excerpt
        body: String,
    },

    /// JSON body did not match the expected shape
    #[error("{operation}: failed to decode response: {message}")]
    Decode {
        /// Operation name
        operation: &'static str,
        /// Decoder message
        message: String,
    },

    /// Envelope reported `success: false`
    #[error("{operation}: request was not successful{}", suffix(.message))]
    Unsuccessful {
        /// Operation name
        operation: &'static str,
        /// Message from the envelope, if any
        message: Option<String>,
    },
}

impl ClientError {
    /// Operation that failed
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Build(_) => "build-client",
            Self::Transport { operation, .. }
            | Self::Status { operation, .. }
            | Self::ContentType { operation, .. }
            | Self::Decode { operation, .. }
            | Self::Unsuccessful { operation, .. } => *operation,
        }
    }
}

impl From<ClientError> for pangolin_common::Error {
    fn from(err: ClientError) -> Self {
        pangolin_common::Error::control_plane(err.operation(), err.to_string())
    }
}

fn suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

/// Lossy UTF-8 excerpt of at most [`BODY_EXCERPT_LIMIT`] bytes
pub(crate) fn body_excerpt(body: &[u8]) -> String {
    let end = body.len().min(BODY_EXCERPT_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}
