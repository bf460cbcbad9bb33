//! Error type for HTTP client construction and response classification.

/// Failures raised while building a client, connecting, or classifying a
/// server response.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The underlying `reqwest` client could not be built (bad TLS config,
    /// invalid base URL, etc).
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// The request could not even be sent (connection refused, DNS failure,
    /// timeout).
    #[error("request to {url} failed: {source}")]
    Request {
        /// URL the request was sent to.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The server responded, but the body could not be decoded as the
    /// expected shape (usually JSON).
    #[error("failed to decode response body from {url}: {source}")]
    Decode {
        /// URL the response came from.
        url: String,
        /// Underlying decode error.
        #[source]
        source: reqwest::Error,
    },

    /// The server returned a non-2xx status carrying an ArangoDB-style
    /// `{"error": true, "errorMessage": ..., "code": ...}` envelope.
    #[error("server returned {status} for {url}: {message}")]
    ServerError {
        /// URL that produced the error.
        url: String,
        /// HTTP status code.
        status: u16,
        /// `errorMessage` field from the envelope, or the raw body if absent.
        message: String,
    },

    /// The client and server versions are incompatible and `force` was not set.
    #[error("incompatible server version {server_version} (client requires {required})")]
    IncompatibleVersion {
        /// Version string reported by the server.
        server_version: String,
        /// Minimum version string the client requires.
        required: String,
    },

    /// The named database does not exist on the server.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),
}
