use thiserror::Error;

/// Top-level error type for the `traccar-api` crate.
///
/// Every accessor and subscription failure surfaces as exactly one of these
/// kinds, so callers can match on the variant to decide whether to retry
/// (`Connection`), re-authenticate (`Authentication`), or give up
/// (`Response` / `Unexpected`).
#[derive(Debug, Error)]
pub enum Error {
    /// The server rejected the request with HTTP 401.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// A non-200 status other than 401, or a 200 body that was not valid
    /// JSON of the expected shape.
    #[error("Unexpected response (HTTP {status}): {reason}")]
    Response { status: u16, reason: String },

    /// Timeout, transport-level network failure, or an abnormal WebSocket
    /// close during an active subscription.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Anything not classified above; the original cause is kept in the
    /// message for diagnostics.
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

impl Error {
    /// Returns `true` if this failure came from HTTP 401.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// The HTTP status carried by a [`Error::Response`], if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify a `reqwest` failure into the taxonomy above.
    ///
    /// Timeouts and network-level faults are connection failures; a request
    /// that could not even be built is unexpected.
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Connection {
                message: "timeout connecting to Traccar".into(),
            }
        } else if err.is_builder() {
            Self::Unexpected {
                message: format!("failed to build request: {err}"),
            }
        } else {
            Self::Connection {
                message: format!("could not communicate with Traccar: {err}"),
            }
        }
    }
}
