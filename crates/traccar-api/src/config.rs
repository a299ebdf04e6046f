// Client configuration
//
// Everything here is fixed at construction time; an ApiClient never mutates
// its config. URL construction lives next to the settings so the two scheme
// pairs (http/https, ws/wss) stay in one place.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::Error;

/// How the client authenticates against the server.
///
/// Exactly one form is active per client.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Opaque access token, sent as `Authorization: Bearer …` on every
    /// request and as a `token` query parameter when opening a session.
    Bearer(SecretString),

    /// Account credentials, sent as HTTP basic authentication on every
    /// request; opening a session posts them as a form instead.
    Basic {
        username: String,
        password: SecretString,
    },
}

/// Connection settings for an [`ApiClient`](crate::ApiClient).
///
/// Fields not covered by [`ClientConfig::new`] can be adjusted with struct
/// update syntax before the config is handed to the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname or IP, without scheme.
    pub host: String,

    /// API port. A default Traccar install listens on 8082.
    pub port: u16,

    /// Use HTTPS/WSS instead of HTTP/WS.
    pub https: bool,

    /// Verify TLS certificates. Only consulted when `https` is set; turn
    /// off for servers with self-signed certificates.
    pub verify_tls: bool,

    /// Credential attached to every request.
    pub credential: Credential,

    /// Interval between WebSocket heartbeat pings.
    pub ws_heartbeat: Duration,

    /// Total bound on one request's round trip, including the response body.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Config for `host` with the stock server defaults: port 8082, plain
    /// HTTP, certificate verification on, 120 s heartbeat, 10 s timeout.
    pub fn new(host: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: 8082,
            https: false,
            verify_tls: true,
            credential,
            ws_heartbeat: Duration::from_secs(120),
            timeout: Duration::from_secs(10),
        }
    }

    /// Base URL for REST calls: `{scheme}://{host}:{port}/api/`.
    ///
    /// The trailing slash matters -- endpoints are joined onto it.
    pub(crate) fn base_url(&self) -> Result<Url, Error> {
        let scheme = if self.https { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{}:{}/api/", self.host, self.port)).map_err(|e| {
            Error::Unexpected {
                message: format!("invalid base URL for host '{}': {e}", self.host),
            }
        })
    }

    /// WebSocket endpoint: `{scheme}://{host}:{port}/api/socket`.
    pub(crate) fn socket_url(&self) -> Result<Url, Error> {
        let scheme = if self.https { "wss" } else { "ws" };
        Url::parse(&format!("{scheme}://{}:{}/api/socket", self.host, self.port)).map_err(|e| {
            Error::Unexpected {
                message: format!("invalid socket URL for host '{}': {e}", self.host),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token() -> Credential {
        Credential::Bearer("abc123".to_string().into())
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::new("gps.example.org", token());
        assert_eq!(config.port, 8082);
        assert!(!config.https);
        assert!(config.verify_tls);
        assert_eq!(config.ws_heartbeat, Duration::from_secs(120));
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn base_url_http() {
        let config = ClientConfig::new("gps.example.org", token());
        assert_eq!(
            config.base_url().unwrap().as_str(),
            "http://gps.example.org:8082/api/"
        );
    }

    #[test]
    fn base_url_https_custom_port() {
        let config = ClientConfig {
            https: true,
            port: 8443,
            ..ClientConfig::new("gps.example.org", token())
        };
        assert_eq!(
            config.base_url().unwrap().as_str(),
            "https://gps.example.org:8443/api/"
        );
    }

    #[test]
    fn socket_url_follows_scheme() {
        let plain = ClientConfig::new("10.0.0.5", token());
        assert_eq!(
            plain.socket_url().unwrap().as_str(),
            "ws://10.0.0.5:8082/api/socket"
        );

        let tls = ClientConfig {
            https: true,
            ..ClientConfig::new("10.0.0.5", token())
        };
        assert_eq!(
            tls.socket_url().unwrap().as_str(),
            "wss://10.0.0.5:8082/api/socket"
        );
    }
}
