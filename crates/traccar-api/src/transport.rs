// Transport construction
//
// One reqwest::Client is built per ApiClient and shared by every call. The
// WebSocket upgrade gets its own rustls connector so both transports honor
// the same certificate-verification setting. The cookie jar is shared too:
// the session cookie set by the session-open call must be presented on the
// socket upgrade.

use std::sync::Arc;

use reqwest::cookie::Jar;
use tokio_tungstenite::Connector;

use crate::config::ClientConfig;
use crate::error::Error;

/// Build the shared HTTP client.
pub(crate) fn build_http_client(
    config: &ClientConfig,
    cookie_jar: Arc<Jar>,
) -> Result<reqwest::Client, Error> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("traccar-api/", env!("CARGO_PKG_VERSION")))
        .cookie_provider(cookie_jar);

    if !config.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(|e| Error::Unexpected {
        message: format!("failed to build HTTP client: {e}"),
    })
}

/// TLS connector for the WebSocket upgrade, honoring `verify_tls`.
pub(crate) fn websocket_connector(config: &ClientConfig) -> Connector {
    install_crypto_provider();

    let tls = if config.verify_tls {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth()
    };

    Connector::Rustls(Arc::new(tls))
}

/// rustls needs a process-level crypto provider before a `ClientConfig` can
/// be built; a second install is a no-op.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Certificate verifier that accepts any server certificate.
///
/// Installed only when `verify_tls` is off (self-signed servers).
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
