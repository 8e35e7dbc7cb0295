//! tls connector with alpn based http version negotiation.

use std::sync::Arc;

use http::Version;
#[cfg(feature = "dangerous")]
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::UnixTime,
    SignatureScheme,
};
use rustls::{
    crypto::ring,
    pki_types::{CertificateDer, ServerName},
    ClientConfig, RootCertStore,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, TlsError};

pub(crate) type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// rustls connector shared by every https dial of a session. alpn offers
/// `h2, http/1.1` (or `http/1.1` only when the session caps the version) and
/// the negotiated protocol decides which driver runs the exchange.
pub(crate) struct Connector {
    inner: TlsConnector,
}

impl Connector {
    pub(crate) fn new(
        alpn: &[&[u8]],
        extra_roots: Vec<CertificateDer<'static>>,
        accept_invalid: bool,
    ) -> Self {
        let mut config = client_config(extra_roots, accept_invalid);
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

        Self {
            inner: TlsConnector::from(Arc::new(config)),
        }
    }

    pub(crate) async fn connect(
        &self,
        domain: &str,
        io: TcpStream,
    ) -> Result<(TlsStream, Version), Error> {
        let name =
            ServerName::try_from(domain.to_owned()).map_err(|_| TlsError::InvalidDnsName)?;

        let stream = self
            .inner
            .connect(name, io)
            .await
            .map_err(|e| TlsError::Handshake(e))?;

        let version = match stream.get_ref().1.alpn_protocol() {
            Some(b"h2") => Version::HTTP_2,
            _ => Version::HTTP_11,
        };

        Ok((stream, version))
    }
}

pub(crate) fn client_config(
    extra_roots: Vec<CertificateDer<'static>>,
    accept_invalid: bool,
) -> ClientConfig {
    let provider = Arc::new(ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap_or_else(|e| panic!("default tls protocol versions rejected: {e:?}"));

    #[cfg(feature = "dangerous")]
    if accept_invalid {
        return builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification { provider }))
            .with_no_client_auth();
    }

    #[cfg(not(feature = "dangerous"))]
    let _ = accept_invalid;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for cert in extra_roots {
        let _ = roots.add(cert);
    }

    builder
        .with_root_certificates(roots)
        .with_no_client_auth()
}

// certificate verification bypass for tests and local networks. never use it
// against the open internet.
#[cfg(feature = "dangerous")]
#[derive(Debug)]
struct SkipServerVerification {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

#[cfg(feature = "dangerous")]
impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
