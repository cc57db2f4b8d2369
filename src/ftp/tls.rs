//! TLS session factory for FTPS
//!
//! One factory is built per output configuration and shared by the control
//! connection and every data connection, so all of them use the same client
//! config and can resume the same TLS session.

use crate::config::TlsConfig;
use crate::error::{Error, FtpError, Result};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

/// Creates client TLS sessions bound to one server name and trust setup
#[derive(Clone)]
pub struct TlsSessionFactory {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl std::fmt::Debug for TlsSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSessionFactory")
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsSessionFactory {
    /// Build a factory for `host` using the configured trust material
    pub fn new(host: &str, tls: &TlsConfig) -> Result<Self> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::config("host", format!("invalid TLS server name {host:?}: {e}")))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::config("ssl", format!("unusable TLS provider: {e}")))?;

        let config = if !tls.ssl_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier { provider }))
                .with_no_client_auth()
        } else {
            let roots = Arc::new(root_store(tls)?);
            if tls.ssl_verify_hostname {
                builder
                    .with_root_certificates(roots)
                    .with_no_client_auth()
            } else {
                let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
                    .build()
                    .map_err(|e| {
                        Error::config("ssl_trusted_ca_cert_file", format!("invalid trust roots: {e}"))
                    })?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(IgnoreHostname { inner }))
                    .with_no_client_auth()
            }
        };

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    /// Run the client handshake over an established TCP connection
    pub async fn wrap(&self, tcp: TcpStream) -> std::result::Result<TlsStream<TcpStream>, FtpError> {
        debug!(server_name = ?self.server_name, "Starting TLS handshake");
        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| FtpError::network("TLS handshake", e))
    }
}

fn root_store(tls: &TlsConfig) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let mut custom = false;

    if let Some(path) = &tls.ssl_trusted_ca_cert_file {
        let file = File::open(path).map_err(|e| {
            Error::config(
                "ssl_trusted_ca_cert_file",
                format!("unable to open {}: {e}", path.display()),
            )
        })?;
        add_pem_certs(&mut roots, &mut BufReader::new(file), "ssl_trusted_ca_cert_file")?;
        custom = true;
    }
    if let Some(data) = &tls.ssl_trusted_ca_cert_data {
        add_pem_certs(&mut roots, &mut data.as_bytes(), "ssl_trusted_ca_cert_data")?;
        custom = true;
    }
    if !custom {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(roots)
}

fn add_pem_certs(roots: &mut RootCertStore, reader: &mut dyn BufRead, key: &str) -> Result<()> {
    let certs = rustls_pemfile::certs(reader)
        .collect::<io::Result<Vec<CertificateDer<'static>>>>()
        .map_err(|e| Error::config(key, format!("failed to read certificates: {e}")))?;
    if certs.is_empty() {
        return Err(Error::config(key, "no valid certificate found"));
    }
    let (added, _ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::config(key, "no usable CA certificate found"));
    }
    Ok(())
}

#[derive(Debug)]
struct NoVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
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
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
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

/// Full chain verification that tolerates a name mismatch
#[derive(Debug)]
struct IgnoreHostname {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for IgnoreHostname {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(e) if is_name_mismatch(&e) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Returns true if the only complaint about a certificate is its name
fn is_name_mismatch(error: &rustls::Error) -> bool {
    matches!(
        error,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}
