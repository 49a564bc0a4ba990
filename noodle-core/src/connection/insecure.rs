//! TLS transport that accepts any server certificate.
//!
//! Used for `--insecure`: the handshake still encrypts the stream, but neither the
//! certificate chain nor the host name is verified.
use super::ConnectionError;
use crate::BoxError;
use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};
use tonic::transport::Uri;

pub(super) type ClientIdentity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

pub(super) fn load_identity(cert: &Path, key: &Path) -> Result<ClientIdentity, ConnectionError> {
    let cert_pem = super::read(cert)?;
    let key_pem = super::read(key)?;

    let chain = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConnectionError::ReadCertificate {
            path: cert.to_path_buf(),
            source,
        })?;

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|source| ConnectionError::ReadCertificate {
            path: key.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ConnectionError::MissingPrivateKey(key.to_path_buf()))?;

    Ok((chain, key))
}

#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

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
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Connector handed to the channel: TCP, then a TLS handshake without verification.
#[derive(Clone)]
pub(super) struct InsecureConnector {
    tls: TlsConnector,
}

impl InsecureConnector {
    pub(super) fn new(identity: Option<ClientIdentity>) -> Result<Self, ConnectionError> {
        let provider = Arc::new(ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)));

        let mut config = match identity {
            Some((chain, key)) => builder.with_client_auth_cert(chain, key)?,
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![b"h2".to_vec()];

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }
}

impl tower::Service<Uri> for InsecureConnector {
    type Response = TokioIo<TlsStream<TcpStream>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let tls = self.tls.clone();

        Box::pin(async move {
            let host = uri
                .host()
                .ok_or("target has no host")?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            let port = uri.port_u16().unwrap_or(443);

            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            let server_name = ServerName::try_from(host)?;
            let stream = tls.connect(server_name, tcp).await?;

            Ok(TokioIo::new(stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::InsecureConnector;

    #[test]
    fn builds_without_client_identity() {
        assert!(InsecureConnector::new(None).is_ok());
    }
}
