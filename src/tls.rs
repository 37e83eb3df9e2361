//! Pinned-certificate TLS for the session transport
//!
//! The instance presents a self-issued per-instance certificate that is
//! handed to the client out of band, so verification is an exact match
//! against the pinned certificate and hostname checking does not apply.

use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use rustls::SignatureScheme;

/// Read exactly one PEM certificate from `path`.
pub fn load_pinned_cert(path: &Path) -> Result<CertificateDer<'static>> {
    let mut rd = BufReader::new(
        fs::File::open(path)
            .with_context(|| format!("open pinned certificate {}", path.display()))?,
    );
    let mut certs = Vec::new();
    for c in rustls_pemfile::certs(&mut rd) {
        certs.push(c.with_context(|| format!("read certificate from {}", path.display()))?);
    }
    if certs.len() != 1 {
        bail!(
            "{} must contain exactly one certificate, found {}",
            path.display(),
            certs.len()
        );
    }
    Ok(certs.remove(0))
}

fn fp_sha256_hex(cert: &CertificateDer<'_>) -> String {
    let mut h = Sha256::new();
    h.update(cert.as_ref());
    let digest = h.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect::<String>()
}

#[derive(Debug)]
struct PinnedVerifier {
    pinned: CertificateDer<'static>,
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(format!(
                "server certificate does not match pinned certificate (got sha256:{}, pinned sha256:{})",
                fp_sha256_hex(end_entity),
                fp_sha256_hex(&self.pinned)
            )))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}

/// Client config that accepts the pinned certificate and nothing else.
pub fn build_client_config(pinned: CertificateDer<'static>) -> rustls::ClientConfig {
    let verifier = PinnedVerifier { pinned };
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth()
}

/// SNI value for the connection; instances are usually addressed by IP.
pub fn server_name_for(host: &str) -> Result<ServerName<'static>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_string()).map_err(|_| anyhow!("invalid host name {:?}", host))
}
