//! Certificate-fingerprint TLS pinning
//!
//! The controller ships with a self-signed certificate, so chain
//! verification is not merely relaxed but replaced entirely: a peer
//! certificate is accepted if and only if its SHA-1 digest equals the
//! fingerprint computed from the bundled PEM file: "pin to a root store"
//! generalized down to "pin to one leaf fingerprint, skip chain checks".

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::verify_tls12_signature;
use rustls::crypto::verify_tls13_signature;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DistinguishedName, Error as TlsError, SignatureScheme};
use sha1::{Digest, Sha1};

use crate::error::{IhcError, IhcResult};

/// A `ServerCertVerifier` that ignores the certificate chain entirely and
/// accepts a connection only if the leaf certificate's SHA-1 fingerprint
/// matches the one pinned at construction.
#[derive(Debug)]
pub struct FingerprintVerifier {
    fingerprint: [u8; 20],
}

impl FingerprintVerifier {
    /// Build a verifier pinned to the SHA-1 fingerprint of the first
    /// certificate found in `pem_bytes`.
    pub fn from_pem(pem_bytes: &[u8]) -> IhcResult<Self> {
        let mut reader = std::io::Cursor::new(pem_bytes);
        let cert = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or_else(|| IhcError::Tls("no certificate found in pinned PEM".to_string()))?
            .map_err(|e| IhcError::Tls(format!("invalid pinned certificate: {e}")))?;
        Ok(Self {
            fingerprint: fingerprint_of(cert.as_ref()),
        })
    }

    /// Build a `rustls::ClientConfig` that uses this verifier and performs
    /// no other certificate validation.
    ///
    /// Uses an explicit `ring` `CryptoProvider` rather than the process-wide
    /// default so this works in test binaries and embedding applications
    /// that never install one globally.
    pub fn into_client_config(self) -> ClientConfig {
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .expect("ring provider supports the default TLS protocol versions")
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(self))
            .with_no_client_auth()
    }
}

fn fingerprint_of(der: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(der);
    hasher.finalize().into()
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let observed = fingerprint_of(end_entity.as_ref());
        if observed == self.fingerprint {
            Ok(ServerCertVerified::assertion())
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                expected = %hex(&self.fingerprint),
                observed = %hex(&observed),
                "pinned certificate fingerprint mismatch"
            );
            Err(TlsError::General(
                "peer certificate fingerprint does not match pinned fingerprint".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }

    fn requires_raw_public_keys(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> Option<&[DistinguishedName]> {
        None
    }
}

#[cfg(feature = "tracing")]
fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELF_SIGNED_PEM: &str = include_str!("../certs/ihc3.crt");

    #[test]
    fn pins_matching_fingerprint() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let verifier = FingerprintVerifier::from_pem(SELF_SIGNED_PEM.as_bytes()).unwrap();

        let mut reader = std::io::Cursor::new(SELF_SIGNED_PEM.as_bytes());
        let der = rustls_pemfile::certs(&mut reader).next().unwrap().unwrap();

        let result = verifier.verify_server_cert(
            &der,
            &[],
            &ServerName::try_from("ihc-controller.local").unwrap(),
            &[],
            UnixTime::now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_mismatched_fingerprint() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let verifier = FingerprintVerifier::from_pem(SELF_SIGNED_PEM.as_bytes()).unwrap();

        // Any DER blob that isn't the pinned cert must be rejected, even
        // though it isn't itself a structurally valid certificate; the
        // verifier only ever looks at its fingerprint.
        let bogus = CertificateDer::from(vec![0u8; 128]);

        let result = verifier.verify_server_cert(
            &bogus,
            &[],
            &ServerName::try_from("ihc-controller.local").unwrap(),
            &[],
            UnixTime::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn client_config_builds() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let verifier = FingerprintVerifier::from_pem(SELF_SIGNED_PEM.as_bytes()).unwrap();
        let _config = verifier.into_client_config();
    }
}
