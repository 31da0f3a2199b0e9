use std::time::Duration;

use p256::ecdsa::SigningKey;
use p256::pkcs8::DecodePrivateKey;

use shared::error::{Error, Result};

use crate::extension::SrtpProtectionProfile;

/// A self-signed certificate plus its P-256 signing key.
///
/// The peer never validates the chain; identity is pinned by the SDP
/// fingerprint at the session layer.
#[derive(Clone)]
pub struct Certificate {
    /// DER-encoded X.509 certificate.
    pub certificate: Vec<u8>,
    pub private_key: SigningKey,
}

impl Certificate {
    /// Generates an ephemeral self-signed ECDSA certificate.
    pub fn generate_self_signed(subject_alt_names: Vec<String>) -> Result<Self> {
        let certified_key = rcgen::generate_simple_self_signed(subject_alt_names)
            .map_err(|e| Error::Other(e.to_string()))?;
        let certificate = certified_key.cert.der().to_vec();
        let pkcs8 = certified_key.key_pair.serialize_der();
        let private_key = SigningKey::from_pkcs8_der(&pkcs8)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Certificate {
            certificate,
            private_key,
        })
    }

    /// SHA-256 fingerprint in SDP notation.
    pub fn fingerprint(&self) -> String {
        crate::crypto::certificate_fingerprint(&self.certificate)
    }
}

/// Handshake parameters shared by client and server conns.
#[derive(Clone)]
pub struct HandshakeConfig {
    pub certificate: Certificate,
    /// SRTP protection profiles offered/accepted through use_srtp.
    pub srtp_protection_profiles: Vec<SrtpProtectionProfile>,
    /// Skip ServerKeyExchange signature validation against the peer
    /// certificate. Fingerprint pinning still applies above this layer.
    pub insecure_skip_verify: bool,
    /// Initial flight retransmit interval.
    pub initial_retransmit_interval: Duration,
    /// Retransmit interval ceiling.
    pub max_retransmit_interval: Duration,
    /// Overall handshake deadline.
    pub handshake_timeout: Duration,
}

impl HandshakeConfig {
    pub fn new(certificate: Certificate) -> Self {
        HandshakeConfig {
            certificate,
            srtp_protection_profiles: vec![
                SrtpProtectionProfile::AeadAes128Gcm,
                SrtpProtectionProfile::AeadAes256Gcm,
            ],
            insecure_skip_verify: false,
            initial_retransmit_interval: Duration::from_secs(1),
            max_retransmit_interval: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}
