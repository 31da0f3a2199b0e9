use dtls::Certificate;
use shared::error::Result;

/// The local certificate: an ephemeral self-signed cert whose SHA-256
/// fingerprint is advertised in SDP and pinned by the peer.
#[derive(Clone)]
pub struct RTCCertificate {
    pub(crate) certificate: Certificate,
}

impl RTCCertificate {
    pub fn generate() -> Result<Self> {
        Ok(RTCCertificate {
            certificate: Certificate::generate_self_signed(vec!["WebRTC".to_owned()])?,
        })
    }

    /// `sha-256 XX:XX:...` as carried by the SDP fingerprint attribute.
    pub fn fingerprint(&self) -> String {
        format!("sha-256 {}", self.certificate.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_shape() -> Result<()> {
        let cert = RTCCertificate::generate()?;
        let fingerprint = cert.fingerprint();
        let (algorithm, value) = fingerprint.split_once(' ').unwrap();
        assert_eq!(algorithm, "sha-256");
        assert_eq!(value.split(':').count(), 32);
        Ok(())
    }
}
