use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

use shared::error::{Error, Result};

/// An ephemeral P-256 ECDH keypair for one handshake.
pub(crate) struct EcdhKeypair {
    secret: p256::NonZeroScalar,
    pub(crate) public_key: Vec<u8>, // uncompressed SEC1 point
}

impl EcdhKeypair {
    pub(crate) fn generate() -> Self {
        let secret = p256::NonZeroScalar::random(&mut rand::rngs::OsRng);
        let public = p256::PublicKey::from_secret_scalar(&secret);
        EcdhKeypair {
            secret,
            public_key: public.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// ECDH shared secret with the peer's SEC1-encoded public point.
    pub(crate) fn shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>> {
        let peer = p256::PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| Error::ErrInvalidEllipticCurveType)?;
        let shared = p256::ecdh::diffie_hellman(&self.secret, peer.as_affine());
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

/// The byte layout ECDHE parameters are signed over (RFC 4492 section
/// 5.4): client_random || server_random || curve_params || public_key.
pub(crate) fn signed_key_exchange_input(
    client_random: &[u8],
    server_random: &[u8],
    curve: u16,
    public_key: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + 4 + public_key.len());
    out.extend_from_slice(client_random);
    out.extend_from_slice(server_random);
    out.push(3); // named_curve
    out.extend_from_slice(&curve.to_be_bytes());
    out.push(public_key.len() as u8);
    out.extend_from_slice(public_key);
    out
}

/// Signs the key exchange input with ECDSA P-256/SHA-256, DER encoded.
pub(crate) fn sign_key_exchange(signing_key: &SigningKey, input: &[u8]) -> Vec<u8> {
    let signature: Signature = signing_key.sign(input);
    signature.to_der().as_bytes().to_vec()
}

/// Verifies a DER ECDSA signature against the SubjectPublicKeyInfo of the
/// peer's leaf certificate.
pub(crate) fn verify_key_exchange(
    certificate_der: &[u8],
    input: &[u8],
    signature_der: &[u8],
) -> Result<()> {
    let spki_point = extract_p256_public_key(certificate_der)?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&spki_point)
        .map_err(|_| Error::ErrInvalidCertificate)?;
    let signature =
        Signature::from_der(signature_der).map_err(|_| Error::ErrInvalidSignatureAlgorithm)?;
    verifying_key
        .verify(input, &signature)
        .map_err(|_| Error::ErrKeySignatureMismatch)
}

/// Pulls the uncompressed P-256 point out of a DER certificate.
fn extract_p256_public_key(certificate_der: &[u8]) -> Result<Vec<u8>> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(certificate_der)
        .map_err(|_| Error::ErrInvalidCertificate)?;
    let spki: &SubjectPublicKeyInfo<'_> = cert.public_key();
    Ok(spki.subject_public_key.data.to_vec())
}

/// SHA-256 fingerprint of a DER certificate, formatted the way SDP
/// carries it: uppercase hex pairs joined with colons.
pub fn certificate_fingerprint(certificate_der: &[u8]) -> String {
    let digest = Sha256::digest(certificate_der);
    digest
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecdh_shared_secret_agreement() -> Result<()> {
        let a = EcdhKeypair::generate();
        let b = EcdhKeypair::generate();
        let ab = a.shared_secret(&b.public_key)?;
        let ba = b.shared_secret(&a.public_key)?;
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 32);
        Ok(())
    }

    #[test]
    fn test_sign_and_verify_key_exchange() -> Result<()> {
        let cert = crate::config::Certificate::generate_self_signed(vec!["test".to_owned()])?;
        let kx = EcdhKeypair::generate();
        let input = signed_key_exchange_input(&[1u8; 32], &[2u8; 32], 0x0017, &kx.public_key);
        let sig = sign_key_exchange(&cert.private_key, &input);
        verify_key_exchange(&cert.certificate, &input, &sig)?;

        // tampered input fails
        let mut bad = input.clone();
        bad[0] ^= 0xff;
        assert_eq!(
            verify_key_exchange(&cert.certificate, &bad, &sig),
            Err(Error::ErrKeySignatureMismatch)
        );
        Ok(())
    }

    #[test]
    fn test_fingerprint_format() -> Result<()> {
        let cert = crate::config::Certificate::generate_self_signed(vec!["test".to_owned()])?;
        let fp = certificate_fingerprint(&cert.certificate);
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert!(fp
            .split(':')
            .all(|pair| pair.len() == 2 && pair.chars().all(|c| c.is_ascii_hexdigit())));
        Ok(())
    }
}
