use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};

use shared::error::{Error, Result};

use crate::record_layer::{ContentType, ProtocolVersion, RecordLayerHeader};

pub const TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256: u16 = 0xc02b;

pub const GCM_KEY_LENGTH: usize = 16;
pub const GCM_IMPLICIT_IV_LENGTH: usize = 4;
pub const GCM_EXPLICIT_NONCE_LENGTH: usize = 8;
pub const GCM_TAG_LENGTH: usize = 16;

/// Record protection for TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
/// (RFC 5288): 4-byte implicit IV from the key block, 8-byte explicit
/// nonce carried in front of each ciphertext.
pub(crate) struct CipherSuiteAes128Gcm {
    local_gcm: Aes128Gcm,
    remote_gcm: Aes128Gcm,
    local_write_iv: Vec<u8>,
    remote_write_iv: Vec<u8>,
}

impl CipherSuiteAes128Gcm {
    pub(crate) fn new(
        local_key: &[u8],
        local_write_iv: &[u8],
        remote_key: &[u8],
        remote_write_iv: &[u8],
    ) -> Result<Self> {
        Ok(CipherSuiteAes128Gcm {
            local_gcm: Aes128Gcm::new_from_slice(local_key)
                .map_err(|e| Error::Other(e.to_string()))?,
            remote_gcm: Aes128Gcm::new_from_slice(remote_key)
                .map_err(|e| Error::Other(e.to_string()))?,
            local_write_iv: local_write_iv.to_vec(),
            remote_write_iv: remote_write_iv.to_vec(),
        })
    }

    fn additional_data(
        epoch: u16,
        sequence_number: u64,
        content_type: ContentType,
        protocol_version: ProtocolVersion,
        payload_len: usize,
    ) -> [u8; 13] {
        let mut aad = [0u8; 13];
        aad[..2].copy_from_slice(&epoch.to_be_bytes());
        aad[2..8].copy_from_slice(&sequence_number.to_be_bytes()[2..]);
        aad[8] = content_type as u8;
        aad[9] = protocol_version.major;
        aad[10] = protocol_version.minor;
        aad[11..].copy_from_slice(&(payload_len as u16).to_be_bytes());
        aad
    }

    /// Encrypts a record body; output is explicit-nonce || ciphertext+tag.
    pub(crate) fn encrypt(
        &self,
        header: &RecordLayerHeader,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let mut nonce = vec![0u8; GCM_IMPLICIT_IV_LENGTH + GCM_EXPLICIT_NONCE_LENGTH];
        nonce[..GCM_IMPLICIT_IV_LENGTH].copy_from_slice(&self.local_write_iv);
        nonce[GCM_IMPLICIT_IV_LENGTH..GCM_IMPLICIT_IV_LENGTH + 2]
            .copy_from_slice(&header.epoch.to_be_bytes());
        nonce[GCM_IMPLICIT_IV_LENGTH + 2..]
            .copy_from_slice(&header.sequence_number.to_be_bytes()[2..]);

        let aad = Self::additional_data(
            header.epoch,
            header.sequence_number,
            header.content_type,
            header.protocol_version,
            payload.len(),
        );

        let ciphertext = self
            .local_gcm
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload { msg: payload, aad: &aad },
            )
            .map_err(|_| Error::ErrInvalidMac)?;

        let mut out = Vec::with_capacity(GCM_EXPLICIT_NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce[GCM_IMPLICIT_IV_LENGTH..]);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a record body of the form explicit-nonce || ciphertext+tag.
    pub(crate) fn decrypt(
        &self,
        header: &RecordLayerHeader,
        body: &[u8],
    ) -> Result<Vec<u8>> {
        if body.len() < GCM_EXPLICIT_NONCE_LENGTH + GCM_TAG_LENGTH {
            return Err(Error::ErrNotEnoughRoomForNonce);
        }

        let mut nonce = vec![0u8; GCM_IMPLICIT_IV_LENGTH + GCM_EXPLICIT_NONCE_LENGTH];
        nonce[..GCM_IMPLICIT_IV_LENGTH].copy_from_slice(&self.remote_write_iv);
        nonce[GCM_IMPLICIT_IV_LENGTH..].copy_from_slice(&body[..GCM_EXPLICIT_NONCE_LENGTH]);

        let ciphertext = &body[GCM_EXPLICIT_NONCE_LENGTH..];
        let aad = Self::additional_data(
            header.epoch,
            header.sequence_number,
            header.content_type,
            header.protocol_version,
            ciphertext.len() - GCM_TAG_LENGTH,
        );

        self.remote_gcm
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::ErrInvalidMac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_layer::PROTOCOL_VERSION1_2;

    fn pair() -> (CipherSuiteAes128Gcm, CipherSuiteAes128Gcm) {
        let client_key = [1u8; 16];
        let server_key = [2u8; 16];
        let client_iv = [3u8; 4];
        let server_iv = [4u8; 4];
        let client =
            CipherSuiteAes128Gcm::new(&client_key, &client_iv, &server_key, &server_iv).unwrap();
        let server =
            CipherSuiteAes128Gcm::new(&server_key, &server_iv, &client_key, &client_iv).unwrap();
        (client, server)
    }

    #[test]
    fn test_record_encrypt_decrypt() -> Result<()> {
        let (client, server) = pair();
        let header = RecordLayerHeader {
            content_type: ContentType::ApplicationData,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 1,
            sequence_number: 42,
            content_len: 0,
        };

        let encrypted = client.encrypt(&header, b"hello dtls")?;
        assert_eq!(
            encrypted.len(),
            GCM_EXPLICIT_NONCE_LENGTH + 10 + GCM_TAG_LENGTH
        );
        let decrypted = server.decrypt(&header, &encrypted)?;
        assert_eq!(decrypted, b"hello dtls");
        Ok(())
    }

    #[test]
    fn test_record_decrypt_rejects_tamper() -> Result<()> {
        let (client, server) = pair();
        let header = RecordLayerHeader {
            content_type: ContentType::ApplicationData,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 1,
            sequence_number: 1,
            content_len: 0,
        };
        let mut encrypted = client.encrypt(&header, b"payload")?;
        let last = encrypted.len() - 1;
        encrypted[last] ^= 1;
        assert_eq!(server.decrypt(&header, &encrypted), Err(Error::ErrInvalidMac));
        Ok(())
    }

    #[test]
    fn test_record_decrypt_rejects_wrong_sequence() -> Result<()> {
        let (client, server) = pair();
        let header = RecordLayerHeader {
            content_type: ContentType::ApplicationData,
            protocol_version: PROTOCOL_VERSION1_2,
            epoch: 1,
            sequence_number: 7,
            content_len: 0,
        };
        let encrypted = client.encrypt(&header, b"payload")?;

        // replayed under a different record sequence: AAD mismatch
        let bad_header = RecordLayerHeader {
            sequence_number: 8,
            ..header
        };
        assert!(server.decrypt(&bad_header, &encrypted).is_err());
        Ok(())
    }
}
