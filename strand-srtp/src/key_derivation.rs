use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use byteorder::{BigEndian, ByteOrder};

use shared::error::{Error, Result};

pub const LABEL_SRTP_ENCRYPTION: u8 = 0x00;
pub const LABEL_SRTP_AUTHENTICATION_TAG: u8 = 0x01;
pub const LABEL_SRTP_SALT: u8 = 0x02;
pub const LABEL_SRTCP_ENCRYPTION: u8 = 0x03;
pub const LABEL_SRTCP_AUTHENTICATION_TAG: u8 = 0x04;
pub const LABEL_SRTCP_SALT: u8 = 0x05;

/// AES-CM key derivation (RFC 3711 section 4.3.1 with the appendix B.3
/// layout): the master salt is XORed with the label at octet 7, then AES
/// counter blocks generate the requested amount of session keying material.
pub fn aes_cm_key_derivation(
    label: u8,
    master_key: &[u8],
    master_salt: &[u8],
    out_len: usize,
) -> Result<Vec<u8>> {
    if master_key.len() != 16 {
        return Err(Error::ErrShortSrtpMasterKey);
    }
    if master_salt.len() > 14 {
        return Err(Error::ErrShortSrtpMasterSalt);
    }

    let n_master_key = master_key.len();
    let mut prf_in = vec![0u8; n_master_key];
    prf_in[..master_salt.len()].copy_from_slice(master_salt);
    prf_in[7] ^= label;

    let cipher = Aes128::new(GenericArray::from_slice(master_key));

    let block_count = (out_len + n_master_key - 1) / n_master_key;
    let mut out = vec![0u8; block_count * n_master_key];
    for (i, chunk) in out.chunks_mut(n_master_key).enumerate() {
        BigEndian::write_u16(&mut prf_in[n_master_key - 2..], i as u16);
        let mut block = GenericArray::clone_from_slice(&prf_in);
        cipher.encrypt_block(&mut block);
        chunk.copy_from_slice(&block);
    }

    out.truncate(out_len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 3711 appendix B.3 test vectors.
    #[test]
    fn test_key_derivation_rfc_vectors() -> Result<()> {
        let master_key = [
            0xE1, 0xF9, 0x7A, 0x0D, 0x3E, 0x01, 0x8B, 0xE0, 0xD6, 0x4F, 0xA3, 0x2C, 0x06, 0xDE,
            0x41, 0x39,
        ];
        let master_salt = [
            0x0E, 0xC6, 0x75, 0xAD, 0x49, 0x8A, 0xFE, 0xEB, 0xB6, 0x96, 0x0B, 0x3A, 0xAB, 0xE6,
        ];

        let session_key =
            aes_cm_key_derivation(LABEL_SRTP_ENCRYPTION, &master_key, &master_salt, 16)?;
        assert_eq!(
            session_key,
            vec![
                0xC6, 0x1E, 0x7A, 0x93, 0x74, 0x4F, 0x39, 0xEE, 0x10, 0x73, 0x4A, 0xFE, 0x3F,
                0xF7, 0xA0, 0x87,
            ]
        );

        let session_salt = aes_cm_key_derivation(LABEL_SRTP_SALT, &master_key, &master_salt, 14)?;
        assert_eq!(
            session_salt,
            vec![
                0x30, 0xCB, 0xBC, 0x08, 0x86, 0x3D, 0x8C, 0x85, 0xD4, 0x9D, 0xB3, 0x4A, 0x9A,
                0xE1,
            ]
        );

        let auth_key = aes_cm_key_derivation(
            LABEL_SRTP_AUTHENTICATION_TAG,
            &master_key,
            &master_salt,
            20,
        )?;
        assert_eq!(
            auth_key,
            vec![
                0xCE, 0xBE, 0x32, 0x1F, 0x6F, 0xF7, 0x71, 0x6B, 0x6F, 0xD4, 0xAB, 0x49, 0xAF,
                0x25, 0x6A, 0x15, 0x6D, 0x38, 0xBA, 0xA4,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_key_derivation_rejects_short_key() {
        assert!(aes_cm_key_derivation(0, &[0u8; 8], &[0u8; 12], 16).is_err());
    }
}
