use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use shared::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub(crate) const PRF_MASTER_SECRET_LABEL: &str = "master secret";
pub(crate) const PRF_EXTENDED_MASTER_SECRET_LABEL: &str = "extended master secret";
pub(crate) const PRF_KEY_EXPANSION_LABEL: &str = "key expansion";
pub(crate) const PRF_VERIFY_DATA_CLIENT_LABEL: &str = "client finished";
pub(crate) const PRF_VERIFY_DATA_SERVER_LABEL: &str = "server finished";

/// Session keys expanded from the master secret.
#[derive(PartialEq, Debug, Clone, Default)]
pub(crate) struct EncryptionKeys {
    pub(crate) master_secret: Vec<u8>,
    pub(crate) client_write_key: Vec<u8>,
    pub(crate) server_write_key: Vec<u8>,
    pub(crate) client_write_iv: Vec<u8>,
    pub(crate) server_write_iv: Vec<u8>,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| Error::Other(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// P_SHA256 (RFC 5246 section 5):
/// P_hash(secret, seed) = HMAC(secret, A(1) + seed) + HMAC(secret, A(2) + seed) + ...
/// with A(0) = seed, A(i) = HMAC(secret, A(i-1)).
pub(crate) fn prf_p_hash(secret: &[u8], seed: &[u8], requested_length: usize) -> Result<Vec<u8>> {
    let mut last_round = seed.to_vec();
    let mut out = vec![];

    let iterations = (requested_length + 31) / 32;
    for _ in 0..iterations {
        last_round = hmac_sha256(secret, &last_round)?;

        let mut last_round_seed = last_round.clone();
        last_round_seed.extend_from_slice(seed);
        out.extend_from_slice(&hmac_sha256(secret, &last_round_seed)?);
    }

    out.truncate(requested_length);
    Ok(out)
}

pub(crate) fn prf_master_secret(
    pre_master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<Vec<u8>> {
    let mut seed = PRF_MASTER_SECRET_LABEL.as_bytes().to_vec();
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    prf_p_hash(pre_master_secret, &seed, 48)
}

/// Extended master secret (RFC 7627): binds the master secret to the
/// handshake transcript hash instead of the randoms.
pub(crate) fn prf_extended_master_secret(
    pre_master_secret: &[u8],
    session_hash: &[u8],
) -> Result<Vec<u8>> {
    let mut seed = PRF_EXTENDED_MASTER_SECRET_LABEL.as_bytes().to_vec();
    seed.extend_from_slice(session_hash);
    prf_p_hash(pre_master_secret, &seed, 48)
}

pub(crate) fn prf_encryption_keys(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    key_len: usize,
    iv_len: usize,
) -> Result<EncryptionKeys> {
    let mut seed = PRF_KEY_EXPANSION_LABEL.as_bytes().to_vec();
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    // AEAD suites have no MAC keys; the block is keys then IVs
    let material = prf_p_hash(master_secret, &seed, 2 * key_len + 2 * iv_len)?;
    let mut key_material = &material[..];

    let client_write_key = key_material[..key_len].to_vec();
    key_material = &key_material[key_len..];
    let server_write_key = key_material[..key_len].to_vec();
    key_material = &key_material[key_len..];
    let client_write_iv = key_material[..iv_len].to_vec();
    key_material = &key_material[iv_len..];
    let server_write_iv = key_material[..iv_len].to_vec();

    Ok(EncryptionKeys {
        master_secret: master_secret.to_vec(),
        client_write_key,
        server_write_key,
        client_write_iv,
        server_write_iv,
    })
}

pub(crate) fn prf_verify_data(
    master_secret: &[u8],
    handshake_bodies: &[u8],
    label: &str,
) -> Result<Vec<u8>> {
    let mut hasher = Sha256::new();
    hasher.update(handshake_bodies);
    let transcript_hash = hasher.finalize();

    let mut seed = label.as_bytes().to_vec();
    seed.extend_from_slice(&transcript_hash);
    prf_p_hash(master_secret, &seed, 12)
}

pub(crate) fn prf_verify_data_client(
    master_secret: &[u8],
    handshake_bodies: &[u8],
) -> Result<Vec<u8>> {
    prf_verify_data(master_secret, handshake_bodies, PRF_VERIFY_DATA_CLIENT_LABEL)
}

pub(crate) fn prf_verify_data_server(
    master_secret: &[u8],
    handshake_bodies: &[u8],
) -> Result<Vec<u8>> {
    prf_verify_data(master_secret, handshake_bodies, PRF_VERIFY_DATA_SERVER_LABEL)
}

/// RFC 5705 keying material export, used for the dtls_srtp extractor.
pub(crate) fn prf_exported_keying_material(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    label: &str,
    length: usize,
) -> Result<Vec<u8>> {
    let mut seed = label.as_bytes().to_vec();
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    prf_p_hash(master_secret, &seed, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prf_p_hash_is_deterministic_and_sized() -> Result<()> {
        let out1 = prf_p_hash(b"secret", b"seed", 48)?;
        let out2 = prf_p_hash(b"secret", b"seed", 48)?;
        assert_eq!(out1, out2);
        assert_eq!(out1.len(), 48);

        // a longer request extends, it does not restart
        let out80 = prf_p_hash(b"secret", b"seed", 80)?;
        assert_eq!(&out80[..48], &out1[..]);
        Ok(())
    }

    #[test]
    fn test_master_secret_is_48_bytes() -> Result<()> {
        let ms = prf_master_secret(&[1u8; 32], &[2u8; 32], &[3u8; 32])?;
        assert_eq!(ms.len(), 48);
        Ok(())
    }

    #[test]
    fn test_verify_data_differs_per_role() -> Result<()> {
        let ms = [7u8; 48];
        let transcript = b"handshake messages";
        let client = prf_verify_data_client(&ms, transcript)?;
        let server = prf_verify_data_server(&ms, transcript)?;
        assert_eq!(client.len(), 12);
        assert_eq!(server.len(), 12);
        assert_ne!(client, server);
        Ok(())
    }
}
