#[cfg(test)]
mod context_test;

use std::collections::HashMap;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use byteorder::{BigEndian, ByteOrder};
use bytes::{Bytes, BytesMut};

use shared::error::{Error, Result};
use shared::marshal::{MarshalSize, Unmarshal};
use shared::replay_detector::{ReplayDetector, SlidingWindowDetector};

use crate::key_derivation::{
    aes_cm_key_derivation, LABEL_SRTCP_ENCRYPTION, LABEL_SRTCP_SALT, LABEL_SRTP_ENCRYPTION,
    LABEL_SRTP_SALT,
};
use crate::protection_profile::ProtectionProfile;

const MAX_ROC: u64 = u32::MAX as u64;
const SEQ_NUM_MEDIAN: u16 = 1 << 15;
const MAX_SRTCP_INDEX: u32 = 0x7FFF_FFFF;
const SRTCP_INDEX_SIZE: usize = 4;
const REPLAY_WINDOW: usize = 64;
const RTCP_ENCRYPTION_FLAG: u8 = 0x80;

struct SrtpSsrcState {
    index: u64, // 48-bit packet index: ROC << 16 | seq
    rollover_has_processed: bool,
    replay: SlidingWindowDetector,
}

impl Default for SrtpSsrcState {
    fn default() -> Self {
        SrtpSsrcState {
            index: 0,
            rollover_has_processed: false,
            replay: SlidingWindowDetector::new(REPLAY_WINDOW, (MAX_ROC << 16) | 0xFFFF),
        }
    }
}

impl SrtpSsrcState {
    /// Estimates the 48-bit packet index of `seq` (RFC 3711 appendix A).
    fn estimate_index(&self, seq: u16) -> u64 {
        if !self.rollover_has_processed {
            return seq as u64;
        }

        let roc = self.index >> 16;
        let s_l = self.index as u16;

        let v = if s_l < SEQ_NUM_MEDIAN {
            if seq > s_l && seq - s_l > SEQ_NUM_MEDIAN && roc > 0 {
                roc - 1
            } else {
                roc
            }
        } else if s_l - SEQ_NUM_MEDIAN > seq {
            roc + 1
        } else {
            roc
        };

        (v << 16) | seq as u64
    }

    fn update(&mut self, index: u64) {
        if !self.rollover_has_processed {
            self.rollover_has_processed = true;
            self.index = index;
            return;
        }
        if index > self.index {
            self.index = index;
        }
    }
}

struct SrtcpSsrcState {
    index: u32,
    replay: SlidingWindowDetector,
}

impl Default for SrtcpSsrcState {
    fn default() -> Self {
        SrtcpSsrcState {
            index: 0,
            replay: SlidingWindowDetector::new(REPLAY_WINDOW, MAX_SRTCP_INDEX as u64),
        }
    }
}

/// Context is one direction's SRTP/SRTCP protection state: session keys
/// derived from the DTLS-exported master key/salt, plus per-SSRC rollover
/// counters and anti-replay windows.
///
/// Output is a deterministic function of (key, salt, SSRC, SEQ, ROC,
/// plaintext).
pub struct Context {
    profile: ProtectionProfile,
    srtp_cipher: Aes128Gcm,
    srtcp_cipher: Aes128Gcm,
    srtp_session_salt: Vec<u8>,
    srtcp_session_salt: Vec<u8>,
    srtp_ssrc_states: HashMap<u32, SrtpSsrcState>,
    srtcp_ssrc_states: HashMap<u32, SrtcpSsrcState>,
}

impl Context {
    pub fn new(
        master_key: &[u8],
        master_salt: &[u8],
        profile: ProtectionProfile,
    ) -> Result<Self> {
        if master_key.len() != profile.key_len() {
            return Err(Error::ErrShortSrtpMasterKey);
        }
        if master_salt.len() != profile.salt_len() {
            return Err(Error::ErrShortSrtpMasterSalt);
        }

        let srtp_session_key = aes_cm_key_derivation(
            LABEL_SRTP_ENCRYPTION,
            master_key,
            master_salt,
            profile.key_len(),
        )?;
        let srtcp_session_key = aes_cm_key_derivation(
            LABEL_SRTCP_ENCRYPTION,
            master_key,
            master_salt,
            profile.key_len(),
        )?;
        let srtp_session_salt = aes_cm_key_derivation(
            LABEL_SRTP_SALT,
            master_key,
            master_salt,
            profile.salt_len(),
        )?;
        let srtcp_session_salt = aes_cm_key_derivation(
            LABEL_SRTCP_SALT,
            master_key,
            master_salt,
            profile.salt_len(),
        )?;

        Ok(Context {
            profile,
            srtp_cipher: Aes128Gcm::new_from_slice(&srtp_session_key)
                .map_err(|e| Error::Other(e.to_string()))?,
            srtcp_cipher: Aes128Gcm::new_from_slice(&srtcp_session_key)
                .map_err(|e| Error::Other(e.to_string()))?,
            srtp_session_salt,
            srtcp_session_salt,
            srtp_ssrc_states: HashMap::new(),
            srtcp_ssrc_states: HashMap::new(),
        })
    }

    /// 12-octet SRTP IV (RFC 7714 section 8.1):
    /// (00 00 || SSRC || ROC || SEQ) XOR session salt.
    fn rtp_initialization_vector(&self, ssrc: u32, roc: u32, seq: u16) -> [u8; 12] {
        let mut iv = [0u8; 12];
        BigEndian::write_u32(&mut iv[2..], ssrc);
        BigEndian::write_u32(&mut iv[6..], roc);
        BigEndian::write_u16(&mut iv[10..], seq);
        for (i, v) in iv.iter_mut().enumerate() {
            *v ^= self.srtp_session_salt[i];
        }
        iv
    }

    /// 12-octet SRTCP IV (RFC 7714 section 9.1):
    /// (00 00 || SSRC || 00 00 || 0+index) XOR session salt.
    fn rtcp_initialization_vector(&self, ssrc: u32, index: u32) -> [u8; 12] {
        let mut iv = [0u8; 12];
        BigEndian::write_u32(&mut iv[2..], ssrc);
        BigEndian::write_u32(&mut iv[8..], index);
        for (i, v) in iv.iter_mut().enumerate() {
            *v ^= self.srtcp_session_salt[i];
        }
        iv
    }

    /// ESRTCP word: E-bit plus the 31-bit index, part of the AAD and the
    /// trailer (RFC 7714 section 17).
    fn rtcp_additional_authenticated_data(&self, rtcp_packet: &[u8], index: u32) -> [u8; 12] {
        let mut aad = [0u8; 12];
        aad[..8].copy_from_slice(&rtcp_packet[..8]);
        BigEndian::write_u32(&mut aad[8..], index);
        aad[8] |= RTCP_ENCRYPTION_FLAG;
        aad
    }

    /// Encrypts an RTP packet in place of its plaintext serialization.
    pub fn protect_rtp(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        let mut reader = plaintext;
        let header = rtp::header::Header::unmarshal(&mut reader)?;
        let header_len = header.marshal_size();

        let state = self.srtp_ssrc_states.entry(header.ssrc).or_default();
        let index = state.estimate_index(header.sequence_number);
        state.update(index);
        let roc = (index >> 16) as u32;

        let nonce = self.rtp_initialization_vector(header.ssrc, roc, header.sequence_number);
        let encrypted = self
            .srtp_cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext[header_len..],
                    aad: &plaintext[..header_len],
                },
            )
            .map_err(|_| Error::ErrFailedToVerifyAuthTag)?;

        let mut writer = BytesMut::with_capacity(header_len + encrypted.len());
        writer.extend_from_slice(&plaintext[..header_len]);
        writer.extend_from_slice(&encrypted);
        Ok(writer.freeze())
    }

    /// Authenticates and decrypts an SRTP packet.
    pub fn unprotect_rtp(&mut self, ciphertext: &[u8]) -> Result<Bytes> {
        if ciphertext.len() < 12 + self.profile.aead_auth_tag_len() {
            return Err(Error::ErrTooShortRtp);
        }

        let mut reader = ciphertext;
        let header = rtp::header::Header::unmarshal(&mut reader)?;
        let header_len = header.marshal_size();
        if ciphertext.len() < header_len + self.profile.aead_auth_tag_len() {
            return Err(Error::ErrTooShortRtp);
        }

        let state = self.srtp_ssrc_states.entry(header.ssrc).or_default();
        let index = state.estimate_index(header.sequence_number);
        if !state.replay.check(index) {
            return Err(Error::SrtpSsrcDuplicated(
                header.ssrc,
                header.sequence_number,
            ));
        }
        let roc = (index >> 16) as u32;

        let nonce = self.rtp_initialization_vector(header.ssrc, roc, header.sequence_number);
        let decrypted = self
            .srtp_cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext[header_len..],
                    aad: &ciphertext[..header_len],
                },
            )
            .map_err(|_| Error::ErrFailedToVerifyAuthTag)?;

        // commit replay and rollover state only after authentication
        let state = self
            .srtp_ssrc_states
            .get_mut(&header.ssrc)
            .ok_or(Error::ErrFailedToVerifyAuthTag)?;
        state.replay.accept();
        state.update(index);

        let mut writer = BytesMut::with_capacity(header_len + decrypted.len());
        writer.extend_from_slice(&ciphertext[..header_len]);
        writer.extend_from_slice(&decrypted);
        Ok(writer.freeze())
    }

    /// Encrypts a compound RTCP packet; everything after the first eight
    /// bytes is encrypted and the ESRTCP word is appended.
    pub fn protect_rtcp(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        if plaintext.len() < 8 {
            return Err(Error::ErrTooShortRtcp);
        }

        let ssrc = BigEndian::read_u32(&plaintext[4..8]);
        let state = self.srtcp_ssrc_states.entry(ssrc).or_default();
        state.index += 1;
        if state.index > MAX_SRTCP_INDEX {
            state.index = 0;
        }
        let index = state.index;

        let nonce = self.rtcp_initialization_vector(ssrc, index);
        let aad = self.rtcp_additional_authenticated_data(plaintext, index);

        let encrypted = self
            .srtcp_cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext[8..],
                    aad: &aad,
                },
            )
            .map_err(|_| Error::ErrFailedToVerifyAuthTag)?;

        let mut writer = BytesMut::with_capacity(8 + encrypted.len() + SRTCP_INDEX_SIZE);
        writer.extend_from_slice(&plaintext[..8]);
        writer.extend_from_slice(&encrypted);
        writer.extend_from_slice(&aad[8..]);
        Ok(writer.freeze())
    }

    /// Authenticates and decrypts a compound SRTCP packet.
    pub fn unprotect_rtcp(&mut self, ciphertext: &[u8]) -> Result<Bytes> {
        if ciphertext.len() < 8 + self.profile.aead_auth_tag_len() + SRTCP_INDEX_SIZE {
            return Err(Error::ErrTooShortRtcp);
        }

        let ssrc = BigEndian::read_u32(&ciphertext[4..8]);
        let trailer = BigEndian::read_u32(&ciphertext[ciphertext.len() - SRTCP_INDEX_SIZE..]);
        let index = trailer & MAX_SRTCP_INDEX;

        let state = self.srtcp_ssrc_states.entry(ssrc).or_default();
        if !state.replay.check(index as u64) {
            return Err(Error::SrtcpSsrcDuplicated(ssrc, index as usize));
        }

        let nonce = self.rtcp_initialization_vector(ssrc, index);
        let aad = self.rtcp_additional_authenticated_data(ciphertext, index);

        let decrypted = self
            .srtcp_cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext[8..ciphertext.len() - SRTCP_INDEX_SIZE],
                    aad: &aad,
                },
            )
            .map_err(|_| Error::ErrFailedToVerifyAuthTag)?;

        let state = self
            .srtcp_ssrc_states
            .get_mut(&ssrc)
            .ok_or(Error::ErrFailedToVerifyAuthTag)?;
        state.replay.accept();

        let mut writer = BytesMut::with_capacity(8 + decrypted.len());
        writer.extend_from_slice(&ciphertext[..8]);
        writer.extend_from_slice(&decrypted);
        Ok(writer.freeze())
    }

    /// Current rollover counter of an SSRC, for stats.
    pub fn roc(&self, ssrc: u32) -> Option<u32> {
        self.srtp_ssrc_states
            .get(&ssrc)
            .map(|s| (s.index >> 16) as u32)
    }
}
