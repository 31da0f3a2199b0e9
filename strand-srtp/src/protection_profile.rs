/// ProtectionProfile specifies the SRTP encryption and authentication
/// scheme negotiated through the DTLS use_srtp extension.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProtectionProfile {
    /// SRTP_AEAD_AES_128_GCM (RFC 7714)
    #[default]
    AeadAes128Gcm = 0x0007,
    /// SRTP_AEAD_AES_256_GCM (RFC 7714)
    AeadAes256Gcm = 0x0008,
}

impl ProtectionProfile {
    pub fn key_len(&self) -> usize {
        match self {
            ProtectionProfile::AeadAes128Gcm => 16,
            ProtectionProfile::AeadAes256Gcm => 32,
        }
    }

    pub fn salt_len(&self) -> usize {
        // 96-bit master salt for both GCM profiles (RFC 7714 section 12)
        12
    }

    pub fn aead_auth_tag_len(&self) -> usize {
        16
    }

    /// Total keying material needed for both directions.
    pub fn keying_material_len(&self) -> usize {
        2 * self.key_len() + 2 * self.salt_len()
    }
}
