use bytes::{Buf, BufMut};
use rand::Rng;

use shared::error::{Error, Result};

use crate::extension::Extension;
use crate::record_layer::{ProtocolVersion, PROTOCOL_VERSION1_2};

pub const HANDSHAKE_RANDOM_LENGTH: usize = 32;

/// The 32-byte hello random: 4-byte gmt_unix_time plus 28 random bytes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct HandshakeRandom(pub [u8; HANDSHAKE_RANDOM_LENGTH]);

impl Default for HandshakeRandom {
    fn default() -> Self {
        HandshakeRandom([0u8; HANDSHAKE_RANDOM_LENGTH])
    }
}

impl HandshakeRandom {
    pub fn generate() -> Self {
        let mut bytes = [0u8; HANDSHAKE_RANDOM_LENGTH];
        rand::thread_rng().fill(&mut bytes[..]);
        HandshakeRandom(bytes)
    }
}

/// ClientHello (RFC 5246 section 7.4.1.2 with the DTLS cookie field).
#[derive(Clone, Debug, PartialEq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: HandshakeRandom,
    pub session_id: Vec<u8>,
    pub cookie: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        if self.cookie.len() > 255 {
            return Err(Error::ErrCookieTooLong);
        }

        let mut out = Vec::new();
        out.put_u8(self.version.major);
        out.put_u8(self.version.minor);
        out.put_slice(&self.random.0);
        out.put_u8(self.session_id.len() as u8);
        out.put_slice(&self.session_id);
        out.put_u8(self.cookie.len() as u8);
        out.put_slice(&self.cookie);
        out.put_u16((self.cipher_suites.len() * 2) as u16);
        for cs in &self.cipher_suites {
            out.put_u16(*cs);
        }
        out.put_u8(self.compression_methods.len() as u8);
        out.put_slice(&self.compression_methods);
        Extension::marshal_list(&self.extensions, &mut out);
        Ok(out)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 2 + HANDSHAKE_RANDOM_LENGTH + 2 {
            return Err(Error::ErrBufferTooSmall);
        }

        let version = ProtocolVersion {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let mut random = HandshakeRandom::default();
        buf.copy_to_slice(&mut random.0);

        let session_id_len = buf.get_u8() as usize;
        if buf.remaining() < session_id_len {
            return Err(Error::ErrBufferTooSmall);
        }
        let session_id = buf.copy_to_bytes(session_id_len).to_vec();

        if buf.remaining() < 1 {
            return Err(Error::ErrBufferTooSmall);
        }
        let cookie_len = buf.get_u8() as usize;
        if buf.remaining() < cookie_len {
            return Err(Error::ErrBufferTooSmall);
        }
        let cookie = buf.copy_to_bytes(cookie_len).to_vec();

        if buf.remaining() < 2 {
            return Err(Error::ErrBufferTooSmall);
        }
        let suites_len = buf.get_u16() as usize;
        if suites_len % 2 != 0 || buf.remaining() < suites_len {
            return Err(Error::ErrLengthMismatch);
        }
        let mut cipher_suites = Vec::with_capacity(suites_len / 2);
        for _ in 0..suites_len / 2 {
            cipher_suites.push(buf.get_u16());
        }

        if buf.remaining() < 1 {
            return Err(Error::ErrBufferTooSmall);
        }
        let compression_len = buf.get_u8() as usize;
        if buf.remaining() < compression_len {
            return Err(Error::ErrBufferTooSmall);
        }
        let compression_methods = buf.copy_to_bytes(compression_len).to_vec();

        let extensions = Extension::unmarshal_list(buf)?;

        Ok(ClientHello {
            version,
            random,
            session_id,
            cookie,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }
}

/// ServerHello (RFC 5246 section 7.4.1.3).
#[derive(Clone, Debug, PartialEq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: HandshakeRandom,
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u8(self.version.major);
        out.put_u8(self.version.minor);
        out.put_slice(&self.random.0);
        out.put_u8(self.session_id.len() as u8);
        out.put_slice(&self.session_id);
        out.put_u16(self.cipher_suite);
        out.put_u8(self.compression_method);
        Extension::marshal_list(&self.extensions, &mut out);
        Ok(out)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 2 + HANDSHAKE_RANDOM_LENGTH + 1 {
            return Err(Error::ErrBufferTooSmall);
        }

        let version = ProtocolVersion {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let mut random = HandshakeRandom::default();
        buf.copy_to_slice(&mut random.0);

        let session_id_len = buf.get_u8() as usize;
        if buf.remaining() < session_id_len + 3 {
            return Err(Error::ErrBufferTooSmall);
        }
        let session_id = buf.copy_to_bytes(session_id_len).to_vec();
        let cipher_suite = buf.get_u16();
        let compression_method = buf.get_u8();
        let extensions = Extension::unmarshal_list(buf)?;

        Ok(ServerHello {
            version,
            random,
            session_id,
            cipher_suite,
            compression_method,
            extensions,
        })
    }
}

/// HelloVerifyRequest (RFC 6347 section 4.2.1): the stateless cookie
/// exchange that precedes the real handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct HelloVerifyRequest {
    pub version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        if self.cookie.len() > 255 {
            return Err(Error::ErrCookieTooLong);
        }
        let mut out = Vec::new();
        out.put_u8(self.version.major);
        out.put_u8(self.version.minor);
        out.put_u8(self.cookie.len() as u8);
        out.put_slice(&self.cookie);
        Ok(out)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 3 {
            return Err(Error::ErrBufferTooSmall);
        }
        let version = ProtocolVersion {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let cookie_len = buf.get_u8() as usize;
        if buf.remaining() < cookie_len {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(HelloVerifyRequest {
            version,
            cookie: buf.copy_to_bytes(cookie_len).to_vec(),
        })
    }
}

impl Default for HelloVerifyRequest {
    fn default() -> Self {
        HelloVerifyRequest {
            version: PROTOCOL_VERSION1_2,
            cookie: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256;
    use crate::extension::{SrtpProtectionProfile, NAMED_CURVE_P256};

    #[test]
    fn test_client_hello_round_trip() -> Result<()> {
        let hello = ClientHello {
            version: PROTOCOL_VERSION1_2,
            random: HandshakeRandom::generate(),
            session_id: vec![],
            cookie: vec![0xde, 0xad],
            cipher_suites: vec![TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256],
            compression_methods: vec![0],
            extensions: vec![
                Extension::SupportedGroups(vec![NAMED_CURVE_P256]),
                Extension::UseSrtp(vec![SrtpProtectionProfile::AeadAes128Gcm]),
                Extension::ExtendedMasterSecret,
            ],
        };
        let raw = hello.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(ClientHello::unmarshal(&mut buf)?, hello);
        Ok(())
    }

    #[test]
    fn test_server_hello_round_trip() -> Result<()> {
        let hello = ServerHello {
            version: PROTOCOL_VERSION1_2,
            random: HandshakeRandom::generate(),
            session_id: vec![],
            cipher_suite: TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            compression_method: 0,
            extensions: vec![Extension::UseSrtp(vec![SrtpProtectionProfile::AeadAes128Gcm])],
        };
        let raw = hello.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(ServerHello::unmarshal(&mut buf)?, hello);
        Ok(())
    }

    #[test]
    fn test_hello_verify_request_round_trip() -> Result<()> {
        let hvr = HelloVerifyRequest {
            version: PROTOCOL_VERSION1_2,
            cookie: (0u8..20).collect(),
        };
        let raw = hvr.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(HelloVerifyRequest::unmarshal(&mut buf)?, hvr);
        Ok(())
    }
}
