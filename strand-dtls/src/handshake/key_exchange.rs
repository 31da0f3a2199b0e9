use bytes::{Buf, BufMut};

use shared::error::{Error, Result};

const ELLIPTIC_CURVE_TYPE_NAMED_CURVE: u8 = 3;

/// ServerKeyExchange for ECDHE (RFC 4492 section 5.4): named curve,
/// ephemeral public point, and a signature over the params.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ServerKeyExchange {
    pub named_curve: u16,
    pub public_key: Vec<u8>,
    pub hash_algorithm: u8,
    pub signature_algorithm: u8,
    pub signature: Vec<u8>,
}

impl ServerKeyExchange {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u8(ELLIPTIC_CURVE_TYPE_NAMED_CURVE);
        out.put_u16(self.named_curve);
        out.put_u8(self.public_key.len() as u8);
        out.put_slice(&self.public_key);
        out.put_u8(self.hash_algorithm);
        out.put_u8(self.signature_algorithm);
        out.put_u16(self.signature.len() as u16);
        out.put_slice(&self.signature);
        Ok(out)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::ErrBufferTooSmall);
        }
        if buf.get_u8() != ELLIPTIC_CURVE_TYPE_NAMED_CURVE {
            return Err(Error::ErrInvalidEllipticCurveType);
        }
        let named_curve = buf.get_u16();
        let pub_len = buf.get_u8() as usize;
        if buf.remaining() < pub_len + 4 {
            return Err(Error::ErrBufferTooSmall);
        }
        let public_key = buf.copy_to_bytes(pub_len).to_vec();
        let hash_algorithm = buf.get_u8();
        let signature_algorithm = buf.get_u8();
        let sig_len = buf.get_u16() as usize;
        if buf.remaining() < sig_len {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(ServerKeyExchange {
            named_curve,
            public_key,
            hash_algorithm,
            signature_algorithm,
            signature: buf.copy_to_bytes(sig_len).to_vec(),
        })
    }
}

/// ClientKeyExchange for ECDHE: the client's ephemeral public point.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ClientKeyExchange {
    pub public_key: Vec<u8>,
}

impl ClientKeyExchange {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1 + self.public_key.len());
        out.put_u8(self.public_key.len() as u8);
        out.put_slice(&self.public_key);
        Ok(out)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(Error::ErrBufferTooSmall);
        }
        let pub_len = buf.get_u8() as usize;
        if buf.remaining() < pub_len {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(ClientKeyExchange {
            public_key: buf.copy_to_bytes(pub_len).to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::NAMED_CURVE_P256;

    #[test]
    fn test_server_key_exchange_round_trip() -> Result<()> {
        let ske = ServerKeyExchange {
            named_curve: NAMED_CURVE_P256,
            public_key: vec![4; 65],
            hash_algorithm: 4, // sha256
            signature_algorithm: 3, // ecdsa
            signature: vec![0x30, 0x06, 1, 2, 3, 4, 5, 6],
        };
        let raw = ske.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(ServerKeyExchange::unmarshal(&mut buf)?, ske);
        Ok(())
    }

    #[test]
    fn test_client_key_exchange_round_trip() -> Result<()> {
        let cke = ClientKeyExchange {
            public_key: vec![4; 65],
        };
        let raw = cke.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(ClientKeyExchange::unmarshal(&mut buf)?, cke);
        Ok(())
    }
}
