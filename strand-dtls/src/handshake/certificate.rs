use bytes::{Buf, BufMut};

use shared::error::{Error, Result};

use super::{get_u24, put_u24};

/// Certificate message: the sender's DER chain (RFC 5246 section 7.4.2).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CertificateMsg {
    pub certificates: Vec<Vec<u8>>,
}

impl CertificateMsg {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let total: usize = self.certificates.iter().map(|c| 3 + c.len()).sum();
        let mut out = Vec::with_capacity(3 + total);
        put_u24(&mut out, total as u32);
        for cert in &self.certificates {
            put_u24(&mut out, cert.len() as u32);
            out.put_slice(cert);
        }
        Ok(out)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 3 {
            return Err(Error::ErrBufferTooSmall);
        }
        let mut total = get_u24(buf) as usize;
        if buf.remaining() < total {
            return Err(Error::ErrLengthMismatch);
        }

        let mut certificates = vec![];
        while total > 0 {
            if total < 3 {
                return Err(Error::ErrLengthMismatch);
            }
            let len = get_u24(buf) as usize;
            total -= 3;
            if total < len || buf.remaining() < len {
                return Err(Error::ErrLengthMismatch);
            }
            certificates.push(buf.copy_to_bytes(len).to_vec());
            total -= len;
        }

        Ok(CertificateMsg { certificates })
    }
}

pub const CLIENT_CERTIFICATE_TYPE_ECDSA_SIGN: u8 = 64;

/// CertificateRequest (RFC 5246 section 7.4.4).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
}

impl CertificateRequest {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u8(self.certificate_types.len() as u8);
        out.put_slice(&self.certificate_types);
        out.put_u16((self.signature_algorithms.len() * 2) as u16);
        for alg in &self.signature_algorithms {
            out.put_u16(*alg);
        }
        out.put_u16(0); // no distinguished names
        Ok(out)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(Error::ErrBufferTooSmall);
        }
        let types_len = buf.get_u8() as usize;
        if buf.remaining() < types_len + 2 {
            return Err(Error::ErrBufferTooSmall);
        }
        let certificate_types = buf.copy_to_bytes(types_len).to_vec();

        let algs_len = buf.get_u16() as usize;
        if algs_len % 2 != 0 || buf.remaining() < algs_len + 2 {
            return Err(Error::ErrLengthMismatch);
        }
        let mut signature_algorithms = Vec::with_capacity(algs_len / 2);
        for _ in 0..algs_len / 2 {
            signature_algorithms.push(buf.get_u16());
        }

        let ca_len = buf.get_u16() as usize;
        if buf.remaining() < ca_len {
            return Err(Error::ErrBufferTooSmall);
        }
        buf.advance(ca_len);

        Ok(CertificateRequest {
            certificate_types,
            signature_algorithms,
        })
    }
}

/// CertificateVerify (RFC 5246 section 7.4.8): the client proves key
/// possession by signing the handshake transcript.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CertificateVerify {
    pub hash_algorithm: u8,
    pub signature_algorithm: u8,
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
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
        let hash_algorithm = buf.get_u8();
        let signature_algorithm = buf.get_u8();
        let sig_len = buf.get_u16() as usize;
        if buf.remaining() < sig_len {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(CertificateVerify {
            hash_algorithm,
            signature_algorithm,
            signature: buf.copy_to_bytes(sig_len).to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_msg_round_trip() -> Result<()> {
        let msg = CertificateMsg {
            certificates: vec![vec![1, 2, 3], vec![4, 5, 6, 7]],
        };
        let raw = msg.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(CertificateMsg::unmarshal(&mut buf)?, msg);
        Ok(())
    }

    #[test]
    fn test_certificate_request_round_trip() -> Result<()> {
        let msg = CertificateRequest {
            certificate_types: vec![CLIENT_CERTIFICATE_TYPE_ECDSA_SIGN],
            signature_algorithms: vec![0x0403],
        };
        let raw = msg.marshal()?;
        let mut buf = &raw[..];
        assert_eq!(CertificateRequest::unmarshal(&mut buf)?, msg);
        Ok(())
    }
}
