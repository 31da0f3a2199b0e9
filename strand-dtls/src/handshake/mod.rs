pub mod certificate;
pub mod finished;
pub mod hello;
pub mod key_exchange;

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};

use certificate::{CertificateMsg, CertificateRequest, CertificateVerify};
use finished::{Finished, ServerHelloDone};
use hello::{ClientHello, HelloVerifyRequest, ServerHello};
use key_exchange::{ClientKeyExchange, ServerKeyExchange};

pub const HANDSHAKE_HEADER_LENGTH: usize = 12;

/// Handshake message type (RFC 5246 section 7.4, RFC 6347 section 4.3.2).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    HelloVerifyRequest = 3,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl TryFrom<u8> for HandshakeType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(HandshakeType::HelloRequest),
            1 => Ok(HandshakeType::ClientHello),
            2 => Ok(HandshakeType::ServerHello),
            3 => Ok(HandshakeType::HelloVerifyRequest),
            11 => Ok(HandshakeType::Certificate),
            12 => Ok(HandshakeType::ServerKeyExchange),
            13 => Ok(HandshakeType::CertificateRequest),
            14 => Ok(HandshakeType::ServerHelloDone),
            15 => Ok(HandshakeType::CertificateVerify),
            16 => Ok(HandshakeType::ClientKeyExchange),
            20 => Ok(HandshakeType::Finished),
            _ => Err(Error::ErrHandshakeMessageUnset),
        }
    }
}

/// The 12-byte DTLS handshake sub-header carrying fragmentation state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct HandshakeHeader {
    pub handshake_type: HandshakeType,
    pub length: u32,          // uint24
    pub message_sequence: u16,
    pub fragment_offset: u32, // uint24
    pub fragment_length: u32, // uint24
}

pub(crate) fn put_u24(out: &mut Vec<u8>, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}

pub(crate) fn get_u24<B: Buf>(buf: &mut B) -> u32 {
    (buf.get_u8() as u32) << 16 | (buf.get_u8() as u32) << 8 | buf.get_u8() as u32
}

impl HandshakeHeader {
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LENGTH);
        out.put_u8(self.handshake_type as u8);
        put_u24(&mut out, self.length);
        out.put_u16(self.message_sequence);
        put_u24(&mut out, self.fragment_offset);
        put_u24(&mut out, self.fragment_length);
        out
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < HANDSHAKE_HEADER_LENGTH {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(HandshakeHeader {
            handshake_type: HandshakeType::try_from(buf.get_u8())?,
            length: get_u24(buf),
            message_sequence: buf.get_u16(),
            fragment_offset: get_u24(buf),
            fragment_length: get_u24(buf),
        })
    }
}

/// A fully parsed handshake message body.
#[derive(Clone, Debug, PartialEq)]
pub enum HandshakeMessage {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    HelloVerifyRequest(HelloVerifyRequest),
    Certificate(CertificateMsg),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone(ServerHelloDone),
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
}

impl HandshakeMessage {
    pub fn handshake_type(&self) -> HandshakeType {
        match self {
            HandshakeMessage::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeMessage::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeMessage::HelloVerifyRequest(_) => HandshakeType::HelloVerifyRequest,
            HandshakeMessage::Certificate(_) => HandshakeType::Certificate,
            HandshakeMessage::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakeMessage::CertificateRequest(_) => HandshakeType::CertificateRequest,
            HandshakeMessage::ServerHelloDone(_) => HandshakeType::ServerHelloDone,
            HandshakeMessage::CertificateVerify(_) => HandshakeType::CertificateVerify,
            HandshakeMessage::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakeMessage::Finished(_) => HandshakeType::Finished,
        }
    }

    pub fn marshal_body(&self) -> Result<Vec<u8>> {
        match self {
            HandshakeMessage::ClientHello(m) => m.marshal(),
            HandshakeMessage::ServerHello(m) => m.marshal(),
            HandshakeMessage::HelloVerifyRequest(m) => m.marshal(),
            HandshakeMessage::Certificate(m) => m.marshal(),
            HandshakeMessage::ServerKeyExchange(m) => m.marshal(),
            HandshakeMessage::CertificateRequest(m) => m.marshal(),
            HandshakeMessage::ServerHelloDone(m) => m.marshal(),
            HandshakeMessage::CertificateVerify(m) => m.marshal(),
            HandshakeMessage::ClientKeyExchange(m) => m.marshal(),
            HandshakeMessage::Finished(m) => m.marshal(),
        }
    }

    pub fn unmarshal_body<B: Buf>(handshake_type: HandshakeType, buf: &mut B) -> Result<Self> {
        match handshake_type {
            HandshakeType::ClientHello => {
                Ok(HandshakeMessage::ClientHello(ClientHello::unmarshal(buf)?))
            }
            HandshakeType::ServerHello => {
                Ok(HandshakeMessage::ServerHello(ServerHello::unmarshal(buf)?))
            }
            HandshakeType::HelloVerifyRequest => Ok(HandshakeMessage::HelloVerifyRequest(
                HelloVerifyRequest::unmarshal(buf)?,
            )),
            HandshakeType::Certificate => Ok(HandshakeMessage::Certificate(
                CertificateMsg::unmarshal(buf)?,
            )),
            HandshakeType::ServerKeyExchange => Ok(HandshakeMessage::ServerKeyExchange(
                ServerKeyExchange::unmarshal(buf)?,
            )),
            HandshakeType::CertificateRequest => Ok(HandshakeMessage::CertificateRequest(
                CertificateRequest::unmarshal(buf)?,
            )),
            HandshakeType::ServerHelloDone => Ok(HandshakeMessage::ServerHelloDone(
                ServerHelloDone::unmarshal(buf)?,
            )),
            HandshakeType::CertificateVerify => Ok(HandshakeMessage::CertificateVerify(
                CertificateVerify::unmarshal(buf)?,
            )),
            HandshakeType::ClientKeyExchange => Ok(HandshakeMessage::ClientKeyExchange(
                ClientKeyExchange::unmarshal(buf)?,
            )),
            HandshakeType::Finished => Ok(HandshakeMessage::Finished(Finished::unmarshal(buf)?)),
            HandshakeType::HelloRequest => Err(Error::ErrHandshakeMessageUnset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_header_round_trip() -> Result<()> {
        let h = HandshakeHeader {
            handshake_type: HandshakeType::ClientHello,
            length: 0x0000FF,
            message_sequence: 3,
            fragment_offset: 0x10,
            fragment_length: 0xEF,
        };
        let raw = h.marshal();
        assert_eq!(raw.len(), HANDSHAKE_HEADER_LENGTH);
        let mut buf = &raw[..];
        assert_eq!(HandshakeHeader::unmarshal(&mut buf)?, h);
        Ok(())
    }
}
