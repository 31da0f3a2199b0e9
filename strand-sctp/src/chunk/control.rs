use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};

use crate::param::Param;

/// INIT and INIT ACK share one body layout (RFC 4960 sections 3.3.2 and
/// 3.3.3); INIT ACK additionally carries the state cookie parameter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkInit {
    pub initiate_tag: u32,
    pub advertised_receiver_window_credit: u32,
    pub num_outbound_streams: u16,
    pub num_inbound_streams: u16,
    pub initial_tsn: u32,
    pub params: Vec<Param>,
}

impl ChunkInit {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u32(self.initiate_tag);
        out.put_u32(self.advertised_receiver_window_credit);
        out.put_u16(self.num_outbound_streams);
        out.put_u16(self.num_inbound_streams);
        out.put_u32(self.initial_tsn);
        for param in &self.params {
            param.marshal(&mut out);
            while out.len() % 4 != 0 {
                out.push(0);
            }
        }
        Ok(out)
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 16 {
            return Err(Error::ErrChunkValueNotLongEnough);
        }
        let initiate_tag = buf.get_u32();
        let advertised_receiver_window_credit = buf.get_u32();
        let num_outbound_streams = buf.get_u16();
        let num_inbound_streams = buf.get_u16();
        let initial_tsn = buf.get_u32();
        let params = Param::unmarshal_list(buf)?;

        Ok(ChunkInit {
            initiate_tag,
            advertised_receiver_window_credit,
            num_outbound_streams,
            num_inbound_streams,
            initial_tsn,
            params,
        })
    }

    pub fn state_cookie(&self) -> Option<&[u8]> {
        self.params.iter().find_map(|p| match p {
            Param::StateCookie(cookie) => Some(cookie.as_slice()),
            _ => None,
        })
    }

    pub fn supports_forward_tsn(&self) -> bool {
        self.params
            .iter()
            .any(|p| matches!(p, Param::ForwardTsnSupported))
    }
}

/// COOKIE ECHO (RFC 4960 section 3.3.11): the state cookie verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkCookieEcho {
    pub cookie: Vec<u8>,
}

/// COOKIE ACK (RFC 4960 section 3.3.12), empty body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkCookieAck;

/// SHUTDOWN (RFC 4960 section 3.3.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkShutdown {
    pub cumulative_tsn_ack: u32,
}

impl ChunkShutdown {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        Ok(self.cumulative_tsn_ack.to_be_bytes().to_vec())
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::ErrChunkTooShort);
        }
        Ok(ChunkShutdown {
            cumulative_tsn_ack: buf.get_u32(),
        })
    }
}

/// SHUTDOWN ACK, empty body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkShutdownAck;

/// SHUTDOWN COMPLETE, empty body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkShutdownComplete;

/// One error cause inside ABORT or ERROR chunks, kept raw.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorCause {
    pub code: u16,
    pub raw: Vec<u8>,
}

pub const ERROR_CAUSE_INVALID_MANDATORY_PARAMETER: u16 = 7;
pub const ERROR_CAUSE_UNRECOGNIZED_CHUNK_TYPE: u16 = 6;
pub const ERROR_CAUSE_PROTOCOL_VIOLATION: u16 = 13;
pub const ERROR_CAUSE_USER_INITIATED_ABORT: u16 = 12;

fn marshal_causes(causes: &[ErrorCause]) -> Vec<u8> {
    let mut out = Vec::new();
    for cause in causes {
        out.put_u16(cause.code);
        out.put_u16((cause.raw.len() + 4) as u16);
        out.extend_from_slice(&cause.raw);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    out
}

fn unmarshal_causes(buf: &mut Bytes) -> Result<Vec<ErrorCause>> {
    let mut causes = vec![];
    while buf.remaining() >= 4 {
        let code = buf.get_u16();
        let len = buf.get_u16() as usize;
        if len < 4 || buf.remaining() < len - 4 {
            return Err(Error::ErrChunkTooShort);
        }
        let raw = buf.copy_to_bytes(len - 4).to_vec();
        let padding = (4 - len % 4) % 4;
        if buf.remaining() < padding {
            break;
        }
        buf.advance(padding);
        causes.push(ErrorCause { code, raw });
    }
    Ok(causes)
}

/// ABORT (RFC 4960 section 3.3.7).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkAbort {
    pub error_causes: Vec<ErrorCause>,
}

impl ChunkAbort {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        Ok(marshal_causes(&self.error_causes))
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        Ok(ChunkAbort {
            error_causes: unmarshal_causes(buf)?,
        })
    }
}

/// ERROR (RFC 4960 section 3.3.10).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkError {
    pub error_causes: Vec<ErrorCause>,
}

impl ChunkError {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        Ok(marshal_causes(&self.error_causes))
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        Ok(ChunkError {
            error_causes: unmarshal_causes(buf)?,
        })
    }
}

/// HEARTBEAT (RFC 4960 section 3.3.5): carries one heartbeat info param
/// echoed back verbatim in the ACK.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkHeartbeat {
    pub info: Vec<u8>,
}

impl ChunkHeartbeat {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        Param::HeartbeatInfo(self.info.clone()).marshal(&mut out);
        Ok(out)
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        let params = Param::unmarshal_list(buf)?;
        match params.into_iter().next() {
            Some(Param::HeartbeatInfo(info)) => Ok(ChunkHeartbeat { info }),
            _ => Err(Error::ErrChunkTooShort),
        }
    }
}

/// HEARTBEAT ACK (RFC 4960 section 3.3.6).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkHeartbeatAck {
    pub info: Vec<u8>,
}

impl ChunkHeartbeatAck {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        Param::HeartbeatInfo(self.info.clone()).marshal(&mut out);
        Ok(out)
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        let params = Param::unmarshal_list(buf)?;
        match params.into_iter().next() {
            Some(Param::HeartbeatInfo(info)) => Ok(ChunkHeartbeatAck { info }),
            _ => Err(Error::ErrChunkTooShort),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    #[test]
    fn test_init_round_trip() -> Result<()> {
        let init = ChunkInit {
            initiate_tag: 0xdeadbeef,
            advertised_receiver_window_credit: 1024 * 1024,
            num_outbound_streams: 1024,
            num_inbound_streams: 1024,
            initial_tsn: 1234,
            params: vec![Param::ForwardTsnSupported],
        };
        let mut raw = vec![];
        Chunk::Init(init.clone()).marshal(&mut raw)?;
        let (decoded, _) = Chunk::unmarshal(&Bytes::from(raw))?;
        assert_eq!(decoded, Chunk::Init(init));
        Ok(())
    }

    #[test]
    fn test_init_ack_cookie() -> Result<()> {
        let init_ack = ChunkInit {
            initiate_tag: 1,
            advertised_receiver_window_credit: 1500,
            num_outbound_streams: 1,
            num_inbound_streams: 1,
            initial_tsn: 1,
            params: vec![Param::StateCookie(vec![9; 17]), Param::ForwardTsnSupported],
        };
        let mut raw = vec![];
        Chunk::InitAck(init_ack.clone()).marshal(&mut raw)?;
        let (decoded, _) = Chunk::unmarshal(&Bytes::from(raw))?;
        if let Chunk::InitAck(decoded) = decoded {
            assert_eq!(decoded.state_cookie(), Some(&[9u8; 17][..]));
            assert!(decoded.supports_forward_tsn());
        } else {
            panic!("wrong chunk type");
        }
        Ok(())
    }

    #[test]
    fn test_abort_round_trip() -> Result<()> {
        let abort = ChunkAbort {
            error_causes: vec![ErrorCause {
                code: ERROR_CAUSE_USER_INITIATED_ABORT,
                raw: vec![1, 2, 3],
            }],
        };
        let mut raw = vec![];
        Chunk::Abort(abort.clone()).marshal(&mut raw)?;
        let (decoded, _) = Chunk::unmarshal(&Bytes::from(raw))?;
        assert_eq!(decoded, Chunk::Abort(abort));
        Ok(())
    }

    #[test]
    fn test_heartbeat_round_trip() -> Result<()> {
        let hb = ChunkHeartbeat {
            info: vec![0xAA; 8],
        };
        let mut raw = vec![];
        Chunk::Heartbeat(hb.clone()).marshal(&mut raw)?;
        let (decoded, _) = Chunk::unmarshal(&Bytes::from(raw))?;
        assert_eq!(decoded, Chunk::Heartbeat(hb));
        Ok(())
    }
}
