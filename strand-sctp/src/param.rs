use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};

pub const PARAM_HEADER_SIZE: usize = 4;

pub const PARAM_TYPE_HEARTBEAT_INFO: u16 = 1;
pub const PARAM_TYPE_STATE_COOKIE: u16 = 7;
pub const PARAM_TYPE_OUTGOING_RESET_REQUEST: u16 = 13;
pub const PARAM_TYPE_RECONFIG_RESPONSE: u16 = 16;
pub const PARAM_TYPE_FORWARD_TSN_SUPPORTED: u16 = 49152;

/// Chunk parameters this stack understands; the rest ride along raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    HeartbeatInfo(Vec<u8>),
    StateCookie(Vec<u8>),
    ForwardTsnSupported,
    /// RFC 6525 section 4.1.
    OutgoingResetRequest {
        request_sequence: u32,
        response_sequence: u32,
        last_tsn: u32,
        stream_identifiers: Vec<u16>,
    },
    /// RFC 6525 section 4.4.
    ReconfigResponse {
        response_sequence: u32,
        result: u32,
    },
    Unknown {
        typ: u16,
        value: Vec<u8>,
    },
}

/// Stream reset results (RFC 6525 section 4.4).
pub const RECONFIG_RESULT_SUCCESS_PERFORMED: u32 = 1;
pub const RECONFIG_RESULT_DENIED: u32 = 2;

impl Param {
    pub fn typ(&self) -> u16 {
        match self {
            Param::HeartbeatInfo(_) => PARAM_TYPE_HEARTBEAT_INFO,
            Param::StateCookie(_) => PARAM_TYPE_STATE_COOKIE,
            Param::ForwardTsnSupported => PARAM_TYPE_FORWARD_TSN_SUPPORTED,
            Param::OutgoingResetRequest { .. } => PARAM_TYPE_OUTGOING_RESET_REQUEST,
            Param::ReconfigResponse { .. } => PARAM_TYPE_RECONFIG_RESPONSE,
            Param::Unknown { typ, .. } => *typ,
        }
    }

    /// Serializes type, length and value; the caller pads between params.
    pub fn marshal(&self, out: &mut Vec<u8>) {
        let value: Vec<u8> = match self {
            Param::HeartbeatInfo(info) => info.clone(),
            Param::StateCookie(cookie) => cookie.clone(),
            Param::ForwardTsnSupported => vec![],
            Param::OutgoingResetRequest {
                request_sequence,
                response_sequence,
                last_tsn,
                stream_identifiers,
            } => {
                let mut v = Vec::with_capacity(12 + stream_identifiers.len() * 2);
                v.put_u32(*request_sequence);
                v.put_u32(*response_sequence);
                v.put_u32(*last_tsn);
                for sid in stream_identifiers {
                    v.put_u16(*sid);
                }
                v
            }
            Param::ReconfigResponse {
                response_sequence,
                result,
            } => {
                let mut v = Vec::with_capacity(8);
                v.put_u32(*response_sequence);
                v.put_u32(*result);
                v
            }
            Param::Unknown { value, .. } => value.clone(),
        };

        out.put_u16(self.typ());
        out.put_u16((value.len() + PARAM_HEADER_SIZE) as u16);
        out.extend_from_slice(&value);
    }

    pub fn unmarshal(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < PARAM_HEADER_SIZE {
            return Err(Error::ErrParamHeaderTooShort);
        }
        let typ = buf.get_u16();
        let length = buf.get_u16() as usize;
        if length < PARAM_HEADER_SIZE {
            return Err(Error::ErrParamHeaderSelfReportedLengthShorter);
        }
        let value_len = length - PARAM_HEADER_SIZE;
        if buf.remaining() < value_len {
            return Err(Error::ErrParamHeaderTooShort);
        }
        let mut value = buf.copy_to_bytes(value_len);

        let param = match typ {
            PARAM_TYPE_HEARTBEAT_INFO => Param::HeartbeatInfo(value.to_vec()),
            PARAM_TYPE_STATE_COOKIE => Param::StateCookie(value.to_vec()),
            PARAM_TYPE_FORWARD_TSN_SUPPORTED => Param::ForwardTsnSupported,
            PARAM_TYPE_OUTGOING_RESET_REQUEST => {
                if value.remaining() < 12 {
                    return Err(Error::ErrSsnResetRequestParamTooShort);
                }
                let request_sequence = value.get_u32();
                let response_sequence = value.get_u32();
                let last_tsn = value.get_u32();
                let mut stream_identifiers = vec![];
                while value.remaining() >= 2 {
                    stream_identifiers.push(value.get_u16());
                }
                Param::OutgoingResetRequest {
                    request_sequence,
                    response_sequence,
                    last_tsn,
                    stream_identifiers,
                }
            }
            PARAM_TYPE_RECONFIG_RESPONSE => {
                if value.remaining() < 8 {
                    return Err(Error::ErrReconfigRespParamTooShort);
                }
                Param::ReconfigResponse {
                    response_sequence: value.get_u32(),
                    result: value.get_u32(),
                }
            }
            _ => Param::Unknown {
                typ,
                value: value.to_vec(),
            },
        };
        Ok(param)
    }

    /// Parses a padded parameter list until the buffer runs out.
    pub fn unmarshal_list(buf: &mut Bytes) -> Result<Vec<Param>> {
        let mut params = vec![];
        while buf.remaining() >= PARAM_HEADER_SIZE {
            // peek length for padding bookkeeping
            let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
            params.push(Param::unmarshal(buf)?);
            let padding = (4 - length % 4) % 4;
            let skip = padding.min(buf.remaining());
            buf.advance(skip);
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_list_round_trip() -> Result<()> {
        let params = vec![
            Param::StateCookie(vec![1, 2, 3, 4, 5]),
            Param::ForwardTsnSupported,
            Param::HeartbeatInfo(vec![9, 9]),
        ];

        let mut raw = Vec::new();
        for param in &params {
            param.marshal(&mut raw);
            while raw.len() % 4 != 0 {
                raw.push(0);
            }
        }

        let mut buf = Bytes::from(raw);
        let decoded = Param::unmarshal_list(&mut buf)?;
        assert_eq!(decoded, params);
        Ok(())
    }

    #[test]
    fn test_unknown_param_preserved() -> Result<()> {
        let param = Param::Unknown {
            typ: 0x4009,
            value: vec![1, 2, 3, 4],
        };
        let mut raw = Vec::new();
        param.marshal(&mut raw);
        let mut buf = Bytes::from(raw);
        assert_eq!(Param::unmarshal(&mut buf)?, param);
        Ok(())
    }
}
