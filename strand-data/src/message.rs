use bytes::{Buf, BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

pub const MESSAGE_TYPE_ACK: u8 = 0x02;
pub const MESSAGE_TYPE_OPEN: u8 = 0x03;

const CHANNEL_TYPE_RELIABLE: u8 = 0x00;
const CHANNEL_TYPE_RELIABLE_UNORDERED: u8 = 0x80;
const CHANNEL_TYPE_PARTIAL_RELIABLE_REXMIT: u8 = 0x01;
const CHANNEL_TYPE_PARTIAL_RELIABLE_REXMIT_UNORDERED: u8 = 0x81;
const CHANNEL_TYPE_PARTIAL_RELIABLE_TIMED: u8 = 0x02;
const CHANNEL_TYPE_PARTIAL_RELIABLE_TIMED_UNORDERED: u8 = 0x82;

const CHANNEL_OPEN_HEADER_LEN: usize = 11;

/// Channel type byte of DATA_CHANNEL_OPEN (RFC 8832 section 5.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ChannelType {
    /// Reliable, in order.
    #[default]
    Reliable,
    /// Reliable, out of order.
    ReliableUnordered,
    /// At most N retransmissions, in order.
    PartialReliableRexmit,
    /// At most N retransmissions, out of order.
    PartialReliableRexmitUnordered,
    /// Retransmit for at most N milliseconds, in order.
    PartialReliableTimed,
    /// Retransmit for at most N milliseconds, out of order.
    PartialReliableTimedUnordered,
}

impl ChannelType {
    pub fn byte(&self) -> u8 {
        match self {
            ChannelType::Reliable => CHANNEL_TYPE_RELIABLE,
            ChannelType::ReliableUnordered => CHANNEL_TYPE_RELIABLE_UNORDERED,
            ChannelType::PartialReliableRexmit => CHANNEL_TYPE_PARTIAL_RELIABLE_REXMIT,
            ChannelType::PartialReliableRexmitUnordered => {
                CHANNEL_TYPE_PARTIAL_RELIABLE_REXMIT_UNORDERED
            }
            ChannelType::PartialReliableTimed => CHANNEL_TYPE_PARTIAL_RELIABLE_TIMED,
            ChannelType::PartialReliableTimedUnordered => {
                CHANNEL_TYPE_PARTIAL_RELIABLE_TIMED_UNORDERED
            }
        }
    }

    pub fn ordered(&self) -> bool {
        matches!(
            self,
            ChannelType::Reliable
                | ChannelType::PartialReliableRexmit
                | ChannelType::PartialReliableTimed
        )
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            CHANNEL_TYPE_RELIABLE => Ok(ChannelType::Reliable),
            CHANNEL_TYPE_RELIABLE_UNORDERED => Ok(ChannelType::ReliableUnordered),
            CHANNEL_TYPE_PARTIAL_RELIABLE_REXMIT => Ok(ChannelType::PartialReliableRexmit),
            CHANNEL_TYPE_PARTIAL_RELIABLE_REXMIT_UNORDERED => {
                Ok(ChannelType::PartialReliableRexmitUnordered)
            }
            CHANNEL_TYPE_PARTIAL_RELIABLE_TIMED => Ok(ChannelType::PartialReliableTimed),
            CHANNEL_TYPE_PARTIAL_RELIABLE_TIMED_UNORDERED => {
                Ok(ChannelType::PartialReliableTimedUnordered)
            }
            _ => Err(Error::InvalidChannelType(v)),
        }
    }
}

/// DATA_CHANNEL_OPEN (RFC 8832 section 5.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataChannelOpen {
    pub channel_type: ChannelType,
    pub priority: u16,
    pub reliability_parameter: u32,
    pub label: Vec<u8>,
    pub protocol: Vec<u8>,
}

/// DATA_CHANNEL_ACK (RFC 8832 section 5.2), a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataChannelAck;

/// Any DCEP message, dispatched on the leading type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Open(DataChannelOpen),
    Ack(DataChannelAck),
}

impl Message {
    pub fn marshal(&self) -> Bytes {
        match self {
            Message::Open(open) => {
                let mut out = BytesMut::with_capacity(
                    1 + CHANNEL_OPEN_HEADER_LEN - 1 + open.label.len() + open.protocol.len(),
                );
                out.put_u8(MESSAGE_TYPE_OPEN);
                out.put_u8(open.channel_type.byte());
                out.put_u16(open.priority);
                out.put_u32(open.reliability_parameter);
                out.put_u16(open.label.len() as u16);
                out.put_u16(open.protocol.len() as u16);
                out.put_slice(&open.label);
                out.put_slice(&open.protocol);
                out.freeze()
            }
            Message::Ack(_) => Bytes::from_static(&[MESSAGE_TYPE_ACK]),
        }
    }

    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: 1,
                actual: 0,
            });
        }

        let mut buf = &raw[..];
        match buf.get_u8() {
            MESSAGE_TYPE_ACK => Ok(Message::Ack(DataChannelAck)),
            MESSAGE_TYPE_OPEN => {
                if buf.remaining() < CHANNEL_OPEN_HEADER_LEN - 1 {
                    return Err(Error::UnexpectedEndOfBuffer {
                        expected: CHANNEL_OPEN_HEADER_LEN,
                        actual: raw.len(),
                    });
                }
                let channel_type = ChannelType::try_from(buf.get_u8())?;
                let priority = buf.get_u16();
                let reliability_parameter = buf.get_u32();
                let label_len = buf.get_u16() as usize;
                let protocol_len = buf.get_u16() as usize;

                if buf.remaining() < label_len + protocol_len {
                    return Err(Error::UnexpectedEndOfBuffer {
                        expected: CHANNEL_OPEN_HEADER_LEN + label_len + protocol_len,
                        actual: raw.len(),
                    });
                }
                let mut label = vec![0u8; label_len];
                buf.copy_to_slice(&mut label);
                let mut protocol = vec![0u8; protocol_len];
                buf.copy_to_slice(&mut protocol);

                Ok(Message::Open(DataChannelOpen {
                    channel_type,
                    priority,
                    reliability_parameter,
                    label,
                    protocol,
                }))
            }
            other => Err(Error::InvalidMessageType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static OPEN_BYTES: [u8; 25] = [
        0x03, // OPEN
        0x00, // reliable
        0x0f, 0x35, // priority
        0x00, 0xff, 0x0f, 0x35, // reliability parameter
        0x00, 0x05, // label length
        0x00, 0x08, // protocol length
        0x6c, 0x61, 0x62, 0x65, 0x6c, // "label"
        0x70, 0x72, 0x6f, 0x74, 0x6f, 0x63, 0x6f, 0x6c, // "protocol"
    ];

    #[test]
    fn test_open_round_trip() -> Result<()> {
        let open = Message::Open(DataChannelOpen {
            channel_type: ChannelType::Reliable,
            priority: 3893,
            reliability_parameter: 16715573,
            label: b"label".to_vec(),
            protocol: b"protocol".to_vec(),
        });

        let raw = open.marshal();
        assert_eq!(&raw[..], &OPEN_BYTES[..]);
        assert_eq!(Message::unmarshal(&raw)?, open);
        Ok(())
    }

    #[test]
    fn test_ack_round_trip() -> Result<()> {
        let raw = Message::Ack(DataChannelAck).marshal();
        assert_eq!(&raw[..], &[0x02]);
        assert_eq!(Message::unmarshal(&raw)?, Message::Ack(DataChannelAck));
        Ok(())
    }

    #[test]
    fn test_unknown_message_type() {
        assert_eq!(
            Message::unmarshal(&Bytes::from_static(&[0x01])),
            Err(Error::InvalidMessageType(0x01))
        );
    }

    #[test]
    fn test_open_truncated() {
        assert!(Message::unmarshal(&Bytes::from_static(&OPEN_BYTES[..10])).is_err());
    }

    #[test]
    fn test_channel_type_bytes_match_rfc8832() {
        assert_eq!(ChannelType::Reliable.byte(), 0x00);
        assert_eq!(ChannelType::ReliableUnordered.byte(), 0x80);
        assert_eq!(ChannelType::PartialReliableRexmit.byte(), 0x01);
        assert_eq!(ChannelType::PartialReliableRexmitUnordered.byte(), 0x81);
        assert_eq!(ChannelType::PartialReliableTimed.byte(), 0x02);
        assert_eq!(ChannelType::PartialReliableTimedUnordered.byte(), 0x82);
    }
}
