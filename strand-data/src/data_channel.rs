use bytes::Bytes;

use sctp::{PayloadProtocolIdentifier, ReliabilityType};
use shared::error::{Error, Result};

use crate::message::{ChannelType, DataChannelAck, DataChannelOpen, Message};

const MAX_LABEL_LEN: usize = 65535;

/// Data channel lifecycle (W3C `RTCDataChannelState`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DataChannelState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Options an application supplies when creating a channel.
#[derive(Debug, Clone, Default)]
pub struct DataChannelConfig {
    pub label: String,
    pub protocol: String,
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
    pub max_packet_life_time: Option<u16>,
    /// Out-of-band negotiation: the stream id is agreed externally and no
    /// DCEP exchange happens.
    pub negotiated: Option<u16>,
}

impl DataChannelConfig {
    pub fn new(label: String) -> Self {
        DataChannelConfig {
            label,
            ordered: true,
            ..Default::default()
        }
    }

    fn channel_type(&self) -> Result<(ChannelType, u32)> {
        if self.max_retransmits.is_some() && self.max_packet_life_time.is_some() {
            return Err(Error::ErrRetransmitsOrPacketLifeTime);
        }
        let (channel_type, param) = if let Some(retransmits) = self.max_retransmits {
            if self.ordered {
                (ChannelType::PartialReliableRexmit, retransmits as u32)
            } else {
                (
                    ChannelType::PartialReliableRexmitUnordered,
                    retransmits as u32,
                )
            }
        } else if let Some(lifetime) = self.max_packet_life_time {
            if self.ordered {
                (ChannelType::PartialReliableTimed, lifetime as u32)
            } else {
                (ChannelType::PartialReliableTimedUnordered, lifetime as u32)
            }
        } else if self.ordered {
            (ChannelType::Reliable, 0)
        } else {
            (ChannelType::ReliableUnordered, 0)
        };
        Ok((channel_type, param))
    }
}

/// An application message, either text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelMessage {
    Text(String),
    Binary(Bytes),
}

/// One WebRTC data channel bound to an SCTP stream.
///
/// The session owns the SCTP association; the channel tracks its own DCEP
/// negotiation state and translates between application messages and
/// (PPID, payload) pairs on the stream.
#[derive(Debug, Clone)]
pub struct DataChannel {
    pub label: String,
    pub protocol: String,
    pub stream_id: u16,
    pub state: DataChannelState,
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
    pub max_packet_life_time: Option<u16>,
    pub negotiated: bool,
    /// DCEP open sent, waiting for the ack.
    awaiting_ack: bool,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl DataChannel {
    /// Creates the local side of a channel. In-band channels produce a
    /// DATA_CHANNEL_OPEN to send on the stream.
    pub fn dial(config: &DataChannelConfig, stream_id: u16) -> Result<(Self, Option<Bytes>)> {
        if config.label.len() > MAX_LABEL_LEN {
            return Err(Error::ErrStringSizeLimit);
        }
        if config.protocol.len() > MAX_LABEL_LEN {
            return Err(Error::ErrProtocolTooLarge);
        }

        let (channel_type, reliability_parameter) = config.channel_type()?;

        let negotiated = config.negotiated.is_some();
        let open = if negotiated {
            None
        } else {
            Some(
                Message::Open(DataChannelOpen {
                    channel_type,
                    priority: 256,
                    reliability_parameter,
                    label: config.label.clone().into_bytes(),
                    protocol: config.protocol.clone().into_bytes(),
                })
                .marshal(),
            )
        };

        let channel = DataChannel {
            label: config.label.clone(),
            protocol: config.protocol.clone(),
            stream_id,
            // negotiated channels skip DCEP and open with the transport
            state: DataChannelState::Connecting,
            ordered: config.ordered,
            max_retransmits: config.max_retransmits,
            max_packet_life_time: config.max_packet_life_time,
            negotiated,
            awaiting_ack: !negotiated,
            messages_sent: 0,
            messages_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
        };
        Ok((channel, open))
    }

    /// Creates the remote side from a received DATA_CHANNEL_OPEN; returns
    /// the channel and the ack to send back.
    pub fn accept(stream_id: u16, open: DataChannelOpen) -> Result<(Self, Bytes)> {
        let ordered = open.channel_type.ordered();
        let (max_retransmits, max_packet_life_time) = match open.channel_type {
            ChannelType::PartialReliableRexmit | ChannelType::PartialReliableRexmitUnordered => {
                (Some(open.reliability_parameter as u16), None)
            }
            ChannelType::PartialReliableTimed | ChannelType::PartialReliableTimedUnordered => {
                (None, Some(open.reliability_parameter as u16))
            }
            _ => (None, None),
        };

        let channel = DataChannel {
            label: String::from_utf8(open.label)?,
            protocol: String::from_utf8(open.protocol)?,
            stream_id,
            state: DataChannelState::Open,
            ordered,
            max_retransmits,
            max_packet_life_time,
            negotiated: false,
            awaiting_ack: false,
            messages_sent: 0,
            messages_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
        };
        Ok((channel, Message::Ack(DataChannelAck).marshal()))
    }

    /// Handles a DATA_CHANNEL_ACK for an in-band open.
    pub fn handle_ack(&mut self) {
        if self.awaiting_ack {
            self.awaiting_ack = false;
            self.state = DataChannelState::Open;
        }
    }

    /// Marks a negotiated or in-band channel open once the transport is up.
    pub fn on_transport_open(&mut self) {
        if self.negotiated && self.state == DataChannelState::Connecting {
            self.state = DataChannelState::Open;
        }
    }

    /// The SCTP reliability profile for outgoing user messages.
    pub fn reliability(&self) -> ReliabilityType {
        if let Some(retransmits) = self.max_retransmits {
            ReliabilityType::Rexmit(retransmits as u32)
        } else if let Some(lifetime) = self.max_packet_life_time {
            ReliabilityType::Timed(lifetime as u32)
        } else {
            ReliabilityType::Reliable
        }
    }

    /// Maps an outgoing message to its PPID and raw payload (RFC 8831
    /// section 6.6: empty messages use the dedicated empty PPIDs with one
    /// placeholder byte).
    pub fn outgoing(&mut self, message: &DataChannelMessage) -> (PayloadProtocolIdentifier, Bytes) {
        self.messages_sent += 1;
        match message {
            DataChannelMessage::Text(text) if text.is_empty() => (
                PayloadProtocolIdentifier::StringEmpty,
                Bytes::from_static(&[0]),
            ),
            DataChannelMessage::Text(text) => {
                self.bytes_sent += text.len() as u64;
                (
                    PayloadProtocolIdentifier::String,
                    Bytes::from(text.clone().into_bytes()),
                )
            }
            DataChannelMessage::Binary(data) if data.is_empty() => (
                PayloadProtocolIdentifier::BinaryEmpty,
                Bytes::from_static(&[0]),
            ),
            DataChannelMessage::Binary(data) => {
                self.bytes_sent += data.len() as u64;
                (PayloadProtocolIdentifier::Binary, data.clone())
            }
        }
    }

    /// Maps an incoming (PPID, payload) pair to an application message.
    pub fn incoming(
        &mut self,
        ppid: PayloadProtocolIdentifier,
        data: Bytes,
    ) -> Result<DataChannelMessage> {
        self.messages_received += 1;
        match ppid {
            PayloadProtocolIdentifier::String => {
                self.bytes_received += data.len() as u64;
                Ok(DataChannelMessage::Text(String::from_utf8(data.to_vec())?))
            }
            PayloadProtocolIdentifier::StringEmpty => {
                Ok(DataChannelMessage::Text(String::new()))
            }
            PayloadProtocolIdentifier::Binary => {
                self.bytes_received += data.len() as u64;
                Ok(DataChannelMessage::Binary(data))
            }
            PayloadProtocolIdentifier::BinaryEmpty => {
                Ok(DataChannelMessage::Binary(Bytes::new()))
            }
            _ => Err(Error::InvalidPayloadProtocolIdentifier(ppid as u32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_then_accept_and_ack() -> Result<()> {
        let config = DataChannelConfig {
            label: "chat".to_owned(),
            ordered: true,
            ..Default::default()
        };
        let (mut local, open) = DataChannel::dial(&config, 1)?;
        assert_eq!(local.state, DataChannelState::Connecting);
        let open = open.expect("in-band open message");

        let parsed = match Message::unmarshal(&open)? {
            Message::Open(open) => open,
            _ => panic!("expected open"),
        };
        let (remote, ack) = DataChannel::accept(1, parsed)?;
        assert_eq!(remote.label, "chat");
        assert_eq!(remote.state, DataChannelState::Open);

        assert_eq!(Message::unmarshal(&ack)?, Message::Ack(DataChannelAck));
        local.handle_ack();
        assert_eq!(local.state, DataChannelState::Open);
        Ok(())
    }

    #[test]
    fn test_negotiated_channel_skips_dcep() -> Result<()> {
        let config = DataChannelConfig {
            label: "pre".to_owned(),
            ordered: true,
            negotiated: Some(42),
            ..Default::default()
        };
        let (mut channel, open) = DataChannel::dial(&config, 42)?;
        assert!(open.is_none());
        channel.on_transport_open();
        assert_eq!(channel.state, DataChannelState::Open);
        Ok(())
    }

    #[test]
    fn test_reliability_mapping() -> Result<()> {
        let config = DataChannelConfig {
            label: "lossy".to_owned(),
            ordered: false,
            max_retransmits: Some(3),
            ..Default::default()
        };
        let (channel, open) = DataChannel::dial(&config, 3)?;
        assert_eq!(channel.reliability(), ReliabilityType::Rexmit(3));

        let parsed = match Message::unmarshal(&open.unwrap())? {
            Message::Open(open) => open,
            _ => panic!("expected open"),
        };
        assert_eq!(parsed.channel_type, ChannelType::PartialReliableRexmitUnordered);
        assert_eq!(parsed.reliability_parameter, 3);
        Ok(())
    }

    #[test]
    fn test_both_partial_reliability_options_rejected() {
        let config = DataChannelConfig {
            label: "bad".to_owned(),
            ordered: true,
            max_retransmits: Some(1),
            max_packet_life_time: Some(1000),
            ..Default::default()
        };
        assert!(DataChannel::dial(&config, 0).is_err());
    }

    #[test]
    fn test_message_ppid_mapping() -> Result<()> {
        let config = DataChannelConfig::new("m".to_owned());
        let (mut channel, _) = DataChannel::dial(&config, 0)?;

        let (ppid, payload) = channel.outgoing(&DataChannelMessage::Text("hi".to_owned()));
        assert_eq!(ppid, PayloadProtocolIdentifier::String);
        assert_eq!(payload, Bytes::from_static(b"hi"));

        let (ppid, payload) = channel.outgoing(&DataChannelMessage::Text(String::new()));
        assert_eq!(ppid, PayloadProtocolIdentifier::StringEmpty);
        assert_eq!(payload, Bytes::from_static(&[0]));

        let message = channel.incoming(PayloadProtocolIdentifier::StringEmpty, payload)?;
        assert_eq!(message, DataChannelMessage::Text(String::new()));
        Ok(())
    }
}
