use bytes::{BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::packet::Packet;

/// Wraps a packet for retransmission (RFC 4588): the payload is prefixed
/// with the original sequence number and the packet is re-stamped with the
/// RTX SSRC, payload type and its own sequence number.
pub fn wrap(packet: &Packet, rtx_ssrc: u32, rtx_payload_type: u8, rtx_sequence: u16) -> Packet {
    let mut payload = BytesMut::with_capacity(2 + packet.payload.len());
    payload.put_u16(packet.header.sequence_number);
    payload.put_slice(&packet.payload);

    let mut header = packet.header.clone();
    header.ssrc = rtx_ssrc;
    header.payload_type = rtx_payload_type;
    header.sequence_number = rtx_sequence;

    Packet {
        header,
        payload: payload.freeze(),
        padding_size: 0,
    }
}

/// Reverses an RTX packet back onto the primary stream: restores the
/// original sequence number from the payload prefix and re-stamps the
/// associated payload type and SSRC.
pub fn unwrap(packet: &Packet, primary_ssrc: u32, associated_payload_type: u8) -> Result<Packet> {
    if packet.payload.len() < 2 {
        return Err(Error::ErrShortPacket);
    }

    let osn = u16::from_be_bytes([packet.payload[0], packet.payload[1]]);
    let mut header = packet.header.clone();
    header.ssrc = primary_ssrc;
    header.payload_type = associated_payload_type;
    header.sequence_number = osn;

    Ok(Packet {
        header,
        payload: Bytes::from(packet.payload.slice(2..)),
        padding_size: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    #[test]
    fn test_rtx_unwrap() -> Result<()> {
        // RTX packet with PT=97, payload = big-endian OSN 1234 || B
        let rtx = Packet {
            header: Header {
                version: 2,
                payload_type: 97,
                sequence_number: 9000,
                timestamp: 4000,
                ssrc: 0x0000AAAA, // rtx ssrc
                ..Default::default()
            },
            payload: Bytes::from_static(&[0x04, 0xD2, 0xca, 0xfe, 0xba, 0xbe]),
            padding_size: 0,
        };

        let primary = unwrap(&rtx, 0x0000BBBB, 96)?;
        assert_eq!(primary.header.payload_type, 96);
        assert_eq!(primary.header.ssrc, 0x0000BBBB);
        assert_eq!(primary.header.sequence_number, 1234);
        assert_eq!(primary.payload, Bytes::from_static(&[0xca, 0xfe, 0xba, 0xbe]));
        // timestamp carried through unchanged
        assert_eq!(primary.header.timestamp, 4000);
        Ok(())
    }

    #[test]
    fn test_rtx_wrap_then_unwrap() -> Result<()> {
        let original = Packet {
            header: Header {
                version: 2,
                payload_type: 96,
                sequence_number: 77,
                timestamp: 123,
                ssrc: 1,
                ..Default::default()
            },
            payload: Bytes::from_static(&[1, 2, 3]),
            padding_size: 0,
        };

        let rtx = wrap(&original, 2, 97, 500);
        assert_eq!(rtx.header.ssrc, 2);
        assert_eq!(rtx.header.payload_type, 97);
        assert_eq!(rtx.header.sequence_number, 500);
        assert_eq!(&rtx.payload[..2], &[0, 77]);

        let unwrapped = unwrap(&rtx, 1, 96)?;
        assert_eq!(unwrapped, original);
        Ok(())
    }

    #[test]
    fn test_rtx_unwrap_too_short() {
        let rtx = Packet {
            header: Header::default(),
            payload: Bytes::from_static(&[0x01]),
            padding_size: 0,
        };
        assert_eq!(unwrap(&rtx, 0, 0), Err(Error::ErrShortPacket));
    }
}
