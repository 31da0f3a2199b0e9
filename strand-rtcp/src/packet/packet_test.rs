use super::*;
use crate::reception_report::ReceptionReport;

#[test]
fn test_unmarshal_compound() -> Result<()> {
    let rr = ReceiverReport {
        ssrc: 0x902f9e2e,
        reports: vec![ReceptionReport {
            ssrc: 0x902f9e2e,
            last_sequence_number: 0x46e1,
            last_sender_report: 0x9f36432,
            delay: 150137,
            ..Default::default()
        }],
    };
    let sdes = SourceDescription::new_cname(0x902f9e2e, "cname".to_owned());
    let pli = PictureLossIndication {
        sender_ssrc: 0x902f9e2e,
        media_ssrc: 0x902f9e2e,
    };

    let compound = marshal(&[
        RtcpPacket::ReceiverReport(rr.clone()),
        RtcpPacket::SourceDescription(sdes.clone()),
        RtcpPacket::PictureLossIndication(pli),
    ])?;

    let mut buf = &compound[..];
    let packets = unmarshal(&mut buf)?;
    assert_eq!(packets.len(), 3);
    assert_eq!(packets[0], RtcpPacket::ReceiverReport(rr));
    assert_eq!(packets[1], RtcpPacket::SourceDescription(sdes));
    assert_eq!(packets[2], RtcpPacket::PictureLossIndication(pli));
    Ok(())
}

#[test]
fn test_unmarshal_empty_errors() {
    let mut buf = &[][..];
    assert_eq!(unmarshal(&mut buf), Err(Error::EmptyCompound));
}

#[test]
fn test_unmarshal_truncated_compound_errors() -> Result<()> {
    let pli = PictureLossIndication {
        sender_ssrc: 1,
        media_ssrc: 2,
    };
    let raw = RtcpPacket::PictureLossIndication(pli).marshal()?;
    let mut buf = &raw[..raw.len() - 2];
    assert!(unmarshal(&mut buf).is_err());
    Ok(())
}

#[test]
fn test_unknown_type_preserved_as_raw() -> Result<()> {
    // APP packet (PT=204), length 1 word of body
    let raw = Bytes::from_static(&[0x80, 204, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04]);
    let mut buf = &raw[..];
    let packets = unmarshal(&mut buf)?;
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0], RtcpPacket::Raw(RawPacket(raw.clone())));
    // round trips byte-exact
    assert_eq!(marshal(&packets)?, raw);
    Ok(())
}

#[test]
fn test_destination_ssrc() {
    let pli = RtcpPacket::PictureLossIndication(PictureLossIndication {
        sender_ssrc: 1,
        media_ssrc: 7,
    });
    assert_eq!(destination_ssrc(&pli), vec![7]);
}
