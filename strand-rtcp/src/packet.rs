use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::extended_report::ExtendedReport;
use crate::full_intra_request::FullIntraRequest;
use crate::goodbye::Goodbye;
use crate::header::{
    Header, PacketType, FORMAT_FIR, FORMAT_PLI, FORMAT_REMB, FORMAT_TCC, FORMAT_TLN,
    HEADER_LENGTH,
};
use crate::picture_loss_indication::PictureLossIndication;
use crate::raw_packet::RawPacket;
use crate::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::SourceDescription;
use crate::transport_layer_cc::TransportLayerCc;
use crate::transport_layer_nack::TransportLayerNack;

/// RtcpPacket is any parsed RTCP packet, dispatched on (PT, FMT).
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
    TransportLayerNack(TransportLayerNack),
    TransportLayerCc(TransportLayerCc),
    PictureLossIndication(PictureLossIndication),
    FullIntraRequest(FullIntraRequest),
    ReceiverEstimatedMaximumBitrate(ReceiverEstimatedMaximumBitrate),
    ExtendedReport(ExtendedReport),
    Raw(RawPacket),
}

impl MarshalSize for RtcpPacket {
    fn marshal_size(&self) -> usize {
        match self {
            RtcpPacket::SenderReport(p) => p.marshal_size(),
            RtcpPacket::ReceiverReport(p) => p.marshal_size(),
            RtcpPacket::SourceDescription(p) => p.marshal_size(),
            RtcpPacket::Goodbye(p) => p.marshal_size(),
            RtcpPacket::TransportLayerNack(p) => p.marshal_size(),
            RtcpPacket::TransportLayerCc(p) => p.marshal_size(),
            RtcpPacket::PictureLossIndication(p) => p.marshal_size(),
            RtcpPacket::FullIntraRequest(p) => p.marshal_size(),
            RtcpPacket::ReceiverEstimatedMaximumBitrate(p) => p.marshal_size(),
            RtcpPacket::ExtendedReport(p) => p.marshal_size(),
            RtcpPacket::Raw(p) => p.marshal_size(),
        }
    }
}

impl Marshal for RtcpPacket {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            RtcpPacket::SenderReport(p) => p.marshal_to(buf),
            RtcpPacket::ReceiverReport(p) => p.marshal_to(buf),
            RtcpPacket::SourceDescription(p) => p.marshal_to(buf),
            RtcpPacket::Goodbye(p) => p.marshal_to(buf),
            RtcpPacket::TransportLayerNack(p) => p.marshal_to(buf),
            RtcpPacket::TransportLayerCc(p) => p.marshal_to(buf),
            RtcpPacket::PictureLossIndication(p) => p.marshal_to(buf),
            RtcpPacket::FullIntraRequest(p) => p.marshal_to(buf),
            RtcpPacket::ReceiverEstimatedMaximumBitrate(p) => p.marshal_to(buf),
            RtcpPacket::ExtendedReport(p) => p.marshal_to(buf),
            RtcpPacket::Raw(p) => p.marshal_to(buf),
        }
    }
}

/// Parses one RTCP packet from its full byte range.
fn unmarshal_one(mut raw: Bytes) -> Result<RtcpPacket> {
    let mut peek = &raw[..];
    let header = Header::unmarshal(&mut peek)?;

    let packet = match header.packet_type {
        PacketType::SenderReport => RtcpPacket::SenderReport(SenderReport::unmarshal(&mut raw)?),
        PacketType::ReceiverReport => {
            RtcpPacket::ReceiverReport(ReceiverReport::unmarshal(&mut raw)?)
        }
        PacketType::SourceDescription => {
            RtcpPacket::SourceDescription(SourceDescription::unmarshal(&mut raw)?)
        }
        PacketType::Goodbye => RtcpPacket::Goodbye(Goodbye::unmarshal(&mut raw)?),
        PacketType::TransportSpecificFeedback => match header.count {
            FORMAT_TLN => RtcpPacket::TransportLayerNack(TransportLayerNack::unmarshal(&mut raw)?),
            FORMAT_TCC => RtcpPacket::TransportLayerCc(TransportLayerCc::unmarshal(&mut raw)?),
            _ => RtcpPacket::Raw(RawPacket::unmarshal(&mut raw)?),
        },
        PacketType::PayloadSpecificFeedback => match header.count {
            FORMAT_PLI => {
                RtcpPacket::PictureLossIndication(PictureLossIndication::unmarshal(&mut raw)?)
            }
            FORMAT_FIR => RtcpPacket::FullIntraRequest(FullIntraRequest::unmarshal(&mut raw)?),
            FORMAT_REMB => RtcpPacket::ReceiverEstimatedMaximumBitrate(
                ReceiverEstimatedMaximumBitrate::unmarshal(&mut raw)?,
            ),
            _ => RtcpPacket::Raw(RawPacket::unmarshal(&mut raw)?),
        },
        PacketType::ExtendedReport => {
            RtcpPacket::ExtendedReport(ExtendedReport::unmarshal(&mut raw)?)
        }
        _ => RtcpPacket::Raw(RawPacket::unmarshal(&mut raw)?),
    };

    Ok(packet)
}

/// Parses a (possibly compound) RTCP datagram into its packets.
pub fn unmarshal<B>(buf: &mut B) -> Result<Vec<RtcpPacket>>
where
    B: Buf,
{
    let mut packets = vec![];
    let raw = buf.copy_to_bytes(buf.remaining());
    let mut offset = 0usize;

    while offset < raw.len() {
        let mut peek = &raw[offset..];
        let header = Header::unmarshal(&mut peek)?;
        let len = (header.length as usize + 1) * 4;
        if offset + len > raw.len() {
            return Err(Error::PacketTooShort);
        }
        packets.push(unmarshal_one(raw.slice(offset..offset + len))?);
        offset += len;
    }

    if packets.is_empty() {
        return Err(Error::EmptyCompound);
    }
    Ok(packets)
}

/// Serializes packets back-to-back into one compound datagram.
pub fn marshal(packets: &[RtcpPacket]) -> Result<Bytes> {
    let mut out = Vec::with_capacity(packets.iter().map(|p| p.marshal_size()).sum());
    for packet in packets {
        out.extend_from_slice(&packet.marshal()?);
    }
    Ok(Bytes::from(out))
}

/// Returns the SSRCs a packet refers to, for receiver-side routing.
pub fn destination_ssrc(packet: &RtcpPacket) -> Vec<u32> {
    match packet {
        RtcpPacket::SenderReport(p) => vec![p.ssrc],
        RtcpPacket::ReceiverReport(p) => p.reports.iter().map(|r| r.ssrc).collect(),
        RtcpPacket::SourceDescription(p) => p.chunks.iter().map(|c| c.source).collect(),
        RtcpPacket::Goodbye(p) => p.sources.clone(),
        RtcpPacket::TransportLayerNack(p) => vec![p.media_ssrc],
        RtcpPacket::TransportLayerCc(p) => vec![p.media_ssrc],
        RtcpPacket::PictureLossIndication(p) => vec![p.media_ssrc],
        RtcpPacket::FullIntraRequest(p) => vec![p.media_ssrc],
        RtcpPacket::ReceiverEstimatedMaximumBitrate(p) => p.ssrcs.clone(),
        RtcpPacket::ExtendedReport(_) => vec![],
        RtcpPacket::Raw(_) => vec![],
    }
}

#[cfg(test)]
mod packet_test;
