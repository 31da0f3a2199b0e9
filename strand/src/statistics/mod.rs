//! getStats: a timestamped report keyed by stable ids, one entry per
//! subsystem object (W3C stats identifiers).

use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::peer_connection::PeerConnection;

/// Walks every subsystem and renders the stats dictionary.
pub(crate) fn build_report(pc: &PeerConnection, now: Instant) -> Value {
    let timestamp = pc.wall_clock_ms(now);
    let mut report = Map::new();

    report.insert(
        "P".to_owned(),
        json!({
            "type": "peer-connection",
            "id": "P",
            "timestamp": timestamp,
            "signalingState": pc.signaling_state().to_string(),
            "connectionState": pc.connection_state().to_string(),
            "dataChannelsOpened": pc.data_channels().len(),
        }),
    );

    report.insert(
        "T".to_owned(),
        json!({
            "type": "transport",
            "id": "T",
            "timestamp": timestamp,
            "iceState": pc.ice_connection_state().to_string(),
            "packetsSent": pc.stats_packets_sent,
            "packetsReceived": pc.stats_packets_received,
            "bytesSent": pc.stats_bytes_sent,
            "bytesReceived": pc.stats_bytes_received,
            "selectedCandidatePairId": pc.ice_agent().selected_pair().map(|_| "CP-selected"),
        }),
    );

    report.insert(
        "CERT".to_owned(),
        json!({
            "type": "certificate",
            "id": "CERT",
            "timestamp": timestamp,
            "fingerprint": pc.certificate_fingerprint(),
            "fingerprintAlgorithm": "sha-256",
        }),
    );

    for (index, candidate) in pc.ice_agent().local_candidates().iter().enumerate() {
        report.insert(
            format!("LC-{index}"),
            json!({
                "type": "local-candidate",
                "id": format!("LC-{index}"),
                "timestamp": timestamp,
                "address": candidate.address.to_string(),
                "port": candidate.port,
                "candidateType": candidate.typ.to_string(),
                "priority": candidate.priority,
                "foundation": candidate.foundation,
            }),
        );
    }
    for (index, candidate) in pc.ice_agent().remote_candidates().iter().enumerate() {
        report.insert(
            format!("RC-{index}"),
            json!({
                "type": "remote-candidate",
                "id": format!("RC-{index}"),
                "timestamp": timestamp,
                "address": candidate.address.to_string(),
                "port": candidate.port,
                "candidateType": candidate.typ.to_string(),
                "priority": candidate.priority,
            }),
        );
    }
    for (index, pair) in pc.ice_agent().checklist().iter().enumerate() {
        report.insert(
            format!("CP-{index}"),
            json!({
                "type": "candidate-pair",
                "id": format!("CP-{index}"),
                "timestamp": timestamp,
                "localCandidateId": format!("LC-{}", pair.local_index),
                "remoteCandidateId": format!("RC-{}", pair.remote_index),
                "state": pair.state().to_string(),
                "nominated": pair.nominated(),
                "currentRoundTripTime": pair.rtt_ms().map(|ms| ms as f64 / 1000.0),
            }),
        );
    }

    for (index, transceiver) in pc.transceivers.iter().enumerate() {
        let mid = transceiver.mid.clone().unwrap_or_default();
        if let Some(codec) = transceiver.codec() {
            report.insert(
                format!("CODEC-{index}"),
                json!({
                    "type": "codec",
                    "id": format!("CODEC-{index}"),
                    "timestamp": timestamp,
                    "payloadType": codec.payload_type,
                    "mimeType": format!("{}/{}", transceiver.kind.as_str(), codec.name),
                    "clockRate": codec.clock_rate,
                    "channels": codec.channels,
                }),
            );
        }

        if transceiver.direction.has_send() {
            report.insert(
                format!("OUT-{index}"),
                json!({
                    "type": "outbound-rtp",
                    "id": format!("OUT-{index}"),
                    "timestamp": timestamp,
                    "mid": mid,
                    "ssrc": transceiver.sender.ssrc,
                    "rtxSsrc": transceiver.sender.rtx_ssrc,
                    "packetsSent": transceiver.sender.packets_sent,
                    "bytesSent": transceiver.sender.bytes_sent,
                }),
            );
        }
        for (track_index, track) in transceiver.receiver.tracks.iter().enumerate() {
            report.insert(
                format!("IN-{index}-{track_index}"),
                json!({
                    "type": "inbound-rtp",
                    "id": format!("IN-{index}-{track_index}"),
                    "timestamp": timestamp,
                    "mid": mid,
                    "ssrc": track.ssrc,
                    "rid": track.rid,
                    "packetsReceived": track.packets_received,
                    "bytesReceived": track.bytes_received,
                    "packetsDiscarded": track.packets_discarded,
                }),
            );
        }
    }

    for channel in pc.data_channels() {
        report.insert(
            format!("DC-{}", channel.stream_id),
            json!({
                "type": "data-channel",
                "id": format!("DC-{}", channel.stream_id),
                "timestamp": timestamp,
                "label": channel.label,
                "protocol": channel.protocol,
                "dataChannelIdentifier": channel.stream_id,
                "state": match channel.state {
                    crate::DataChannelState::Connecting => "connecting",
                    crate::DataChannelState::Open => "open",
                    crate::DataChannelState::Closing => "closing",
                    crate::DataChannelState::Closed => "closed",
                },
                "messagesSent": channel.messages_sent,
                "messagesReceived": channel.messages_received,
                "bytesSent": channel.bytes_sent,
                "bytesReceived": channel.bytes_received,
            }),
        );
    }

    Value::Object(report)
}
