//! End-to-end scenarios for the SBC transfer engine against a scripted
//! peer.

use std::time::{Duration, Instant};

use bytes::Bytes;

use gantry_core::constants::{FORMAT_CODE, TRANSFER_BUFFER_SIZE};
use gantry_core::sbc::{
    FirmwareRequest, PacketHeader, SbcRequest, TransferHeader, TransferResponse,
    MACRO_COMPLETE_HEADER_SIZE, PACKET_HEADER_SIZE, REPORT_STATE_HEADER_SIZE,
};
use gantry_link::{LinkState, TransferEngine};
use gantry_test_utils::ScriptedSpiBus;

fn peer_header(sequence: u32, data_length: u32) -> TransferHeader {
    let mut header = TransferHeader::outbound();
    header.sequence_number = sequence;
    header.data_length = data_length;
    header
}

/// One payload: a macro-complete packet for `channel`.
fn macro_complete_payload(channel: u8) -> Vec<u8> {
    let mut payload = Vec::new();
    PacketHeader {
        request: SbcRequest::MacroCompleted as u16,
        id: 1,
        length: MACRO_COMPLETE_HEADER_SIZE as u16,
        resend_packet_id: 0,
    }
    .encode(&mut payload);
    payload.extend_from_slice(&[channel, 0, 0, 0]);
    payload
}

#[test]
fn initializing_falls_through_after_timeout() {
    let t0 = Instant::now();
    let mut engine = TransferEngine::new(ScriptedSpiBus::new(), t0);
    assert_eq!(engine.state(), LinkState::Initializing);

    // Nothing happens before the transfer timeout.
    assert!(!engine.is_ready(t0 + Duration::from_millis(100)));
    assert_eq!(engine.state(), LinkState::Initializing);
    assert!(engine.bus().tx_log().is_empty());

    // Past the timeout the engine starts the first header exchange.
    assert!(!engine.is_ready(t0 + Duration::from_millis(600)));
    assert_eq!(engine.state(), LinkState::ExchangingHeader);
    assert_eq!(engine.bus().tx_log().len(), 1);

    let sent = TransferHeader::decode(engine.bus().last_tx().unwrap()).unwrap();
    assert_eq!(sent.format_code, FORMAT_CODE);
    assert_eq!(sent.sequence_number, 1);
    assert_eq!(sent.data_length, 0);
}

#[test]
fn empty_transfer_loops_back_to_header_phase() {
    let t0 = Instant::now();
    let t = t0 + Duration::from_millis(600);

    let mut bus = ScriptedSpiBus::new();
    bus.push_peer_header(&peer_header(42, 0));
    bus.push_peer_response(TransferResponse::Success);

    let mut engine = TransferEngine::new(bus, t0);

    // Header exchange armed, completed, validated, response armed.
    assert!(!engine.is_ready(t));
    assert!(!engine.is_ready(t));
    assert_eq!(engine.state(), LinkState::ExchangingHeaderResponse);
    assert_eq!(
        engine.bus().tx_log()[1],
        Bytes::copy_from_slice(&0i32.to_le_bytes())
    );

    // Both sides succeeded but neither declared data: new transfer.
    assert!(!engine.is_ready(t));
    assert_eq!(engine.state(), LinkState::ExchangingHeader);
    assert!(engine.is_connected());

    // Our sequence number advanced for the new transfer.
    let next = TransferHeader::decode(engine.bus().last_tx().unwrap()).unwrap();
    assert_eq!(next.sequence_number, 2);
}

#[test]
fn bad_format_code_is_rejected() {
    let t0 = Instant::now();
    let t = t0 + Duration::from_millis(600);

    let mut peer = peer_header(1, 0);
    peer.format_code = 0xFF;

    let mut bus = ScriptedSpiBus::new();
    bus.push_peer_header(&peer);
    bus.push_peer_response(TransferResponse::Success);

    let mut engine = TransferEngine::new(bus, t0);
    assert!(!engine.is_ready(t));
    assert!(!engine.is_ready(t));

    // We answered BadFormat (-1).
    assert_eq!(
        engine.bus().tx_log()[1],
        Bytes::copy_from_slice(&(-1i32).to_le_bytes())
    );

    // Back to the header phase regardless of the peer's reply.
    assert!(!engine.is_ready(t));
    assert_eq!(engine.state(), LinkState::ExchangingHeader);
}

#[test]
fn bad_protocol_version_and_data_length_are_rejected() {
    let t0 = Instant::now();
    let t = t0 + Duration::from_millis(600);

    let mut peer = peer_header(1, 0);
    peer.protocol_version = 99;

    let mut bus = ScriptedSpiBus::new();
    bus.push_peer_header(&peer);
    let mut engine = TransferEngine::new(bus, t0);
    assert!(!engine.is_ready(t));
    assert!(!engine.is_ready(t));
    assert_eq!(
        engine.bus().tx_log()[1],
        Bytes::copy_from_slice(&(-2i32).to_le_bytes())
    );

    let peer = peer_header(1, TRANSFER_BUFFER_SIZE as u32 + 1);
    let mut bus = ScriptedSpiBus::new();
    bus.push_peer_header(&peer);
    let mut engine = TransferEngine::new(bus, t0);
    assert!(!engine.is_ready(t));
    assert!(!engine.is_ready(t));
    assert_eq!(
        engine.bus().tx_log()[1],
        Bytes::copy_from_slice(&(-3i32).to_le_bytes())
    );
}

#[test]
fn full_transfer_delivers_packets_both_ways() {
    let t0 = Instant::now();
    let t = t0 + Duration::from_millis(600);

    let payload = macro_complete_payload(2);

    let mut bus = ScriptedSpiBus::new();
    bus.push_peer_header(&peer_header(7, payload.len() as u32));
    bus.push_peer_response(TransferResponse::Success);
    bus.push_peer(payload.clone());
    bus.push_peer_response(TransferResponse::Success);

    let mut engine = TransferEngine::new(bus, t0);
    engine.writer().write_state(0b11);

    assert!(!engine.is_ready(t)); // arm header
    assert!(!engine.is_ready(t)); // headers exchanged
    assert!(!engine.is_ready(t)); // responses exchanged, data armed
    assert!(!engine.is_ready(t)); // payloads exchanged
    assert!(engine.is_ready(t)); // payload response: ready
    assert_eq!(engine.state(), LinkState::ProcessingData);

    // Peer's packet is readable.
    let mut reader = engine.reader();
    let packet = reader.read_packet().unwrap().unwrap();
    assert_eq!(SbcRequest::from_u16(packet.request), Some(SbcRequest::MacroCompleted));
    assert_eq!(reader.read_macro_complete_info().unwrap(), (2, false));
    assert!(reader.read_packet().unwrap().is_none());

    // Our payload went out in the data phase.
    let ours = &engine.bus().tx_log()[2];
    let packet = PacketHeader::decode(ours).unwrap();
    assert_eq!(packet.request, FirmwareRequest::ReportState as u16);
    assert_eq!(packet.length as usize, REPORT_STATE_HEADER_SIZE);
    assert_eq!(
        &ours[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + 4],
        &0b11u32.to_le_bytes()
    );

    // The application finishes and the next transfer starts clean.
    engine.start_next_transfer();
    assert_eq!(engine.last_sequence_number(), 7);
    assert_eq!(engine.state(), LinkState::ExchangingHeader);
    let next = TransferHeader::decode(engine.bus().last_tx().unwrap()).unwrap();
    assert_eq!(next.data_length, 0);
    assert_eq!(next.num_packets, 0);
}

#[test]
fn payload_resent_until_acknowledged() {
    let t0 = Instant::now();
    let t = t0 + Duration::from_millis(600);

    let payload = macro_complete_payload(0);

    let mut bus = ScriptedSpiBus::new();
    bus.push_peer_header(&peer_header(3, payload.len() as u32));
    bus.push_peer_response(TransferResponse::Success);
    bus.push_peer(payload.clone());
    bus.push_peer_response(TransferResponse::BadChecksum);
    bus.push_peer(payload.clone());
    bus.push_peer_response(TransferResponse::Success);

    let mut engine = TransferEngine::new(bus, t0);
    engine.writer().write_state(1);

    assert!(!engine.is_ready(t)); // arm header
    assert!(!engine.is_ready(t)); // headers
    assert!(!engine.is_ready(t)); // responses, data armed
    assert!(!engine.is_ready(t)); // payloads, response armed

    // Peer refused the payload: it is sent again, byte for byte.
    assert!(!engine.is_ready(t));
    assert_eq!(engine.state(), LinkState::ExchangingData);
    let log = engine.bus().tx_log();
    assert_eq!(log[log.len() - 1], log[2]);

    assert!(!engine.is_ready(t)); // second payload exchange
    assert!(engine.is_ready(t)); // acknowledged
    assert_eq!(engine.state(), LinkState::ProcessingData);
}

#[test]
fn stalled_transfer_restarts_link() {
    let t0 = Instant::now();
    let t = t0 + Duration::from_millis(600);

    let mut bus = ScriptedSpiBus::new();
    bus.push_peer_header(&peer_header(5, 0));

    let mut engine = TransferEngine::new(bus, t0);
    assert!(!engine.is_ready(t)); // arm header
    assert!(!engine.is_ready(t)); // headers exchanged, response armed
    assert_eq!(engine.state(), LinkState::ExchangingHeaderResponse);

    // The peer never clocks the response exchange.
    let stalled = t + Duration::from_millis(600);
    assert!(!engine.is_ready(stalled));
    assert_eq!(engine.state(), LinkState::ExchangingHeader);
    assert_eq!(engine.bus().disable_calls(), 1);
}

#[test]
fn silent_peer_marks_link_disconnected() {
    let t0 = Instant::now();
    let t = t0 + Duration::from_millis(600);

    let mut bus = ScriptedSpiBus::new();
    bus.push_peer_header(&peer_header(9, 0));
    bus.push_peer_response(TransferResponse::Success);

    let mut engine = TransferEngine::new(bus, t0);
    assert!(!engine.is_ready(t));
    assert!(!engine.is_ready(t));
    assert!(!engine.is_ready(t)); // back to header phase, connected
    assert!(engine.is_connected());

    // Connection timeout passes with no further transfers.
    assert!(!engine.is_ready(t + Duration::from_millis(1100)));
    assert!(!engine.is_connected());
}

#[test]
fn diagnostics_mention_state() {
    let t0 = Instant::now();
    let engine = TransferEngine::new(ScriptedSpiBus::new(), t0);
    let text = engine.diagnostics(t0 + Duration::from_millis(5));
    assert!(text.contains("Initializing"));
    assert!(text.contains("TX/RX pointers"));
}
