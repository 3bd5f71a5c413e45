//! Four-phase SPI transfer engine.
//!
//! State transitions happen only in [`TransferEngine::is_ready`], from
//! task context; the bus completion event merely latches. Protocol
//! errors travel as response codes over the link and the peer retries
//! from its side, so the engine never fails outright; it falls back to
//! the header phase.

use std::time::Instant;

use tracing::{debug, error, trace};

use gantry_core::constants::{
    FORMAT_CODE, SBC_PROTOCOL_VERSION, SPI_CONNECTION_TIMEOUT, SPI_TRANSFER_TIMEOUT,
    TRANSFER_BUFFER_SIZE,
};
use gantry_core::sbc::{
    PacketReader, PacketWriter, SpiBus, TRANSFER_HEADER_SIZE, TransferHeader, TransferResponse,
};

/// Engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting for the first poll after boot; falls through to the
    /// header phase once the transfer timeout has passed, which also
    /// covers a firmware reset while the peer was mid-transfer.
    Initializing,
    ExchangingHeader,
    ExchangingHeaderResponse,
    ExchangingData,
    ExchangingDataResponse,
    /// A received payload is exposed to the application; the next
    /// transfer starts when it calls [`TransferEngine::start_next_transfer`].
    ProcessingData,
}

/// Controller-side transfer engine over an abstract SPI bus.
pub struct TransferEngine<B: SpiBus> {
    bus: B,
    state: LinkState,
    started_at: Instant,
    last_transfer_time: Option<Instant>,

    sequence_number: u32,
    last_sequence_number: u32,

    tx_header: TransferHeader,
    rx_header: TransferHeader,
    tx_response: i32,
    rx_response: i32,

    rx_buffer: Box<[u8; TRANSFER_BUFFER_SIZE]>,
    writer: PacketWriter,
}

impl<B: SpiBus> TransferEngine<B> {
    pub fn new(bus: B, now: Instant) -> Self {
        let mut rx_header = TransferHeader::outbound();
        rx_header.sequence_number = 0;

        Self {
            bus,
            state: LinkState::Initializing,
            started_at: now,
            last_transfer_time: None,
            sequence_number: 1,
            last_sequence_number: 1,
            tx_header: TransferHeader::outbound(),
            rx_header,
            tx_response: TransferResponse::Success.as_i32(),
            rx_response: TransferResponse::Success.as_i32(),
            rx_buffer: Box::new([0u8; TRANSFER_BUFFER_SIZE]),
            writer: PacketWriter::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Whether the peer has completed a transfer recently enough to be
    /// considered present.
    pub fn is_connected(&self) -> bool {
        self.rx_header.sequence_number != 0
    }

    /// Sequence number of the last transfer the application consumed.
    pub fn last_sequence_number(&self) -> u32 {
        self.last_sequence_number
    }

    /// Writer for the payload of the next transfer.
    pub fn writer(&mut self) -> &mut PacketWriter {
        &mut self.writer
    }

    /// Reader over the most recently received payload. Valid while the
    /// engine is in [`LinkState::ProcessingData`].
    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(&self.rx_buffer[..], self.rx_header.data_length as usize)
    }

    fn exchange_header(&mut self) {
        debug!(sequence = self.sequence_number, "starting transfer");

        self.rx_header.reset_for_receive();

        self.tx_header.sequence_number = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.tx_header.num_packets = self.writer.num_packets();
        self.tx_header.data_length = self.writer.data_length() as u32;
        self.tx_header.checksum_data = 0;
        self.tx_header.checksum_header = 0;

        let tx = self.tx_header.to_bytes();
        self.bus.arm(&tx, TRANSFER_HEADER_SIZE);
        self.state = LinkState::ExchangingHeader;
    }

    fn exchange_response(&mut self, response: TransferResponse) {
        self.tx_response = response.as_i32();
        self.bus.arm(&self.tx_response.to_le_bytes(), 4);
        self.state = if self.state == LinkState::ExchangingHeader {
            LinkState::ExchangingHeaderResponse
        } else {
            LinkState::ExchangingDataResponse
        };
    }

    fn exchange_data(&mut self) {
        let tx_len = self.tx_header.data_length as usize;
        let tx = &self.writer.payload()[..tx_len.min(self.writer.data_length())];
        self.bus.arm(tx, self.rx_header.data_length as usize);
        self.state = LinkState::ExchangingData;
    }

    /// Advance the state machine. Returns true when a received payload is
    /// ready for the application (the engine is then in
    /// [`LinkState::ProcessingData`]).
    pub fn is_ready(&mut self, now: Instant) -> bool {
        if let Some(received) = self.bus.take_received() {
            self.last_transfer_time = Some(now);

            match self.state {
                LinkState::ExchangingHeader => {
                    // (1) Exchanged transfer headers.
                    match TransferHeader::decode(&received) {
                        Ok(header) => {
                            self.rx_header = header;
                            if header.format_code != FORMAT_CODE {
                                self.exchange_response(TransferResponse::BadFormat);
                            } else if header.protocol_version != SBC_PROTOCOL_VERSION {
                                self.exchange_response(TransferResponse::BadProtocolVersion);
                            } else if header.data_length as usize > TRANSFER_BUFFER_SIZE {
                                self.exchange_response(TransferResponse::BadDataLength);
                            } else {
                                self.exchange_response(TransferResponse::Success);
                            }
                        }
                        Err(_) => self.exchange_response(TransferResponse::BadFormat),
                    }
                }

                LinkState::ExchangingHeaderResponse => {
                    // (2) Exchanged responses to the transfer headers.
                    self.rx_response = read_response(&received);
                    let success = TransferResponse::Success.as_i32();
                    if self.rx_response == success
                        && self.tx_response == success
                        && self.rx_header.data_length != 0
                        && self.tx_header.data_length != 0
                    {
                        self.exchange_data();
                    } else {
                        // Start over with a fresh header exchange.
                        self.exchange_header();
                    }
                }

                LinkState::ExchangingData => {
                    // (3) Exchanged payloads.
                    let len = (self.rx_header.data_length as usize).min(TRANSFER_BUFFER_SIZE);
                    self.rx_buffer[..len.min(received.len())]
                        .copy_from_slice(&received[..len.min(received.len())]);
                    self.exchange_response(TransferResponse::Success);
                }

                LinkState::ExchangingDataResponse => {
                    // (4) Exchanged responses to the payloads.
                    self.rx_response = read_response(&received);
                    if self.rx_response == TransferResponse::Success.as_i32() {
                        self.writer.reset();
                        self.state = LinkState::ProcessingData;
                        return true;
                    }
                    // The peer did not take the payload. Send it again.
                    trace!(response = self.rx_response, "resending payload");
                    self.exchange_data();
                }

                LinkState::Initializing | LinkState::ProcessingData => {
                    // A completion here means start_next_transfer was not
                    // called when it should have been.
                    error!(state = ?self.state, "unexpected transfer completion");
                    self.exchange_header();
                }
            }
        } else if self.state == LinkState::Initializing
            && now.duration_since(self.started_at) > SPI_TRANSFER_TIMEOUT
        {
            // The peer may have been mid-transfer across our reset; let
            // its side time out and restart cleanly.
            self.exchange_header();
        } else if self.state != LinkState::ExchangingHeader
            && now.duration_since(self.last_transfer()) > SPI_TRANSFER_TIMEOUT
        {
            // Reset failed transfers automatically after a while.
            debug!(state = ?self.state, "transfer timed out, restarting link");
            self.bus.disable();
            self.exchange_header();
        } else if self.is_connected()
            && now.duration_since(self.last_transfer()) > SPI_CONNECTION_TIMEOUT
        {
            // The peer has gone quiet.
            debug!("SBC connection timed out");
            self.rx_header.sequence_number = 0;
        }
        false
    }

    /// Called by the application once it has handled a received payload:
    /// records the peer's sequence number and starts the next transfer.
    pub fn start_next_transfer(&mut self) {
        self.last_sequence_number = self.rx_header.sequence_number;
        self.exchange_header();
    }

    fn last_transfer(&self) -> Instant {
        self.last_transfer_time.unwrap_or(self.started_at)
    }

    /// Human-readable state dump.
    pub fn diagnostics(&self, now: Instant) -> String {
        format!(
            "State: {:?}\nLast transfer: {}ms ago\nTX/RX pointers: {}/{}\nTX/RX responses: {}/{}",
            self.state,
            now.duration_since(self.last_transfer()).as_millis(),
            self.writer.data_length(),
            self.rx_header.data_length,
            self.tx_response,
            self.rx_response,
        )
    }
}

fn read_response(received: &[u8]) -> i32 {
    if received.len() >= 4 {
        i32::from_le_bytes([received[0], received[1], received[2], received[3]])
    } else {
        TransferResponse::BadFormat.as_i32()
    }
}
