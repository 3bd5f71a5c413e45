//! Scripted SPI bus for testing the transfer engine without hardware.
//!
//! Each scripted entry is what the peer clocks out during one exchange.
//! Arming the bus consumes the next entry and completes the exchange
//! immediately; the engine observes it on its next poll. Everything the
//! engine transmits is captured for assertions.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use gantry_core::sbc::{SpiBus, TransferHeader, TransferResponse};

/// In-memory [`SpiBus`] with a scripted peer.
#[derive(Debug, Default)]
pub struct ScriptedSpiBus {
    script: VecDeque<Bytes>,
    pending: Option<Bytes>,
    tx_log: Vec<Bytes>,
    disable_calls: usize,
}

impl ScriptedSpiBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw peer bytes for the next exchange.
    pub fn push_peer(&mut self, data: impl Into<Bytes>) {
        self.script.push_back(data.into());
    }

    /// Queue a peer transfer header.
    pub fn push_peer_header(&mut self, header: &TransferHeader) {
        self.push_peer(header.to_bytes().to_vec());
    }

    /// Queue a peer response code.
    pub fn push_peer_response(&mut self, response: TransferResponse) {
        self.push_peer(response.as_i32().to_le_bytes().to_vec());
    }

    /// Queue a raw peer response value (for codes the enum does not
    /// cover).
    pub fn push_peer_response_raw(&mut self, response: i32) {
        self.push_peer(response.to_le_bytes().to_vec());
    }

    /// Everything the engine has transmitted, one entry per exchange.
    pub fn tx_log(&self) -> &[Bytes] {
        &self.tx_log
    }

    /// The engine's most recent transmission.
    pub fn last_tx(&self) -> Option<&Bytes> {
        self.tx_log.last()
    }

    /// How often the engine disabled the bus.
    pub fn disable_calls(&self) -> usize {
        self.disable_calls
    }

    /// Whether an exchange is armed but not yet consumed.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl SpiBus for ScriptedSpiBus {
    fn arm(&mut self, tx: &[u8], rx_len: usize) {
        self.tx_log.push(Bytes::copy_from_slice(tx));
        if let Some(scripted) = self.script.pop_front() {
            // The DMA pair transfers exactly rx_len bytes regardless of
            // what the peer had to say.
            let mut rx = BytesMut::from(&scripted[..scripted.len().min(rx_len)]);
            rx.resize(rx_len, 0);
            self.pending = Some(rx.freeze());
        }
    }

    fn disable(&mut self) {
        self.disable_calls += 1;
        self.pending = None;
    }

    fn take_received(&mut self) -> Option<Bytes> {
        self.pending.take()
    }
}
