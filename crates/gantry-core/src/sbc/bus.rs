//! Hardware seam for the SBC SPI link.

use bytes::Bytes;

/// Abstraction over the SPI slave + DMA pair.
///
/// The hardware half of the link is small: point the TX and RX DMA
/// channels at the given buffers, raise the transfer-ready line so the
/// master may clock, and report the single end-of-transfer event. The
/// interrupt analogue only latches the completion; every state
/// transition happens in the engine, from task context, via
/// [`take_received`](Self::take_received).
pub trait SpiBus: Send {
    /// Configure both DMA channels for a full-duplex exchange of `tx`
    /// against `rx_len` inbound bytes and raise the transfer-ready line.
    fn arm(&mut self, tx: &[u8], rx_len: usize);

    /// Drop the transfer-ready line and stop both DMA channels. No more
    /// data may be exchanged until the next [`arm`](Self::arm).
    fn disable(&mut self);

    /// The received bytes of a completed exchange, if the completion
    /// event has fired since the last call. The completion also disables
    /// the bus, as the end-of-transfer interrupt does.
    fn take_received(&mut self) -> Option<Bytes>;
}
