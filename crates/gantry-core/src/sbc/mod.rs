//! SBC link framing: wire structures, the packet reader/writer, and the
//! SPI bus seam.
//!
//! A transfer is four back-to-back full-duplex exchanges: transfer
//! headers, header responses, payloads, payload responses. The payload is
//! a sequence of packet headers each followed by a body padded to a
//! 4-byte boundary.

mod bus;
mod reader;
mod wire;
mod writer;

#[cfg(test)]
mod proptest;

pub use bus::SpiBus;
pub use reader::{PacketReader, PrintStartedInfo};
pub use wire::*;
pub use writer::{PacketWriter, StackSnapshot};
