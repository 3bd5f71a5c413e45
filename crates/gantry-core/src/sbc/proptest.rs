//! Property-based tests for the SBC framing.
//!
//! These verify the quantified invariants:
//! - padding lands on the next 4-byte boundary without overshooting
//! - any write sequence admitted by `can_write_packet` stays in bounds
//! - typed packets round-trip through the writer and reader

#![cfg(test)]

use bytes::Bytes;
use proptest::prelude::*;

use crate::constants::TRANSFER_BUFFER_SIZE;
use crate::sbc::reader::PacketReader;
use crate::sbc::wire::{
    add_padding, CODE_REPLY_HEADER_SIZE, CodeReplyHeader, OBJECT_MODEL_HEADER_SIZE, PUSH_FLAG,
};
use crate::sbc::writer::PacketWriter;

proptest! {
    #[test]
    fn padding_is_aligned_and_close(n in 0usize..100_000) {
        let padded = add_padding(n);
        prop_assert!(padded >= n);
        prop_assert!(padded - n <= 3);
        prop_assert_eq!(padded % 4, 0);
    }

    #[test]
    fn writer_never_exceeds_buffer(lengths in prop::collection::vec(0usize..600, 0..20)) {
        let mut writer = PacketWriter::new();
        for len in lengths {
            let data = vec![0xA5u8; len];
            let fits = writer.can_write_packet(OBJECT_MODEL_HEADER_SIZE + data.len());
            prop_assert_eq!(writer.write_object_model(0, &data), fits);
            prop_assert!(writer.data_length() <= TRANSFER_BUFFER_SIZE);
        }
    }

    #[test]
    fn object_model_roundtrips(module in any::<u8>(), data in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut writer = PacketWriter::new();
        prop_assert!(writer.write_object_model(module, &data));

        let mut reader = PacketReader::new(writer.payload(), writer.data_length());
        let packet = reader.read_packet().unwrap().unwrap();
        prop_assert_eq!(packet.id, 1);
        prop_assert_eq!(reader.read_object_model_request().unwrap(), module);
        prop_assert_eq!(reader.read_data(data.len()).unwrap(), &data[..]);
        prop_assert!(reader.read_packet().unwrap().is_none());
    }

    #[test]
    fn code_reply_drain_conserves_bytes(text in prop::collection::vec(any::<u8>(), 0..4000)) {
        let total = text.len();
        let mut reply = Bytes::from(text);
        let mut writer = PacketWriter::new();
        prop_assert!(writer.write_code_reply(1, &mut reply));

        let mut reader = PacketReader::new(writer.payload(), writer.data_length());
        reader.read_packet().unwrap().unwrap();
        let header = CodeReplyHeader::decode(reader.read_data(CODE_REPLY_HEADER_SIZE).unwrap()).unwrap();

        prop_assert_eq!(header.length as usize + reply.len(), total);
        prop_assert_eq!((header.message_type & PUSH_FLAG) != 0, !reply.is_empty());
    }
}
