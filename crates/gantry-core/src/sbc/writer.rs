//! Cursor-based composer for the outbound transfer buffer.

use bytes::Bytes;

use crate::constants::TRANSFER_BUFFER_SIZE;
use crate::sbc::wire::{
    add_padding, ABORT_FILE_HEADER_SIZE, CODE_REPLY_HEADER_SIZE, CodeReplyHeader,
    EXECUTE_MACRO_HEADER_SIZE, ExecuteMacroHeader, FirmwareRequest, HEIGHT_MAP_HEADER_SIZE,
    HeightMap, LOCK_UNLOCK_HEADER_SIZE, OBJECT_MODEL_HEADER_SIZE, ObjectModelHeader,
    PACKET_HEADER_SIZE, PRINT_PAUSED_HEADER_SIZE, PUSH_FLAG, PacketHeader, PrintPausedHeader,
    PrintPausedReason, REPORT_STATE_HEADER_SIZE, STACK_EVENT_HEADER_SIZE, StackEventHeader,
    stack_flags,
};

/// Snapshot of one G-code channel's machine state for a stack event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackSnapshot {
    pub depth: u8,
    pub axes_relative: bool,
    pub drives_relative: bool,
    pub using_inches: bool,
    pub feedrate: f32,
}

impl StackSnapshot {
    fn flags(&self) -> u16 {
        let mut flags = 0;
        if self.axes_relative {
            flags |= stack_flags::AXES_RELATIVE;
        }
        if self.drives_relative {
            flags |= stack_flags::DRIVES_RELATIVE;
        }
        if self.using_inches {
            flags |= stack_flags::USING_INCHES;
        }
        flags
    }
}

/// Writer over the outbound transfer buffer.
///
/// Packet ids restart at 1 on every [`reset`](Self::reset); `num_packets`
/// counts the packet headers written since then. Every business write
/// checks space first and returns `false` when the packet does not fit,
/// leaving the buffer untouched.
pub struct PacketWriter {
    buf: Box<[u8; TRANSFER_BUFFER_SIZE]>,
    tx_pointer: usize,
    packet_id: u16,
    num_packets: u16,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; TRANSFER_BUFFER_SIZE]),
            tx_pointer: 0,
            packet_id: 1,
            num_packets: 0,
        }
    }

    /// Reset for the next transfer. The buffer contents are left alone so
    /// an in-flight resend still sees the previous payload.
    pub fn reset(&mut self) {
        self.tx_pointer = 0;
        self.packet_id = 1;
        self.num_packets = 0;
    }

    /// Bytes queued for the next transfer.
    pub fn data_length(&self) -> usize {
        self.tx_pointer
    }

    /// Packet headers written since the last reset.
    pub fn num_packets(&self) -> u16 {
        self.num_packets
    }

    /// The queued payload.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.tx_pointer]
    }

    /// Whether a packet with `data_length` payload bytes still fits.
    pub fn can_write_packet(&self, data_length: usize) -> bool {
        add_padding(self.tx_pointer) + PACKET_HEADER_SIZE + data_length <= TRANSFER_BUFFER_SIZE
    }

    /// Reserve the next packet header. Returns the header's offset so a
    /// caller can patch the length afterwards (code replies do).
    fn write_packet_header(
        &mut self,
        request: FirmwareRequest,
        data_length: usize,
        resend_packet_id: u16,
    ) -> usize {
        // Stay aligned if the previous packet ended with a string.
        self.tx_pointer = add_padding(self.tx_pointer);
        let at = self.tx_pointer;

        let header = PacketHeader {
            request: request as u16,
            id: self.packet_id,
            length: data_length as u16,
            resend_packet_id,
        };
        header.encode(&mut &mut self.buf[at..at + PACKET_HEADER_SIZE]);

        self.packet_id = self.packet_id.wrapping_add(1);
        self.num_packets += 1;
        self.tx_pointer += PACKET_HEADER_SIZE;
        at
    }

    /// Append raw bytes. Strings can be concatenated here, so no padding
    /// is added until the next packet header.
    fn write_data(&mut self, data: &[u8]) {
        debug_assert!(self.tx_pointer + data.len() <= TRANSFER_BUFFER_SIZE);
        self.buf[self.tx_pointer..self.tx_pointer + data.len()].copy_from_slice(data);
        self.tx_pointer += data.len();
    }

    /// Report which channels are busy.
    pub fn write_state(&mut self, busy_channels: u32) -> bool {
        if !self.can_write_packet(REPORT_STATE_HEADER_SIZE) {
            return false;
        }
        self.write_packet_header(FirmwareRequest::ReportState, REPORT_STATE_HEADER_SIZE, 0);
        self.write_data(&busy_channels.to_le_bytes());
        true
    }

    /// Send an object model report. Cannot be truncated; the whole module
    /// JSON must fit.
    pub fn write_object_model(&mut self, module: u8, data: &[u8]) -> bool {
        if !self.can_write_packet(OBJECT_MODEL_HEADER_SIZE + data.len()) {
            return false;
        }
        self.write_packet_header(
            FirmwareRequest::ObjectModel,
            OBJECT_MODEL_HEADER_SIZE + data.len(),
            0,
        );

        let mut header = [0u8; OBJECT_MODEL_HEADER_SIZE];
        ObjectModelHeader {
            length: data.len() as u16,
            module,
        }
        .encode(&mut &mut header[..]);
        self.write_data(&header);
        self.write_data(data);
        true
    }

    /// Send a G-code reply, truncating if necessary.
    ///
    /// Drains as much of `reply` as fits. When data remains, the reply
    /// header's message type carries [`PUSH_FLAG`] and the remainder is
    /// left in `reply` for a later transfer. Requires room for at least
    /// 24 reply bytes (or the whole reply when shorter) before writing
    /// anything.
    pub fn write_code_reply(&mut self, message_type: u32, reply: &mut Bytes) -> bool {
        if !self.can_write_packet(CODE_REPLY_HEADER_SIZE + reply.len().min(24)) {
            return false;
        }
        let packet_at = self.write_packet_header(FirmwareRequest::CodeReply, 0, 0);

        let reply_at = self.tx_pointer;
        self.tx_pointer += CODE_REPLY_HEADER_SIZE;

        let mut bytes_written = 0;
        while self.tx_pointer < TRANSFER_BUFFER_SIZE && !reply.is_empty() {
            let n = (TRANSFER_BUFFER_SIZE - self.tx_pointer).min(reply.len());
            let chunk = reply.split_to(n);
            self.write_data(&chunk);
            bytes_written += n;
        }

        let mut message_type = message_type;
        if !reply.is_empty() {
            // More data to come in a later transfer.
            message_type |= PUSH_FLAG;
        }

        CodeReplyHeader {
            message_type,
            length: bytes_written as u16,
        }
        .encode(&mut &mut self.buf[reply_at..reply_at + CODE_REPLY_HEADER_SIZE]);

        // Back-patch the packet length now that the drained size is known.
        let length = (CODE_REPLY_HEADER_SIZE + bytes_written) as u16;
        self.buf[packet_at + 4..packet_at + 6].copy_from_slice(&length.to_le_bytes());
        true
    }

    /// Ask the SBC to execute a macro file.
    pub fn write_macro_request(&mut self, channel: u8, filename: &str, report_missing: bool) -> bool {
        if filename.len() > u8::MAX as usize
            || !self.can_write_packet(EXECUTE_MACRO_HEADER_SIZE + filename.len())
        {
            return false;
        }
        self.write_packet_header(
            FirmwareRequest::ExecuteMacro,
            EXECUTE_MACRO_HEADER_SIZE + filename.len(),
            0,
        );

        let mut header = [0u8; EXECUTE_MACRO_HEADER_SIZE];
        ExecuteMacroHeader {
            channel,
            report_missing,
            length: filename.len() as u8,
        }
        .encode(&mut &mut header[..]);
        self.write_data(&header);
        self.write_data(filename.as_bytes());
        true
    }

    /// Ask the SBC to abort the file on a channel.
    pub fn write_abort_file_request(&mut self, channel: u8) -> bool {
        if !self.can_write_packet(ABORT_FILE_HEADER_SIZE) {
            return false;
        }
        self.write_packet_header(FirmwareRequest::AbortFile, ABORT_FILE_HEADER_SIZE, 0);
        self.write_data(&[channel, 0, 0, 0]);
        true
    }

    /// Report a G-code state stack change.
    pub fn write_stack_event(&mut self, channel: u8, snapshot: &StackSnapshot) -> bool {
        if !self.can_write_packet(STACK_EVENT_HEADER_SIZE) {
            return false;
        }
        self.write_packet_header(FirmwareRequest::StackEvent, STACK_EVENT_HEADER_SIZE, 0);

        let mut header = [0u8; STACK_EVENT_HEADER_SIZE];
        StackEventHeader {
            channel,
            depth: snapshot.depth,
            flags: snapshot.flags(),
            feedrate: snapshot.feedrate,
        }
        .encode(&mut &mut header[..]);
        self.write_data(&header);
        true
    }

    /// Report that the print was paused.
    pub fn write_print_paused(&mut self, file_position: u32, reason: PrintPausedReason) -> bool {
        if !self.can_write_packet(PRINT_PAUSED_HEADER_SIZE) {
            return false;
        }
        self.write_packet_header(FirmwareRequest::PrintPaused, PRINT_PAUSED_HEADER_SIZE, 0);

        let mut header = [0u8; PRINT_PAUSED_HEADER_SIZE];
        PrintPausedHeader {
            file_position,
            reason: reason as u8,
        }
        .encode(&mut &mut header[..]);
        self.write_data(&header);
        true
    }

    /// Send the bed height map. Cannot be truncated.
    pub fn write_height_map(&mut self, map: &HeightMap) -> bool {
        let bytes_to_write = HEIGHT_MAP_HEADER_SIZE + map.points.len() * 4;
        if !self.can_write_packet(bytes_to_write) {
            return false;
        }
        self.write_packet_header(FirmwareRequest::HeightMap, bytes_to_write, 0);

        let mut header = [0u8; HEIGHT_MAP_HEADER_SIZE];
        map.header.encode(&mut &mut header[..]);
        self.write_data(&header);
        for z in &map.points {
            self.write_data(&z.to_le_bytes());
        }
        true
    }

    /// Confirm that the requested resource lock is held.
    pub fn write_locked(&mut self, channel: u8) -> bool {
        if !self.can_write_packet(LOCK_UNLOCK_HEADER_SIZE) {
            return false;
        }
        self.write_packet_header(FirmwareRequest::Locked, LOCK_UNLOCK_HEADER_SIZE, 0);
        self.write_data(&[channel, 0, 0, 0]);
        true
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}
