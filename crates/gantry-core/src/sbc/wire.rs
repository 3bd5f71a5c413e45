//! On-the-wire structures shared with the SBC.
//!
//! All multi-byte fields are little-endian. Every structure here is a
//! fixed layout agreed with the companion board; field order and the
//! reserved checksum positions must not change.

use bytes::{Buf, BufMut};

use crate::constants::{FORMAT_CODE, INVALID_FORMAT_CODE, SBC_PROTOCOL_VERSION};
use crate::error::{Error, Result};

/// Round `n` up to the next 4-byte boundary.
pub const fn add_padding(n: usize) -> usize {
    (n + 3) & !3
}

// =============================================================================
// Transfer Header
// =============================================================================

/// Encoded size of [`TransferHeader`].
pub const TRANSFER_HEADER_SIZE: usize = 20;

/// Header exchanged at the start of every transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferHeader {
    pub format_code: u8,
    pub protocol_version: u8,
    pub num_packets: u16,
    pub sequence_number: u32,
    pub data_length: u32,
    /// Reserved integrity field, currently zero.
    pub checksum_data: u32,
    /// Reserved integrity field, currently zero.
    pub checksum_header: u32,
}

impl TransferHeader {
    /// Header template for our transmit side.
    pub fn outbound() -> Self {
        Self {
            format_code: FORMAT_CODE,
            protocol_version: SBC_PROTOCOL_VERSION,
            num_packets: 0,
            sequence_number: 0,
            data_length: 0,
            checksum_data: 0,
            checksum_header: 0,
        }
    }

    /// Receive-side header reset before an exchange. The sequence number
    /// is deliberately left out of the reset: the last good value is how
    /// observers tell whether the peer is still there.
    pub fn reset_for_receive(&mut self) {
        self.format_code = INVALID_FORMAT_CODE;
        self.protocol_version = 0;
        self.num_packets = 0;
        self.data_length = 0;
        self.checksum_data = 0;
        self.checksum_header = 0;
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.format_code);
        buf.put_u8(self.protocol_version);
        buf.put_u16_le(self.num_packets);
        buf.put_u32_le(self.sequence_number);
        buf.put_u32_le(self.data_length);
        buf.put_u32_le(self.checksum_data);
        buf.put_u32_le(self.checksum_header);
    }

    pub fn to_bytes(&self) -> [u8; TRANSFER_HEADER_SIZE] {
        let mut out = [0u8; TRANSFER_HEADER_SIZE];
        self.encode(&mut &mut out[..]);
        out
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < TRANSFER_HEADER_SIZE {
            return Err(Error::Protocol {
                message: format!("transfer header too short: {} bytes", data.len()),
            });
        }
        Ok(Self {
            format_code: data.get_u8(),
            protocol_version: data.get_u8(),
            num_packets: data.get_u16_le(),
            sequence_number: data.get_u32_le(),
            data_length: data.get_u32_le(),
            checksum_data: data.get_u32_le(),
            checksum_header: data.get_u32_le(),
        })
    }
}

// =============================================================================
// Response Codes
// =============================================================================

/// Per-exchange response code, sent as a 4-byte signed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferResponse {
    Success,
    BadFormat,
    BadProtocolVersion,
    BadDataLength,
    BadChecksum,
}

impl TransferResponse {
    pub fn as_i32(self) -> i32 {
        match self {
            TransferResponse::Success => 0,
            TransferResponse::BadFormat => -1,
            TransferResponse::BadProtocolVersion => -2,
            TransferResponse::BadDataLength => -3,
            TransferResponse::BadChecksum => -4,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TransferResponse::Success),
            -1 => Some(TransferResponse::BadFormat),
            -2 => Some(TransferResponse::BadProtocolVersion),
            -3 => Some(TransferResponse::BadDataLength),
            -4 => Some(TransferResponse::BadChecksum),
            _ => None,
        }
    }
}

// =============================================================================
// Packet Header
// =============================================================================

/// Encoded size of [`PacketHeader`].
pub const PACKET_HEADER_SIZE: usize = 8;

/// Self-describing message header inside a transfer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub request: u16,
    pub id: u16,
    pub length: u16,
    pub resend_packet_id: u16,
}

impl PacketHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.request);
        buf.put_u16_le(self.id);
        buf.put_u16_le(self.length);
        buf.put_u16_le(self.resend_packet_id);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(Error::Protocol {
                message: format!("packet header too short: {} bytes", data.len()),
            });
        }
        Ok(Self {
            request: data.get_u16_le(),
            id: data.get_u16_le(),
            length: data.get_u16_le(),
            resend_packet_id: data.get_u16_le(),
        })
    }
}

// =============================================================================
// Request Codes
// =============================================================================

/// Packet kinds sent by the controller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FirmwareRequest {
    ReportState = 0,
    ObjectModel = 1,
    CodeReply = 2,
    ExecuteMacro = 3,
    AbortFile = 4,
    StackEvent = 5,
    PrintPaused = 6,
    HeightMap = 7,
    Locked = 8,
}

/// Packet kinds sent by the SBC. Unknown codes are forwarded to the
/// application untouched via [`PacketHeader::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SbcRequest {
    GetObjectModel = 0,
    PrintStarted = 1,
    PrintStopped = 2,
    MacroCompleted = 3,
    LockMovement = 4,
    Unlock = 5,
}

impl SbcRequest {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(SbcRequest::GetObjectModel),
            1 => Some(SbcRequest::PrintStarted),
            2 => Some(SbcRequest::PrintStopped),
            3 => Some(SbcRequest::MacroCompleted),
            4 => Some(SbcRequest::LockMovement),
            5 => Some(SbcRequest::Unlock),
            _ => None,
        }
    }
}

// =============================================================================
// Typed Payload Headers
// =============================================================================

/// Set in [`CodeReplyHeader::message_type`] when the reply was truncated
/// and the rest follows in a later transfer.
pub const PUSH_FLAG: u32 = 1 << 31;

pub const OBJECT_MODEL_HEADER_SIZE: usize = 4;

/// Object model report: `length` bytes of JSON for `module` follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectModelHeader {
    pub length: u16,
    pub module: u8,
}

impl ObjectModelHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.length);
        buf.put_u8(self.module);
        buf.put_u8(0);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        check_len(data.len(), OBJECT_MODEL_HEADER_SIZE, "object model header")?;
        let length = data.get_u16_le();
        let module = data.get_u8();
        Ok(Self { length, module })
    }
}

pub const PRINT_STARTED_HEADER_SIZE: usize = 36;

/// Fixed part of a print-started notification; a filament array, the file
/// name, and the generated-by string follow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintStartedHeader {
    pub filename_length: u16,
    pub generated_by_length: u16,
    pub num_filaments: u32,
    pub last_modified_time: u64,
    pub file_size: u32,
    pub first_layer_height: f32,
    pub layer_height: f32,
    pub object_height: f32,
    pub print_time: u32,
    pub simulated_time: u32,
}

impl PrintStartedHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.filename_length);
        buf.put_u16_le(self.generated_by_length);
        buf.put_u32_le(self.num_filaments);
        buf.put_u64_le(self.last_modified_time);
        buf.put_u32_le(self.file_size);
        buf.put_f32_le(self.first_layer_height);
        buf.put_f32_le(self.layer_height);
        buf.put_f32_le(self.object_height);
        buf.put_u32_le(self.print_time);
        buf.put_u32_le(self.simulated_time);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        check_len(data.len(), PRINT_STARTED_HEADER_SIZE, "print started header")?;
        Ok(Self {
            filename_length: data.get_u16_le(),
            generated_by_length: data.get_u16_le(),
            num_filaments: data.get_u32_le(),
            last_modified_time: data.get_u64_le(),
            file_size: data.get_u32_le(),
            first_layer_height: data.get_f32_le(),
            layer_height: data.get_f32_le(),
            object_height: data.get_f32_le(),
            print_time: data.get_u32_le(),
            simulated_time: data.get_u32_le(),
        })
    }
}

pub const PRINT_STOPPED_HEADER_SIZE: usize = 4;

/// Why a print ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrintStoppedReason {
    NormalCompletion = 0,
    UserCancelled = 1,
    Abort = 2,
}

impl PrintStoppedReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PrintStoppedReason::NormalCompletion),
            1 => Some(PrintStoppedReason::UserCancelled),
            2 => Some(PrintStoppedReason::Abort),
            _ => None,
        }
    }
}

pub const MACRO_COMPLETE_HEADER_SIZE: usize = 4;

pub const EXECUTE_MACRO_HEADER_SIZE: usize = 4;

/// Ask the SBC to run a macro file on a channel; the filename follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteMacroHeader {
    pub channel: u8,
    pub report_missing: bool,
    pub length: u8,
}

impl ExecuteMacroHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.channel);
        buf.put_u8(self.report_missing as u8);
        buf.put_u8(self.length);
        buf.put_u8(0);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        check_len(data.len(), EXECUTE_MACRO_HEADER_SIZE, "execute macro header")?;
        let channel = data.get_u8();
        let report_missing = data.get_u8() != 0;
        let length = data.get_u8();
        Ok(Self {
            channel,
            report_missing,
            length,
        })
    }
}

pub const ABORT_FILE_HEADER_SIZE: usize = 4;

pub const HEIGHT_MAP_HEADER_SIZE: usize = 32;

/// Bed height-map grid definition; `num_points` z values follow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightMapHeader {
    pub x_min: f32,
    pub x_max: f32,
    pub x_spacing: f32,
    pub y_min: f32,
    pub y_max: f32,
    pub y_spacing: f32,
    pub radius: f32,
    pub num_points: u16,
}

impl HeightMapHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_f32_le(self.x_min);
        buf.put_f32_le(self.x_max);
        buf.put_f32_le(self.x_spacing);
        buf.put_f32_le(self.y_min);
        buf.put_f32_le(self.y_max);
        buf.put_f32_le(self.y_spacing);
        buf.put_f32_le(self.radius);
        buf.put_u16_le(self.num_points);
        buf.put_u16_le(0);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        check_len(data.len(), HEIGHT_MAP_HEADER_SIZE, "height map header")?;
        Ok(Self {
            x_min: data.get_f32_le(),
            x_max: data.get_f32_le(),
            x_spacing: data.get_f32_le(),
            y_min: data.get_f32_le(),
            y_max: data.get_f32_le(),
            y_spacing: data.get_f32_le(),
            radius: data.get_f32_le(),
            num_points: data.get_u16_le(),
        })
    }
}

/// Height-map payload handed to the writer: grid plus z points.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMap {
    pub header: HeightMapHeader,
    pub points: Vec<f32>,
}

pub const REPORT_STATE_HEADER_SIZE: usize = 4;

pub const CODE_REPLY_HEADER_SIZE: usize = 8;

/// G-code reply text header. The only packet kind that may be truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeReplyHeader {
    pub message_type: u32,
    pub length: u16,
}

impl CodeReplyHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.message_type);
        buf.put_u16_le(self.length);
        buf.put_u16_le(0);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        check_len(data.len(), CODE_REPLY_HEADER_SIZE, "code reply header")?;
        let message_type = data.get_u32_le();
        let length = data.get_u16_le();
        Ok(Self {
            message_type,
            length,
        })
    }
}

pub const STACK_EVENT_HEADER_SIZE: usize = 8;

/// G-code machine state stack flags.
pub mod stack_flags {
    pub const AXES_RELATIVE: u16 = 1 << 0;
    pub const DRIVES_RELATIVE: u16 = 1 << 1;
    pub const USING_INCHES: u16 = 1 << 2;
}

/// Stack push/pop notification for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackEventHeader {
    pub channel: u8,
    pub depth: u8,
    pub flags: u16,
    pub feedrate: f32,
}

impl StackEventHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.channel);
        buf.put_u8(self.depth);
        buf.put_u16_le(self.flags);
        buf.put_f32_le(self.feedrate);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        check_len(data.len(), STACK_EVENT_HEADER_SIZE, "stack event header")?;
        Ok(Self {
            channel: data.get_u8(),
            depth: data.get_u8(),
            flags: data.get_u16_le(),
            feedrate: data.get_f32_le(),
        })
    }
}

pub const PRINT_PAUSED_HEADER_SIZE: usize = 8;

/// Why a print was paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrintPausedReason {
    User = 1,
    Gcode = 2,
    FilamentChange = 3,
    Trigger = 4,
    HeaterFault = 5,
    FilamentError = 6,
    Stall = 7,
    LowVoltage = 8,
}

impl PrintPausedReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PrintPausedReason::User),
            2 => Some(PrintPausedReason::Gcode),
            3 => Some(PrintPausedReason::FilamentChange),
            4 => Some(PrintPausedReason::Trigger),
            5 => Some(PrintPausedReason::HeaterFault),
            6 => Some(PrintPausedReason::FilamentError),
            7 => Some(PrintPausedReason::Stall),
            8 => Some(PrintPausedReason::LowVoltage),
            _ => None,
        }
    }
}

/// Print paused notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintPausedHeader {
    pub file_position: u32,
    pub reason: u8,
}

impl PrintPausedHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.file_position);
        buf.put_u8(self.reason);
        buf.put_u8(0);
        buf.put_u16_le(0);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        check_len(data.len(), PRINT_PAUSED_HEADER_SIZE, "print paused header")?;
        let file_position = data.get_u32_le();
        let reason = data.get_u8();
        Ok(Self {
            file_position,
            reason,
        })
    }
}

pub const LOCK_UNLOCK_HEADER_SIZE: usize = 4;

fn check_len(have: usize, need: usize, what: &str) -> Result<()> {
    if have < need {
        return Err(Error::Protocol {
            message: format!("{what} too short: {have} bytes, need {need}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_padding_rounds_up_to_four() {
        assert_eq!(add_padding(0), 0);
        assert_eq!(add_padding(1), 4);
        assert_eq!(add_padding(4), 4);
        assert_eq!(add_padding(5), 8);
        assert_eq!(add_padding(7), 8);
        assert_eq!(add_padding(8), 8);
    }

    #[test]
    fn transfer_header_roundtrip() {
        let mut header = TransferHeader::outbound();
        header.num_packets = 3;
        header.sequence_number = 0xDEAD_BEEF;
        header.data_length = 1234;

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), TRANSFER_HEADER_SIZE);
        assert_eq!(bytes[0], FORMAT_CODE);

        let decoded = TransferHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn transfer_header_reset_keeps_sequence_number() {
        let mut header = TransferHeader::outbound();
        header.sequence_number = 42;
        header.data_length = 99;
        header.reset_for_receive();

        assert_eq!(header.format_code, INVALID_FORMAT_CODE);
        assert_eq!(header.data_length, 0);
        assert_eq!(header.sequence_number, 42);
    }

    #[test]
    fn transfer_header_decode_short() {
        assert!(TransferHeader::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn response_code_values() {
        assert_eq!(TransferResponse::Success.as_i32(), 0);
        assert_eq!(TransferResponse::BadFormat.as_i32(), -1);
        assert_eq!(TransferResponse::BadProtocolVersion.as_i32(), -2);
        assert_eq!(TransferResponse::BadDataLength.as_i32(), -3);
        assert_eq!(TransferResponse::BadChecksum.as_i32(), -4);

        for code in [0, -1, -2, -3, -4] {
            assert_eq!(TransferResponse::from_i32(code).unwrap().as_i32(), code);
        }
        assert!(TransferResponse::from_i32(7).is_none());
    }

    #[test]
    fn packet_header_roundtrip() {
        let header = PacketHeader {
            request: SbcRequest::PrintStarted as u16,
            id: 2,
            length: 48,
            resend_packet_id: 0,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);
        assert_eq!(PacketHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn sbc_request_unknown_code() {
        assert!(SbcRequest::from_u16(999).is_none());
        assert_eq!(SbcRequest::from_u16(3), Some(SbcRequest::MacroCompleted));
    }

    #[test]
    fn typed_header_sizes() {
        let mut buf = Vec::new();
        ObjectModelHeader { length: 1, module: 2 }.encode(&mut buf);
        assert_eq!(buf.len(), OBJECT_MODEL_HEADER_SIZE);

        buf.clear();
        PrintStartedHeader {
            filename_length: 0,
            generated_by_length: 0,
            num_filaments: 0,
            last_modified_time: 0,
            file_size: 0,
            first_layer_height: 0.0,
            layer_height: 0.0,
            object_height: 0.0,
            print_time: 0,
            simulated_time: 0,
        }
        .encode(&mut buf);
        assert_eq!(buf.len(), PRINT_STARTED_HEADER_SIZE);

        buf.clear();
        HeightMapHeader {
            x_min: 0.0,
            x_max: 0.0,
            x_spacing: 0.0,
            y_min: 0.0,
            y_max: 0.0,
            y_spacing: 0.0,
            radius: 0.0,
            num_points: 0,
        }
        .encode(&mut buf);
        assert_eq!(buf.len(), HEIGHT_MAP_HEADER_SIZE);

        buf.clear();
        CodeReplyHeader {
            message_type: PUSH_FLAG | 1,
            length: 10,
        }
        .encode(&mut buf);
        assert_eq!(buf.len(), CODE_REPLY_HEADER_SIZE);

        buf.clear();
        StackEventHeader {
            channel: 0,
            depth: 1,
            flags: stack_flags::USING_INCHES,
            feedrate: 50.0,
        }
        .encode(&mut buf);
        assert_eq!(buf.len(), STACK_EVENT_HEADER_SIZE);

        buf.clear();
        PrintPausedHeader {
            file_position: 0,
            reason: PrintPausedReason::User as u8,
        }
        .encode(&mut buf);
        assert_eq!(buf.len(), PRINT_PAUSED_HEADER_SIZE);
    }

    #[test]
    fn push_flag_is_top_bit() {
        assert_eq!(PUSH_FLAG, 0x8000_0000);
    }
}
