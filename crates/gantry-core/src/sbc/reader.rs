//! Cursor-based accessor over a received transfer payload.

use bytes::Buf;

use crate::error::{Error, Result};
use crate::sbc::wire::{
    add_padding, MACRO_COMPLETE_HEADER_SIZE, LOCK_UNLOCK_HEADER_SIZE, OBJECT_MODEL_HEADER_SIZE,
    ObjectModelHeader, PACKET_HEADER_SIZE, PRINT_STARTED_HEADER_SIZE, PRINT_STOPPED_HEADER_SIZE,
    PacketHeader, PrintStartedHeader, PrintStoppedReason,
};

/// Decoded print-started notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintStartedInfo {
    pub filename: String,
    pub generated_by: String,
    pub filament_needed: Vec<f32>,
    pub last_modified_time: u64,
    pub file_size: u32,
    pub first_layer_height: f32,
    pub layer_height: f32,
    pub object_height: f32,
    pub print_time: u32,
    pub simulated_time: u32,
}

/// Reader over the inbound transfer buffer.
///
/// The cursor advances by the padded length of every data block, so
/// padding bytes are invisible to callers. All lengths come from the
/// peer and are checked against the payload bounds.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    data_length: usize,
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a reader over `data_length` bytes of `buf`.
    pub fn new(buf: &'a [u8], data_length: usize) -> Self {
        let data_length = data_length.min(buf.len());
        Self {
            buf,
            data_length,
            pos: 0,
        }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The next packet header, or `None` once the payload is exhausted.
    pub fn read_packet(&mut self) -> Result<Option<PacketHeader>> {
        if self.pos >= self.data_length {
            return Ok(None);
        }
        let header = PacketHeader::decode(&self.buf[self.pos..self.data_length])?;
        self.pos += PACKET_HEADER_SIZE;
        Ok(Some(header))
    }

    /// The next `len` bytes; advances the cursor by the padded length.
    pub fn read_data(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data_length {
            return Err(Error::Protocol {
                message: format!(
                    "data block of {len} bytes overruns payload at {}/{}",
                    self.pos, self.data_length
                ),
            });
        }
        let data = &self.buf[self.pos..self.pos + len];
        self.pos += add_padding(len);
        Ok(data)
    }

    fn read_header_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data_length {
            return Err(Error::Protocol {
                message: format!(
                    "header of {len} bytes overruns payload at {}/{}",
                    self.pos, self.data_length
                ),
            });
        }
        let data = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(data)
    }

    /// Object model request: which module is wanted.
    pub fn read_object_model_request(&mut self) -> Result<u8> {
        let header = ObjectModelHeader::decode(self.read_header_bytes(OBJECT_MODEL_HEADER_SIZE)?)?;
        Ok(header.module)
    }

    /// Print-started notification: fixed header plus filament array,
    /// filename, and generated-by tail.
    pub fn read_print_started_info(&mut self, packet_length: usize) -> Result<PrintStartedInfo> {
        let header =
            PrintStartedHeader::decode(self.read_header_bytes(PRINT_STARTED_HEADER_SIZE)?)?;

        let tail_length = packet_length
            .checked_sub(PRINT_STARTED_HEADER_SIZE)
            .ok_or_else(|| Error::Protocol {
                message: format!("print started packet too short: {packet_length} bytes"),
            })?;
        let mut tail = self.read_data(tail_length)?;

        let filaments_size = header.num_filaments as usize * 4;
        let expected = filaments_size
            + header.filename_length as usize
            + header.generated_by_length as usize;
        if tail.len() < expected {
            return Err(Error::Protocol {
                message: format!(
                    "print started tail too short: {} bytes, need {expected}",
                    tail.len()
                ),
            });
        }

        let mut filament_needed = Vec::with_capacity(header.num_filaments as usize);
        for _ in 0..header.num_filaments {
            filament_needed.push(tail.get_f32_le());
        }

        let filename = read_string(&mut tail, header.filename_length as usize);
        let generated_by = read_string(&mut tail, header.generated_by_length as usize);

        Ok(PrintStartedInfo {
            filename,
            generated_by,
            filament_needed,
            last_modified_time: header.last_modified_time,
            file_size: header.file_size,
            first_layer_height: header.first_layer_height,
            layer_height: header.layer_height,
            object_height: header.object_height,
            print_time: header.print_time,
            simulated_time: header.simulated_time,
        })
    }

    /// Print-stopped notification.
    pub fn read_print_stopped_info(&mut self) -> Result<PrintStoppedReason> {
        let mut data = self.read_header_bytes(PRINT_STOPPED_HEADER_SIZE)?;
        let raw = data.get_u8();
        PrintStoppedReason::from_u8(raw).ok_or_else(|| Error::Protocol {
            message: format!("unknown print stop reason {raw}"),
        })
    }

    /// Macro-complete notification: channel and error flag.
    pub fn read_macro_complete_info(&mut self) -> Result<(u8, bool)> {
        let mut data = self.read_header_bytes(MACRO_COMPLETE_HEADER_SIZE)?;
        let channel = data.get_u8();
        let error = data.get_u8() != 0;
        Ok((channel, error))
    }

    /// Lock/unlock request: which channel asked.
    pub fn read_lock_unlock_request(&mut self) -> Result<u8> {
        let mut data = self.read_header_bytes(LOCK_UNLOCK_HEADER_SIZE)?;
        Ok(data.get_u8())
    }
}

fn read_string(tail: &mut &[u8], len: usize) -> String {
    let raw = &tail[..len];
    tail.advance(len);
    String::from_utf8_lossy(raw).into_owned()
}
