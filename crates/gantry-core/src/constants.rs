//! Protocol and configuration constants for gantry.

use std::time::Duration;

// =============================================================================
// SBC Link Constants
// =============================================================================

/// Format code both sides place in the transfer header.
pub const FORMAT_CODE: u8 = 0x5A;

/// Format code written into the receive header before an exchange, so a
/// short or absent transfer can never look like a valid one.
pub const INVALID_FORMAT_CODE: u8 = 0xC9;

/// Current SBC link protocol version.
pub const SBC_PROTOCOL_VERSION: u8 = 1;

/// Payload capacity of a single transfer, in bytes.
pub const TRANSFER_BUFFER_SIZE: usize = 2048;

// =============================================================================
// SBC Timing Constants
// =============================================================================

/// A transfer stalled longer than this is abandoned and the link restarts
/// from the header phase.
pub const SPI_TRANSFER_TIMEOUT: Duration = Duration::from_millis(500);

/// Silence longer than this marks the SBC as disconnected.
pub const SPI_CONNECTION_TIMEOUT: Duration = Duration::from_millis(1000);

// =============================================================================
// HTTP Front-End Constants
// =============================================================================

/// Capacity of the in-place request buffer.
pub const CLIENT_MESSAGE_LEN: usize = 2000;

/// Maximum words on the request line.
pub const MAX_COMMAND_WORDS: usize = 4;

/// Maximum key/value pairs in the query string.
pub const MAX_QUAL_KEYS: usize = 5;

/// Maximum header key/value pairs.
pub const MAX_HEADERS: usize = 16;

/// Maximum concurrently authenticated client IPs.
pub const MAX_HTTP_SESSIONS: usize = 8;

/// Longest filename the static file service will try to open.
pub const MAX_WEB_FILENAME_LEN: usize = 100;

/// Default page served for the web root.
pub const INDEX_PAGE_FILE: &str = "index.html";

/// Fallback for web bundles that predate the current index page.
pub const OLD_INDEX_PAGE_FILE: &str = "gantry.htm";

/// Page served for missing .htm/.html targets.
pub const FOUR04_PAGE_FILE: &str = "html404.htm";

/// API level reported by rr_connect.
pub const API_LEVEL: u32 = 1;

// =============================================================================
// HTTP Timing Constants
// =============================================================================

/// A read stall longer than this drops the connection.
pub const HTTP_RECEIVE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Sessions (and uploads) idle longer than this are removed.
pub const HTTP_SESSION_TIMEOUT: Duration = Duration::from_millis(8000);

/// Upper bound on a single rr_fileinfo request.
pub const MAX_FILEINFO_GET_TIME: Duration = Duration::from_millis(2000);

// =============================================================================
// Output Buffer Constants
// =============================================================================

/// Size of one pooled output buffer.
pub const OUTPUT_BUFFER_SIZE: usize = 256;

/// Number of output buffers in the pool.
pub const OUTPUT_BUFFER_COUNT: usize = 26;

/// Pre-baked response for buffer-pool exhaustion. Must fit in a single
/// output buffer so it is always deliverable.
pub const SERVICE_UNAVAILABLE_RESPONSE: &str = "HTTP/1.1 503 Service Unavailable\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_constants_are_ordered() {
        assert!(SPI_TRANSFER_TIMEOUT < SPI_CONNECTION_TIMEOUT);
        assert!(HTTP_RECEIVE_TIMEOUT < HTTP_SESSION_TIMEOUT);
    }

    #[test]
    fn service_unavailable_fits_one_buffer() {
        assert!(SERVICE_UNAVAILABLE_RESPONSE.len() <= OUTPUT_BUFFER_SIZE);
    }

    #[test]
    fn format_codes_differ() {
        assert_ne!(FORMAT_CODE, INVALID_FORMAT_CODE);
    }

    #[test]
    fn parse_limits_are_sane() {
        assert!(MAX_COMMAND_WORDS >= 3); // method, target, version
        assert!(MAX_HTTP_SESSIONS > 0);
        assert!(CLIENT_MESSAGE_LEN > MAX_WEB_FILENAME_LEN);
    }
}
