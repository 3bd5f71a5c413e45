//! Seam to the rest of the firmware.
//!
//! The HTTP front-end consumes the machine through this trait only:
//! status/config/object-model JSON, the multi-tick file-info scanner,
//! the G-code input queue, thumbnails, the shared password, and the RTC.
//! Producers return `None` when they could not build a response (out of
//! buffers), which the front-end answers with a 503.

use chrono::NaiveDateTime;

/// Result of one file-info scanner tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileInfoResponse {
    /// Scan still in progress; ask again next tick.
    NotFinished,
    /// Finished; the JSON to send (may be an error object).
    Done(String),
}

/// The firmware half the front-end talks to.
pub trait MachineBackend: Send + Sync {
    /// Check a connect password against the configured one.
    fn check_password(&self, candidate: &str) -> bool;

    /// Whether no password is configured at all (clients are then
    /// authenticated automatically).
    fn no_password_set(&self) -> bool;

    /// Whether the real-time clock has been set.
    fn is_date_time_set(&self) -> bool;

    /// Set the real-time clock.
    fn set_date_time(&self, when: NaiveDateTime);

    /// Status JSON of the requested type (1..=3).
    fn status_response(&self, status_type: u8) -> Option<String>;

    /// Legacy status JSON for requests without a type qualifier.
    fn legacy_status_response(&self) -> Option<String>;

    /// Static configuration JSON.
    fn config_response(&self) -> Option<String>;

    /// Filtered object model JSON.
    fn model_response(&self, key: Option<&str>, flags: Option<&str>) -> Option<String>;

    /// One tick of the file-info scan for `name` (empty = the file being
    /// printed). With `quit_early` the scanner wraps up with whatever it
    /// has.
    fn file_info(&self, name: &str, quit_early: bool) -> FileInfoResponse;

    /// Thumbnail chunk JSON for `name` at `offset`.
    fn thumbnail_response(&self, name: &str, offset: u32) -> Option<String>;

    /// Queue a G-code command from the HTTP channel.
    fn push_gcode(&self, command: &str);

    /// Free space in the HTTP G-code input buffer.
    fn gcode_buffer_space(&self) -> usize;

    /// Directory listed when rr_files gets no `dir` qualifier.
    fn gcode_dir(&self) -> String;

    /// Board identifier reported by rr_connect.
    fn board_type(&self) -> String;
}
