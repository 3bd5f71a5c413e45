//! Canned machine backend for HTTP front-end tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::NaiveDateTime;

use gantry_core::machine::{FileInfoResponse, MachineBackend};

/// [`MachineBackend`] with scriptable responses and call capture.
pub struct FakeMachine {
    password: Option<String>,
    gcode_buffer_space: usize,
    gcode_log: Mutex<Vec<String>>,
    date_time: Mutex<Option<NaiveDateTime>>,
    file_info_script: Mutex<VecDeque<FileInfoResponse>>,
}

impl FakeMachine {
    /// Backend with no password configured (clients auto-authenticate).
    pub fn new() -> Self {
        Self {
            password: None,
            gcode_buffer_space: 256,
            gcode_log: Mutex::new(Vec::new()),
            date_time: Mutex::new(None),
            file_info_script: Mutex::new(VecDeque::new()),
        }
    }

    /// Backend that requires `password` on connect.
    pub fn with_password(password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            ..Self::new()
        }
    }

    /// G-code commands pushed so far.
    pub fn gcode_log(&self) -> Vec<String> {
        self.gcode_log.lock().unwrap().clone()
    }

    /// The RTC value applied by rr_connect, if any.
    pub fn date_time(&self) -> Option<NaiveDateTime> {
        *self.date_time.lock().unwrap()
    }

    /// Script the next file-info scanner ticks.
    pub fn script_file_info(&self, responses: impl IntoIterator<Item = FileInfoResponse>) {
        self.file_info_script.lock().unwrap().extend(responses);
    }
}

impl Default for FakeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineBackend for FakeMachine {
    fn check_password(&self, candidate: &str) -> bool {
        match &self.password {
            Some(expected) => candidate == expected,
            None => true,
        }
    }

    fn no_password_set(&self) -> bool {
        self.password.is_none()
    }

    fn is_date_time_set(&self) -> bool {
        self.date_time.lock().unwrap().is_some()
    }

    fn set_date_time(&self, when: NaiveDateTime) {
        *self.date_time.lock().unwrap() = Some(when);
    }

    fn status_response(&self, status_type: u8) -> Option<String> {
        Some(
            serde_json::json!({"status": "I", "type": status_type, "seq": 0})
                .to_string(),
        )
    }

    fn legacy_status_response(&self) -> Option<String> {
        Some(serde_json::json!({"status": "I"}).to_string())
    }

    fn config_response(&self) -> Option<String> {
        Some(
            serde_json::json!({"axisMins": [0.0, 0.0, 0.0], "firmwareName": "gantry"})
                .to_string(),
        )
    }

    fn model_response(&self, key: Option<&str>, _flags: Option<&str>) -> Option<String> {
        Some(serde_json::json!({"key": key.unwrap_or(""), "result": {}}).to_string())
    }

    fn file_info(&self, name: &str, _quit_early: bool) -> FileInfoResponse {
        self.file_info_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                FileInfoResponse::Done(
                    serde_json::json!({"err": 0, "fileName": name, "size": 0}).to_string(),
                )
            })
    }

    fn thumbnail_response(&self, name: &str, offset: u32) -> Option<String> {
        Some(
            serde_json::json!({"fileName": name, "offset": offset, "data": "", "next": 0, "err": 0})
                .to_string(),
        )
    }

    fn push_gcode(&self, command: &str) {
        self.gcode_log.lock().unwrap().push(command.to_string());
    }

    fn gcode_buffer_space(&self) -> usize {
        self.gcode_buffer_space
    }

    fn gcode_dir(&self) -> String {
        "gcodes".to_string()
    }

    fn board_type(&self) -> String {
        "gantry1".to_string()
    }
}
