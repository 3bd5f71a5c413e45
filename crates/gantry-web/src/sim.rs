//! Simulated machine backend for the standalone server.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::NaiveDateTime;
use serde_json::json;

use gantry_core::machine::{FileInfoResponse, MachineBackend};

/// Backend with fixed idle-state responses, enough to exercise the HTTP
/// surface without firmware.
pub struct SimMachine {
    password: Option<String>,
    date_time: Mutex<Option<NaiveDateTime>>,
    gcodes_seen: AtomicU32,
}

impl SimMachine {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password,
            date_time: Mutex::new(None),
            gcodes_seen: AtomicU32::new(0),
        }
    }
}

impl MachineBackend for SimMachine {
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
            json!({
                "status": "I",
                "type": status_type,
                "coords": {"xyz": [0.0, 0.0, 0.0], "machine": [0.0, 0.0, 0.0]},
                "seq": self.gcodes_seen.load(Ordering::Relaxed),
            })
            .to_string(),
        )
    }

    fn legacy_status_response(&self) -> Option<String> {
        Some(json!({"status": "I", "buff": 256}).to_string())
    }

    fn config_response(&self) -> Option<String> {
        Some(
            json!({
                "firmwareName": "gantry",
                "firmwareVersion": env!("CARGO_PKG_VERSION"),
                "axisMins": [0.0, 0.0, 0.0],
                "axisMaxes": [230.0, 210.0, 200.0],
            })
            .to_string(),
        )
    }

    fn model_response(&self, key: Option<&str>, flags: Option<&str>) -> Option<String> {
        Some(
            json!({
                "key": key.unwrap_or(""),
                "flags": flags.unwrap_or(""),
                "result": {"state": {"status": "idle"}},
            })
            .to_string(),
        )
    }

    fn file_info(&self, name: &str, _quit_early: bool) -> FileInfoResponse {
        FileInfoResponse::Done(json!({"err": 0, "fileName": name, "size": 0}).to_string())
    }

    fn thumbnail_response(&self, _name: &str, _offset: u32) -> Option<String> {
        Some(json!({"err": 1}).to_string())
    }

    fn push_gcode(&self, _command: &str) {
        self.gcodes_seen.fetch_add(1, Ordering::Relaxed);
    }

    fn gcode_buffer_space(&self) -> usize {
        256
    }

    fn gcode_dir(&self) -> String {
        "gcodes".to_string()
    }

    fn board_type(&self) -> String {
        "gantry1".to_string()
    }
}
