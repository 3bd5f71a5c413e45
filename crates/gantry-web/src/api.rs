//! The rr_* JSON command set.
//!
//! `connect` is exempt from authentication; every other command requires
//! an active session. Commands read their inputs from the parsed query
//! qualifiers and return either a JSON body, a responder state change
//! (rr_fileinfo), or a rejection.

use std::net::IpAddr;
use std::time::Instant;

use chrono::NaiveDateTime;
use serde_json::json;
use tracing::{info, warn};

use gantry_core::constants::API_LEVEL;
use gantry_core::http::RequestParser;

use crate::files;
use crate::state::WebState;

/// Outcome of one API command.
#[derive(Debug, PartialEq, Eq)]
pub enum JsonResponse {
    /// Send this JSON body. `None` means the producer ran out of
    /// buffers; the responder answers 503. `keep_allowed` permits
    /// keep-alive when the client also asked for it.
    Reply {
        body: Option<String>,
        keep_allowed: bool,
    },
    /// Switch the responder to the multi-tick file-info scan.
    GetFileInfo { name: String },
    /// Reject the request with this status and text.
    Reject { code: u16, text: &'static str },
}

fn reply(body: String) -> JsonResponse {
    JsonResponse::Reply {
        body: Some(body),
        keep_allowed: true,
    }
}

fn reply_opt(body: Option<String>) -> JsonResponse {
    JsonResponse::Reply {
        body,
        keep_allowed: true,
    }
}

fn err_reply(err: i32) -> JsonResponse {
    reply(json!({"err": err}).to_string())
}

fn parse_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").ok()
}

/// Handle one rr_* command. `upload_error` is the sticky error flag of
/// the connection's last upload, reported by the `upload` command.
pub fn get_json_response(
    command: &str,
    parser: &RequestParser,
    state: &WebState,
    remote_ip: IpAddr,
    upload_error: bool,
) -> JsonResponse {
    let now = Instant::now();
    let machine = &state.machine;

    // connect is the one command that works without a session, and only
    // with a password qualifier.
    if command.eq_ignore_ascii_case("connect") {
        if let Some(password) = parser.get_key_value("password") {
            let mut sessions = state.sessions.lock().unwrap();
            if !sessions.check_authenticated(remote_ip, now) {
                if !machine.check_password(&password) {
                    warn!(client = %remote_ip, "login attempt with incorrect password");
                    return err_reply(1);
                }
                if !sessions.authenticate(remote_ip, now) {
                    warn!(client = %remote_ip, "login attempt but no more sessions available");
                    return err_reply(2);
                }
            }
            drop(sessions);
            info!(client = %remote_ip, "login succeeded");

            // See if we can update the real-time clock.
            if let Some(time) = parser.get_key_value("time") {
                if !machine.is_date_time_set() {
                    if let Some(when) = parse_time(&time) {
                        machine.set_date_time(when);
                    }
                }
            }

            return reply(
                json!({
                    "err": 0,
                    "sessionTimeout": state.config.session_timeout.as_millis() as u64,
                    "boardType": machine.board_type(),
                    "apiLevel": API_LEVEL,
                })
                .to_string(),
            );
        }
    }

    if !state
        .sessions
        .lock()
        .unwrap()
        .check_authenticated(remote_ip, now)
    {
        return JsonResponse::Reject {
            code: 401,
            text: "Not authorized",
        };
    }

    if command.eq_ignore_ascii_case("disconnect") {
        let ok = state
            .sessions
            .lock()
            .unwrap()
            .remove_authentication(remote_ip);
        if ok {
            info!(client = %remote_ip, "client disconnected");
        }
        return err_reply(if ok { 0 } else { 1 });
    }

    if command.eq_ignore_ascii_case("status") {
        return match parser.get_key_value("type") {
            Some(type_string) => {
                let mut status_type: i32 = type_string.parse().unwrap_or(1);
                if !(1..=3).contains(&status_type) {
                    status_type = 1;
                }
                reply_opt(machine.status_response(status_type as u8))
            }
            // Deprecated request without a type qualifier.
            None => reply_opt(machine.legacy_status_response()),
        };
    }

    if command.eq_ignore_ascii_case("gcode") {
        let command_text = parser.get_key_value("gcode");
        // An empty command just polls the buffer space without using it.
        if let Some(text) = &command_text {
            if !text.is_empty() {
                machine.push_gcode(text);
            }
        }
        return reply(json!({"buff": machine.gcode_buffer_space()}).to_string());
    }

    if command.eq_ignore_ascii_case("upload") {
        return err_reply(if upload_error { 1 } else { 0 });
    }

    if command.eq_ignore_ascii_case("delete") {
        if let Some(name) = parser.get_key_value("name") {
            let ok = files::resolve(&state.config.storage_dir, &name)
                .map(|path| std::fs::remove_file(path).is_ok())
                .unwrap_or(false);
            return err_reply(if ok { 0 } else { 1 });
        }
    }

    if command.eq_ignore_ascii_case("filelist") {
        if let Some(dir) = parser.get_key_value("dir") {
            let first = parser
                .get_key_value("first")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            return reply(files::filelist_json(&state.config.storage_dir, &dir, first));
        }
    }

    if command.eq_ignore_ascii_case("files") {
        let dir = parser
            .get_key_value("dir")
            .map(|d| d.into_owned())
            .unwrap_or_else(|| machine.gcode_dir());
        let first = parser
            .get_key_value("first")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let flag_dirs = parser
            .get_key_value("flagDirs")
            .and_then(|v| v.parse::<u32>().ok())
            == Some(1);
        return reply(files::files_json(
            &state.config.storage_dir,
            &dir,
            first,
            flag_dirs,
        ));
    }

    if command.eq_ignore_ascii_case("move") {
        let old_val = parser.get_key_value("old");
        let new_val = parser.get_key_value("new");
        let mut success = false;
        if let (Some(old_name), Some(new_name)) = (old_val, new_val) {
            let delete_existing = parser
                .get_key_value("deleteexisting")
                .map(|v| v.eq_ignore_ascii_case("yes"))
                .unwrap_or(false);
            if let (Some(from), Some(to)) = (
                files::resolve(&state.config.storage_dir, &old_name),
                files::resolve(&state.config.storage_dir, &new_name),
            ) {
                if to.exists() && !delete_existing {
                    success = false;
                } else {
                    success = std::fs::rename(from, to).is_ok();
                }
            }
        }
        return err_reply(if success { 0 } else { 1 });
    }

    if command.eq_ignore_ascii_case("mkdir") {
        let success = parser
            .get_key_value("dir")
            .and_then(|dir| files::resolve(&state.config.storage_dir, &dir))
            .map(|path| std::fs::create_dir_all(path).is_ok())
            .unwrap_or(false);
        return err_reply(if success { 0 } else { 1 });
    }

    if command.eq_ignore_ascii_case("thumbnail") {
        let name = parser.get_key_value("name");
        let offset = parser.get_key_value("offset").and_then(|v| v.parse().ok());
        if let (Some(name), Some(offset)) = (name, offset) {
            if offset != 0 {
                return reply_opt(machine.thumbnail_response(&name, offset));
            }
        }
        return err_reply(1);
    }

    if command.eq_ignore_ascii_case("fileinfo") {
        // Either a named file or the one being printed.
        let name = parser
            .get_key_value("name")
            .map(|n| n.into_owned())
            .unwrap_or_default();
        return JsonResponse::GetFileInfo { name };
    }

    if command.eq_ignore_ascii_case("model") {
        let key = parser.get_key_value("key").map(|v| v.into_owned());
        let flags = parser.get_key_value("flags").map(|v| v.into_owned());
        return reply_opt(machine.model_response(key.as_deref(), flags.as_deref()));
    }

    if command.eq_ignore_ascii_case("config") {
        return reply_opt(machine.config_response());
    }

    JsonResponse::Reject {
        code: 500,
        text: "Unknown request",
    }
}
