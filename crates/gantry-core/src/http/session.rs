//! Per-IP HTTP session table.
//!
//! Clients authenticate once per IP address; each request from a known
//! IP refreshes its session. Sessions are dropped after
//! `HTTP_SESSION_TIMEOUT` of silence, except while a POST upload is in
//! flight on them.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::constants::MAX_HTTP_SESSIONS;

/// One authenticated client.
#[derive(Debug, Clone, Copy)]
pub struct HttpSession {
    pub ip: IpAddr,
    pub last_query_time: Instant,
    pub is_post_uploading: bool,
    pub post_port: u16,
}

/// Linear session table, bounded by [`MAX_HTTP_SESSIONS`].
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Vec<HttpSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: Vec::with_capacity(MAX_HTTP_SESSIONS),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Authenticate `ip`, appending a session if there is a free slot.
    /// Returns false when the table is full.
    pub fn authenticate(&mut self, ip: IpAddr, now: Instant) -> bool {
        if self.check_authenticated(ip, now) {
            return true;
        }
        if self.sessions.len() < MAX_HTTP_SESSIONS {
            self.sessions.push(HttpSession {
                ip,
                last_query_time: now,
                is_post_uploading: false,
                post_port: 0,
            });
            return true;
        }
        false
    }

    /// Whether `ip` has a session; refreshes its idle timer if so.
    pub fn check_authenticated(&mut self, ip: IpAddr, now: Instant) -> bool {
        for session in &mut self.sessions {
            if session.ip == ip {
                session.last_query_time = now;
                return true;
            }
        }
        false
    }

    /// Remove the session for `ip`. Refuses while it has an upload in
    /// flight.
    pub fn remove_authentication(&mut self, ip: IpAddr) -> bool {
        for i in (0..self.sessions.len()).rev() {
            if self.sessions[i].ip == ip {
                if self.sessions[i].is_post_uploading {
                    return false;
                }
                self.sessions.remove(i);
                return true;
            }
        }
        false
    }

    /// Mark the session for `ip` as running a POST upload from
    /// `post_port`.
    pub fn start_upload(&mut self, ip: IpAddr, post_port: u16) {
        for session in &mut self.sessions {
            if session.ip == ip {
                session.post_port = post_port;
                session.is_post_uploading = true;
                break;
            }
        }
    }

    /// Clear the upload flag for `ip` and refresh its timer.
    pub fn finish_upload(&mut self, ip: IpAddr, now: Instant) {
        for session in &mut self.sessions {
            if session.ip == ip && session.is_post_uploading {
                session.is_post_uploading = false;
                session.last_query_time = now;
                break;
            }
        }
    }

    /// Drop sessions idle longer than `timeout`. Returns how many were
    /// removed.
    pub fn check_sessions(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|s| now.duration_since(s.last_query_time) <= timeout);
        before - self.sessions.len()
    }
}
