//! Per-connection HTTP responder.
//!
//! One responder owns one socket and advances the request through
//! read → parse → dispatch → reply. Reads are chunked but fed to the
//! parser byte by byte; a stalled read drops the connection after
//! `HTTP_RECEIVE_TIMEOUT`. Rejections answer with a small HTML error
//! page and close.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use chrono::NaiveDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use gantry_core::Result;
use gantry_core::buffer::OutputChain;
use gantry_core::constants::{
    HTTP_RECEIVE_TIMEOUT, MAX_FILEINFO_GET_TIME, SERVICE_UNAVAILABLE_RESPONSE,
};
use gantry_core::http::{ParseEvent, RejectReason, RequestParser};
use gantry_core::machine::FileInfoResponse;

use crate::api::{self, JsonResponse};
use crate::files::{self, WebFile};
use crate::state::WebState;
use crate::upload::Upload;

/// Prefix of API targets.
const KO_START: &str = "rr_";

const NO_CACHE_HEADERS: &str = "Cache-Control: no-cache, no-store, must-revalidate\r\n\
     Pragma: no-cache\r\n\
     Expires: 0\r\n";

const ERROR_PAGE_PART1: &str = "<html>\n\
     <head>\n\
     </head>\n\
     <body>\n\
     <p style=\"font-size: 16pt; text-align: center; margin-top:50px\">\
     Your printer rejected the HTTP request: ";

const ERROR_PAGE_PART2: &str = "</p>\n</body>\n</html>\n";

/// Interval between file-info scanner polls.
const FILE_INFO_TICK: Duration = Duration::from_millis(20);

/// Result of reading one request.
enum ReadOutcome {
    Complete,
    Rejected(RejectReason),
    ConnectionLost,
}

/// The API command in `target`, if it is one: the part after `rr_`,
/// which may follow a single leading `/`.
fn api_command(target: &str) -> Option<&str> {
    if let Some(command) = target.strip_prefix(KO_START) {
        return Some(command);
    }
    target
        .strip_prefix('/')
        .and_then(|rest| rest.strip_prefix(KO_START))
}

/// Responder bound to one live socket.
pub struct HttpResponder<S> {
    stream: S,
    remote_ip: IpAddr,
    remote_port: u16,
    state: Arc<WebState>,
    /// Sticky error flag of this connection's last upload; reported by
    /// rr_upload.
    upload_error: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> HttpResponder<S> {
    pub fn new(stream: S, remote_ip: IpAddr, remote_port: u16, state: Arc<WebState>) -> Self {
        Self {
            stream,
            remote_ip,
            remote_port,
            state,
            upload_error: false,
        }
    }

    /// Serve requests until the connection closes.
    pub async fn run(mut self) -> Result<()> {
        let mut inbox = BytesMut::with_capacity(1024);
        loop {
            let mut parser = RequestParser::new();
            match self.read_request(&mut parser, &mut inbox).await {
                ReadOutcome::ConnectionLost => return Ok(()),
                ReadOutcome::Rejected(reason) => {
                    self.reject(reason.as_str(), 500).await?;
                    return Ok(());
                }
                ReadOutcome::Complete => {
                    let keep_open = self.process_request(&parser, &mut inbox).await?;
                    if !keep_open {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn read_request(
        &mut self,
        parser: &mut RequestParser,
        inbox: &mut BytesMut,
    ) -> ReadOutcome {
        loop {
            while !inbox.is_empty() {
                let b = inbox[0];
                inbox.advance(1);
                match parser.feed(b) {
                    ParseEvent::NeedMore => {}
                    ParseEvent::Complete => return ReadOutcome::Complete,
                    ParseEvent::Rejected(reason) => return ReadOutcome::Rejected(reason),
                }
            }

            let mut chunk = [0u8; 512];
            match timeout(HTTP_RECEIVE_TIMEOUT, self.stream.read(&mut chunk)).await {
                Err(_) => {
                    debug!(client = %self.remote_ip, "receive timeout");
                    return ReadOutcome::ConnectionLost;
                }
                Ok(Err(_)) | Ok(Ok(0)) => return ReadOutcome::ConnectionLost,
                Ok(Ok(n)) => inbox.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Dispatch a parsed request. Returns whether the connection stays
    /// open for another one.
    async fn process_request(
        &mut self,
        parser: &RequestParser,
        inbox: &mut BytesMut,
    ) -> Result<bool> {
        if parser.num_command_words() < 2 {
            self.reject("too few command words", 500).await?;
            return Ok(false);
        }
        let method = parser.command_word(0).unwrap().into_owned();
        let target = parser.command_word(1).unwrap().into_owned();
        debug!(client = %self.remote_ip, %method, %target, "request");

        if method.eq_ignore_ascii_case("GET") {
            if let Some(command) = api_command(&target) {
                let command = command.to_string();
                return self.send_json_response(&command, parser).await;
            }
            self.send_file(&target, true).await?;
            return Ok(false);
        }

        if method.eq_ignore_ascii_case("OPTIONS") {
            self.send_options_response().await?;
            return Ok(false);
        }

        let authenticated = self
            .state
            .sessions
            .lock()
            .unwrap()
            .check_authenticated(self.remote_ip, Instant::now());
        if authenticated && method.eq_ignore_ascii_case("POST") {
            let is_upload_request = api_command(&target)
                .map(|c| c.eq_ignore_ascii_case("upload"))
                .unwrap_or(false);
            if is_upload_request && parser.get_key_value("name").is_some() {
                self.do_upload(parser, inbox).await?;
                return Ok(false);
            }
            self.reject("only rr_upload is supported for POST requests", 500)
                .await?;
            return Ok(false);
        }

        self.reject("Unknown message type or not authenticated", 500)
            .await?;
        Ok(false)
    }

    // =========================================================================
    // JSON API
    // =========================================================================

    async fn send_json_response(&mut self, command: &str, parser: &RequestParser) -> Result<bool> {
        let now = Instant::now();

        // Authorize automatically when no password is set, for clients
        // that skip rr_connect.
        {
            let mut sessions = self.state.sessions.lock().unwrap();
            if !sessions.check_authenticated(self.remote_ip, now)
                && self.state.machine.no_password_set()
            {
                let _ = sessions.authenticate(self.remote_ip, now);
            }
        }
        let authenticated = self
            .state
            .sessions
            .lock()
            .unwrap()
            .check_authenticated(self.remote_ip, now);

        // text/plain responses are handled here, before the JSON path.
        if authenticated {
            if command.eq_ignore_ascii_case("reply") {
                self.send_gcode_reply().await?;
                return Ok(false);
            }
            if command.eq_ignore_ascii_case("download") {
                if let Some(name) = parser.get_key_value("name").map(|n| n.into_owned()) {
                    self.send_file(&name, false).await?;
                    return Ok(false);
                }
            }
        }

        match api::get_json_response(command, parser, &self.state, self.remote_ip, self.upload_error)
        {
            JsonResponse::Reject { code, text } => {
                self.reject(text, code).await?;
                Ok(false)
            }
            JsonResponse::GetFileInfo { name } => {
                self.send_file_info(&name).await?;
                Ok(false)
            }
            JsonResponse::Reply { body: None, .. } => {
                self.report_buffer_exhaustion().await?;
                Ok(false)
            }
            JsonResponse::Reply {
                body: Some(body),
                keep_allowed,
            } => {
                let keep_open = keep_allowed && self.client_wants_keep_alive(parser);
                let sent = self.send_json_body(&body, keep_open).await?;
                Ok(keep_open && sent)
            }
        }
    }

    /// Compose and send a JSON reply. Returns false when the buffer pool
    /// forced the short 503 instead.
    async fn send_json_body(&mut self, body: &str, keep_open: bool) -> Result<bool> {
        let Some(mut chain) = OutputChain::allocate(&self.state.pool) else {
            self.report_buffer_exhaustion().await?;
            return Ok(false);
        };
        chain.push_str("HTTP/1.1 200 OK\r\n");
        chain.push_str(NO_CACHE_HEADERS);
        chain.push_str("Content-Type: application/json\r\n");
        chain.push_str(&format!("Content-Length: {}\r\n", body.len()));
        chain.push_str(&self.cors_header());
        chain.push_str(&format!(
            "Connection: {}\r\n\r\n",
            if keep_open { "keep-alive" } else { "close" }
        ));
        chain.push_str(body);

        if chain.had_overflow() {
            self.report_buffer_exhaustion().await?;
            return Ok(false);
        }
        self.stream.write_all(&chain.concat()).await?;
        self.stream.flush().await?;
        Ok(true)
    }

    /// Drain the shared G-code reply stack to this client as plain text.
    async fn send_gcode_reply(&mut self) -> Result<()> {
        let text = {
            let num_sessions = self.state.sessions.lock().unwrap().len();
            self.state.reply.lock().unwrap().take_for_send(num_sessions)
        };

        let Some(mut chain) = OutputChain::allocate(&self.state.pool) else {
            return self.report_buffer_exhaustion().await;
        };
        chain.push_str("HTTP/1.1 200 OK\r\n");
        chain.push_str(NO_CACHE_HEADERS);
        chain.push_str("Content-Type: text/plain\r\n");
        chain.push_str(&format!("Content-Length: {}\r\n", text.len()));
        chain.push_str(&self.cors_header());
        chain.push_str("Connection: close\r\n\r\n");

        if chain.had_overflow() {
            return self.report_buffer_exhaustion().await;
        }
        self.stream.write_all(&chain.concat()).await?;
        self.stream.write_all(&text).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Poll the file-info scanner until it finishes or the per-request
    /// deadline passes.
    async fn send_file_info(&mut self, name: &str) -> Result<()> {
        let started = Instant::now();
        let json = loop {
            let quit_early = started.elapsed() >= MAX_FILEINFO_GET_TIME;
            match self.state.machine.file_info(name, quit_early) {
                FileInfoResponse::Done(json) => break json,
                FileInfoResponse::NotFinished => {
                    if started.elapsed() >= MAX_FILEINFO_GET_TIME * 2 {
                        // The scanner would not wrap up; give up on it.
                        break "{\"err\":1}".to_string();
                    }
                    tokio::time::sleep(FILE_INFO_TICK).await;
                }
            }
        };

        let Some(mut chain) = OutputChain::allocate(&self.state.pool) else {
            return self.report_buffer_exhaustion().await;
        };
        chain.push_str("HTTP/1.1 200 OK\r\n");
        chain.push_str(NO_CACHE_HEADERS);
        chain.push_str("Content-Type: application/json\r\n");
        chain.push_str(&format!("Content-Length: {}\r\n", json.len()));
        chain.push_str(&self.cors_header());
        chain.push_str("Connection: close\r\n\r\n");
        chain.push_str(&json);

        if chain.had_overflow() {
            return self.report_buffer_exhaustion().await;
        }
        self.stream.write_all(&chain.concat()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    // =========================================================================
    // Static files
    // =========================================================================

    async fn send_file(&mut self, name: &str, is_web_file: bool) -> Result<()> {
        if is_web_file {
            match files::open_web_file(&self.state.config.web_dir, name).await {
                Some(web_file) => self.stream_file(web_file, true).await,
                None => {
                    self.reject(
                        "page not found<br>Check that the web directory has the correct files",
                        404,
                    )
                    .await
                }
            }
        } else {
            let opened = match files::resolve(&self.state.config.storage_dir, name) {
                Some(path) => tokio::fs::File::open(path).await.ok(),
                None => None,
            };
            let opened = match opened {
                Some(file) => match file.metadata().await {
                    Ok(meta) if meta.is_file() => Some((file, meta.len())),
                    _ => None,
                },
                None => None,
            };
            match opened {
                Some((file, length)) => {
                    self.stream_file(
                        WebFile {
                            file,
                            length,
                            gzipped: false,
                            name: name.to_string(),
                        },
                        false,
                    )
                    .await
                }
                None => self.reject("file not found", 404).await,
            }
        }
    }

    async fn stream_file(&mut self, web_file: WebFile, is_web_file: bool) -> Result<()> {
        let Some(mut chain) = OutputChain::allocate(&self.state.pool) else {
            return self.report_buffer_exhaustion().await;
        };
        chain.push_str("HTTP/1.1 200 OK\r\n");
        if !is_web_file {
            // Files fetched through rr_download must not be cached.
            chain.push_str(NO_CACHE_HEADERS);
            chain.push_str(&self.cors_header());
        }
        chain.push_str(&format!(
            "Content-Type: {}\r\n",
            files::content_type(&web_file.name)
        ));
        if web_file.gzipped {
            chain.push_str("Content-Encoding: gzip\r\n");
        }
        chain.push_str(&format!("Content-Length: {}\r\n", web_file.length));
        chain.push_str("Connection: close\r\n\r\n");

        if chain.had_overflow() {
            return self.report_buffer_exhaustion().await;
        }
        self.stream.write_all(&chain.concat()).await?;

        let mut file = web_file.file;
        tokio::io::copy(&mut file, &mut self.stream).await?;
        self.stream.flush().await?;
        Ok(())
    }

    // =========================================================================
    // OPTIONS / rejects / 503
    // =========================================================================

    async fn send_options_response(&mut self) -> Result<()> {
        let Some(mut chain) = OutputChain::allocate(&self.state.pool) else {
            return self.report_buffer_exhaustion().await;
        };
        chain.push_str("HTTP/1.1 204 No Content\r\n");
        chain.push_str("Allow: OPTIONS, GET, POST\r\n");
        chain.push_str(NO_CACHE_HEADERS);
        chain.push_str("Content-Length: 0\r\n");
        if self.state.config.cors_site.is_some() {
            chain.push_str("Access-Control-Allow-Headers: Content-Type\r\n");
            chain.push_str(&self.cors_header());
        }
        chain.push_str("\r\n");

        if chain.had_overflow() {
            return self.report_buffer_exhaustion().await;
        }
        self.stream.write_all(&chain.concat()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send the fixed-format HTML error page and leave the connection
    /// closing.
    async fn reject(&mut self, response: &str, code: u16) -> Result<()> {
        debug!(client = %self.remote_ip, code, response, "rejecting request");

        let Some(mut chain) = OutputChain::allocate(&self.state.pool) else {
            // No buffers to reply with; just close.
            return Ok(());
        };
        chain.push_str(&format!("HTTP/1.1 {code} {response}\r\nConnection: close\r\n"));
        chain.push_str(&self.cors_header());
        chain.push_str("\r\n");
        chain.push_str(ERROR_PAGE_PART1);
        chain.push_str(response);
        chain.push_str(ERROR_PAGE_PART2);

        if chain.had_overflow() {
            return self.report_buffer_exhaustion().await;
        }
        self.stream.write_all(&chain.concat()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn report_buffer_exhaustion(&mut self) -> Result<()> {
        warn!(client = %self.remote_ip, "out of output buffers");
        self.stream
            .write_all(SERVICE_UNAVAILABLE_RESPONSE.as_bytes())
            .await?;
        self.stream.flush().await?;
        Ok(())
    }

    // =========================================================================
    // Upload
    // =========================================================================

    async fn do_upload(&mut self, parser: &RequestParser, inbox: &mut BytesMut) -> Result<()> {
        let filename = parser
            .get_key_value("name")
            .expect("checked by caller")
            .into_owned();

        // The declared body size is mandatory.
        let Some(expected_length) = parser
            .header_value("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
        else {
            return self.reject("invalid POST upload request", 500).await;
        };

        let expected_crc = parser
            .get_key_value("crc32")
            .and_then(|v| u32::from_str_radix(&v, 16).ok());
        let last_modified = parser
            .get_key_value("time")
            .and_then(|v| NaiveDateTime::parse_from_str(&v, "%Y-%m-%dT%H:%M:%S").ok());

        let Some(path) = files::resolve(&self.state.config.storage_dir, &filename) else {
            return self.reject("could not create file", 500).await;
        };
        let upload = match Upload::start(path, expected_length, expected_crc, last_modified).await {
            Ok(upload) => upload,
            Err(_) => return self.reject("could not create file", 500).await,
        };

        debug!(client = %self.remote_ip, %filename, expected_length, "uploading");
        self.state
            .sessions
            .lock()
            .unwrap()
            .start_upload(self.remote_ip, self.remote_port);

        self.run_upload(upload, inbox).await
    }

    async fn run_upload(&mut self, mut upload: Upload, inbox: &mut BytesMut) -> Result<()> {
        let session_timeout = self.state.config.session_timeout;

        while !upload.is_complete() {
            if inbox.is_empty() {
                let mut chunk = [0u8; 2048];
                match timeout(session_timeout, self.stream.read(&mut chunk)).await {
                    Err(_) | Ok(Err(_)) | Ok(Ok(0)) => {
                        // Stuck or dropped; make sure the upload is
                        // cancelled and the file removed.
                        upload.cancel().await;
                        self.finish_upload_session();
                        return Ok(());
                    }
                    Ok(Ok(n)) => inbox.extend_from_slice(&chunk[..n]),
                }
            }

            let chunk = inbox.split();
            if upload.write(&chunk).await.is_err() {
                warn!(client = %self.remote_ip, "could not write upload data");
                self.upload_error = true;
                upload.cancel().await;
                self.finish_upload_session();
                return self.send_upload_reply().await;
            }

            // Uploads can take a while; keep the session alive.
            self.state
                .sessions
                .lock()
                .unwrap()
                .check_authenticated(self.remote_ip, Instant::now());
        }

        let ok = upload.finish().await;
        self.upload_error = !ok;
        self.finish_upload_session();
        self.send_upload_reply().await
    }

    fn finish_upload_session(&self) {
        self.state
            .sessions
            .lock()
            .unwrap()
            .finish_upload(self.remote_ip, Instant::now());
    }

    async fn send_upload_reply(&mut self) -> Result<()> {
        let body = format!("{{\"err\":{}}}", if self.upload_error { 1 } else { 0 });
        self.send_json_body(&body, false).await?;
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn cors_header(&self) -> String {
        match &self.state.config.cors_site {
            Some(site) => format!("Access-Control-Allow-Origin: {site}\r\n"),
            None => String::new(),
        }
    }

    fn client_wants_keep_alive(&self, parser: &RequestParser) -> bool {
        parser
            .header_value("Connection")
            .map(|v| v.eq_ignore_ascii_case("keep-alive"))
            .unwrap_or(false)
    }
}
