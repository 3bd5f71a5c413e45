//! gantry-web: the embedded HTTP/1.1 front-end.
//!
//! One responder owns one connection and advances it through
//! parse → dispatch → reply. The JSON API lives under `/rr_*`, uploads
//! under `POST /rr_upload`, and everything else is served from the web
//! directory with gzip negotiation. Shared state (sessions, the G-code
//! reply stack, the output buffer pool) lives in [`state::WebState`].

pub mod api;
pub mod files;
pub mod listener;
pub mod responder;
pub mod state;
pub mod upload;

pub use listener::WebServer;
pub use responder::HttpResponder;
pub use state::{WebConfig, WebState};
