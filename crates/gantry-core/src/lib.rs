//! gantry-core: Shared library for the gantry protocol cores.
//!
//! This crate provides:
//! - SBC link wire format, packet reader/writer, and the SPI bus seam
//! - HTTP request parser and session table
//! - Output buffer pool and the shared G-code reply stack
//! - The machine backend seam consumed by the HTTP front-end
//! - Error types and logging setup

pub mod buffer;
pub mod constants;
pub mod error;
pub mod http;
pub mod logging;
pub mod machine;
pub mod sbc;

pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
