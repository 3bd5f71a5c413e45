//! Command-line interface for the standalone server.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gantry-web", about = "gantry HTTP front-end against a simulated machine")]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8970")]
    pub bind: SocketAddr,

    /// Directory static files are served from.
    #[arg(long, default_value = "www")]
    pub web_dir: PathBuf,

    /// Root for uploads and file management.
    #[arg(long, default_value = "storage")]
    pub storage_dir: PathBuf,

    /// Connect password; when omitted, clients authenticate
    /// automatically.
    #[arg(long)]
    pub password: Option<String>,

    /// CORS origin to allow on every response.
    #[arg(long)]
    pub cors: Option<String>,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Emit JSON-formatted logs.
    #[arg(long)]
    pub log_json: bool,
}
