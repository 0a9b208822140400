//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;
use std::path::PathBuf;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_PORT: u16 = 8766;
pub const TEMP_PREFIX: &str = ".landrop.";
pub const TEMP_SUFFIX: &str = ".part";
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;
pub const DEFAULT_UPLOAD_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_NAME_LOCK_WAIT_SECS: u64 = 30;
pub const DEFAULT_TEMP_TTL_SECS: u64 = 24 * 60 * 60;
pub const TEMP_SWEEP_INTERVAL_SECS: u64 = 900;
pub const MAX_NAME_PROBES: u32 = 10_000;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "landrop", version = VERSION_INFO, about = "LanDrop server")]
pub struct Args {
    #[arg(
        short = 'r',
        long,
        env = "LANDROP_ROOT",
        help = "Directory files are served from and saved to (defaults to the platform Downloads folder)"
    )]
    pub root: Option<PathBuf>,
    #[arg(
        short = 'b',
        long,
        env = "LANDROP_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "LANDROP_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(long, env = "LANDROP_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "LANDROP_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload total size per request in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "LANDROP_UPLOAD_IDLE_TIMEOUT_SECS",
        default_value_t = DEFAULT_UPLOAD_IDLE_TIMEOUT_SECS,
        help = "Abort an upload stalled for this many seconds"
    )]
    pub upload_idle_timeout_secs: u64,
    #[arg(
        long,
        env = "LANDROP_TEMP_TTL_SECS",
        default_value_t = DEFAULT_TEMP_TTL_SECS,
        help = "Age after which leftover upload temp files are removed (0 to disable)"
    )]
    pub temp_ttl_secs: u64,
}

impl Args {
    /// Resolves the root directory, falling back to the platform
    /// Downloads folder when none was given.
    pub fn resolve_root(&self) -> Option<PathBuf> {
        self.root.clone().or_else(dirs::download_dir)
    }
}
