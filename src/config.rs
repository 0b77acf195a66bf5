//! Command-line configuration of the `docroot-web` binary
//!
//! Every option can also come from the environment:
//!
//! ```bash
//! docroot-web --port 8080 --dir /srv/www --workers 16
//! DOCROOT_WEB_PORT=8080 DOCROOT_WEB_DIR=/srv/www docroot-web
//! ```

use crate::limits::{ReqLimits, ServerLimits};
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

/// Options of the file server.
#[derive(Debug, Clone, Parser)]
#[command(name = "docroot-web")]
#[command(about = "Concurrent HTTP/1.1 server for one directory tree")]
#[command(version)]
pub struct Config {
    /// Port to listen on, on every interface
    #[arg(short, long, default_value = "8080", env = "DOCROOT_WEB_PORT",
          value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Document root served and modified by the server
    #[arg(short, long, default_value = ".", env = "DOCROOT_WEB_DIR")]
    pub dir: PathBuf,

    /// Number of worker threads
    #[arg(short, long, default_value = "8", env = "DOCROOT_WEB_WORKERS")]
    pub workers: usize,

    /// Accepted connections waiting for a worker before accept blocks
    #[arg(long, default_value = "1024", env = "DOCROOT_WEB_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Also accept HTTP/1.0 requests
    #[arg(long, env = "DOCROOT_WEB_ALLOW_HTTP10")]
    pub allow_http10: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "DOCROOT_WEB_LOG")]
    pub log_level: Level,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be >= 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue capacity must be >= 1".to_string());
        }

        Ok(())
    }

    pub fn server_limits(&self) -> ServerLimits {
        ServerLimits {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            ..ServerLimits::default()
        }
    }

    pub fn request_limits(&self) -> ReqLimits {
        ReqLimits {
            allow_http10: self.allow_http10,
            ..ReqLimits::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            dir: PathBuf::from("."),
            workers: 8,
            queue_capacity: 1024,
            allow_http10: false,
            log_level: Level::INFO,
        }
    }
}
