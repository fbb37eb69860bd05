//! Milter server configuration

use crate::error::{Error, Result};
use std::env;

/// Default cap on a single wire frame. The length prefix is attacker
/// controlled, so an unbounded value would let one connection grow its
/// buffer without limit.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Default advisory idle timeout in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Configuration for a [`MilterServer`](crate::MilterServer).
#[derive(Debug, Clone)]
pub struct MilterConfig {
    /// Bind address. A string starting with `/` is bound as a Unix
    /// domain socket path; anything else is parsed as `host:port` TCP.
    pub socket: String,
    /// Domains the downstream consumer cares about. Informational
    /// only; this server inspects every transaction regardless.
    pub allowed_domains: Vec<String>,
    /// Advisory idle timeout. Carried in configuration for consumers;
    /// stalled connections are not proactively closed by this server.
    pub idle_timeout_ms: u64,
    /// Maximum accepted frame size. Connections announcing a larger
    /// length prefix are dropped.
    pub max_frame: usize,
}

impl MilterConfig {
    /// Create a configuration for the given bind address with default
    /// limits and no domain list.
    #[must_use]
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            allowed_domains: Vec::new(),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `MILTERD_SOCKET`
    ///
    /// Optional (with defaults):
    /// - `MILTERD_ALLOWED_DOMAINS` (comma-separated, default empty)
    /// - `MILTERD_IDLE_TIMEOUT_MS` (default: `30000`)
    /// - `MILTERD_MAX_FRAME` (default: `1048576`)
    ///
    /// # Errors
    ///
    /// Returns an error if `MILTERD_SOCKET` is unset or a numeric
    /// variable does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            socket: env::var("MILTERD_SOCKET")
                .map_err(|_| Error::Config("MILTERD_SOCKET not set".into()))?,
            allowed_domains: env::var("MILTERD_ALLOWED_DOMAINS")
                .map(|raw| parse_domains(&raw))
                .unwrap_or_default(),
            idle_timeout_ms: env::var("MILTERD_IDLE_TIMEOUT_MS")
                .unwrap_or_else(|_| DEFAULT_IDLE_TIMEOUT_MS.to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MILTERD_IDLE_TIMEOUT_MS: {e}")))?,
            max_frame: env::var("MILTERD_MAX_FRAME")
                .unwrap_or_else(|_| DEFAULT_MAX_FRAME.to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MILTERD_MAX_FRAME: {e}")))?,
        })
    }
}

fn parse_domains(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|domain| !domain.is_empty())
        .map(ToString::to_string)
        .collect()
}
