//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agora_shared::constants::{
    CHANNEL_QUEUE_SIZE, DEFAULT_HTTP_PORT, MAX_FRAME_SIZE, PONG_WAIT_SECS, SESSION_QUEUE_SIZE,
    WRITE_WAIT_SECS,
};

use crate::connection::ConnectionLimits;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file. `None` keeps everything in memory.
    /// Env: `DATABASE_PATH` (`:memory:` is the same as unset)
    /// Default: in memory
    pub database_path: Option<PathBuf>,

    /// Time allowed to write one frame.
    /// Env: `WRITE_WAIT_SECS`
    /// Default: 10 s
    pub write_wait: Duration,

    /// Time allowed between pongs before a socket is considered dead.
    /// Pings go out at 9/10 of this period.
    /// Env: `PONG_WAIT_SECS`
    /// Default: 60 s
    pub pong_wait: Duration,

    /// Largest inbound data frame accepted, in bytes.
    /// Env: `MAX_FRAME_SIZE`
    /// Default: 64 KiB
    pub max_frame_size: usize,

    /// Outbound queue capacity of each session. A session whose queue fills
    /// up is evicted from the channel that tried to deliver.
    /// Env: `SESSION_QUEUE_SIZE`
    /// Default: `256`
    pub session_queue_size: usize,

    /// Command queue capacity of each hub channel.
    /// Env: `CHANNEL_QUEUE_SIZE`
    /// Default: `256`
    pub channel_queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            write_wait: Duration::from_secs(WRITE_WAIT_SECS),
            pong_wait: Duration::from_secs(PONG_WAIT_SECS),
            max_frame_size: MAX_FRAME_SIZE,
            session_queue_size: SESSION_QUEUE_SIZE,
            channel_queue_size: CHANNEL_QUEUE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = parse_database_path(&path);
        }

        if let Some(secs) = env_parse::<u64>("WRITE_WAIT_SECS") {
            config.write_wait = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("PONG_WAIT_SECS") {
            config.pong_wait = Duration::from_secs(secs);
        }

        if let Some(size) = env_parse::<usize>("MAX_FRAME_SIZE") {
            config.max_frame_size = size;
        }

        if let Some(size) = env_parse::<usize>("SESSION_QUEUE_SIZE") {
            config.session_queue_size = size;
        }

        if let Some(size) = env_parse::<usize>("CHANNEL_QUEUE_SIZE") {
            config.channel_queue_size = size;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Keep-alive ping interval: 9/10 of the pong wait.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            write_wait: self.write_wait,
            pong_wait: self.pong_wait,
            max_frame_size: self.max_frame_size,
        }
    }
}

fn parse_database_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() || raw == ":memory:" {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

/// Read a positive number from `name`. Zero and unparsable values are
/// rejected with a warning.
fn env_parse<T>(name: &str) -> Option<T>
where
    T: FromStr + PartialEq + Default,
{
    let raw = std::env::var(name).ok()?;
    match parse_positive::<T>(&raw) {
        Some(value) => Some(value),
        None => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn parse_positive<T>(raw: &str) -> Option<T>
where
    T: FromStr + PartialEq + Default,
{
    raw.trim().parse::<T>().ok().filter(|v| *v != T::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.database_path.is_none());
        assert_eq!(config.max_frame_size, 64 * 1024);
    }

    #[test]
    fn test_ping_period_is_nine_tenths_of_pong_wait() {
        let config = ServerConfig::default();
        assert_eq!(config.ping_period(), Duration::from_secs(54));
        assert!(config.ping_period() < config.pong_wait);
    }

    #[test]
    fn test_parse_database_path() {
        assert_eq!(parse_database_path(":memory:"), None);
        assert_eq!(parse_database_path("  "), None);
        assert_eq!(
            parse_database_path("./data/agora.db"),
            Some(PathBuf::from("./data/agora.db"))
        );
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive::<usize>("128"), Some(128));
        assert_eq!(parse_positive::<usize>("0"), None);
        assert_eq!(parse_positive::<u64>("soon"), None);
    }
}
