//! Relay configuration loaded from environment variables.
//!
//! Every setting has a default so the relay starts with zero configuration
//! for local development.  All on-disk state lives under one data directory.

use std::net::SocketAddr;
use std::path::PathBuf;

use palaver_shared::constants;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address the WebSocket/HTTP server listens on.
    /// Env: `BIND_ADDR`
    /// Default: `0.0.0.0:8080`
    pub bind_addr: SocketAddr,

    /// Root of all durable state (database, segments, archives, event log,
    /// presence snapshot).
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Seconds an unauthenticated connection may stay open.
    /// Env: `AUTH_GRACE_SECS`
    pub auth_grace_secs: u64,

    /// Seconds after creation during which a message may be recalled.
    /// Env: `RECALL_WINDOW_SECS`
    pub recall_window_secs: i64,

    /// Milliseconds between event-log tail polls.
    /// Env: `TAIL_INTERVAL_MS`
    pub tail_interval_ms: u64,

    /// Seconds between presence broadcasts and snapshot writes.
    /// Env: `PRESENCE_INTERVAL_SECS`
    pub presence_interval_secs: u64,

    /// Bytes after which the active message segment rolls over.
    /// Env: `SEGMENT_MAX_BYTES`
    pub segment_max_bytes: u64,

    /// Days a closed segment stays uncompressed before archival.
    /// Env: `SEGMENT_RETENTION_DAYS`
    pub segment_retention_days: i64,

    /// Days an archive artifact is kept before deletion.
    /// Env: `ARCHIVE_RETENTION_DAYS`
    pub archive_retention_days: i64,

    /// Seconds between compaction runs.
    /// Env: `COMPACT_INTERVAL_SECS`
    pub compact_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8080).into(),
            data_dir: PathBuf::from("./data"),
            auth_grace_secs: constants::AUTH_GRACE_SECS,
            recall_window_secs: constants::RECALL_WINDOW_SECS,
            tail_interval_ms: constants::TAIL_INTERVAL_MS,
            presence_interval_secs: constants::PRESENCE_INTERVAL_SECS,
            segment_max_bytes: constants::SEGMENT_MAX_BYTES,
            segment_retention_days: constants::SEGMENT_RETENTION_DAYS,
            archive_retention_days: constants::ARCHIVE_RETENTION_DAYS,
            compact_interval_secs: constants::COMPACT_INTERVAL_SECS,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults on missing or unparsable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.bind_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "invalid BIND_ADDR, using default"),
            }
        }

        if let Ok(dir) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        read_env("AUTH_GRACE_SECS", &mut config.auth_grace_secs);
        read_env("RECALL_WINDOW_SECS", &mut config.recall_window_secs);
        read_env("TAIL_INTERVAL_MS", &mut config.tail_interval_ms);
        read_env("PRESENCE_INTERVAL_SECS", &mut config.presence_interval_secs);
        read_env("SEGMENT_MAX_BYTES", &mut config.segment_max_bytes);
        read_env("SEGMENT_RETENTION_DAYS", &mut config.segment_retention_days);
        read_env("ARCHIVE_RETENTION_DAYS", &mut config.archive_retention_days);
        read_env("COMPACT_INTERVAL_SECS", &mut config.compact_interval_secs);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("palaver.db")
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.data_dir.join("segments")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join("runtime").join("events.ndjson")
    }

    pub fn presence_path(&self) -> PathBuf {
        self.data_dir.join("runtime").join("online.json")
    }
}

fn read_env<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(var = name, value = %raw, "unparsable value, using default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.auth_grace_secs, 30);
        assert_eq!(config.recall_window_secs, 120);
        assert_eq!(config.tail_interval_ms, 1_000);
    }

    #[test]
    fn paths_live_under_the_data_dir() {
        let config = RelayConfig {
            data_dir: PathBuf::from("/var/lib/palaver"),
            ..RelayConfig::default()
        };
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/palaver/palaver.db"));
        assert_eq!(
            config.event_log_path(),
            PathBuf::from("/var/lib/palaver/runtime/events.ndjson")
        );
        assert_eq!(
            config.presence_path(),
            PathBuf::from("/var/lib/palaver/runtime/online.json")
        );
    }
}
