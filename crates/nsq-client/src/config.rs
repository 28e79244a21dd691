// Client-side defaults, overridable from the environment.
use serde::Serialize;
use std::time::Duration;

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_READ_WRITE_TIMEOUT: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_READ_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Hard safety cap for any single inbound frame.
///
/// `read_frame` allocates a buffer sized by the advertised frame length;
/// without a cap a buggy or malicious peer can advertise an enormous length
/// and trigger OOM. Override with `NSQ_MAX_FRAME_BYTES`.
pub(crate) const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Parameters for the IDENTIFY handshake, JSON-encoded on the wire.
///
/// Absent fields are omitted so the broker keeps its own defaults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentifyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Milliseconds between broker heartbeats; keep below `read_wait_timeout`
    /// so idle subscription reads see a heartbeat before timing out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<i64>,
}

/// Connection-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub read_write_timeout: Duration,
    pub read_wait_timeout: Duration,
    /// Sent on subscribe-side connections when present, right after MAGIC.
    pub identify: Option<IdentifyConfig>,
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_write_timeout: DEFAULT_READ_WRITE_TIMEOUT,
            read_wait_timeout: DEFAULT_READ_WAIT_TIMEOUT,
            identify: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_u64_env("NSQ_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(value);
        }
        if let Some(value) = read_u64_env("NSQ_READ_WRITE_TIMEOUT_SECS") {
            config.read_write_timeout = Duration::from_secs(value);
        }
        if let Some(value) = read_u64_env("NSQ_READ_WAIT_TIMEOUT_SECS") {
            config.read_wait_timeout = Duration::from_secs(value);
        }
        if let Some(value) = read_usize_env("NSQ_MAX_FRAME_BYTES") {
            config.max_frame_bytes = value;
        }
        config
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_expectations() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.read_write_timeout, Duration::from_secs(3));
        assert_eq!(config.read_wait_timeout, Duration::from_secs(15));
        assert!(config.identify.is_none());
        assert!(config.max_frame_bytes > 0);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("NSQ_CONNECT_TIMEOUT_SECS", "7");
        std::env::set_var("NSQ_MAX_FRAME_BYTES", "1024");
        let config = ClientConfig::from_env();
        assert_eq!(config.connect_timeout, Duration::from_secs(7));
        assert_eq!(config.max_frame_bytes, 1024);
        std::env::remove_var("NSQ_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("NSQ_MAX_FRAME_BYTES");
    }
}
