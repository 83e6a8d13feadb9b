use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Transport-level parameters for every channel the driver opens.
///
/// One profile covers probes, pings and regular operation channels; the
/// discovery race supplies its own overall deadline on top of these.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// TCP/HTTP2 connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Per-RPC completion timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// TCP keepalive in seconds
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_in_secs: u64,

    /// HTTP2 keepalive ping interval in seconds
    #[serde(default = "default_h2_keepalive_interval")]
    pub http2_keep_alive_interval_in_secs: u64,

    /// HTTP2 keepalive ping timeout in seconds
    #[serde(default = "default_h2_keepalive_timeout")]
    pub http2_keep_alive_timeout_in_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            tcp_keepalive_in_secs: default_tcp_keepalive(),
            http2_keep_alive_interval_in_secs: default_h2_keepalive_interval(),
            http2_keep_alive_timeout_in_secs: default_h2_keepalive_timeout(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(
                ConfigError::Message("connection connect timeout must be > 0".into()).into(),
            );
        }

        if self.request_timeout_in_ms != 0 && self.request_timeout_in_ms <= self.connect_timeout_in_ms {
            return Err(ConfigError::Message(format!(
                "request timeout {}ms must exceed connect timeout {}ms",
                self.request_timeout_in_ms, self.connect_timeout_in_ms
            ))
            .into());
        }

        if self.http2_keep_alive_timeout_in_secs >= self.http2_keep_alive_interval_in_secs {
            return Err(ConfigError::Message(format!(
                "HTTP2 keepalive timeout {}s must be < interval {}s",
                self.http2_keep_alive_timeout_in_secs, self.http2_keep_alive_interval_in_secs
            ))
            .into());
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }
}

fn default_connect_timeout() -> u64 {
    1_000
}
fn default_request_timeout() -> u64 {
    3_000
}
fn default_tcp_keepalive() -> u64 {
    300
}
fn default_h2_keepalive_interval() -> u64 {
    60
}
fn default_h2_keepalive_timeout() -> u64 {
    20
}
