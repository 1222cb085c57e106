//! Decoder configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Top-level configuration for a decoder process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Control-plane HTTP API
    #[serde(default)]
    pub api: ApiConfig,

    /// Data-plane UDP listener
    #[serde(default)]
    pub data: DataConfig,

    /// Control dispatch to the agent
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// How long the supervisor waits for units to stop after cancellation
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            data: DataConfig::default(),
            dispatch: DispatchConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl DecoderConfig {
    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = api;
        self
    }

    pub fn with_data(mut self, data: DataConfig) -> Self {
        self.data = data;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_secs = timeout.as_secs();
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Control-plane API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_host")]
    pub host: IpAddr,

    /// HTTP port (default: 20789)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    20789
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_api_port(),
        }
    }
}

impl ApiConfig {
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Data-plane listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_bind_host")]
    pub host: IpAddr,

    /// UDP port (default: 20788)
    #[serde(default = "default_data_port")]
    pub port: u16,

    /// Receive buffer size in bytes; longer datagrams are truncated by the OS
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Read deadline that keeps the receive loop interruptible (default: 1000)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_data_port() -> u16 {
    20788
}

fn default_buffer_size() -> usize {
    65535
}

fn default_read_timeout_ms() -> u64 {
    1000
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_data_port(),
            buffer_size: default_buffer_size(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl DataConfig {
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Control dispatch configuration
///
/// Dispatch is off unless `enabled` is set; `POST /control` is only routed
/// when it is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Agent host (default: 127.0.0.1)
    #[serde(default = "default_dispatch_host")]
    pub host: String,

    /// Agent TCP port (default: 20787)
    #[serde(default = "default_dispatch_port")]
    pub port: u16,

    /// TCP keep-alive idle time in seconds; `None` leaves keep-alive off
    #[serde(default)]
    pub keep_alive_secs: Option<u64>,
}

fn default_dispatch_host() -> String {
    "127.0.0.1".to_string()
}

fn default_dispatch_port() -> u16 {
    20787
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_dispatch_host(),
            port: default_dispatch_port(),
            keep_alive_secs: None,
        }
    }
}

impl DispatchConfig {
    /// Enabled dispatch to `host:port`
    pub fn enabled(host: impl Into<String>, port: u16) -> Self {
        Self {
            enabled: true,
            host: host.into(),
            port,
            keep_alive_secs: None,
        }
    }

    pub fn with_keep_alive(mut self, idle: Duration) -> Self {
        self.keep_alive_secs = Some(idle.as_secs());
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::default();
        assert_eq!(config.api.port, 20789);
        assert_eq!(config.data.port, 20788);
        assert_eq!(config.data.buffer_size, 65535);
        assert_eq!(config.data.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.dispatch.port, 20787);
        assert!(!config.dispatch.enabled);
        assert!(config.dispatch.keep_alive().is_none());
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
api:
  port: 9000
dispatch:
  enabled: true
  keep_alive_secs: 30
"#;
        let config: DecoderConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.data.port, 20788);
        assert!(config.dispatch.enabled);
        assert_eq!(config.dispatch.address(), "127.0.0.1:20787");
        assert_eq!(config.dispatch.keep_alive(), Some(Duration::from_secs(30)));
        assert_eq!(config.shutdown_timeout_secs, 10);
    }

    #[test]
    fn test_builders() {
        let config = DecoderConfig::default()
            .with_api(
                ApiConfig::default()
                    .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
                    .with_port(0),
            )
            .with_data(DataConfig::default().with_read_timeout(Duration::from_millis(50)))
            .with_dispatch(DispatchConfig::enabled("agent", 4000))
            .with_shutdown_timeout(Duration::from_secs(3));

        assert_eq!(config.api.bind_addr().to_string(), "127.0.0.1:0");
        assert_eq!(config.data.read_timeout_ms, 50);
        assert_eq!(config.dispatch.address(), "agent:4000");
        assert_eq!(config.shutdown_timeout_secs, 3);
    }
}
