//! Gateway configuration
//!
//! All settings are supplied once when the gateway is constructed and are
//! never re-read per call.

use std::time::Duration;

/// Default timeout applied to every storage session (milliseconds).
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 60_000;

/// Default RPC timeout handed to the storage client at bootstrap.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Name tag the gateway's storage client identifies itself with.
pub const CLIENT_NAME: &str = "redis_gateway_client";

/// The single backing table all commands operate on.
pub const DEFAULT_TABLE_NAME: &str = ".redis";

/// Main configuration for a gateway instance
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address for RESP clients
    pub listen_addr: String,

    // -------------------------------------------------------------------------
    // Storage Client Configuration
    // -------------------------------------------------------------------------
    /// Cluster coordinator addresses used for bootstrap
    pub master_addresses: Vec<String>,

    /// Backing table name
    pub table_name: String,

    /// Fixed name tag for the storage client
    pub client_name: String,

    /// Default RPC timeout for the storage client
    pub rpc_timeout: Duration,

    /// Timeout applied to each read and write session
    pub session_timeout: Duration,

    /// Mutation buffer space per session (in bytes)
    pub session_buffer_bytes: usize,

    // -------------------------------------------------------------------------
    // Embedded Cluster Configuration
    // -------------------------------------------------------------------------
    /// Number of tablets the backing table is partitioned into
    pub tablets: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:6379".to_string(),
            master_addresses: vec!["127.0.0.1:7100".to_string()],
            table_name: DEFAULT_TABLE_NAME.to_string(),
            client_name: CLIENT_NAME.to_string(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            session_buffer_bytes: 64 * 1024 * 1024, // 64 MB
            tablets: 16,
        }
    }
}

impl GatewayConfig {
    /// Create a new config builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

/// Builder for GatewayConfig
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Replace the coordinator address list
    pub fn master_addresses<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.master_addresses = addrs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the backing table name
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.config.table_name = name.into();
        self
    }

    /// Set the session timeout (in milliseconds)
    pub fn session_timeout_ms(mut self, ms: u64) -> Self {
        self.config.session_timeout = Duration::from_millis(ms);
        self
    }

    /// Set the per-session mutation buffer limit (in bytes)
    pub fn session_buffer_bytes(mut self, bytes: usize) -> Self {
        self.config.session_buffer_bytes = bytes;
        self
    }

    /// Set the number of tablets for the embedded cluster
    pub fn tablets(mut self, count: usize) -> Self {
        self.config.tablets = count.max(1);
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

/// Splits a comma separated address list, dropping empty entries.
pub fn parse_address_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert_eq!(config.table_name, ".redis");
        assert_eq!(config.client_name, CLIENT_NAME);
    }

    #[test]
    fn test_builder() {
        let config = GatewayConfig::builder()
            .master_addresses(["10.0.0.1:7100", "10.0.0.2:7100"])
            .session_timeout_ms(250)
            .tablets(0)
            .build();

        assert_eq!(config.master_addresses.len(), 2);
        assert_eq!(config.session_timeout, Duration::from_millis(250));
        assert_eq!(config.tablets, 1);
    }

    #[test]
    fn test_parse_address_list() {
        assert_eq!(
            parse_address_list("a:1, b:2,,c:3 "),
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
        );
        assert!(parse_address_list("").is_empty());
    }
}
