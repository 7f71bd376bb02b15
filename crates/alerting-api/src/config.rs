//! API server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use alerting_core::RuleLimits;

/// Configuration for proxied backend calls.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Deadline for one proxied request.
    pub timeout: Duration,
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
    /// Idle pooled connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 16,
        }
    }
}

impl ProxyConfig {
    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// Limits applied to submitted rules.
    pub limits: RuleLimits,
    /// Interval given to rule groups posted without one.
    pub default_group_interval: Duration,
    /// Proxy settings.
    pub proxy: ProxyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3100)),
            limits: RuleLimits::default(),
            default_group_interval: Duration::from_secs(60),
            proxy: ProxyConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a configuration with the specified bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    /// Set the rule limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: RuleLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the default group interval.
    #[must_use]
    pub const fn with_default_group_interval(mut self, interval: Duration) -> Self {
        self.default_group_interval = interval;
        self
    }

    /// Set the proxy settings.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3100);
        assert_eq!(config.default_group_interval, Duration::from_secs(60));
        assert_eq!(config.proxy.timeout, Duration::from_secs(30));
    }

    #[test]
    fn builders() {
        let config = ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 9000)))
            .with_default_group_interval(Duration::from_secs(20))
            .with_proxy(ProxyConfig::default().with_timeout(Duration::from_secs(3)));
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.default_group_interval, Duration::from_secs(20));
        assert_eq!(config.proxy.timeout, Duration::from_secs(3));
    }
}
