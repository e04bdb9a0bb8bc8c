//! Session configuration.

use std::time::Duration;

use crate::core::{
    CLIENT_CONNECTIVITY_TIMEOUT, ChannelError, ChannelResult, LOW_BANDWIDTH_THRESHOLD_BPS,
    NET_TEST_BYTES, PING_INTERVAL,
};

/// Per-session configuration, shared by all clients of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Enable the keep-alive ping timer and roundtrip statistics.
    pub statistics: bool,

    /// Interval between keep-alive pings.
    pub ping_interval: Duration,

    /// Inactivity timeout handed to the transport.
    pub connectivity_timeout: Duration,

    /// Payload size of the rate probe.
    pub net_test_bytes: usize,

    /// Low bandwidth classification threshold in bits per second.
    pub low_bandwidth_threshold: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            statistics: false,
            ping_interval: PING_INTERVAL,
            connectivity_timeout: CLIENT_CONNECTIVITY_TIMEOUT,
            net_test_bytes: NET_TEST_BYTES,
            low_bandwidth_threshold: LOW_BANDWIDTH_THRESHOLD_BPS,
        }
    }
}

impl SessionConfig {
    /// Check the configuration for values the state machines cannot run with.
    pub fn validate(&self) -> ChannelResult<()> {
        if self.ping_interval.is_zero() {
            return Err(ChannelError::Config("ping interval must be non-zero".into()));
        }
        if self.connectivity_timeout.is_zero() {
            return Err(ChannelError::Config(
                "connectivity timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable statistics (keep-alive timer, roundtrip samples).
    pub fn statistics(mut self, enabled: bool) -> Self {
        self.config.statistics = enabled;
        self
    }

    /// Set the keep-alive ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the connectivity timeout.
    pub fn connectivity_timeout(mut self, timeout: Duration) -> Self {
        self.config.connectivity_timeout = timeout;
        self
    }

    /// Set the rate probe size.
    pub fn net_test_bytes(mut self, bytes: usize) -> Self {
        self.config.net_test_bytes = bytes;
        self
    }

    /// Set the low bandwidth threshold in bits per second.
    pub fn low_bandwidth_threshold(mut self, bps: u64) -> Self {
        self.config.low_bandwidth_threshold = bps;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> ChannelResult<SessionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
