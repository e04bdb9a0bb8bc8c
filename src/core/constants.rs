//! Protocol constants for the main control channel.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed
//! without breaking interoperability with deployed clients.

use std::time::Duration;

// =============================================================================
// NETWORK TEST
// =============================================================================

/// Payload size of the warmup probe (discarded measurement).
pub const NET_TEST_WARMUP_BYTES: usize = 0;

/// Payload size of the rate probe (250 KiB of zeros).
pub const NET_TEST_BYTES: usize = 1024 * 250;

/// Bitrates below this value (bits per second) classify a client as low bandwidth.
pub const LOW_BANDWIDTH_THRESHOLD_BPS: u64 = 10 * 1024 * 1024;

/// Bitrate reported before a network test has completed.
pub const BITRATE_UNKNOWN: u64 = u64::MAX;

/// Microseconds per second, the resolution of roundtrip measurements.
pub const USEC_PER_SEC: u64 = 1_000_000;

// =============================================================================
// CONNECTIVITY
// =============================================================================

/// Inactivity timeout after which the transport drops a silent client.
pub const CLIENT_CONNECTIVITY_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default interval between keep-alive pings.
pub const PING_INTERVAL: Duration = Duration::from_millis(10_000);

/// Zero padding is streamed into ping payloads in chunks of this size.
pub const ZERO_BUF_SIZE: usize = 4096;

// =============================================================================
// AGENT
// =============================================================================

/// Number of agent messages the client may have in flight.
pub const AGENT_WINDOW_SIZE: u32 = 10;

// =============================================================================
// MOUSE MODES
// =============================================================================

/// Server-side mouse mode bit.
pub const MOUSE_MODE_SERVER: u16 = 1 << 0;

/// Client-side mouse mode bit.
pub const MOUSE_MODE_CLIENT: u16 = 1 << 1;

/// Supported mouse modes bitmask for the given client-mouse permission.
pub fn supported_mouse_modes(is_client_mouse_allowed: bool) -> u16 {
    if is_client_mouse_allowed {
        MOUSE_MODE_SERVER | MOUSE_MODE_CLIENT
    } else {
        MOUSE_MODE_SERVER
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Notification severity: warning.
pub const NOTIFY_SEVERITY_WARN: u32 = 1;

/// Notification visibility: high.
pub const NOTIFY_VISIBILITY_HIGH: u32 = 2;

/// Notification subject: general warning.
pub const WARN_GENERAL: u32 = 0;

/// Link error code reported with agent disconnection.
pub const LINK_ERR_OK: u32 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_constants() {
        assert_eq!(NET_TEST_BYTES, 256_000);
        assert_eq!(LOW_BANDWIDTH_THRESHOLD_BPS, 10_485_760);
        assert_eq!(CLIENT_CONNECTIVITY_TIMEOUT.as_millis(), 30_000);
        assert_eq!(PING_INTERVAL.as_millis(), 10_000);
    }

    #[test]
    fn test_supported_mouse_modes() {
        assert_eq!(supported_mouse_modes(false), MOUSE_MODE_SERVER);
        assert_eq!(supported_mouse_modes(true), 0b11);
    }
}
