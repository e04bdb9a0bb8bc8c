//! Interfaces to the collaborators around a main channel client.
//!
//! The main channel never owns sockets, timers, or server-wide state. It
//! consumes them through the narrow traits in this module so the state
//! machines can be driven from any event loop (and from tests).

use std::time::{Duration, Instant};

use bytes::Bytes;

use super::error::TimerError;
use crate::pipe::{ChannelEntry, Ping};

/// Opaque connection identifier assigned by the server at link time.
pub type ConnectionId = u32;

/// Monotonic time source.
///
/// Ping timestamps are stamped and compared with the same clock, so the
/// origin is irrelevant; only differences are meaningful.
pub trait Clock {
    /// Current monotonic time in microseconds.
    fn now_us(&self) -> u64;

    /// Current monotonic time in nanoseconds.
    fn now_ns(&self) -> u64 {
        self.now_us().saturating_mul(1000)
    }
}

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// The transport edge of one connected client.
///
/// Implemented by the generic channel-client layer that owns the socket.
pub trait ClientTransport {
    /// Whether the underlying stream is still connected.
    fn is_connected(&self) -> bool;

    /// Frame and send one marshalled message.
    fn send(&mut self, msg_type: u16, payload: Bytes);

    /// Disconnect the client if no traffic is observed within `timeout`.
    fn start_connectivity_monitoring(&mut self, timeout: Duration);

    /// Generic ping/pong handling for pongs that do not belong to a
    /// network test (latency bookkeeping of the base channel).
    fn handle_pong(&mut self, pong: &Ping, size: usize);
}

/// Server-wide callbacks and queries used by the main channel.
pub trait ServerHooks {
    /// All clients waiting for the destination connect have reported.
    fn on_migrate_connected(&mut self, seamless: bool);

    /// A client finished its semi-seamless migration into this server.
    fn on_semi_seamless_migrate_complete(&mut self, connection_id: ConnectionId);

    /// Decide whether a seamless migration from a source speaking
    /// `src_version` of the migration protocol is acceptable.
    fn accept_seamless_destination(&mut self, connection_id: ConnectionId, src_version: u32)
        -> bool;

    /// Whether the client is currently being migrated into this server.
    fn is_migrating_at_target(&self, connection_id: ConnectionId) -> bool;

    /// Whether a guest agent is attached.
    fn has_agent(&self) -> bool;

    /// Channels offered to clients.
    fn channels(&self) -> Vec<ChannelEntry>;

    /// Opaque migration data blob for the main channel.
    fn migrate_data(&self) -> Bytes;

    /// Record a roundtrip sample in the server statistics.
    fn record_roundtrip(&mut self, roundtrip_us: u64) {
        let _ = roundtrip_us;
    }
}

/// A one-shot timer owned by a single session.
///
/// Expiry is delivered by the timer backend to whoever drives the channel,
/// which then calls back into the session. Re-arming is always explicit.
pub trait Timer {
    /// Arm the timer to fire once after `after`. Re-arming replaces any
    /// pending expiry.
    fn start(&mut self, after: Duration);

    /// Cancel a pending expiry, if any.
    fn cancel(&mut self);
}

/// Creates per-session timers.
pub trait TimerFactory {
    /// Create a timer whose expiry is attributed to `connection_id`.
    fn create(&mut self, connection_id: ConnectionId) -> Result<Box<dyn Timer>, TimerError>;
}
