//! Keep-alive pings.
//!
//! When statistics are enabled each session owns a one-shot timer. Every
//! expiry pushes a zero-size ping and re-arms the timer; a tick that finds
//! the transport disconnected cancels it instead.

use std::time::Duration;

use tracing::{debug, info};

use crate::core::Timer;

/// Keep-alive control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingCommand {
    /// Send a single ping now.
    Once,
    /// Start periodic pings, optionally changing the interval.
    On {
        /// New interval; ignored when `None` or zero.
        interval: Option<Duration>,
    },
    /// Stop periodic pings.
    Off,
}

/// What the session should do after a timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Push a ping; the timer was re-armed.
    Ping,
    /// The peer is gone; the timer was cancelled.
    Stopped,
}

/// Periodic ping timer of one session.
pub struct KeepAlive {
    timer: Option<Box<dyn Timer>>,
    interval: Duration,
}

impl KeepAlive {
    /// Create a keep-alive. Without a timer every operation is a no-op.
    pub fn new(timer: Option<Box<dyn Timer>>, interval: Duration) -> Self {
        Self { timer, interval }
    }

    /// Whether a timer backs this keep-alive.
    pub fn is_enabled(&self) -> bool {
        self.timer.is_some()
    }

    /// Current interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the interval used by the next arming. Zero is ignored.
    pub fn set_interval(&mut self, interval: Duration) {
        if !interval.is_zero() {
            self.interval = interval;
        }
    }

    /// Arm the timer with the current interval.
    pub fn start(&mut self) {
        if let Some(timer) = self.timer.as_mut() {
            debug!(interval_ms = self.interval.as_millis() as u64, "ping timer armed");
            timer.start(self.interval);
        }
    }

    /// Cancel a pending expiry.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.as_mut() {
            timer.cancel();
        }
    }

    /// Handle a timer expiry.
    pub fn tick(&mut self, connected: bool) -> Tick {
        if !connected {
            info!("not connected to peer, ping off");
            self.cancel();
            return Tick::Stopped;
        }
        self.start();
        Tick::Ping
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAlive")
            .field("enabled", &self.is_enabled())
            .field("interval", &self.interval)
            .finish()
    }
}
