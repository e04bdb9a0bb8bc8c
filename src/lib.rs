//! # Main Channel
//!
//! Per-client engine of the main control channel of a remote-display
//! server. For every connected viewer it provides:
//!
//! - **Outgoing pipe**: strictly ordered items, encoded lazily when sent,
//!   with nothing but session init allowed out before init
//! - **Network test**: warmup, latency and rate pings deriving latency and
//!   bitrate estimates
//! - **Connectivity**: inactivity timeout handoff and optional keep-alive
//!   pings
//! - **Migration**: semi-seamless and seamless handshakes, fanned in across
//!   every client of the channel
//!
//! Sockets, timers and server-wide state stay outside the crate, behind the
//! traits in [`core`](crate::core).
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio-backed keep-alive timers
//!
//! ## Modules
//!
//! - [`core`](crate::core): Collaborator traits, constants, capabilities and errors
//! - [`config`]: Session configuration
//! - [`pipe`]: Outgoing items, wire messages and the queue
//! - [`monitor`]: Net test, keep-alive and roundtrip statistics
//! - [`migration`]: Migration phases and the shared wait counter
//! - [`channel`]: Client sessions and the channel that owns them
//! - [`runtime`]: Tokio timer driver (requires `runtime` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use bytes::Bytes;
//! use main_channel::prelude::*;
//! use std::time::Duration;
//!
//! struct Server;
//!
//! impl ServerHooks for Server {
//!     fn on_migrate_connected(&mut self, _seamless: bool) {}
//!     fn on_semi_seamless_migrate_complete(&mut self, _id: ConnectionId) {}
//!     fn accept_seamless_destination(&mut self, _id: ConnectionId, version: u32) -> bool {
//!         version == MIGRATION_PROTOCOL_VERSION
//!     }
//!     fn is_migrating_at_target(&self, _id: ConnectionId) -> bool {
//!         false
//!     }
//!     fn has_agent(&self) -> bool {
//!         false
//!     }
//!     fn channels(&self) -> Vec<ChannelEntry> {
//!         Vec::new()
//!     }
//!     fn migrate_data(&self) -> Bytes {
//!         Bytes::new()
//!     }
//! }
//!
//! struct Socket;
//!
//! impl ClientTransport for Socket {
//!     fn is_connected(&self) -> bool {
//!         true
//!     }
//!     fn send(&mut self, _msg_type: u16, _payload: Bytes) {}
//!     fn start_connectivity_monitoring(&mut self, _timeout: Duration) {}
//!     fn handle_pong(&mut self, _pong: &Ping, _size: usize) {}
//! }
//!
//! struct NoTimers;
//!
//! impl TimerFactory for NoTimers {
//!     fn create(&mut self, _id: ConnectionId) -> Result<Box<dyn Timer>, TimerError> {
//!         Err(TimerError::NoRuntime)
//!     }
//! }
//!
//! let mut channel =
//!     MainChannel::new(SessionConfig::default(), Box::new(Server), Box::new(NoTimers))?;
//! let client = channel.add_client(1, Box::new(Socket), CapabilitySet::default())?;
//! client.push_init(InitParams::default());
//! client.start_net_test(true);
//! assert_eq!(channel.flush_all()?, 4);
//! # Ok::<(), ChannelError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod channel;
pub mod config;
pub mod migration;
pub mod monitor;
pub mod pipe;

// Tokio timer driver (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod runtime;

#[cfg(test)]
mod test_util;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::channel::{MainChannel, MainChannelClient};
    pub use crate::config::{SessionConfig, SessionConfigBuilder};
    pub use crate::migration::{MIGRATION_PROTOCOL_VERSION, MigrationState, MigrationTarget};
    pub use crate::monitor::{NetTestStage, PingCommand};
    pub use crate::pipe::{
        AgentData, ChannelEntry, ClientMessage, InitParams, MouseModeInfo, Ping, WireEncoder,
        WireMarshaller,
    };

    // Timer driver (when enabled)
    #[cfg(feature = "runtime")]
    pub use crate::runtime::{TimerFired, TokioTimerFactory};
}

// Re-export commonly used items at crate root
pub use crate::channel::{MainChannel, MainChannelClient};
pub use crate::config::{SessionConfig, SessionConfigBuilder};
pub use crate::core::{ChannelError, ChannelResult, DecodeError, EncodeError, TimerError};
