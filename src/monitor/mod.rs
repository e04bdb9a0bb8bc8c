//! Network monitoring: net test, keep-alive pings and roundtrip statistics.

mod keepalive;
mod stats;

pub use keepalive::{KeepAlive, PingCommand, Tick};
pub use net_test::{NetTest, NetTestEvent, NetTestStage};
pub use stats::RoundtripStat;
