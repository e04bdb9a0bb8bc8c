//! Channel layer: client sessions and the channel that owns them.

#[allow(clippy::module_inception)]
mod channel;
mod client;

pub use channel::MainChannel;
pub use client::{ChannelContext, MainChannelClient};
