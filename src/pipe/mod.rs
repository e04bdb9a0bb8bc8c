//! Outgoing pipe: items, resolved messages, wire encoding and the queue.

mod item;
mod marshal;
mod message;
mod queue;

pub use item::{AgentData, InitParams, MouseModeInfo, OutgoingItem, ReleaseFn};
pub use marshal::{WireEncoder, WireMarshaller};
pub use message::{
    ChannelEntry, ClientMessage, MainInit, Message, Notify, PING_SIZE, Ping, msg, msgc,
};
pub use queue::{Flushed, OutgoingQueue, SendContext};
