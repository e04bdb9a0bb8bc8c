//! Main channel messages.
//!
//! [`Message`] is an outgoing item with every send-time field resolved,
//! ready for a [`WireEncoder`](super::WireEncoder). [`ClientMessage`] is
//! the subset of inbound messages the main channel client handles.

use bytes::Bytes;
use uuid::Uuid;

use crate::core::DecodeError;
use crate::migration::MigrationTarget;

/// Server to client message types.
pub mod msg {
    /// Migration data blob.
    pub const MIGRATE_DATA: u16 = 2;
    /// Ping.
    pub const PING: u16 = 4;
    /// Notification.
    pub const NOTIFY: u16 = 7;

    /// Semi-seamless migration begin.
    pub const MAIN_MIGRATE_BEGIN: u16 = 101;
    /// Migration cancel.
    pub const MAIN_MIGRATE_CANCEL: u16 = 102;
    /// Session init.
    pub const MAIN_INIT: u16 = 103;
    /// Channel list.
    pub const MAIN_CHANNELS_LIST: u16 = 104;
    /// Mouse mode.
    pub const MAIN_MOUSE_MODE: u16 = 105;
    /// Multimedia time.
    pub const MAIN_MULTI_MEDIA_TIME: u16 = 106;
    /// Agent disconnected.
    pub const MAIN_AGENT_DISCONNECTED: u16 = 108;
    /// Agent data.
    pub const MAIN_AGENT_DATA: u16 = 109;
    /// Agent tokens.
    pub const MAIN_AGENT_TOKEN: u16 = 110;
    /// Switch host (legacy migration).
    pub const MAIN_MIGRATE_SWITCH_HOST: u16 = 111;
    /// Migration end.
    pub const MAIN_MIGRATE_END: u16 = 112;
    /// VM name.
    pub const MAIN_NAME: u16 = 113;
    /// VM UUID.
    pub const MAIN_UUID: u16 = 114;
    /// Agent connected with tokens.
    pub const MAIN_AGENT_CONNECTED_TOKENS: u16 = 115;
    /// Seamless migration begin.
    pub const MAIN_MIGRATE_BEGIN_SEAMLESS: u16 = 116;
    /// Seamless destination accepted.
    pub const MAIN_MIGRATE_DST_SEAMLESS_ACK: u16 = 117;
    /// Seamless destination refused.
    pub const MAIN_MIGRATE_DST_SEAMLESS_NACK: u16 = 118;
}

/// Client to server message types.
pub mod msgc {
    /// Pong.
    pub const PONG: u16 = 3;

    /// Connected to the migration destination.
    pub const MAIN_MIGRATE_CONNECTED: u16 = 102;
    /// Failed to connect to the migration destination.
    pub const MAIN_MIGRATE_CONNECT_ERROR: u16 = 103;
    /// Client finished switching to the destination.
    pub const MAIN_MIGRATE_END: u16 = 109;
    /// Client asks the destination for a seamless handoff.
    pub const MAIN_MIGRATE_DST_DO_SEAMLESS: u16 = 110;
    /// Connected to the migration destination, seamless flavor.
    pub const MAIN_MIGRATE_CONNECTED_SEAMLESS: u16 = 111;
}

/// Ping/pong body: sequence id and the sender's monotonic timestamp (µs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Ping sequence id.
    pub id: u32,
    /// Monotonic send time in microseconds, echoed by the client.
    pub timestamp: u64,
}

/// Wire size of a ping body.
pub const PING_SIZE: usize = 4 + 8;

/// One entry of the channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEntry {
    /// Channel type.
    pub channel_type: u8,
    /// Channel id within its type.
    pub id: u8,
}

/// Session init body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainInit {
    /// Session id (the connection id).
    pub session_id: u32,
    /// Display channels hint.
    pub display_channels_hint: u32,
    /// Supported mouse modes bitmask.
    pub supported_mouse_modes: u32,
    /// Current mouse mode.
    pub current_mouse_mode: u32,
    /// Whether an agent is attached.
    pub agent_connected: bool,
    /// Initial agent token window.
    pub agent_tokens: u32,
    /// Multimedia time.
    pub multi_media_time: u32,
    /// RAM hint.
    pub ram_hint: u32,
}

/// Notification body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notify<'a> {
    /// Monotonic time in nanoseconds.
    pub timestamp_ns: u64,
    /// Severity.
    pub severity: u32,
    /// Visibility.
    pub visibility: u32,
    /// Subject.
    pub what: u32,
    /// Text, sent NUL-terminated.
    pub text: &'a str,
}

/// An outgoing message with all fields resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<'a> {
    /// Ping followed by `padding` zero bytes.
    Ping {
        /// Ping body.
        ping: Ping,
        /// Zero padding in bytes.
        padding: usize,
    },
    /// Agent token grant.
    AgentTokens(u32),
    /// Agent data.
    AgentData(&'a [u8]),
    /// Session init.
    Init(MainInit),
    /// VM name.
    Name(&'a str),
    /// VM UUID.
    Uuid(&'a Uuid),
    /// Notification.
    Notify(Notify<'a>),
    /// Mouse mode.
    MouseMode {
        /// Supported modes bitmask.
        supported_modes: u16,
        /// Current mode.
        current_mode: u16,
    },
    /// Multimedia time.
    MultiMediaTime(u32),
    /// Semi-seamless migration begin.
    MigrateBegin(&'a MigrationTarget),
    /// Seamless migration begin.
    MigrateBeginSeamless {
        /// Destination.
        target: &'a MigrationTarget,
        /// Source migration protocol version.
        src_version: u32,
    },
    /// Switch host.
    MigrateSwitchHost(&'a MigrationTarget),
    /// Migration data blob.
    MigrateData(Bytes),
    /// Channel list.
    ChannelsList(Vec<ChannelEntry>),
    /// Agent connected with tokens.
    AgentConnectedTokens(u32),
    /// Agent disconnected.
    AgentDisconnected {
        /// Link error code.
        error_code: u32,
    },
    /// Migration cancel.
    MigrateCancel,
    /// Migration end.
    MigrateEnd,
    /// Seamless destination accepted.
    MigrateDstSeamlessAck,
    /// Seamless destination refused.
    MigrateDstSeamlessNack,
}

impl Message<'_> {
    /// Wire message type.
    pub fn message_type(&self) -> u16 {
        match self {
            Message::Ping { .. } => msg::PING,
            Message::AgentTokens(_) => msg::MAIN_AGENT_TOKEN,
            Message::AgentData(_) => msg::MAIN_AGENT_DATA,
            Message::Init(_) => msg::MAIN_INIT,
            Message::Name(_) => msg::MAIN_NAME,
            Message::Uuid(_) => msg::MAIN_UUID,
            Message::Notify(_) => msg::NOTIFY,
            Message::MouseMode { .. } => msg::MAIN_MOUSE_MODE,
            Message::MultiMediaTime(_) => msg::MAIN_MULTI_MEDIA_TIME,
            Message::MigrateBegin(_) => msg::MAIN_MIGRATE_BEGIN,
            Message::MigrateBeginSeamless { .. } => msg::MAIN_MIGRATE_BEGIN_SEAMLESS,
            Message::MigrateSwitchHost(_) => msg::MAIN_MIGRATE_SWITCH_HOST,
            Message::MigrateData(_) => msg::MIGRATE_DATA,
            Message::ChannelsList(_) => msg::MAIN_CHANNELS_LIST,
            Message::AgentConnectedTokens(_) => msg::MAIN_AGENT_CONNECTED_TOKENS,
            Message::AgentDisconnected { .. } => msg::MAIN_AGENT_DISCONNECTED,
            Message::MigrateCancel => msg::MAIN_MIGRATE_CANCEL,
            Message::MigrateEnd => msg::MAIN_MIGRATE_END,
            Message::MigrateDstSeamlessAck => msg::MAIN_MIGRATE_DST_SEAMLESS_ACK,
            Message::MigrateDstSeamlessNack => msg::MAIN_MIGRATE_DST_SEAMLESS_NACK,
        }
    }
}

/// Inbound messages handled by the main channel client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// Echo of one of our pings.
    Pong {
        /// Echoed ping body.
        ping: Ping,
        /// Total payload size, including any echoed padding.
        size: usize,
    },
    /// Connected to the migration destination.
    MigrateConnected,
    /// Connected to the migration destination, seamless flavor.
    MigrateConnectedSeamless,
    /// Could not connect to the migration destination.
    MigrateConnectError,
    /// Finished switching to this (destination) server.
    MigrateEnd,
    /// Request a seamless handoff from a source speaking `src_version`.
    MigrateDstDoSeamless {
        /// Source migration protocol version.
        src_version: u32,
    },
}

impl ClientMessage {
    /// Decode an inbound message body (little endian).
    pub fn decode(msg_type: u16, payload: &[u8]) -> Result<Self, DecodeError> {
        match msg_type {
            msgc::PONG => {
                ensure_len(payload, PING_SIZE)?;
                let id = u32::from_le_bytes(payload[0..4].try_into().expect("length checked"));
                let timestamp =
                    u64::from_le_bytes(payload[4..12].try_into().expect("length checked"));
                Ok(ClientMessage::Pong {
                    ping: Ping { id, timestamp },
                    size: payload.len(),
                })
            }
            msgc::MAIN_MIGRATE_CONNECTED => Ok(ClientMessage::MigrateConnected),
            msgc::MAIN_MIGRATE_CONNECTED_SEAMLESS => Ok(ClientMessage::MigrateConnectedSeamless),
            msgc::MAIN_MIGRATE_CONNECT_ERROR => Ok(ClientMessage::MigrateConnectError),
            msgc::MAIN_MIGRATE_END => Ok(ClientMessage::MigrateEnd),
            msgc::MAIN_MIGRATE_DST_DO_SEAMLESS => {
                ensure_len(payload, 4)?;
                let src_version =
                    u32::from_le_bytes(payload[0..4].try_into().expect("length checked"));
                Ok(ClientMessage::MigrateDstDoSeamless { src_version })
            }
            other => Err(DecodeError::UnknownMessage(other)),
        }
    }
}

fn ensure_len(payload: &[u8], expected: usize) -> Result<(), DecodeError> {
    if payload.len() < expected {
        return Err(DecodeError::TooShort {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}
