//! Outgoing pipe items.
//!
//! An item records *what* to send, not the bytes. Fields that depend on
//! the moment of sending (ping ids, timestamps, migration target) are
//! resolved when the item reaches the head of the pipe.

use std::fmt;

use uuid::Uuid;

use super::message::msg;
use crate::core::ConnectionId;

/// Callback that takes back ownership of an agent data buffer.
pub type ReleaseFn = Box<dyn FnOnce(Vec<u8>)>;

/// Agent data buffer handed over to the pipe.
///
/// The release callback runs exactly once, when the item is dropped: after
/// the bytes were marshalled, when the item is discarded unsent, or when
/// the session is torn down with the item still queued.
pub struct AgentData {
    data: Vec<u8>,
    release: Option<ReleaseFn>,
}

impl AgentData {
    /// Wrap a buffer together with its release callback.
    pub fn new(data: Vec<u8>, release: impl FnOnce(Vec<u8>) + 'static) -> Self {
        Self {
            data,
            release: Some(Box::new(release)),
        }
    }

    /// Wrap a buffer that needs no release notification.
    pub fn owned(data: Vec<u8>) -> Self {
        Self {
            data,
            release: None,
        }
    }

    /// The buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Buffer length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for AgentData {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(std::mem::take(&mut self.data));
        }
    }
}

impl fmt::Debug for AgentData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentData")
            .field("len", &self.data.len())
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// Session initialization parameters supplied by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitParams {
    /// Number of display channels the client should expect.
    pub display_channels_hint: u32,
    /// Current mouse mode.
    pub current_mouse_mode: u32,
    /// Whether client-side mouse mode may be used.
    pub is_client_mouse_allowed: bool,
    /// Multimedia time.
    pub multi_media_time: u32,
    /// Guest RAM size hint.
    pub ram_hint: u32,
}

/// Mouse mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseModeInfo {
    /// Current mouse mode.
    pub current_mode: u32,
    /// Whether client-side mouse mode may be used.
    pub is_client_mouse_allowed: bool,
}

/// One pending outgoing message.
#[derive(Debug)]
pub enum OutgoingItem {
    /// Ping probe with `size` bytes of zero padding.
    Ping {
        /// Padding size in bytes.
        size: usize,
    },
    /// Agent token grant.
    AgentTokens {
        /// Number of tokens.
        tokens: u32,
    },
    /// Agent data pass-through.
    AgentData(AgentData),
    /// Session init.
    Init {
        /// Connection id the client must present on its other channels.
        connection_id: ConnectionId,
        /// Init parameters.
        params: InitParams,
    },
    /// VM name.
    Name(String),
    /// VM instance UUID.
    Uuid(Uuid),
    /// Notification text.
    Notify(String),
    /// Mouse mode change.
    MouseMode(MouseModeInfo),
    /// Multimedia time update.
    MultiMediaTime {
        /// Multimedia time.
        time: u32,
    },
    /// Semi-seamless migration begin.
    MigrateBegin,
    /// Seamless migration begin.
    MigrateBeginSeamless,
    /// Reconnect to the migration target (legacy clients).
    MigrateSwitchHost,
    /// Main channel migration data blob.
    MigrateData,
    /// Migration cancelled.
    MigrateCancel,
    /// Migration finished on the source.
    MigrateEnd,
    /// Seamless migration accepted by the destination.
    MigrateDstSeamlessAck,
    /// Seamless migration refused by the destination.
    MigrateDstSeamlessNack,
    /// Agent connected, with the initial token window.
    AgentConnected,
    /// Agent disconnected.
    AgentDisconnected,
    /// Available channels.
    ChannelsList,
}

impl OutgoingItem {
    /// Wire message type this item is sent as.
    pub fn message_type(&self) -> u16 {
        match self {
            OutgoingItem::Ping { .. } => msg::PING,
            OutgoingItem::AgentTokens { .. } => msg::MAIN_AGENT_TOKEN,
            OutgoingItem::AgentData(_) => msg::MAIN_AGENT_DATA,
            OutgoingItem::Init { .. } => msg::MAIN_INIT,
            OutgoingItem::Name(_) => msg::MAIN_NAME,
            OutgoingItem::Uuid(_) => msg::MAIN_UUID,
            OutgoingItem::Notify(_) => msg::NOTIFY,
            OutgoingItem::MouseMode(_) => msg::MAIN_MOUSE_MODE,
            OutgoingItem::MultiMediaTime { .. } => msg::MAIN_MULTI_MEDIA_TIME,
            OutgoingItem::MigrateBegin => msg::MAIN_MIGRATE_BEGIN,
            OutgoingItem::MigrateBeginSeamless => msg::MAIN_MIGRATE_BEGIN_SEAMLESS,
            OutgoingItem::MigrateSwitchHost => msg::MAIN_MIGRATE_SWITCH_HOST,
            OutgoingItem::MigrateData => msg::MIGRATE_DATA,
            OutgoingItem::MigrateCancel => msg::MAIN_MIGRATE_CANCEL,
            OutgoingItem::MigrateEnd => msg::MAIN_MIGRATE_END,
            OutgoingItem::MigrateDstSeamlessAck => msg::MAIN_MIGRATE_DST_SEAMLESS_ACK,
            OutgoingItem::MigrateDstSeamlessNack => msg::MAIN_MIGRATE_DST_SEAMLESS_NACK,
            OutgoingItem::AgentConnected => msg::MAIN_AGENT_CONNECTED_TOKENS,
            OutgoingItem::AgentDisconnected => msg::MAIN_AGENT_DISCONNECTED,
            OutgoingItem::ChannelsList => msg::MAIN_CHANNELS_LIST,
        }
    }

    /// Whether this is the session init item.
    pub fn is_init(&self) -> bool {
        matches!(self, OutgoingItem::Init { .. })
    }

    /// Whether this is a ping probe.
    pub fn is_ping(&self) -> bool {
        matches!(self, OutgoingItem::Ping { .. })
    }

    /// Whether the item may leave before session init.
    ///
    /// Besides init these are the bodiless migration control messages.
    pub fn bypasses_init_gate(&self) -> bool {
        matches!(
            self,
            OutgoingItem::Init { .. }
                | OutgoingItem::MigrateCancel
                | OutgoingItem::MigrateEnd
                | OutgoingItem::MigrateDstSeamlessAck
                | OutgoingItem::MigrateDstSeamlessNack
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_agent_data_release_on_drop() {
        let released = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&released);
        let data = AgentData::new(vec![1, 2, 3], move |buf| sink.borrow_mut().push(buf));

        assert_eq!(data.as_slice(), &[1, 2, 3]);
        assert!(released.borrow().is_empty());

        drop(data);
        assert_eq!(*released.borrow(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_agent_data_release_through_item() {
        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        let item = OutgoingItem::AgentData(AgentData::new(vec![9; 16], move |_| {
            *counter.borrow_mut() += 1
        }));
        assert_eq!(item.message_type(), msg::MAIN_AGENT_DATA);

        drop(item);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_owned_agent_data() {
        let data = AgentData::owned(Vec::new());
        assert!(data.is_empty());
        assert_eq!(format!("{data:?}"), "AgentData { len: 0, has_release: false }");
    }

    #[test]
    fn test_item_predicates() {
        let init = OutgoingItem::Init {
            connection_id: 1,
            params: InitParams::default(),
        };
        assert!(init.is_init());
        assert!(!init.is_ping());
        assert!(OutgoingItem::Ping { size: 0 }.is_ping());
        assert_eq!(OutgoingItem::MigrateEnd.message_type(), msg::MAIN_MIGRATE_END);
    }

    #[test]
    fn test_init_gate_exemptions() {
        let init = OutgoingItem::Init {
            connection_id: 1,
            params: InitParams::default(),
        };
        assert!(init.bypasses_init_gate());
        assert!(OutgoingItem::MigrateDstSeamlessNack.bypasses_init_gate());
        assert!(OutgoingItem::MigrateDstSeamlessAck.bypasses_init_gate());
        assert!(OutgoingItem::MigrateCancel.bypasses_init_gate());
        assert!(OutgoingItem::MigrateEnd.bypasses_init_gate());

        assert!(!OutgoingItem::Ping { size: 0 }.bypasses_init_gate());
        assert!(!OutgoingItem::MigrateBegin.bypasses_init_gate());
        assert!(!OutgoingItem::MigrateData.bypasses_init_gate());
        assert!(!OutgoingItem::Notify(String::new()).bypasses_init_gate());
    }
}
