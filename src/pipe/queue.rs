//! Ordered outgoing pipe of one client.
//!
//! Items are delivered strictly FIFO and encoded lazily, one at a time, as
//! the transport drains the pipe. Until the session init message has gone
//! out, every other item is discarded: a client migrating in
//! semi-seamlessly starts from scratch and must not see traffic ahead of
//! init. Seamless destinations never send init and are exempt, and so are
//! the bodiless migration control messages (see
//! [`OutgoingItem::bypasses_init_gate`]).

use std::collections::VecDeque;

use bytes::BytesMut;
use tracing::{debug, warn};

use super::item::OutgoingItem;
use super::marshal::WireEncoder;
use super::message::{MainInit, Message, Notify, Ping};
use crate::core::{
    AGENT_WINDOW_SIZE, ClientTransport, Clock, ConnectionId, EncodeError, LINK_ERR_OK,
    NOTIFY_SEVERITY_WARN, NOTIFY_VISIBILITY_HIGH, ServerHooks, WARN_GENERAL,
    supported_mouse_modes,
};
use crate::migration::{MIGRATION_PROTOCOL_VERSION, MigrationTarget};

/// Channel-owned collaborators needed to turn an item into bytes.
pub struct SendContext<'a> {
    /// Wire encoder.
    pub encoder: &'a mut dyn WireEncoder,
    /// Server queries (agent presence, channel list, migration data).
    pub hooks: &'a dyn ServerHooks,
    /// Current migration destination.
    pub target: &'a MigrationTarget,
    /// Scratch output buffer.
    pub buf: &'a mut BytesMut,
}

/// Result of one flush step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flushed {
    /// Pipe was empty.
    Empty,
    /// Head item was discarded because init has not been sent yet.
    Dropped(u16),
    /// Head item was encoded and handed to the transport.
    Sent(u16),
}

/// FIFO of pending outgoing items plus the send-side sequencing state.
#[derive(Debug)]
pub struct OutgoingQueue {
    connection_id: ConnectionId,
    items: VecDeque<OutgoingItem>,
    /// Id of the last ping encoded.
    ping_id: u32,
    init_sent: bool,
    seamless_dst: bool,
}

impl OutgoingQueue {
    /// Create an empty pipe.
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            items: VecDeque::new(),
            ping_id: 0,
            init_sent: false,
            seamless_dst: false,
        }
    }

    /// Append an item to the tail.
    pub fn push(&mut self, item: OutgoingItem) {
        self.items.push_back(item);
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the pipe is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Message types of the pending items, head first.
    pub fn pending_types(&self) -> Vec<u16> {
        self.items.iter().map(OutgoingItem::message_type).collect()
    }

    /// Drop every pending item, releasing agent buffers.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Whether the init message has been sent.
    pub fn init_sent(&self) -> bool {
        self.init_sent
    }

    /// Mark the session as a seamless migration destination.
    pub fn set_seamless_destination(&mut self) {
        self.seamless_dst = true;
    }

    /// Whether the session is a seamless migration destination.
    pub fn is_seamless_destination(&self) -> bool {
        self.seamless_dst
    }

    /// Id of the last ping encoded.
    pub fn ping_id(&self) -> u32 {
        self.ping_id
    }

    /// Id the next ping pushed now will carry once encoded.
    ///
    /// Ids are assigned at encode time, so pings already waiting in the
    /// pipe are counted. While the pipe is gated, pings ahead of the queued
    /// init are discarded unsent and do not count.
    pub fn upcoming_ping_id(&self) -> u32 {
        let mut deliverable = !self.is_gated();
        let mut queued: u32 = 0;
        for item in &self.items {
            if item.is_init() {
                deliverable = true;
            } else if deliverable && item.is_ping() {
                queued = queued.wrapping_add(1);
            }
        }
        self.ping_id.wrapping_add(queued).wrapping_add(1)
    }

    fn is_gated(&self) -> bool {
        !self.init_sent && !self.seamless_dst
    }

    /// Encode the head item and hand it to the transport.
    pub fn flush_next(
        &mut self,
        ctx: &mut SendContext<'_>,
        clock: &dyn Clock,
        transport: &mut dyn ClientTransport,
    ) -> Result<Flushed, EncodeError> {
        let Some(item) = self.items.pop_front() else {
            return Ok(Flushed::Empty);
        };
        let msg_type = item.message_type();

        if self.is_gated() && !item.bypasses_init_gate() {
            warn!(
                connection_id = self.connection_id,
                msg_type, "init not sent yet (client is probably migrating in), dropping item"
            );
            return Ok(Flushed::Dropped(msg_type));
        }

        let message = self.resolve(&item, ctx.hooks, ctx.target, clock);
        ctx.buf.clear();
        ctx.encoder.encode(&message, ctx.buf)?;
        drop(message);

        // sequencing only moves once the bytes exist
        match &item {
            OutgoingItem::Ping { .. } => self.ping_id = self.ping_id.wrapping_add(1),
            OutgoingItem::Init { .. } => self.init_sent = true,
            _ => {}
        }

        debug!(
            connection_id = self.connection_id,
            msg_type,
            len = ctx.buf.len(),
            "sending item"
        );
        transport.send(msg_type, ctx.buf.split().freeze());
        // agent buffers are released here, after their bytes were marshalled
        drop(item);
        Ok(Flushed::Sent(msg_type))
    }

    fn resolve<'a>(
        &self,
        item: &'a OutgoingItem,
        hooks: &dyn ServerHooks,
        target: &'a MigrationTarget,
        clock: &dyn Clock,
    ) -> Message<'a> {
        match item {
            OutgoingItem::Ping { size } => Message::Ping {
                ping: Ping {
                    id: self.ping_id.wrapping_add(1),
                    timestamp: clock.now_us(),
                },
                padding: *size,
            },
            OutgoingItem::AgentTokens { tokens } => Message::AgentTokens(*tokens),
            OutgoingItem::AgentData(data) => Message::AgentData(data.as_slice()),
            OutgoingItem::Init {
                connection_id,
                params,
            } => Message::Init(MainInit {
                session_id: *connection_id,
                display_channels_hint: params.display_channels_hint,
                supported_mouse_modes: u32::from(supported_mouse_modes(
                    params.is_client_mouse_allowed,
                )),
                current_mouse_mode: params.current_mouse_mode,
                agent_connected: hooks.has_agent(),
                agent_tokens: AGENT_WINDOW_SIZE,
                multi_media_time: params.multi_media_time,
                ram_hint: params.ram_hint,
            }),
            OutgoingItem::Name(name) => Message::Name(name),
            OutgoingItem::Uuid(uuid) => Message::Uuid(uuid),
            OutgoingItem::Notify(text) => Message::Notify(Notify {
                timestamp_ns: clock.now_ns(),
                severity: NOTIFY_SEVERITY_WARN,
                visibility: NOTIFY_VISIBILITY_HIGH,
                what: WARN_GENERAL,
                text,
            }),
            OutgoingItem::MouseMode(info) => Message::MouseMode {
                supported_modes: supported_mouse_modes(info.is_client_mouse_allowed),
                current_mode: info.current_mode as u16,
            },
            OutgoingItem::MultiMediaTime { time } => Message::MultiMediaTime(*time),
            OutgoingItem::MigrateBegin => Message::MigrateBegin(target),
            OutgoingItem::MigrateBeginSeamless => Message::MigrateBeginSeamless {
                target,
                src_version: MIGRATION_PROTOCOL_VERSION,
            },
            OutgoingItem::MigrateSwitchHost => Message::MigrateSwitchHost(target),
            OutgoingItem::MigrateData => Message::MigrateData(hooks.migrate_data()),
            OutgoingItem::MigrateCancel => Message::MigrateCancel,
            OutgoingItem::MigrateEnd => Message::MigrateEnd,
            OutgoingItem::MigrateDstSeamlessAck => Message::MigrateDstSeamlessAck,
            OutgoingItem::MigrateDstSeamlessNack => Message::MigrateDstSeamlessNack,
            OutgoingItem::AgentConnected => Message::AgentConnectedTokens(AGENT_WINDOW_SIZE),
            OutgoingItem::AgentDisconnected => Message::AgentDisconnected {
                error_code: LINK_ERR_OK,
            },
            OutgoingItem::ChannelsList => Message::ChannelsList(hooks.channels()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::message::msg;
    use crate::pipe::{AgentData, InitParams, WireMarshaller};
    use crate::test_util::{FakeHooks, FakeTransport, ManualClock};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Harness {
        queue: OutgoingQueue,
        encoder: WireMarshaller,
        hooks: FakeHooks,
        target: MigrationTarget,
        buf: BytesMut,
        clock: ManualClock,
        transport: FakeTransport,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                queue: OutgoingQueue::new(1),
                encoder: WireMarshaller::new(),
                hooks: FakeHooks::default(),
                target: MigrationTarget::new("dst", 5900, 5901),
                buf: BytesMut::new(),
                clock: ManualClock::new(1_000),
                transport: FakeTransport::default(),
            }
        }

        fn flush(&mut self) -> Flushed {
            let mut ctx = SendContext {
                encoder: &mut self.encoder,
                hooks: &self.hooks,
                target: &self.target,
                buf: &mut self.buf,
            };
            self.queue
                .flush_next(&mut ctx, &self.clock, &mut self.transport)
                .unwrap()
        }

        fn flush_all(&mut self) {
            while self.flush() != Flushed::Empty {}
        }
    }

    fn init_item() -> OutgoingItem {
        OutgoingItem::Init {
            connection_id: 1,
            params: InitParams::default(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut h = Harness::new();
        h.queue.push(init_item());
        h.queue.push(OutgoingItem::AgentTokens { tokens: 1 });
        h.queue.push(OutgoingItem::Notify("b".into()));
        h.queue.push(OutgoingItem::MultiMediaTime { time: 3 });
        h.flush_all();

        assert_eq!(
            h.transport.sent_types(),
            vec![
                msg::MAIN_INIT,
                msg::MAIN_AGENT_TOKEN,
                msg::NOTIFY,
                msg::MAIN_MULTI_MEDIA_TIME
            ]
        );
    }

    #[test]
    fn test_items_before_init_are_dropped() {
        let mut h = Harness::new();
        h.queue.push(OutgoingItem::AgentTokens { tokens: 1 });
        h.queue.push(OutgoingItem::Ping { size: 0 });
        h.queue.push(init_item());
        h.queue.push(OutgoingItem::MultiMediaTime { time: 3 });

        assert_eq!(h.flush(), Flushed::Dropped(msg::MAIN_AGENT_TOKEN));
        assert_eq!(h.flush(), Flushed::Dropped(msg::PING));
        assert!(!h.queue.init_sent());
        assert_eq!(h.flush(), Flushed::Sent(msg::MAIN_INIT));
        assert!(h.queue.init_sent());
        assert_eq!(h.flush(), Flushed::Sent(msg::MAIN_MULTI_MEDIA_TIME));
        assert_eq!(h.flush(), Flushed::Empty);

        assert_eq!(
            h.transport.sent_types(),
            vec![msg::MAIN_INIT, msg::MAIN_MULTI_MEDIA_TIME]
        );
        // dropped pings never consume an id
        assert_eq!(h.queue.ping_id(), 0);
    }

    #[test]
    fn test_seamless_destination_skips_init_gate() {
        let mut h = Harness::new();
        h.queue.set_seamless_destination();
        h.queue.push(OutgoingItem::MigrateDstSeamlessAck);
        assert_eq!(h.flush(), Flushed::Sent(msg::MAIN_MIGRATE_DST_SEAMLESS_ACK));
        assert!(!h.queue.init_sent());
    }

    #[test]
    fn test_migration_control_skips_init_gate() {
        let mut h = Harness::new();
        h.queue.push(OutgoingItem::MigrateDstSeamlessNack);
        h.queue.push(OutgoingItem::MigrateCancel);
        h.queue.push(OutgoingItem::MigrateEnd);
        h.queue.push(OutgoingItem::Ping { size: 0 });

        assert_eq!(h.flush(), Flushed::Sent(msg::MAIN_MIGRATE_DST_SEAMLESS_NACK));
        assert_eq!(h.flush(), Flushed::Sent(msg::MAIN_MIGRATE_CANCEL));
        assert_eq!(h.flush(), Flushed::Sent(msg::MAIN_MIGRATE_END));
        assert_eq!(h.flush(), Flushed::Dropped(msg::PING));
        assert!(!h.queue.init_sent());
    }

    #[test]
    fn test_upcoming_ping_id_ignores_pings_ahead_of_init() {
        let mut h = Harness::new();
        h.queue.push(OutgoingItem::Ping { size: 0 });
        assert_eq!(h.queue.upcoming_ping_id(), 1);

        h.queue.push(init_item());
        h.queue.push(OutgoingItem::Ping { size: 0 });
        assert_eq!(h.queue.upcoming_ping_id(), 2);

        h.flush_all();
        assert_eq!(h.queue.ping_id(), 1);
        assert_eq!(h.queue.upcoming_ping_id(), 2);
    }

    #[test]
    fn test_upcoming_ping_id_counts_all_pings_when_open() {
        let mut h = Harness::new();
        h.queue.set_seamless_destination();
        h.queue.push(OutgoingItem::Ping { size: 0 });
        h.queue.push(OutgoingItem::Ping { size: 0 });
        assert_eq!(h.queue.upcoming_ping_id(), 3);
    }

    struct FailingEncoder;

    impl WireEncoder for FailingEncoder {
        fn encode(
            &mut self,
            _message: &Message<'_>,
            _out: &mut BytesMut,
        ) -> Result<(), EncodeError> {
            Err(EncodeError::InvalidString)
        }
    }

    #[test]
    fn test_failed_encode_leaves_sequencing_untouched() {
        let mut h = Harness::new();
        let mut encoder = FailingEncoder;
        h.queue.push(init_item());
        h.queue.push(OutgoingItem::Ping { size: 0 });

        let mut ctx = SendContext {
            encoder: &mut encoder,
            hooks: &h.hooks,
            target: &h.target,
            buf: &mut h.buf,
        };
        let result = h.queue.flush_next(&mut ctx, &h.clock, &mut h.transport);
        assert_eq!(result, Err(EncodeError::InvalidString));
        assert!(!h.queue.init_sent());

        // open the gate so the ping reaches the encoder
        h.queue.set_seamless_destination();
        let result = h.queue.flush_next(&mut ctx, &h.clock, &mut h.transport);
        assert_eq!(result, Err(EncodeError::InvalidString));
        assert_eq!(h.queue.ping_id(), 0);
        assert!(h.transport.sent().is_empty());
    }

    #[test]
    fn test_ping_ids_and_timestamps() {
        let mut h = Harness::new();
        h.queue.push(init_item());
        h.flush();

        h.queue.push(OutgoingItem::Ping { size: 0 });
        h.queue.push(OutgoingItem::Ping { size: 16 });
        assert_eq!(h.queue.upcoming_ping_id(), 3);

        h.flush();
        h.clock.advance(500);
        h.flush();
        assert_eq!(h.queue.ping_id(), 2);

        let sent = h.transport.sent();
        let (_, first) = &sent[1];
        let (_, second) = &sent[2];
        assert_eq!(&first[..4], &1u32.to_le_bytes());
        assert_eq!(&first[4..12], &1_000u64.to_le_bytes());
        assert_eq!(second.len(), 12 + 16);
        assert_eq!(&second[..4], &2u32.to_le_bytes());
        assert_eq!(&second[4..12], &1_500u64.to_le_bytes());
    }

    #[test]
    fn test_init_resolves_server_fields() {
        let mut h = Harness::new();
        h.hooks.agent = true;
        h.queue.push(OutgoingItem::Init {
            connection_id: 42,
            params: InitParams {
                display_channels_hint: 2,
                current_mouse_mode: 1,
                is_client_mouse_allowed: true,
                multi_media_time: 7,
                ram_hint: 9,
            },
        });
        h.flush();

        let sent = h.transport.sent();
        let body = &sent[0].1;
        let words: Vec<u32> = body
            .chunks(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(words, vec![42, 2, 3, 1, 1, AGENT_WINDOW_SIZE, 7, 9]);
    }

    #[test]
    fn test_agent_data_released_after_encoding() {
        let mut h = Harness::new();
        h.queue.push(init_item());
        h.flush();

        let released = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&released);
        h.queue.push(OutgoingItem::AgentData(AgentData::new(
            b"agent".to_vec(),
            move |buf| sink.borrow_mut().push(buf),
        )));
        assert!(released.borrow().is_empty());

        h.flush();
        assert_eq!(released.borrow().len(), 1);
        assert_eq!(released.borrow()[0], b"agent".to_vec());
        assert_eq!(&h.transport.sent()[1].1[..], b"agent");
    }

    #[test]
    fn test_dropped_agent_data_is_released() {
        let mut h = Harness::new();
        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        h.queue.push(OutgoingItem::AgentData(AgentData::new(vec![1], move |_| {
            *counter.borrow_mut() += 1
        })));

        assert_eq!(h.flush(), Flushed::Dropped(msg::MAIN_AGENT_DATA));
        assert_eq!(*count.borrow(), 1);
        assert!(h.transport.sent().is_empty());
    }

    #[test]
    fn test_clear_releases_pending_agent_data() {
        let mut h = Harness::new();
        let count = Rc::new(RefCell::new(0));
        for _ in 0..3 {
            let counter = Rc::clone(&count);
            h.queue.push(OutgoingItem::AgentData(AgentData::new(vec![1], move |_| {
                *counter.borrow_mut() += 1
            })));
        }
        h.queue.clear();
        assert_eq!(*count.borrow(), 3);
        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_migrate_begin_carries_target() {
        let mut h = Harness::new();
        h.queue.push(init_item());
        h.queue.push(OutgoingItem::MigrateBeginSeamless);
        h.flush_all();

        let sent = h.transport.sent();
        let body = &sent[1].1;
        assert_eq!(&body[0..2], &5900u16.to_le_bytes());
        assert_eq!(&body[body.len() - 4..], &MIGRATION_PROTOCOL_VERSION.to_le_bytes());
    }

    #[test]
    fn test_pending_types() {
        let mut h = Harness::new();
        h.queue.push(OutgoingItem::MigrateEnd);
        h.queue.push(OutgoingItem::MigrateCancel);
        assert_eq!(
            h.queue.pending_types(),
            vec![msg::MAIN_MIGRATE_END, msg::MAIN_MIGRATE_CANCEL]
        );
        assert_eq!(h.queue.len(), 2);
    }
}
