//! Recording fakes for the collaborators of a main channel.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::core::{
    ClientTransport, Clock, ConnectionId, EncodeError, ServerHooks, Timer, TimerError,
    TimerFactory,
};
use crate::pipe::{ChannelEntry, Message, Ping, WireEncoder, WireMarshaller};

/// Clock moved by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(now_us: u64) -> Self {
        Self {
            now: Cell::new(now_us),
        }
    }

    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }

    pub fn set(&self, us: u64) {
        self.now.set(us);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.get()
    }
}

#[derive(Debug)]
struct TransportState {
    connected: bool,
    sent: Vec<(u16, Bytes)>,
    monitoring: Vec<Duration>,
    pongs: Vec<(Ping, usize)>,
}

/// Transport recording everything it is asked to do. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    state: Rc<RefCell<TransportState>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(TransportState {
                connected: true,
                sent: Vec::new(),
                monitoring: Vec::new(),
                pongs: Vec::new(),
            })),
        }
    }
}

impl FakeTransport {
    pub fn set_connected(&self, connected: bool) {
        self.state.borrow_mut().connected = connected;
    }

    pub fn sent(&self) -> Vec<(u16, Bytes)> {
        self.state.borrow().sent.clone()
    }

    pub fn sent_types(&self) -> Vec<u16> {
        self.state.borrow().sent.iter().map(|(t, _)| *t).collect()
    }

    pub fn monitoring(&self) -> Vec<Duration> {
        self.state.borrow().monitoring.clone()
    }

    pub fn pongs(&self) -> Vec<(Ping, usize)> {
        self.state.borrow().pongs.clone()
    }
}

impl ClientTransport for FakeTransport {
    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn send(&mut self, msg_type: u16, payload: Bytes) {
        self.state.borrow_mut().sent.push((msg_type, payload));
    }

    fn start_connectivity_monitoring(&mut self, timeout: Duration) {
        self.state.borrow_mut().monitoring.push(timeout);
    }

    fn handle_pong(&mut self, pong: &Ping, size: usize) {
        self.state.borrow_mut().pongs.push((*pong, size));
    }
}

/// Calls made into [`FakeHooks`].
#[derive(Debug, Default)]
pub struct HookLog {
    pub migrate_connected: Vec<bool>,
    pub semi_seamless_complete: Vec<ConnectionId>,
    pub seamless_requests: Vec<(ConnectionId, u32)>,
    pub roundtrips: Vec<u64>,
}

/// Server hooks with scripted answers.
#[derive(Debug, Clone)]
pub struct FakeHooks {
    pub agent: bool,
    pub accept_seamless: bool,
    pub migrating_in: Rc<Cell<bool>>,
    pub channels: Vec<ChannelEntry>,
    pub migrate_data: Bytes,
    pub log: Rc<RefCell<HookLog>>,
}

impl Default for FakeHooks {
    fn default() -> Self {
        Self {
            agent: false,
            accept_seamless: true,
            migrating_in: Rc::new(Cell::new(false)),
            channels: Vec::new(),
            migrate_data: Bytes::new(),
            log: Rc::new(RefCell::new(HookLog::default())),
        }
    }
}

impl ServerHooks for FakeHooks {
    fn on_migrate_connected(&mut self, seamless: bool) {
        self.log.borrow_mut().migrate_connected.push(seamless);
    }

    fn on_semi_seamless_migrate_complete(&mut self, connection_id: ConnectionId) {
        self.log
            .borrow_mut()
            .semi_seamless_complete
            .push(connection_id);
    }

    fn accept_seamless_destination(
        &mut self,
        connection_id: ConnectionId,
        src_version: u32,
    ) -> bool {
        self.log
            .borrow_mut()
            .seamless_requests
            .push((connection_id, src_version));
        self.accept_seamless
    }

    fn is_migrating_at_target(&self, _connection_id: ConnectionId) -> bool {
        self.migrating_in.get()
    }

    fn has_agent(&self) -> bool {
        self.agent
    }

    fn channels(&self) -> Vec<ChannelEntry> {
        self.channels.clone()
    }

    fn migrate_data(&self) -> Bytes {
        self.migrate_data.clone()
    }

    fn record_roundtrip(&mut self, roundtrip_us: u64) {
        self.log.borrow_mut().roundtrips.push(roundtrip_us);
    }
}

/// Encoder that journals every message type before encoding it for real.
#[derive(Debug, Clone, Default)]
pub struct RecordingEncoder {
    pub journal: Rc<RefCell<Vec<String>>>,
}

impl WireEncoder for RecordingEncoder {
    fn encode(&mut self, message: &Message<'_>, out: &mut BytesMut) -> Result<(), EncodeError> {
        self.journal
            .borrow_mut()
            .push(format!("encode {}", message.message_type()));
        WireMarshaller::new().encode(message, out)
    }
}

#[derive(Debug, Default)]
struct TimerState {
    starts: Vec<Duration>,
    cancels: usize,
    armed: bool,
}

/// Shared view of one fake timer.
#[derive(Debug, Clone, Default)]
pub struct TimerLog {
    state: Rc<RefCell<TimerState>>,
}

impl TimerLog {
    pub fn starts(&self) -> Vec<Duration> {
        self.state.borrow().starts.clone()
    }

    pub fn cancels(&self) -> usize {
        self.state.borrow().cancels
    }

    pub fn is_armed(&self) -> bool {
        self.state.borrow().armed
    }
}

/// Timer that only records calls.
#[derive(Debug)]
pub struct FakeTimer {
    log: TimerLog,
}

impl FakeTimer {
    pub fn new(log: TimerLog) -> Self {
        Self { log }
    }
}

impl Timer for FakeTimer {
    fn start(&mut self, after: Duration) {
        let mut state = self.log.state.borrow_mut();
        state.starts.push(after);
        state.armed = true;
    }

    fn cancel(&mut self) {
        let mut state = self.log.state.borrow_mut();
        state.cancels += 1;
        state.armed = false;
    }
}

/// Factory handing out [`FakeTimer`]s, or failing when `fail` is set.
#[derive(Debug, Clone, Default)]
pub struct FakeTimerFactory {
    pub fail: bool,
    logs: Rc<RefCell<BTreeMap<ConnectionId, TimerLog>>>,
}

impl FakeTimerFactory {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn log(&self, connection_id: ConnectionId) -> Option<TimerLog> {
        self.logs.borrow().get(&connection_id).cloned()
    }

    pub fn created(&self) -> usize {
        self.logs.borrow().len()
    }
}

impl TimerFactory for FakeTimerFactory {
    fn create(&mut self, connection_id: ConnectionId) -> Result<Box<dyn Timer>, TimerError> {
        if self.fail {
            return Err(TimerError::NoRuntime);
        }
        let log = TimerLog::default();
        self.logs.borrow_mut().insert(connection_id, log.clone());
        Ok(Box::new(FakeTimer::new(log)))
    }
}
