//! Main channel client: the per-connection session.
//!
//! A session owns its outgoing pipe, net test, keep-alive timer and
//! migration phase. State shared with the other sessions of the channel
//! (the migration wait counter, server hooks) is lent in through
//! [`ChannelContext`] for the duration of one call.

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::core::{
    CapabilitySet, ChannelResult, ClientTransport, Clock, ConnectionId, EncodeError,
    NET_TEST_WARMUP_BYTES, ServerHooks, TimerFactory, main_cap,
};
use crate::migration::{ConnectOutcome, MigrationState, MigrationWaitCounter};
use crate::monitor::{
    KeepAlive, NetTest, NetTestEvent, NetTestStage, PingCommand, RoundtripStat, Tick,
};
use crate::pipe::{
    AgentData, ClientMessage, Flushed, InitParams, MouseModeInfo, OutgoingItem, OutgoingQueue,
    Ping, SendContext,
};

/// Channel state lent to a session.
pub struct ChannelContext<'a> {
    /// Clients of the channel still waiting for the destination connect.
    pub mig_wait: &'a mut MigrationWaitCounter,
    /// Server callbacks.
    pub hooks: &'a mut dyn ServerHooks,
    /// Number of clients attached to the channel.
    pub num_clients: usize,
}

/// One client of the main channel.
pub struct MainChannelClient {
    connection_id: ConnectionId,
    transport: Box<dyn ClientTransport>,
    caps: CapabilitySet,
    clock: Rc<dyn Clock>,
    config: SessionConfig,
    queue: OutgoingQueue,
    net_test: NetTest,
    keepalive: KeepAlive,
    migration: MigrationState,
    stats: Option<RoundtripStat>,
}

impl MainChannelClient {
    /// Create a session.
    ///
    /// With statistics enabled a keep-alive timer is created up front;
    /// failing to create it fails the session.
    pub fn new(
        connection_id: ConnectionId,
        transport: Box<dyn ClientTransport>,
        caps: CapabilitySet,
        config: SessionConfig,
        clock: Rc<dyn Clock>,
        timers: &mut dyn TimerFactory,
    ) -> ChannelResult<Self> {
        let timer = if config.statistics {
            Some(timers.create(connection_id)?)
        } else {
            None
        };
        let stats = config.statistics.then(RoundtripStat::new);

        debug!(connection_id, statistics = config.statistics, "main channel client created");
        Ok(Self {
            connection_id,
            transport,
            caps,
            clock,
            queue: OutgoingQueue::new(connection_id),
            net_test: NetTest::new(config.net_test_bytes),
            keepalive: KeepAlive::new(timer, config.ping_interval),
            migration: MigrationState::Idle,
            stats,
            config,
        })
    }

    // ---- accessors ----

    /// Connection id assigned at link time.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Remote capabilities.
    pub fn caps(&self) -> &CapabilitySet {
        &self.caps
    }

    /// Whether the transport is still connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Measured bitrate in bits per second, `u64::MAX` when unknown.
    pub fn bitrate(&self) -> u64 {
        self.net_test.bitrate()
    }

    /// Measured latency in whole milliseconds.
    pub fn roundtrip_ms(&self) -> u64 {
        self.net_test.roundtrip_ms()
    }

    /// Measured latency in microseconds.
    pub fn latency_us(&self) -> u64 {
        self.net_test.latency_us()
    }

    /// Whether a net test has completed.
    pub fn is_network_info_initialized(&self) -> bool {
        self.net_test.is_complete()
    }

    /// Whether the measured bitrate is below the configured threshold.
    pub fn is_low_bandwidth(&self) -> bool {
        self.net_test.is_low_bandwidth(self.config.low_bandwidth_threshold)
    }

    /// Net test stage.
    pub fn net_test_stage(&self) -> NetTestStage {
        self.net_test.stage()
    }

    /// Id of the pong the net test waits for, 0 when idle.
    pub fn net_test_id(&self) -> u32 {
        self.net_test.id()
    }

    /// Migration phase.
    pub fn migration_state(&self) -> MigrationState {
        self.migration
    }

    /// Roundtrip statistics, when enabled.
    pub fn stats(&self) -> Option<&RoundtripStat> {
        self.stats.as_ref()
    }

    /// Keep-alive interval.
    pub fn ping_interval(&self) -> Duration {
        self.keepalive.interval()
    }

    /// Whether the init message has been sent.
    pub fn init_sent(&self) -> bool {
        self.queue.init_sent()
    }

    /// Whether this session accepted a seamless migration as destination.
    pub fn is_seamless_destination(&self) -> bool {
        self.queue.is_seamless_destination()
    }

    /// Number of queued items.
    pub fn pending_items(&self) -> usize {
        self.queue.len()
    }

    /// Message types of the queued items, head first.
    pub fn pending_types(&self) -> Vec<u16> {
        self.queue.pending_types()
    }

    // ---- outgoing pushes ----

    fn push(&mut self, item: OutgoingItem) {
        self.queue.push(item);
    }

    /// Queue a ping with `size` bytes of padding.
    pub fn push_ping(&mut self, size: usize) {
        self.push(OutgoingItem::Ping { size });
    }

    /// Queue an agent token grant.
    pub fn push_agent_tokens(&mut self, tokens: u32) {
        self.push(OutgoingItem::AgentTokens { tokens });
    }

    /// Queue agent data. The buffer belongs to the pipe from here on.
    pub fn push_agent_data(&mut self, data: AgentData) {
        self.push(OutgoingItem::AgentData(data));
    }

    /// Queue the session init message.
    pub fn push_init(&mut self, params: InitParams) {
        self.push(OutgoingItem::Init {
            connection_id: self.connection_id,
            params,
        });
    }

    /// Queue the VM name. Skipped for clients without name/uuid support.
    pub fn push_name(&mut self, name: &str) -> bool {
        if !self.caps.has(main_cap::NAME_AND_UUID) {
            return false;
        }
        self.push(OutgoingItem::Name(name.to_owned()));
        true
    }

    /// Queue the VM UUID. Skipped for clients without name/uuid support.
    pub fn push_uuid(&mut self, uuid: Uuid) -> bool {
        if !self.caps.has(main_cap::NAME_AND_UUID) {
            return false;
        }
        self.push(OutgoingItem::Uuid(uuid));
        true
    }

    /// Queue a notification.
    pub fn push_notify(&mut self, text: &str) {
        self.push(OutgoingItem::Notify(text.to_owned()));
    }

    /// Queue a mouse mode change.
    pub fn push_mouse_mode(&mut self, info: MouseModeInfo) {
        self.push(OutgoingItem::MouseMode(info));
    }

    /// Queue a multimedia time update.
    pub fn push_multi_media_time(&mut self, time: u32) {
        self.push(OutgoingItem::MultiMediaTime { time });
    }

    /// Queue the channel list.
    pub fn push_channels_list(&mut self) {
        self.push(OutgoingItem::ChannelsList);
    }

    /// Queue an agent-connected notice. Only clients that understand the
    /// token-carrying flavor get one.
    pub fn push_agent_connected(&mut self) -> bool {
        if !self.caps.has(main_cap::AGENT_CONNECTED_TOKENS) {
            debug!(
                connection_id = self.connection_id,
                "client lacks agent-connected-tokens, not notified"
            );
            return false;
        }
        self.push(OutgoingItem::AgentConnected);
        true
    }

    /// Queue an agent-disconnected notice.
    pub fn push_agent_disconnected(&mut self) {
        self.push(OutgoingItem::AgentDisconnected);
    }

    /// Queue the migration data blob.
    pub fn push_migrate_data(&mut self) {
        self.push(OutgoingItem::MigrateData);
    }

    // ---- sending ----

    /// Encode and send the head of the pipe.
    pub fn flush_next(&mut self, ctx: &mut SendContext<'_>) -> Result<Flushed, EncodeError> {
        self.queue
            .flush_next(ctx, self.clock.as_ref(), self.transport.as_mut())
    }

    /// Drain the pipe. Returns how many items were sent.
    pub fn flush(&mut self, ctx: &mut SendContext<'_>) -> Result<usize, EncodeError> {
        let mut sent = 0;
        loop {
            match self.flush_next(ctx)? {
                Flushed::Empty => return Ok(sent),
                Flushed::Sent(_) => sent += 1,
                Flushed::Dropped(_) => {}
            }
        }
    }

    // ---- network test and connectivity ----

    /// Start a network test, or plain connectivity monitoring when
    /// `test_rate` is false. Returns `false` if a test is already running.
    pub fn start_net_test(&mut self, test_rate: bool) -> bool {
        if self.net_test.is_active() {
            debug!(connection_id = self.connection_id, "net test already running");
            return false;
        }
        if !test_rate {
            self.start_connectivity_monitoring();
            return true;
        }

        let first_id = self.queue.upcoming_ping_id();
        self.push_ping(NET_TEST_WARMUP_BYTES);
        self.push_ping(0);
        self.push_ping(self.net_test.probe_bytes());
        self.net_test.begin(first_id);
        debug!(connection_id = self.connection_id, first_id, "net test started");
        true
    }

    fn start_connectivity_monitoring(&mut self) {
        debug!(connection_id = self.connection_id, "connectivity monitoring armed");
        self.transport
            .start_connectivity_monitoring(self.config.connectivity_timeout);
    }

    /// Handle a pong.
    pub fn handle_pong(&mut self, hooks: &mut dyn ServerHooks, ping: &Ping, size: usize) {
        let roundtrip = self.clock.now_us().saturating_sub(ping.timestamp);

        match self.net_test.on_pong(ping.id, roundtrip) {
            NetTestEvent::Unmatched => {
                self.transport.handle_pong(ping, size);
                if let Some(stats) = self.stats.as_mut() {
                    stats.update(roundtrip);
                    hooks.record_roundtrip(roundtrip);
                }
            }
            event if event.arms_connectivity() => self.start_connectivity_monitoring(),
            _ => {}
        }
    }

    /// Apply a keep-alive control command. Ignored without statistics.
    pub fn ping_command(&mut self, command: PingCommand) {
        if !self.keepalive.is_enabled() {
            debug!(
                connection_id = self.connection_id,
                ?command,
                "statistics disabled, ping command ignored"
            );
            return;
        }
        match command {
            PingCommand::Once => self.push_ping(0),
            PingCommand::On { interval } => {
                if let Some(interval) = interval {
                    self.keepalive.set_interval(interval);
                }
                self.keepalive.start();
            }
            PingCommand::Off => self.keepalive.cancel(),
        }
    }

    /// Keep-alive timer expired. Ignored when keep-alive is disabled.
    pub fn on_ping_timer(&mut self) {
        if !self.keepalive.is_enabled() {
            debug!(
                connection_id = self.connection_id,
                "keep-alive disabled, ping timer ignored"
            );
            return;
        }
        if self.keepalive.tick(self.transport.is_connected()) == Tick::Ping {
            self.push_ping(0);
        }
    }

    /// Change the keep-alive interval. Zero is ignored.
    pub fn set_ping_interval(&mut self, interval: Duration) {
        self.keepalive.set_interval(interval);
    }

    // ---- inbound dispatch ----

    /// Route a decoded client message.
    pub fn handle_message(&mut self, ctx: &mut ChannelContext<'_>, message: ClientMessage) {
        match message {
            ClientMessage::Pong { ping, size } => self.handle_pong(ctx.hooks, &ping, size),
            ClientMessage::MigrateConnected => self.handle_migrate_connected(ctx, true, false),
            ClientMessage::MigrateConnectedSeamless => {
                self.handle_migrate_connected(ctx, true, true)
            }
            ClientMessage::MigrateConnectError => self.handle_migrate_connected(ctx, false, false),
            ClientMessage::MigrateEnd => self.handle_migrate_end(ctx.hooks),
            ClientMessage::MigrateDstDoSeamless { src_version } => {
                self.migrate_dst_do_seamless(ctx.hooks, src_version)
            }
        }
    }

    // ---- migration ----

    /// Begin a semi-seamless migration. Returns `false` if the client does
    /// not support it.
    pub fn connect_semi_seamless(&mut self, ctx: &mut ChannelContext<'_>) -> bool {
        if !self.caps.has(main_cap::SEMI_SEAMLESS_MIGRATE) {
            return false;
        }
        let migrating_in = ctx.hooks.is_migrating_at_target(self.connection_id);
        match self.migration.connect(false, migrating_in) {
            ConnectOutcome::Deferred => info!(
                connection_id = self.connection_id,
                "wait till previous migration completes"
            ),
            ConnectOutcome::Begin => {
                info!(connection_id = self.connection_id, "migrate begin");
                self.push(OutgoingItem::MigrateBegin);
            }
        }
        ctx.mig_wait.enter();
        true
    }

    /// Begin a seamless migration.
    ///
    /// # Panics
    ///
    /// Panics if the client does not support seamless migration.
    pub fn connect_seamless(&mut self, ctx: &mut ChannelContext<'_>) {
        assert!(
            self.caps.has(main_cap::SEAMLESS_MIGRATE),
            "seamless migration requested for a client without support"
        );
        let migrating_in = ctx.hooks.is_migrating_at_target(self.connection_id);
        match self.migration.connect(true, migrating_in) {
            ConnectOutcome::Deferred => info!(
                connection_id = self.connection_id,
                "wait till previous migration completes"
            ),
            ConnectOutcome::Begin => {
                info!(connection_id = self.connection_id, "migrate begin seamless");
                self.push(OutgoingItem::MigrateBeginSeamless);
            }
        }
    }

    /// The client reported the outcome of connecting to the destination.
    ///
    /// # Panics
    ///
    /// Panics on a seamless result while other clients are waiting, or if
    /// the wait counter would underflow.
    pub fn handle_migrate_connected(
        &mut self,
        ctx: &mut ChannelContext<'_>,
        success: bool,
        seamless: bool,
    ) {
        info!(
            connection_id = self.connection_id,
            success, seamless, "client connected to destination"
        );
        if self.migration.on_connected(success) {
            assert!(
                !seamless || ctx.mig_wait.count() == 1,
                "seamless migrate-connected with {} clients waiting",
                ctx.mig_wait.count()
            );
            if ctx.mig_wait.leave() {
                ctx.hooks.on_migrate_connected(seamless && success);
            }
        } else if success {
            info!(
                connection_id = self.connection_id,
                "unexpected connect result, migrate cancel"
            );
            self.push(OutgoingItem::MigrateCancel);
        }
    }

    /// Destination side: the client asks to resume seamlessly from a
    /// source speaking `src_version`.
    pub fn migrate_dst_do_seamless(&mut self, hooks: &mut dyn ServerHooks, src_version: u32) {
        if hooks.accept_seamless_destination(self.connection_id, src_version) {
            self.queue.set_seamless_destination();
            self.push(OutgoingItem::MigrateDstSeamlessAck);
        } else {
            self.push(OutgoingItem::MigrateDstSeamlessNack);
        }
    }

    /// Abandon the pending migration attempt.
    pub fn migrate_cancel_wait(&mut self) {
        if self.migration.cancel_wait() {
            info!(connection_id = self.connection_id, "cancel wait connect");
        }
    }

    /// The previous migration into this server finished; send the
    /// deferred begin, if any.
    ///
    /// # Panics
    ///
    /// Panics if a deferred seamless begin is sent on a channel with more
    /// than one client.
    pub fn migrate_dst_complete(&mut self, num_clients: usize) {
        let Some(seamless) = self.migration.dst_complete() else {
            return;
        };
        if seamless {
            assert_eq!(num_clients, 1, "seamless migration with several clients");
            self.push(OutgoingItem::MigrateBeginSeamless);
        } else {
            self.push(OutgoingItem::MigrateBegin);
        }
        info!(connection_id = self.connection_id, seamless, "deferred migrate begin sent");
    }

    /// Source side: the migration ended. Returns `true` when the source
    /// should wait for this client to finish switching.
    pub fn migrate_src_complete(&mut self, success: bool) -> bool {
        let semi_seamless = self.caps.has(main_cap::SEMI_SEAMLESS_MIGRATE);
        let connect_ok = self.migration.src_complete();

        if semi_seamless && connect_ok {
            if success {
                info!(connection_id = self.connection_id, "migrate end");
                self.push(OutgoingItem::MigrateEnd);
                return true;
            }
            info!(connection_id = self.connection_id, "migrate cancel");
            self.push(OutgoingItem::MigrateCancel);
        } else if success {
            info!(connection_id = self.connection_id, "switch host");
            self.push(OutgoingItem::MigrateSwitchHost);
        }
        false
    }

    /// Destination side: the client finished a semi-seamless migration.
    pub fn handle_migrate_end(&mut self, hooks: &mut dyn ServerHooks) {
        if !hooks.is_migrating_at_target(self.connection_id) {
            warn!(connection_id = self.connection_id, "unexpected migrate end");
            return;
        }
        if !self.caps.has(main_cap::SEMI_SEAMLESS_MIGRATE) {
            warn!(
                connection_id = self.connection_id,
                "unexpected migrate end, client does not support semi-seamless migration"
            );
            return;
        }
        hooks.on_semi_seamless_migrate_complete(self.connection_id);
    }
}

impl std::fmt::Debug for MainChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainChannelClient")
            .field("connection_id", &self.connection_id)
            .field("queue", &self.queue)
            .field("net_test", &self.net_test)
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}
