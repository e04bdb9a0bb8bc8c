//! The main channel: every client session plus the state they share.

use std::collections::BTreeMap;
use std::rc::Rc;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use super::client::{ChannelContext, MainChannelClient};
use crate::config::SessionConfig;
use crate::core::{
    CapabilitySet, ChannelError, ChannelResult, ClientTransport, Clock, ConnectionId,
    MonotonicClock, ServerHooks, TimerFactory, main_cap,
};
use crate::migration::{MigrationTarget, MigrationWaitCounter};
use crate::pipe::{ClientMessage, MouseModeInfo, SendContext, WireEncoder, WireMarshaller};

/// Main channel of one server.
///
/// Sessions never point back at the channel. Operations that need shared
/// state borrow it from here for the duration of the call.
pub struct MainChannel {
    clients: BTreeMap<ConnectionId, MainChannelClient>,
    mig_wait: MigrationWaitCounter,
    mig_target: MigrationTarget,
    hooks: Box<dyn ServerHooks>,
    encoder: Box<dyn WireEncoder>,
    clock: Rc<dyn Clock>,
    timers: Box<dyn TimerFactory>,
    config: SessionConfig,
    buf: BytesMut,
}

impl MainChannel {
    /// Create a channel using the reference marshaller and a monotonic clock.
    pub fn new(
        config: SessionConfig,
        hooks: Box<dyn ServerHooks>,
        timers: Box<dyn TimerFactory>,
    ) -> ChannelResult<Self> {
        config.validate()?;
        Ok(Self {
            clients: BTreeMap::new(),
            mig_wait: MigrationWaitCounter::new(),
            mig_target: MigrationTarget::default(),
            hooks,
            encoder: Box::new(WireMarshaller::new()),
            clock: Rc::new(MonotonicClock::new()),
            timers,
            config,
            buf: BytesMut::new(),
        })
    }

    /// Replace the wire encoder.
    pub fn with_encoder(mut self, encoder: Box<dyn WireEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current migration destination.
    pub fn migration_target(&self) -> &MigrationTarget {
        &self.mig_target
    }

    /// Clients still waiting for their destination connect result.
    pub fn mig_wait_count(&self) -> u32 {
        self.mig_wait.count()
    }

    /// Number of attached clients.
    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    /// Look up a client.
    pub fn client(&self, connection_id: ConnectionId) -> Option<&MainChannelClient> {
        self.clients.get(&connection_id)
    }

    /// Look up a client for pushes.
    pub fn client_mut(&mut self, connection_id: ConnectionId) -> Option<&mut MainChannelClient> {
        self.clients.get_mut(&connection_id)
    }

    /// Iterate over the attached clients.
    pub fn clients(&self) -> impl Iterator<Item = &MainChannelClient> {
        self.clients.values()
    }

    /// Attach a new client.
    pub fn add_client(
        &mut self,
        connection_id: ConnectionId,
        transport: Box<dyn ClientTransport>,
        caps: CapabilitySet,
    ) -> ChannelResult<&mut MainChannelClient> {
        if self.clients.contains_key(&connection_id) {
            return Err(ChannelError::DuplicateClient(connection_id));
        }
        let client = MainChannelClient::new(
            connection_id,
            transport,
            caps,
            self.config.clone(),
            Rc::clone(&self.clock),
            self.timers.as_mut(),
        )?;
        info!(connection_id, "client attached");
        Ok(self.clients.entry(connection_id).or_insert(client))
    }

    /// Detach a client. Queued items are released and its timer cancelled
    /// when the returned session is dropped.
    pub fn remove_client(&mut self, connection_id: ConnectionId) -> Option<MainChannelClient> {
        let client = self.clients.remove(&connection_id);
        if client.is_some() {
            info!(connection_id, "client detached");
        }
        client
    }

    fn with_client<R>(
        &mut self,
        connection_id: ConnectionId,
        f: impl FnOnce(&mut MainChannelClient, &mut ChannelContext<'_>) -> R,
    ) -> ChannelResult<R> {
        let num_clients = self.clients.len();
        let client = self
            .clients
            .get_mut(&connection_id)
            .ok_or(ChannelError::UnknownClient(connection_id))?;
        let mut ctx = ChannelContext {
            mig_wait: &mut self.mig_wait,
            hooks: self.hooks.as_mut(),
            num_clients,
        };
        Ok(f(client, &mut ctx))
    }

    // ---- inbound ----

    /// Decode and route a raw client message.
    pub fn handle_message(
        &mut self,
        connection_id: ConnectionId,
        msg_type: u16,
        payload: &[u8],
    ) -> ChannelResult<()> {
        let message = ClientMessage::decode(msg_type, payload).inspect_err(|err| {
            warn!(connection_id, msg_type, %err, "dropping undecodable message");
        })?;
        self.dispatch(connection_id, message)
    }

    /// Route a decoded client message.
    pub fn dispatch(
        &mut self,
        connection_id: ConnectionId,
        message: ClientMessage,
    ) -> ChannelResult<()> {
        self.with_client(connection_id, |client, ctx| {
            client.handle_message(ctx, message)
        })
    }

    /// A client's keep-alive timer expired.
    pub fn on_ping_timer(&mut self, connection_id: ConnectionId) -> ChannelResult<()> {
        self.with_client(connection_id, |client, _| client.on_ping_timer())
    }

    /// Start a network test on one client.
    pub fn start_net_test(
        &mut self,
        connection_id: ConnectionId,
        test_rate: bool,
    ) -> ChannelResult<bool> {
        self.with_client(connection_id, |client, _| client.start_net_test(test_rate))
    }

    // ---- migration ----

    /// Start a migration to `target`. Returns the number of clients that
    /// must report their destination connect.
    ///
    /// # Panics
    ///
    /// Panics if `try_seamless` is set while more than one client is
    /// attached.
    pub fn migrate_connect(&mut self, target: MigrationTarget, try_seamless: bool) -> u32 {
        self.mig_target = target;
        self.mig_wait.reset();

        if self.clients.is_empty() {
            debug!("no clients, nothing to migrate");
            return 0;
        }

        let num_clients = self.clients.len();
        if try_seamless {
            assert_eq!(num_clients, 1, "seamless migration with several clients");
            let seamless_capable = self
                .clients
                .values()
                .all(|client| client.caps().has(main_cap::SEAMLESS_MIGRATE));
            if seamless_capable {
                self.mig_wait.set(1);
                let mut ctx = ChannelContext {
                    mig_wait: &mut self.mig_wait,
                    hooks: self.hooks.as_mut(),
                    num_clients,
                };
                for client in self.clients.values_mut() {
                    client.connect_seamless(&mut ctx);
                }
                return self.mig_wait.count();
            }
            info!("client does not support seamless migration, trying semi-seamless");
        }

        let mut ctx = ChannelContext {
            mig_wait: &mut self.mig_wait,
            hooks: self.hooks.as_mut(),
            num_clients,
        };
        for client in self.clients.values_mut() {
            client.connect_semi_seamless(&mut ctx);
        }
        self.mig_wait.count()
    }

    /// Abandon the migration attempt on every client.
    pub fn migrate_cancel_wait(&mut self) {
        for client in self.clients.values_mut() {
            client.migrate_cancel_wait();
        }
        self.mig_wait.reset();
    }

    /// The previous migration into this server finished.
    pub fn migrate_dst_complete(&mut self) {
        let num_clients = self.clients.len();
        for client in self.clients.values_mut() {
            client.migrate_dst_complete(num_clients);
        }
    }

    /// Source side end of migration. Returns whether any client asks the
    /// source to wait for it to finish switching.
    pub fn migrate_src_complete(&mut self, success: bool) -> bool {
        let mut finalize = 0usize;
        for client in self.clients.values_mut() {
            if client.migrate_src_complete(success) {
                finalize += 1;
            }
        }
        debug!(success, finalize, "migration completed on source");
        finalize > 0
    }

    // ---- channel-wide pushes ----

    /// Queue a mouse mode change for every client.
    pub fn push_mouse_mode(&mut self, info: MouseModeInfo) {
        for client in self.clients.values_mut() {
            client.push_mouse_mode(info);
        }
    }

    /// Queue a multimedia time update for every client.
    pub fn push_multi_media_time(&mut self, time: u32) {
        for client in self.clients.values_mut() {
            client.push_multi_media_time(time);
        }
    }

    /// Queue the channel list for one client.
    pub fn push_channels_list(&mut self, connection_id: ConnectionId) -> ChannelResult<()> {
        self.with_client(connection_id, |client, _| client.push_channels_list())
    }

    /// Tell every client the agent is attached.
    pub fn push_agent_connected(&mut self) {
        for client in self.clients.values_mut() {
            client.push_agent_connected();
        }
    }

    /// Tell every client the agent went away.
    pub fn push_agent_disconnected(&mut self) {
        for client in self.clients.values_mut() {
            client.push_agent_disconnected();
        }
    }

    /// Queue the migration data blob for every client.
    pub fn push_migrate_data(&mut self) {
        for client in self.clients.values_mut() {
            client.push_migrate_data();
        }
    }

    // ---- sending ----

    /// Drain one client's pipe. Returns how many items were sent.
    pub fn flush_client(&mut self, connection_id: ConnectionId) -> ChannelResult<usize> {
        let client = self
            .clients
            .get_mut(&connection_id)
            .ok_or(ChannelError::UnknownClient(connection_id))?;
        let mut ctx = SendContext {
            encoder: self.encoder.as_mut(),
            hooks: self.hooks.as_ref(),
            target: &self.mig_target,
            buf: &mut self.buf,
        };
        Ok(client.flush(&mut ctx)?)
    }

    /// Drain every client's pipe. Returns how many items were sent.
    ///
    /// A client whose head item fails to encode loses that item and is
    /// skipped for the rest of the pass. The other clients are still
    /// drained, then the first error is returned.
    pub fn flush_all(&mut self) -> ChannelResult<usize> {
        let mut ctx = SendContext {
            encoder: self.encoder.as_mut(),
            hooks: self.hooks.as_ref(),
            target: &self.mig_target,
            buf: &mut self.buf,
        };
        let mut sent = 0;
        let mut failure = None;
        for (&connection_id, client) in self.clients.iter_mut() {
            match client.flush(&mut ctx) {
                Ok(count) => sent += count,
                Err(err) => {
                    warn!(connection_id, %err, "failed to encode item, dropped");
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err.into()),
            None => Ok(sent),
        }
    }
}

impl std::fmt::Debug for MainChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainChannel")
            .field("clients", &self.clients.len())
            .field("mig_wait", &self.mig_wait)
            .field("mig_target", &self.mig_target)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
