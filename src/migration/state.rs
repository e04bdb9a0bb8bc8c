//! Per-client migration phase.
//!
//! ```text
//!             connect (not at target)
//!   Idle ───────────────────────────────▶ WaitConnect ──on_connected──▶ Connected
//!     │                                       ▲                             │
//!     │ connect (migrating in)                │ dst_complete                │ src_complete
//!     ▼                                       │                             ▼
//!   WaitPrevComplete ─────────────────────────┘                           Idle
//! ```
//!
//! `cancel_wait` returns both waiting phases to `Idle`.

/// Migration phase of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationState {
    /// No migration in progress.
    #[default]
    Idle,
    /// A previous migration into this server is still finishing; the
    /// begin message is deferred until it does.
    WaitPrevComplete {
        /// Flavor of the deferred begin.
        seamless: bool,
    },
    /// Begin sent, waiting for the destination connect result.
    WaitConnect,
    /// Destination connect result recorded.
    Connected {
        /// Whether the client reached the destination.
        success: bool,
    },
}

/// What `connect` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Begin should be sent now.
    Begin,
    /// Begin deferred until the previous migration completes.
    Deferred,
}

impl MigrationState {
    /// Start a migration attempt. `migrating_in` reports whether the client
    /// is itself still being migrated into this server.
    pub fn connect(&mut self, seamless: bool, migrating_in: bool) -> ConnectOutcome {
        if migrating_in {
            *self = MigrationState::WaitPrevComplete { seamless };
            ConnectOutcome::Deferred
        } else {
            *self = MigrationState::WaitConnect;
            ConnectOutcome::Begin
        }
    }

    /// Record the destination connect result. Returns `false` when no
    /// result was expected, leaving the phase untouched.
    pub fn on_connected(&mut self, success: bool) -> bool {
        if *self != MigrationState::WaitConnect {
            return false;
        }
        *self = MigrationState::Connected { success };
        true
    }

    /// Abandon a pending attempt. Returns whether a connect result was
    /// being waited for.
    pub fn cancel_wait(&mut self) -> bool {
        match *self {
            MigrationState::WaitConnect => {
                *self = MigrationState::Idle;
                true
            }
            MigrationState::WaitPrevComplete { .. } => {
                *self = MigrationState::Idle;
                false
            }
            _ => false,
        }
    }

    /// The previous migration into this server finished. Returns the
    /// flavor of the deferred begin that must be sent now, if any.
    pub fn dst_complete(&mut self) -> Option<bool> {
        match *self {
            MigrationState::WaitPrevComplete { seamless } => {
                *self = MigrationState::WaitConnect;
                Some(seamless)
            }
            _ => None,
        }
    }

    /// Close the attempt on the source side. Returns whether the client
    /// had connected to the destination. A deferred begin survives.
    pub fn src_complete(&mut self) -> bool {
        let connect_ok = self.connect_ok();
        if !matches!(self, MigrationState::WaitPrevComplete { .. }) {
            *self = MigrationState::Idle;
        }
        connect_ok
    }

    /// Whether a destination connect result is awaited.
    pub fn is_waiting_connect(&self) -> bool {
        *self == MigrationState::WaitConnect
    }

    /// Whether the client reported a successful destination connect.
    pub fn connect_ok(&self) -> bool {
        *self == MigrationState::Connected { success: true }
    }

    /// Whether a begin is deferred behind a previous migration.
    pub fn is_waiting_prev_complete(&self) -> bool {
        matches!(self, MigrationState::WaitPrevComplete { .. })
    }
}
