//! Migration layer: destination info, data header, per-client phase and
//! the channel-wide wait counter.

mod protocol;
mod state;
mod wait;

pub use protocol::{
    MIGRATE_DATA_HEADER_SIZE, MIGRATION_PROTOCOL_VERSION, MigrateDataHeader, MigrationTarget,
    magic,
};
pub use state::{ConnectOutcome, MigrationState};
pub use wait::MigrationWaitCounter;
