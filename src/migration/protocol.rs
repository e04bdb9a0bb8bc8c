//! Migration destination and migration data header
//!
//! Every migration data blob starts with an 8-byte header:
//!
//! ```text
//! +0  magic   (LE32, four ASCII bytes)
//! +4  version (LE32)
//! ```

use crate::core::DecodeError;

/// Migration protocol version spoken by this server
pub const MIGRATION_PROTOCOL_VERSION: u32 = 1;

/// Size of [`MigrateDataHeader`] on the wire
pub const MIGRATE_DATA_HEADER_SIZE: usize = 8;

const fn magic_const(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

/// Magic numbers of the per-channel migration data blobs
pub mod magic {
    use super::magic_const;

    /// Main channel
    pub const MAIN: u32 = magic_const(b"MNMD");
    /// Spice VMC channel
    pub const SPICEVMC: u32 = magic_const(b"SVMD");
    /// Smartcard channel
    pub const SMARTCARD: u32 = magic_const(b"SCMD");
    /// Display channel
    pub const DISPLAY: u32 = magic_const(b"DCMD");
    /// Inputs channel
    pub const INPUTS: u32 = magic_const(b"ICMD");
}

/// Where clients should connect during a migration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationTarget {
    /// Destination host name or address
    pub host: String,
    /// Plain port
    pub port: u16,
    /// TLS port
    pub sport: u16,
    /// Expected certificate subject of the destination, if pinned
    pub cert_subject: Option<String>,
}

impl MigrationTarget {
    /// Create a target without a pinned certificate subject
    pub fn new(host: impl Into<String>, port: u16, sport: u16) -> Self {
        Self {
            host: host.into(),
            port,
            sport,
            cert_subject: None,
        }
    }

    /// Pin the destination certificate subject
    pub fn with_cert_subject(mut self, subject: impl Into<String>) -> Self {
        self.cert_subject = Some(subject.into());
        self
    }
}

/// Header in front of every migration data blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateDataHeader {
    /// Channel magic
    pub magic: u32,
    /// Blob format version
    pub version: u32,
}

impl MigrateDataHeader {
    /// Create a header
    pub fn new(magic: u32, version: u32) -> Self {
        Self { magic, version }
    }

    /// Encode to wire bytes
    pub fn to_bytes(&self) -> [u8; MIGRATE_DATA_HEADER_SIZE] {
        let mut out = [0u8; MIGRATE_DATA_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out
    }

    /// Decode from the front of a blob
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < MIGRATE_DATA_HEADER_SIZE {
            return Err(DecodeError::TooShort {
                expected: MIGRATE_DATA_HEADER_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            magic: u32::from_le_bytes(data[0..4].try_into().expect("length checked")),
            version: u32::from_le_bytes(data[4..8].try_into().expect("length checked")),
        })
    }

    /// Check the magic and that the version is not newer than `max_version`
    pub fn validate(&self, magic: u32, max_version: u32) -> Result<(), DecodeError> {
        if self.magic != magic {
            return Err(DecodeError::BadMagic {
                expected: magic,
                actual: self.magic,
            });
        }
        if self.version > max_version {
            return Err(DecodeError::UnsupportedVersion {
                version: self.version,
                max: max_version,
            });
        }
        Ok(())
    }
}
