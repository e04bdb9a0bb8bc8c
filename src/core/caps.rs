//! Remote capability sets.
//!
//! Capabilities are advertised at link time as arrays of 32-bit words,
//! one bit per capability. Common capabilities apply to every channel;
//! channel capabilities are specific to the main channel.

/// Main channel capability bit numbers.
pub mod main_cap {
    /// Client can pre-connect to the migration destination.
    pub const SEMI_SEAMLESS_MIGRATE: u32 = 0;
    /// Client understands the name and UUID messages.
    pub const NAME_AND_UUID: u32 = 1;
    /// Client understands agent-connected-with-tokens.
    pub const AGENT_CONNECTED_TOKENS: u32 = 2;
    /// Client can resume the session seamlessly on the destination.
    pub const SEAMLESS_MIGRATE: u32 = 3;
}

/// Capabilities advertised by a remote peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    common: Vec<u32>,
    channel: Vec<u32>,
}

impl CapabilitySet {
    /// Build from the common and channel-specific capability words.
    pub fn new(common: Vec<u32>, channel: Vec<u32>) -> Self {
        Self { common, channel }
    }

    /// Build a channel capability set from bit numbers (no common caps).
    pub fn from_caps(caps: &[u32]) -> Self {
        let mut set = Self::default();
        for &cap in caps {
            set.add(cap);
        }
        set
    }

    /// Add a channel capability.
    pub fn add(&mut self, cap: u32) {
        set_bit(&mut self.channel, cap);
    }

    /// Add a common capability.
    pub fn add_common(&mut self, cap: u32) {
        set_bit(&mut self.common, cap);
    }

    /// Check a channel capability.
    pub fn has(&self, cap: u32) -> bool {
        test_bit(&self.channel, cap)
    }

    /// Check a common capability.
    pub fn has_common(&self, cap: u32) -> bool {
        test_bit(&self.common, cap)
    }

    /// Raw channel capability words.
    pub fn channel_words(&self) -> &[u32] {
        &self.channel
    }

    /// Raw common capability words.
    pub fn common_words(&self) -> &[u32] {
        &self.common
    }
}

fn test_bit(words: &[u32], cap: u32) -> bool {
    words
        .get((cap / 32) as usize)
        .is_some_and(|word| word & (1 << (cap % 32)) != 0)
}

fn set_bit(words: &mut Vec<u32>, cap: u32) {
    let idx = (cap / 32) as usize;
    if words.len() <= idx {
        words.resize(idx + 1, 0);
    }
    words[idx] |= 1 << (cap % 32);
}
