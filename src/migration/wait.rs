//! Channel-wide count of clients waiting for the destination connect.

/// Number of clients of one channel still waiting for their destination
/// connect result during a migration attempt.
///
/// The counter is shared by every session of the channel and only touched
/// from the channel's dispatch context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationWaitCounter {
    count: u32,
}

impl MigrationWaitCounter {
    /// Create a zeroed counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Whether no client is waiting
    pub fn is_zero(&self) -> bool {
        self.count == 0
    }

    /// A client entered the wait.
    pub fn enter(&mut self) {
        self.count += 1;
    }

    /// Overwrite the count (start of a seamless attempt).
    pub fn set(&mut self, count: u32) {
        self.count = count;
    }

    /// A client left the wait. Returns `true` when it was the last one.
    ///
    /// # Panics
    ///
    /// Panics if no client is waiting.
    pub fn leave(&mut self) -> bool {
        assert!(
            self.count > 0,
            "migration wait counter decremented below zero"
        );
        self.count -= 1;
        self.count == 0
    }

    /// Forget every waiting client.
    pub fn reset(&mut self) {
        self.count = 0;
    }
}
