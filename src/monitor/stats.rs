//! Roundtrip statistics.

/// Running roundtrip statistics in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundtripStat {
    /// Last sample
    pub value: u64,
    /// Smallest sample
    pub min: u64,
    /// Largest sample
    pub max: u64,
    /// Mean of all samples
    pub average: u64,
    /// Number of samples
    pub count: u64,
}

impl RoundtripStat {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample
    pub fn update(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.average = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
            // running mean without summing every sample
            let total = u128::from(self.average) * u128::from(self.count) + u128::from(value);
            self.average = (total / u128::from(self.count + 1)) as u64;
        }
        self.value = value;
        self.count += 1;
    }

    /// Forget all samples
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
