use std::time::Duration;

/// Polling tier of a metric class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Fast,
    Medium,
    Slow,
}

/// Cadence per tier. Cache TTLs are derived as half the cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceProfile {
    pub fast: Duration,
    pub medium: Duration,
    pub slow: Duration,
}

impl Default for CadenceProfile {
    fn default() -> Self {
        Self {
            fast: Duration::from_millis(1_000),
            medium: Duration::from_millis(8_000),
            slow: Duration::from_millis(2_000),
        }
    }
}

impl CadenceProfile {
    pub fn from_millis(fast: u64, medium: u64, slow: u64) -> Self {
        Self {
            fast: Duration::from_millis(fast.max(1)),
            medium: Duration::from_millis(medium.max(1)),
            slow: Duration::from_millis(slow.max(1)),
        }
    }

    pub fn cadence(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Fast => self.fast,
            Tier::Medium => self.medium,
            Tier::Slow => self.slow,
        }
    }

    pub fn ttl(&self, tier: Tier) -> Duration {
        self.cadence(tier) / 2
    }
}
