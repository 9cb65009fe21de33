//! Promotion of wrapping 32-bit hardware counters to monotonic 64-bit values.

const WRAP_HYSTERESIS: u64 = 0x7FFF_FFFF;

/// Tracks wraparounds of a counter that wraps at 2^32.
///
/// Any backward step is taken to be a wrap, so the promoted value never decreases while
/// the raw samples advance by less than 2^32 between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WrapCounter {
    last_raw: u64,
    wraps: u64,
}

impl WrapCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw sample and return the promoted value.
    pub fn advance(&mut self, raw: u64) -> u64 {
        if self.last_raw > raw {
            self.wraps += 1;
        }
        self.promote(raw)
    }

    /// Like [`WrapCounter::advance`], but a backward step only counts as a wrap when the
    /// previous sample sat in the upper half of the range and the jump spans at least half
    /// of it. Small backward jitter is passed through instead.
    pub fn advance_tolerant(&mut self, raw: u64) -> u64 {
        if self.last_raw > raw
            && self.last_raw > WRAP_HYSTERESIS
            && self.last_raw - raw >= WRAP_HYSTERESIS
        {
            tracing::info!(last_raw = self.last_raw, raw, "head position wrapped around");
            self.wraps += 1;
        }
        self.promote(raw)
    }

    /// Last raw sample seen.
    pub fn last_raw(&self) -> u64 {
        self.last_raw
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn promote(&mut self, raw: u64) -> u64 {
        self.last_raw = raw;
        raw.wrapping_add(self.wraps << 32)
    }
}
