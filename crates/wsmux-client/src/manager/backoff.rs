use std::time::Duration;

/// Capped exponential backoff: `min(cap, base * 2^n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap: cap.max(base) }
    }

    /// Delay before the next reopen, given the number of consecutive failures
    /// that preceded the one just observed.
    pub fn delay(&self, failures_before: u32) -> Duration {
        let factor = 1u32.checked_shl(failures_before).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }
}
