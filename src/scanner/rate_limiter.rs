//! Send pacing for the ICMP sweep.
//!
//! A token bucket with a burst of one gives a fixed inter-send delay, so a
//! sweep never floods the local segment.

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Paces outgoing packets to a maximum rate.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<GovLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    rate: NonZeroU32,
}

impl RateLimiter {
    /// One packet every `1 / rate` seconds, no bursts.
    pub fn per_second(rate: NonZeroU32) -> Self {
        let quota = Quota::per_second(rate).allow_burst(nonzero!(1u32));
        Self {
            limiter: Arc::new(GovLimiter::direct(quota)),
            rate,
        }
    }

    /// Build from a configured rate. Zero disables pacing.
    pub fn from_rate(rate: u32) -> Option<Self> {
        NonZeroU32::new(rate).map(Self::per_second)
    }

    /// Block the calling thread until the next send is allowed.
    ///
    /// Only call this from a blocking context such as `spawn_blocking`.
    pub fn wait_blocking(&self) {
        while let Err(not_until) = self.limiter.check() {
            std::thread::sleep(not_until.wait_time_from(self.limiter.clock().now()));
        }
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// The delay between consecutive sends.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate.get()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("rate", &self.rate).finish()
    }
}
