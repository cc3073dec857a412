//! Minimum-spacing throttle shared by every outbound catalog request.

use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;

pub const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

/// Serializes request starts so consecutive calls are at least `min_interval` apart.
pub struct RateLimitedClient {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    admission: Mutex<()>,
    min_interval: Duration,
}

impl RateLimitedClient {
    pub fn new(min_interval: Duration) -> Self {
        let period = min_interval.max(Duration::from_millis(1));
        Self {
            limiter: RateLimiter::direct(
                Quota::with_period(period)
                    .expect("valid limiter period")
                    .allow_burst(NonZeroU32::new(1).expect("non-zero limiter burst")),
            ),
            admission: Mutex::new(()),
            min_interval: period,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Blocks until a request slot is free, then runs `request`.
    ///
    /// The request's own error is returned untouched.
    pub fn call<T, E, F>(&self, request: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.wait_for_slot();
        request()
    }

    fn wait_for_slot(&self) {
        // One waiter at a time, so admissions follow arrival at the gate.
        let _admission = self
            .admission
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            match self.limiter.check() {
                Ok(()) => return,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.limiter.clock().now());
                    debug!("RateLimitedClient: waiting {:?} for next request slot", wait);
                    std::thread::sleep(wait);
                }
            }
        }
    }
}

impl Default for RateLimitedClient {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_REQUEST_INTERVAL)
    }
}
