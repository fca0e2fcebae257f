//! Per-backend concurrency and request-rate limiting.
//!
//! The governor is the only state shared between workers. Each backend key
//! gets a limiter holding a semaphore of slots and a rolling log of recent
//! grants for the rate budget. A limiter follows the limits of the most
//! recent descriptor for its key: when they change, the semaphore and rate
//! are rebuilt while the grant log and counters carry over. Permits still
//! held from the previous limits return to their old semaphore.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep, timeout};

use crate::backend::{BackendDescriptor, BackendError, RateLimit};

pub const DEFAULT_CAPACITY: usize = 16;
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Governor {
    capacity: usize,
    wait_timeout: Duration,
    limiters: Mutex<HashMap<String, Arc<Limiter>>>,
}

struct Limiter {
    slots: Arc<Semaphore>,
    slot_count: usize,
    rate: Option<RateLimit>,
    grants: Arc<Mutex<VecDeque<Instant>>>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Limiter {
    fn new(slot_count: usize, rate: Option<RateLimit>) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(slot_count)),
            slot_count,
            rate,
            grants: Arc::default(),
            counters: Arc::default(),
        }
    }

    fn matches(&self, slot_count: usize, rate: Option<RateLimit>) -> bool {
        self.slot_count == slot_count && self.rate == rate
    }

    /// Same key, new limits. Keeps the grant log so a tighter budget
    /// still counts requests made under the old one.
    fn rebuild(&self, slot_count: usize, rate: Option<RateLimit>) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(slot_count)),
            slot_count,
            rate,
            grants: Arc::clone(&self.grants),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Waits until the rolling window has room, then records a grant.
    async fn take_token(&self) {
        let Some(rate) = self.rate else { return };
        loop {
            let wait = {
                let mut grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                while let Some(&oldest) = grants.front() {
                    if now.duration_since(oldest) >= rate.window {
                        grants.pop_front();
                    } else {
                        break;
                    }
                }
                if grants.len() < rate.requests as usize {
                    grants.push_back(now);
                    return;
                }
                match grants.front() {
                    Some(&oldest) => rate.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };
            sleep(wait).await;
        }
    }
}

/// A held slot. Dropping it returns the slot to the governor.
pub struct GovernorPermit {
    limiter: Arc<Limiter>,
    _slot: OwnedSemaphorePermit,
}

impl Drop for GovernorPermit {
    fn drop(&mut self) {
        self.limiter.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for Governor {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_WAIT_TIMEOUT)
    }
}

impl Governor {
    pub fn new(capacity: usize, wait_timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            wait_timeout,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Upper bound on slots for any single backend.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    fn limiter(&self, backend: &BackendDescriptor) -> Arc<Limiter> {
        let slots = backend.max_concurrency.clamp(1, self.capacity);
        let rate = backend.rate_limit.filter(|r| r.requests > 0);
        let key = backend.key();

        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        let limiter = match limiters.get(&key) {
            Some(current) if current.matches(slots, rate) => return Arc::clone(current),
            Some(current) => {
                log::debug!("governor: limits for {key} changed to {slots} slots, rate {rate:?}");
                Arc::new(current.rebuild(slots, rate))
            }
            None => {
                log::debug!("governor: {slots} slots for {key}");
                Arc::new(Limiter::new(slots, rate))
            }
        };
        limiters.insert(key, Arc::clone(&limiter));
        limiter
    }

    /// Waits for a free slot and a rate token for `backend`.
    ///
    /// Gives up after the wait timeout with a retryable network error.
    pub async fn acquire(&self, backend: &BackendDescriptor) -> Result<GovernorPermit, BackendError> {
        let limiter = self.limiter(backend);
        let wait = async {
            let slot = limiter.slots.clone().acquire_owned().await.map_err(|_| {
                BackendError::TransientNetwork("governor is shut down".into())
            })?;
            limiter.take_token().await;
            Ok::<_, BackendError>(slot)
        };

        let slot = timeout(self.wait_timeout, wait).await.map_err(|_| {
            BackendError::TransientNetwork(format!(
                "timed out after {:?} waiting for a {} slot",
                self.wait_timeout, backend.kind
            ))
        })??;

        let now = limiter.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        limiter.counters.peak.fetch_max(now, Ordering::SeqCst);
        Ok(GovernorPermit {
            limiter,
            _slot: slot,
        })
    }

    /// Returns a slot early. Equivalent to dropping the permit.
    pub fn release(&self, permit: GovernorPermit) {
        drop(permit);
    }

    /// Requests currently holding a slot for `backend`.
    pub fn in_flight(&self, backend: &BackendDescriptor) -> usize {
        self.limiter(backend).counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest simultaneous slot count observed for `backend`.
    pub fn peak_in_flight(&self, backend: &BackendDescriptor) -> usize {
        self.limiter(backend).counters.peak.load(Ordering::SeqCst)
    }

    /// Free slots for `backend` right now.
    pub fn available(&self, backend: &BackendDescriptor) -> usize {
        self.limiter(backend).slots.available_permits()
    }
}
