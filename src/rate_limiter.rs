//! Per-source sliding-window admission control (§4.1). Hand-rolled rather
//! than wrapping a crate: the spec calls this out as core-worth-engineering,
//! and it is small enough that a crate dependency would hide the one thing
//! worth reading - the FIFO wait queue and the safety-margin arithmetic.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Usage snapshot for a source at the instant of the call.
#[derive(Debug, Clone, Copy)]
pub struct Usage {
    pub made: u32,
    pub remaining: u32,
    pub reset_at: Instant,
}

/// Observer hooks, dispatched outside the critical section (Design Notes
/// §9: "must never block the hot path"). Default no-op implementations so
/// callers only override what they need.
pub trait RateLimitObserver: Send + Sync {
    fn on_request(&self, _source: &str) {}
    fn on_limit_hit(&self, _source: &str, _wait: Duration) {}
    fn on_reset(&self, _source: &str) {}
}

pub struct NullObserver;
impl RateLimitObserver for NullObserver {}

struct SourceState {
    /// Timestamps (monotonic) of admissions still inside the window.
    admissions: VecDeque<Instant>,
    /// FIFO queue of wakeups for waiters blocked on this source.
    waiters: VecDeque<Arc<Notify>>,
}

impl SourceState {
    fn new() -> Self {
        Self {
            admissions: VecDeque::new(),
            waiters: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.admissions.front() {
            if now.duration_since(front) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A sliding-window limiter covering every source it has seen, keyed by
/// source name. One mutex per source (Design Notes §9) rather than one
/// global lock, so unrelated sources never contend.
pub struct RateLimiter {
    window: Duration,
    /// effective_cap = floor(n * (1 - margin)), always >= 1.
    caps: HashMap<String, u32>,
    states: HashMap<String, Arc<Mutex<SourceState>>>,
    observer: Arc<dyn RateLimitObserver>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            caps: HashMap::new(),
            states: HashMap::new(),
            observer: Arc::new(NullObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RateLimitObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register (or update) a source's raw per-window budget and safety
    /// margin. Effective cap = n * (1 - margin), default margin 0.10 (§4.1).
    pub fn configure_source(&mut self, source: &str, n: u32, margin: f64) {
        let effective = ((n as f64) * (1.0 - margin)).floor().max(1.0) as u32;
        self.caps.insert(source.to_string(), effective);
        self.states
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SourceState::new())));
    }

    fn cap_for(&self, source: &str) -> u32 {
        self.caps.get(source).copied().unwrap_or(u32::MAX)
    }

    fn state_for(&self, source: &str) -> Arc<Mutex<SourceState>> {
        self.states
            .get(source)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(SourceState::new())))
    }

    /// Blocks the caller until admission, returning how long it waited.
    /// Never errors: exceeding the limit is expressed purely as a wait.
    pub async fn acquire(&self, source: &str) -> Duration {
        self.observer.on_request(source);
        let cap = self.cap_for(source);
        let state = self.state_for(source);
        let started = Instant::now();

        loop {
            let wait_until = {
                let mut guard = state.lock().await;
                let now = Instant::now();
                guard.prune(now, self.window);

                if (guard.admissions.len() as u32) < cap {
                    return started.elapsed();
                }

                // Window is full: wait until the oldest admission expires,
                // queueing FIFO behind any earlier waiter.
                let oldest = *guard.admissions.front().expect("cap >= 1 implies non-empty");
                let deadline = oldest + self.window;
                let notify = Arc::new(Notify::new());
                guard.waiters.push_back(notify.clone());
                Some((deadline, notify))
            };

            match wait_until {
                None => return started.elapsed(),
                Some((deadline, notify)) => {
                    self.observer
                        .on_limit_hit(source, deadline.saturating_duration_since(Instant::now()));
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = notify.notified() => {}
                    }
                    self.observer.on_reset(source);
                }
            }
        }
    }

    /// Record that an admitted call actually proceeded. Wakes the
    /// longest-waiting queued caller, if any, so waiters are served FIFO.
    pub async fn record(&self, source: &str, timestamp: Instant) {
        let state = self.state_for(source);
        let mut guard = state.lock().await;
        guard.admissions.push_back(timestamp);
        if let Some(notify) = guard.waiters.pop_front() {
            notify.notify_one();
        }
    }

    pub async fn usage(&self, source: &str) -> Usage {
        let cap = self.cap_for(source);
        let state = self.state_for(source);
        let mut guard = state.lock().await;
        let now = Instant::now();
        guard.prune(now, self.window);
        let made = guard.admissions.len() as u32;
        let reset_at = guard
            .admissions
            .front()
            .map(|&t| t + self.window)
            .unwrap_or(now);
        Usage {
            made,
            remaining: cap.saturating_sub(made),
            reset_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingObserver {
        hits: AtomicU32,
    }

    impl RateLimitObserver for CountingObserver {
        fn on_limit_hit(&self, _source: &str, _wait: Duration) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn effective_cap_applies_ten_percent_margin() {
        let mut limiter = RateLimiter::new(Duration::from_secs(3600));
        limiter.configure_source("assessor", 10, 0.10);
        // effective cap = floor(10 * 0.9) = 9
        let usage = limiter.usage("assessor").await;
        assert_eq!(usage.remaining, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn admissions_beyond_cap_wait_for_the_window() {
        let observer = Arc::new(CountingObserver {
            hits: AtomicU32::new(0),
        });
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.configure_source("test", 2, 0.0);
        let limiter = limiter.with_observer(observer.clone());

        for _ in 0..2 {
            limiter.acquire("test").await;
            limiter.record("test", Instant::now()).await;
        }

        // Third call must wait for the window to roll over.
        let acquire = limiter.acquire("test");
        tokio::pin!(acquire);
        tokio::time::advance(Duration::from_millis(150)).await;
        let waited = acquire.await;
        assert!(waited >= Duration::from_millis(100));
        assert!(observer.hits.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn unconfigured_source_is_effectively_unbounded() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let usage = limiter.usage("unknown").await;
        assert_eq!(usage.made, 0);
    }
}
