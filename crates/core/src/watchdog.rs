//! Chair-wait timers.
//!
//! Every (floor request, chaired floor) pair admitted into Pending gets a
//! timer. If the chair has not acted when it expires, the request is
//! cancelled. Timers are cancelled whenever their request leaves Pending.
//!
//! Each timer is a thread parked on a condition variable. Expiry calls the
//! [`ExpiryHook`] with the timer's generation; the hook must confirm the
//! generation is still current (see [`Watchdogs::finish`]) because a
//! timer may expire while its cancellation is waiting for the lock the
//! hook needs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Identifies one timer within a conference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchdogKey {
    pub floor_request_id: u16,
    pub floor_id: u16,
}

/// Invoked from the timer thread when a timer expires.
pub type ExpiryHook = Arc<dyn Fn(WatchdogKey, u64) + Send + Sync>;

#[derive(Default)]
struct CancelFlag {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelFlag {
    fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.wake.notify_one();
    }

    /// Park until `deadline`. Returns true if the timer expired.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            if self.wake.wait_until(&mut cancelled, deadline).timed_out() {
                return !*cancelled;
            }
        }
        false
    }
}

struct Timer {
    generation: u64,
    flag: Arc<CancelFlag>,
}

/// The live timers of one conference.
pub struct Watchdogs {
    timers: HashMap<WatchdogKey, Timer>,
    generations: Arc<AtomicU64>,
    hook: Option<ExpiryHook>,
}

impl Watchdogs {
    /// Without a hook timers still run but their expiry has no effect.
    pub fn new(hook: Option<ExpiryHook>) -> Self {
        Self::sharing(hook, Arc::new(AtomicU64::new(0)))
    }

    /// Draw generations from a counter shared with other timer sets, so a
    /// stale expiry of a discarded set never matches a timer of a new one.
    pub fn sharing(hook: Option<ExpiryHook>, generations: Arc<AtomicU64>) -> Self {
        Self {
            timers: HashMap::new(),
            generations,
            hook,
        }
    }

    /// Start a timer, replacing any running under the same key.
    pub fn arm(&mut self, key: WatchdogKey, wait: Duration) {
        self.cancel(key);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let flag = Arc::new(CancelFlag::default());
        self.timers.insert(
            key,
            Timer {
                generation,
                flag: flag.clone(),
            },
        );

        let hook = self.hook.clone();
        let deadline = Instant::now() + wait;
        let spawned = thread::Builder::new()
            .name(format!("bfcp-watchdog-{}", key.floor_request_id))
            .spawn(move || {
                if flag.wait_until(deadline)
                    && let Some(hook) = hook
                {
                    hook(key, generation);
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, ?key, "failed to spawn watchdog thread");
            self.timers.remove(&key);
        } else {
            tracing::trace!(?key, generation, wait_ms = wait.as_millis() as u64, "watchdog armed");
        }
    }

    /// Stop a timer. Returns true if one was running.
    pub fn cancel(&mut self, key: WatchdogKey) -> bool {
        match self.timers.remove(&key) {
            Some(timer) => {
                timer.flag.cancel();
                tracing::trace!(?key, "watchdog cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every timer of a floor request.
    pub fn cancel_request(&mut self, floor_request_id: u16) {
        let keys: Vec<WatchdogKey> = self
            .timers
            .keys()
            .filter(|k| k.floor_request_id == floor_request_id)
            .copied()
            .collect();
        for key in keys {
            self.cancel(key);
        }
    }

    /// Retire an expired timer. Returns false if it was cancelled or
    /// re-armed after it expired, in which case the expiry must be ignored.
    pub fn finish(&mut self, key: WatchdogKey, generation: u64) -> bool {
        match self.timers.get(&key) {
            Some(timer) if timer.generation == generation => {
                self.timers.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: WatchdogKey) -> bool {
        self.timers.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.flag.cancel();
        }
    }
}

impl Drop for Watchdogs {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn key(id: u16) -> WatchdogKey {
        WatchdogKey {
            floor_request_id: id,
            floor_id: 1,
        }
    }

    fn hooked() -> (Watchdogs, mpsc::Receiver<(WatchdogKey, u64)>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let hook: ExpiryHook = Arc::new(move |key: WatchdogKey, generation: u64| {
            let _ = tx.lock().send((key, generation));
        });
        (Watchdogs::new(Some(hook)), rx)
    }

    #[test]
    fn expiry_calls_hook() {
        let (mut dogs, rx) = hooked();
        dogs.arm(key(1), Duration::from_millis(20));
        let (fired, generation) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(fired, key(1));
        assert!(dogs.finish(fired, generation));
        assert!(dogs.is_empty());
    }

    #[test]
    fn cancelled_timer_stays_silent() {
        let (mut dogs, rx) = hooked();
        dogs.arm(key(1), Duration::from_millis(50));
        assert!(dogs.cancel(key(1)));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn stale_generation_is_ignored() {
        let (mut dogs, _rx) = hooked();
        dogs.arm(key(1), Duration::from_secs(60));
        dogs.arm(key(1), Duration::from_secs(60));
        assert!(!dogs.finish(key(1), 1));
        assert!(dogs.finish(key(1), 2));
    }

    #[test]
    fn cancel_request_stops_all_floors() {
        let (mut dogs, _rx) = hooked();
        dogs.arm(key(1), Duration::from_secs(60));
        dogs.arm(
            WatchdogKey {
                floor_request_id: 1,
                floor_id: 2,
            },
            Duration::from_secs(60),
        );
        dogs.arm(key(2), Duration::from_secs(60));
        dogs.cancel_request(1);
        assert_eq!(dogs.len(), 1);
        assert!(dogs.is_armed(key(2)));
    }
}
