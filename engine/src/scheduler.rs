//! Sampling scheduler for high-frequency updates.
//!
//! The first update for a key in a quiet period goes through immediately.
//! Later updates inside the window overwrite each other; only the newest one
//! comes out when the window elapses.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Time source for the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Tokio's clock. Honors `tokio::time::pause` in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct Slot<V> {
    last_emit: Instant,
    pending: Option<V>,
}

#[derive(Debug)]
pub struct CoalescingScheduler<K, V, C = TokioClock> {
    window: Duration,
    clock: C,
    slots: HashMap<K, Slot<V>>,
}

impl<K: Eq + Hash + Clone, V> CoalescingScheduler<K, V, TokioClock> {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, TokioClock)
    }
}

impl<K: Eq + Hash + Clone, V, C: Clock> CoalescingScheduler<K, V, C> {
    pub fn with_clock(window: Duration, clock: C) -> Self {
        Self {
            window,
            clock,
            slots: HashMap::new(),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Offer the latest value for `key`. Returns it back if it should be
    /// applied now; otherwise it is held until the window elapses.
    pub fn offer(&mut self, key: K, value: V) -> Option<V> {
        let now = self.clock.now();
        match self.slots.get_mut(&key) {
            Some(slot) if now.duration_since(slot.last_emit) < self.window => {
                slot.pending = Some(value);
                None
            }
            Some(slot) => {
                slot.last_emit = now;
                slot.pending = None;
                Some(value)
            }
            None => {
                self.slots.insert(
                    key,
                    Slot {
                        last_emit: now,
                        pending: None,
                    },
                );
                Some(value)
            }
        }
    }

    /// Held values whose window has elapsed.
    pub fn due(&mut self) -> Vec<(K, V)> {
        let now = self.clock.now();
        let window = self.window;
        let mut out = Vec::new();
        for (key, slot) in &mut self.slots {
            if slot.pending.is_some() && now.duration_since(slot.last_emit) >= window {
                slot.last_emit = now;
                if let Some(value) = slot.pending.take() {
                    out.push((key.clone(), value));
                }
            }
        }
        out
    }

    /// Earliest instant at which `due` will return something.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .values()
            .filter(|slot| slot.pending.is_some())
            .map(|slot| slot.last_emit + self.window)
            .min()
    }

    /// Take the held value for `key` regardless of the window and forget the key.
    pub fn flush(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).and_then(|slot| slot.pending)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
