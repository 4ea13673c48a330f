//! Clocks and the cancellable timer queue behind debounced notifications.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slab::Slab;

/// Source of the current time, measured from an arbitrary fixed origin.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall clock measured from the moment it was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Virtual clock that only moves when told to.
///
/// Cheap to clone; clones share the same time.
///
/// # Example
///
/// ```
/// # use std::time::Duration;
/// # use synced_signal::{Clock, ManualClock};
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(5));
/// assert_eq!(clock.now(), Duration::from_millis(5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(duration_to_nanos(by), Ordering::AcqRel);
    }

    /// Move the clock to `to` if it is later than the current time.
    pub fn advance_to(&self, to: Duration) {
        self.nanos
            .fetch_max(duration_to_nanos(to), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Handle to a scheduled timer.
///
/// The sequence number guards against slab key reuse: cancelling a handle
/// whose timer already fired never cancels a newer timer in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    key: usize,
    seq: u64,
}

pub(crate) type Task = Box<dyn FnOnce(TimerId) + Send>;

struct Timer {
    deadline: Duration,
    seq: u64,
    task: Task,
}

/// Timers ordered by `(deadline, seq)`; equal deadlines fire in scheduling order.
#[derive(Default)]
pub(crate) struct TimerQueue {
    timers: Slab<Timer>,
    order: BTreeSet<(Duration, u64, usize)>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Duration, task: Task) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.timers.insert(Timer {
            deadline,
            seq,
            task,
        });
        self.order.insert((deadline, seq, key));
        TimerId { key, seq }
    }

    /// Returns `true` if the timer was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.get(id.key) {
            Some(timer) if timer.seq == id.seq => {
                let timer = self.timers.remove(id.key);
                self.order.remove(&(timer.deadline, timer.seq, id.key));
                true
            }
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.order.first().map(|(deadline, _, _)| *deadline)
    }

    /// Remove the earliest timer if its deadline is not after `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(TimerId, Task)> {
        let &(deadline, seq, key) = self.order.first()?;
        if deadline > now {
            return None;
        }
        self.order.remove(&(deadline, seq, key));
        let timer = self.timers.remove(key);
        Some((TimerId { key, seq }, timer.task))
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }
}
