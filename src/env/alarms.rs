// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! One-shot alarm service.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::env::Clock;
use crate::types::WorkSource;

/// Handle for cancelling a scheduled alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmToken(pub u64);

/// Callback fired when an alarm goes off. Runs on an arbitrary thread.
pub type AlarmCallback = Box<dyn FnOnce() + Send>;

/// One-shot alarm scheduling.
///
/// Implementations MUST NOT invoke the callback synchronously from within
/// [`AlarmHelper::schedule`]: callers schedule while holding internal
/// locks that the callback re-acquires. Cancellation is best-effort: an
/// alarm already mid-dispatch may still fire, and late firing is
/// tolerated; callers guard their callbacks with identity checks.
pub trait AlarmHelper: Send + Sync {
    /// Schedule a callback after `delay_ms`, blaming `work_source` for the
    /// wakeup.
    fn schedule(&self, delay_ms: u64, work_source: &WorkSource, callback: AlarmCallback)
        -> AlarmToken;

    /// Cancel a pending alarm. Unknown or already-fired tokens are a no-op.
    fn cancel(&self, token: AlarmToken);
}

fn next_token(counter: &AtomicU64) -> AlarmToken {
    AlarmToken(counter.fetch_add(1, Ordering::Relaxed))
}

/// Alarm service driven by a [`Clock`] and fired explicitly by the test.
pub struct ManualAlarms {
    clock: Arc<dyn Clock>,
    counter: AtomicU64,
    pending: Mutex<Vec<(AlarmToken, u64, AlarmCallback)>>,
}

impl ManualAlarms {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counter: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Number of alarms not yet fired or cancelled.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fire every alarm whose deadline has passed, in deadline order.
    /// Callbacks run on the calling thread, outside the internal lock.
    pub fn fire_due(&self) {
        let now = self.clock.elapsed_realtime_ms();
        let mut due = {
            let mut pending = self.pending.lock();
            let mut due = Vec::new();
            let mut i = 0;
            while i < pending.len() {
                if pending[i].1 <= now {
                    due.push(pending.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            due
        };
        due.sort_by_key(|(_, deadline, _)| *deadline);
        for (_, _, callback) in due {
            callback();
        }
    }
}

impl AlarmHelper for ManualAlarms {
    fn schedule(
        &self,
        delay_ms: u64,
        _work_source: &WorkSource,
        callback: AlarmCallback,
    ) -> AlarmToken {
        let token = next_token(&self.counter);
        let deadline = self.clock.elapsed_realtime_ms().saturating_add(delay_ms);
        self.pending.lock().push((token, deadline, callback));
        token
    }

    fn cancel(&self, token: AlarmToken) {
        self.pending.lock().retain(|(t, _, _)| *t != token);
    }
}

#[derive(PartialEq, Eq)]
struct Deadline {
    due: Instant,
    token: AlarmToken,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.token.0.cmp(&other.token.0))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct ThreadAlarmsState {
    heap: BinaryHeap<Reverse<Deadline>>,
    callbacks: Vec<(AlarmToken, AlarmCallback)>,
    shutdown: bool,
}

/// Real alarm service: a dedicated timer thread that sleeps until the
/// earliest deadline and fires callbacks on itself.
pub struct ThreadAlarms {
    counter: AtomicU64,
    state: Arc<(Mutex<ThreadAlarmsState>, Condvar)>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadAlarms {
    pub fn new() -> Self {
        let state = Arc::new((
            Mutex::new(ThreadAlarmsState {
                heap: BinaryHeap::new(),
                callbacks: Vec::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name("locmux-alarms".into())
            .spawn(move || Self::run(&thread_state))
            .expect("failed to spawn alarm thread");

        Self {
            counter: AtomicU64::new(1),
            state,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn run(state: &(Mutex<ThreadAlarmsState>, Condvar)) {
        let (lock, condvar) = state;
        loop {
            let fired = {
                let mut guard = lock.lock();
                loop {
                    if guard.shutdown {
                        return;
                    }
                    let now = Instant::now();
                    let next_due = guard.heap.peek().map(|Reverse(entry)| entry.due);
                    match next_due {
                        Some(due) if due <= now => {
                            let Reverse(deadline) = guard.heap.pop().expect("peeked entry");
                            let position = guard
                                .callbacks
                                .iter()
                                .position(|(token, _)| *token == deadline.token);
                            match position {
                                Some(index) => break Some(guard.callbacks.swap_remove(index).1),
                                // Cancelled while queued; skip the stale heap entry.
                                None => continue,
                            }
                        }
                        Some(due) => {
                            let wait = due.saturating_duration_since(now);
                            condvar.wait_for(&mut guard, wait);
                        }
                        None => {
                            condvar.wait_for(&mut guard, Duration::from_secs(3600));
                        }
                    }
                }
            };
            if let Some(callback) = fired {
                callback();
            }
        }
    }
}

impl Default for ThreadAlarms {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmHelper for ThreadAlarms {
    fn schedule(
        &self,
        delay_ms: u64,
        _work_source: &WorkSource,
        callback: AlarmCallback,
    ) -> AlarmToken {
        let token = next_token(&self.counter);
        let due = Instant::now() + Duration::from_millis(delay_ms.min(u64::from(u32::MAX)));
        let (lock, condvar) = &*self.state;
        let mut guard = lock.lock();
        guard.heap.push(Reverse(Deadline { due, token }));
        guard.callbacks.push((token, callback));
        condvar.notify_one();
        token
    }

    fn cancel(&self, token: AlarmToken) {
        let (lock, _) = &*self.state;
        // The heap entry stays behind; the timer thread drops it when it
        // surfaces without a matching callback.
        lock.lock().callbacks.retain(|(t, _)| *t != token);
    }
}

impl Drop for ThreadAlarms {
    fn drop(&mut self) {
        {
            let (lock, condvar) = &*self.state;
            lock.lock().shutdown = true;
            condvar.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
