//! Process-wide admission control: concurrent-call cap plus a per-caller
//! sliding window, guarded by a single mutex held only for the check itself.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct State {
    active_calls: usize,
    /// Recent admission timestamps per caller, oldest first.
    call_timestamps: HashMap<String, VecDeque<Instant>>,
}

pub struct RateLimiter {
    max_concurrent_calls: usize,
    window: Duration,
    calls_per_window: usize,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(max_concurrent_calls: usize, window: Duration, calls_per_window: usize) -> Self {
        Self {
            max_concurrent_calls,
            window,
            calls_per_window,
            state: Mutex::new(State {
                active_calls: 0,
                call_timestamps: HashMap::new(),
            }),
        }
    }

    /// Atomically checks the concurrent-call cap and the caller's sliding
    /// window, admitting and recording the timestamp only on success.
    pub fn try_admit(&self, caller_id: &str) -> bool {
        let mut state = self.state.lock();

        if state.active_calls >= self.max_concurrent_calls {
            return false;
        }

        let now = Instant::now();
        let window = self.window;
        let timestamps = state
            .call_timestamps
            .entry(caller_id.to_string())
            .or_default();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.calls_per_window {
            return false;
        }

        timestamps.push_back(now);
        state.active_calls += 1;
        true
    }

    /// Decrements the active-call counter, saturating at 0.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.active_calls = state.active_calls.saturating_sub(1);
    }

    pub fn active_calls(&self) -> usize {
        self.state.lock().active_calls
    }
}
