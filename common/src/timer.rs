//! Protocol Timers
//!
//! Single-shot countdown timers driven by an external millisecond clock.
//! Nothing runs in the background: a timer only expires inside
//! [`Timer::update`], when the owner feeds it the current time.

use tracing::trace;

use crate::sequence::SeqNum;

/// Millisecond clock reading, wrapping at 2^31
pub type Millis = SeqNum<31>;

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
    Expired,
}

/// Named countdown timer
#[derive(Debug, Clone)]
pub struct Timer {
    name: &'static str,
    timeout_ms: u32,
    state: TimerState,
    now: Millis,
    started_at: Millis,
}

impl Timer {
    /// Create an idle timer. A timeout of zero disables the timer.
    pub fn new(name: &'static str, timeout_ms: u32) -> Self {
        Self {
            name,
            timeout_ms,
            state: TimerState::Idle,
            now: Millis::default(),
            started_at: Millis::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Change the timeout. Takes effect on the next `start`.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Arm from the last clock reading. Restarts a running timer.
    pub fn start(&mut self) {
        if self.timeout_ms == 0 {
            return;
        }
        self.state = TimerState::Running;
        self.started_at = self.now;
        trace!("{} started at {} ({} ms)", self.name, self.now, self.timeout_ms);
    }

    /// Disarm, clearing any pending expiry
    pub fn stop(&mut self) {
        if self.state != TimerState::Idle {
            trace!("{} stopped at {}", self.name, self.now);
        }
        self.state = TimerState::Idle;
    }

    /// Acknowledge an expiry without restarting
    pub fn reset(&mut self) {
        if self.state == TimerState::Expired {
            self.state = TimerState::Idle;
        }
    }

    /// Advance the clock, expiring the timer if its deadline has passed
    pub fn update(&mut self, now_ms: u32) {
        self.now = Millis::new(now_ms);
        if self.state == TimerState::Running
            && self.now.diff(self.started_at) >= self.timeout_ms as i32
        {
            self.state = TimerState::Expired;
            trace!("{} expired at {}", self.name, self.now);
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == TimerState::Idle
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn is_expired(&self) -> bool {
        self.state == TimerState::Expired
    }
}
