//! Read timeouts.
//!
//! Deadlines are kept in one ordered queue per registry. Arming returns a
//! handle that cancels exactly that timer.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::time::Duration;

use jiff::{SignedDuration, Timestamp};
use spin::Mutex;

use crate::DeviceError;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward. Saturates at the end of the representable range.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Ok(next) = deadline_after(*now, by) {
            *now = next;
        } else {
            *now = Timestamp::MAX;
        }
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// `now + timeout`.
pub fn deadline_after(now: Timestamp, timeout: Duration) -> Result<Timestamp, DeviceError> {
    let timeout = SignedDuration::try_from(timeout).map_err(|_| DeviceError::OutOfRange)?;
    now.checked_add(timeout).map_err(|_| DeviceError::OutOfRange)
}

/// Handle to one armed timer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerHandle {
    deadline: Timestamp,
    seq: u64,
}

impl TimerHandle {
    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }
}

/// Timers ordered by deadline, then by arming order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    timers: BTreeMap<TimerHandle, T>,
    next_seq: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn arm(&mut self, deadline: Timestamp, token: T) -> TimerHandle {
        let handle = TimerHandle {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.timers.insert(handle, token);
        handle
    }

    /// Disarm a timer. Returns its token if it had not fired yet.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        self.timers.remove(&handle)
    }

    /// Remove every timer due at `now`, in deadline order.
    pub fn expire(&mut self, now: Timestamp) -> Vec<T> {
        let mut fired = Vec::new();
        while let Some(entry) = self.timers.first_entry() {
            if entry.key().deadline > now {
                break;
            }
            fired.push(entry.remove());
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.keys().next().map(TimerHandle::deadline)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
