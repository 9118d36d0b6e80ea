//! Deadline bookkeeping for the engine's timer channels.
//!
//! The engine arms channels from inside `run()`, where the firmware has no
//! clock reading at hand. Arming therefore only records the requested
//! timeout; the OTG task pins it to an [`Instant`] with [`TimerSlots::schedule`]
//! right after the run returns. Each slot keeps the engine's token so a due
//! expiry names the arm it belongs to.

use embassy_time::{Duration, Instant};
use heapless::Vec;
use otg_core::timers::{OtgTimer, TIMER_COUNT, TimerToken};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Slot {
    Idle,
    Requested(TimerToken, Duration),
    Due(TimerToken, Instant),
}

/// One deadline per timer channel.
#[derive(Clone, Debug)]
pub struct TimerSlots {
    slots: [Slot; TIMER_COUNT],
}

impl Default for TimerSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSlots {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::Idle; TIMER_COUNT],
        }
    }

    /// Records a timeout for `token.timer`, superseding any pending deadline.
    pub fn request(&mut self, token: TimerToken, timeout: core::time::Duration) {
        self.slots[token.timer.as_index()] =
            Slot::Requested(token, core_duration_to_embassy(timeout));
    }

    pub fn cancel(&mut self, timer: OtgTimer) {
        self.slots[timer.as_index()] = Slot::Idle;
    }

    /// Converts requested timeouts into deadlines measured from `now`.
    /// Returns how many channels were scheduled.
    pub fn schedule(&mut self, now: Instant) -> usize {
        let mut scheduled = 0;
        for slot in &mut self.slots {
            if let Slot::Requested(token, timeout) = *slot {
                *slot = Slot::Due(token, now.checked_add(timeout).unwrap_or(Instant::MAX));
                scheduled += 1;
            }
        }
        scheduled
    }

    pub fn has_requests(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| matches!(slot, Slot::Requested(..)))
    }

    pub fn deadline(&self, timer: OtgTimer) -> Option<Instant> {
        match self.slots[timer.as_index()] {
            Slot::Due(_, at) => Some(at),
            Slot::Idle | Slot::Requested(..) => None,
        }
    }

    /// Earliest scheduled deadline across all channels.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Due(_, at) => Some(*at),
                Slot::Idle | Slot::Requested(..) => None,
            })
            .min()
    }

    /// Removes and returns every channel due at `now`, earliest deadline
    /// first. Channels with equal deadlines come out in channel order.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerToken, TIMER_COUNT> {
        let mut due: Vec<(Instant, TimerToken), TIMER_COUNT> = Vec::new();
        for slot in &mut self.slots {
            match *slot {
                Slot::Due(token, at) if at <= now => {
                    *slot = Slot::Idle;
                    let _ = due.push((at, token));
                }
                _ => {}
            }
        }
        due.sort_unstable_by_key(|(at, token)| (*at, token.timer.as_index()));
        due.into_iter().map(|(_, token)| token).collect()
    }

    /// Time left on `timer`. A timeout that is not scheduled yet reports its
    /// full length.
    pub fn remaining(&self, timer: OtgTimer, now: Instant) -> Option<core::time::Duration> {
        let left = match self.slots[timer.as_index()] {
            Slot::Idle => return None,
            Slot::Requested(_, timeout) => timeout,
            Slot::Due(_, at) if at > now => at - now,
            Slot::Due(..) => Duration::from_ticks(0),
        };
        Some(core::time::Duration::from_micros(left.as_micros()))
    }
}

pub fn core_duration_to_embassy(duration: core::time::Duration) -> Duration {
    let micros = duration.as_micros();
    let micros = u64::try_from(micros).unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}
