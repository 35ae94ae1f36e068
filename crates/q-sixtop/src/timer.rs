// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Transaction Timers
//!
//! The engine arms one timeout per transaction through [`TimerService`] and
//! is told about expiry by the embedder calling `timer_expired` with the
//! token it armed. [`SoftTimer`] is a polled implementation driven by a tick
//! counter, suitable for a main loop or for tests.

use q_common::{Deadline, Error, Millis, Result, TickFrequency, Ticks};

use crate::trans::TransactionId;

/// Handle of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerHandle(u32);

impl TimerHandle {
    /// Create from a raw value chosen by the timer service
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

/// One-shot alarm service
pub trait TimerService {
    /// Arm an alarm that reports `token` after `duration`
    ///
    /// # Errors
    ///
    /// [`Error::TimerUnavailable`] when no alarm can be armed.
    fn arm(&mut self, duration: Millis, token: TransactionId) -> Result<TimerHandle>;

    /// Cancel an alarm; unknown handles are ignored
    fn cancel(&mut self, handle: TimerHandle);

    /// Current time
    fn now(&self) -> Ticks;
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    handle: TimerHandle,
    deadline: Deadline,
    token: TransactionId,
}

/// Polled software timer with `N` alarm slots
#[derive(Debug)]
pub struct SoftTimer<const N: usize> {
    alarms: [Option<Armed>; N],
    now: Ticks,
    frequency: TickFrequency,
    next_handle: u32,
}

impl<const N: usize> SoftTimer<N> {
    /// Create a timer at tick zero
    #[must_use]
    pub const fn new(frequency: TickFrequency) -> Self {
        Self {
            alarms: [None; N],
            now: Ticks::new(0),
            frequency,
            next_handle: 0,
        }
    }

    /// Set the current tick count
    pub fn set_now(&mut self, now: Ticks) {
        self.now = now;
    }

    /// Move time forward
    pub fn advance(&mut self, duration: Millis) {
        self.now = self.now + self.frequency.millis_to_ticks(duration);
    }

    /// Pop the earliest alarm that has expired
    pub fn expired(&mut self) -> Option<TransactionId> {
        let now = self.now;
        let slot = self
            .alarms
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.filter(|a| a.deadline.is_expired(now)).map(|a| (i, a)))
            .min_by_key(|(_, a)| a.deadline.expires_at())
            .map(|(i, _)| i)?;
        self.alarms[slot].take().map(|a| a.token)
    }

    /// Number of armed alarms
    #[must_use]
    pub fn pending(&self) -> usize {
        self.alarms.iter().filter(|a| a.is_some()).count()
    }

    /// Time until the earliest alarm fires, in ticks
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.alarms
            .iter()
            .flatten()
            .map(|a| a.deadline.remaining(self.now))
            .min()
    }
}

impl<const N: usize> TimerService for SoftTimer<N> {
    fn arm(&mut self, duration: Millis, token: TransactionId) -> Result<TimerHandle> {
        let slot = self
            .alarms
            .iter()
            .position(Option::is_none)
            .ok_or(Error::TimerUnavailable)?;
        let handle = TimerHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.alarms[slot] = Some(Armed {
            handle,
            deadline: Deadline::after(self.now, duration, self.frequency),
            token,
        });
        Ok(handle)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        for alarm in &mut self.alarms {
            if alarm.is_some_and(|a| a.handle == handle) {
                *alarm = None;
            }
        }
    }

    fn now(&self) -> Ticks {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(raw: u32) -> TransactionId {
        TransactionId::from_u32(raw)
    }

    #[test]
    fn test_fires_after_duration() {
        let mut timer: SoftTimer<4> = SoftTimer::new(TickFrequency::KHZ_1);
        timer.arm(Millis::new(100), token(1)).unwrap();
        timer.advance(Millis::new(99));
        assert_eq!(timer.expired(), None);
        assert_eq!(timer.next_deadline(), Some(1));
        timer.advance(Millis::new(1));
        assert_eq!(timer.expired(), Some(token(1)));
        assert_eq!(timer.expired(), None);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_earliest_first() {
        let mut timer: SoftTimer<4> = SoftTimer::new(TickFrequency::KHZ_1);
        timer.arm(Millis::new(50), token(2)).unwrap();
        timer.arm(Millis::new(10), token(1)).unwrap();
        timer.advance(Millis::new(60));
        assert_eq!(timer.expired(), Some(token(1)));
        assert_eq!(timer.expired(), Some(token(2)));
    }

    #[test]
    fn test_cancel_and_capacity() {
        let mut timer: SoftTimer<1> = SoftTimer::new(TickFrequency::KHZ_1);
        let h = timer.arm(Millis::new(10), token(1)).unwrap();
        assert_eq!(timer.arm(Millis::new(10), token(2)), Err(Error::TimerUnavailable));
        timer.cancel(h);
        timer.cancel(h);
        assert_eq!(timer.pending(), 0);
        timer.advance(Millis::new(20));
        assert_eq!(timer.expired(), None);
    }
}
