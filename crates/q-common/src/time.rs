// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Time utilities for the 6top sublayer
//!
//! Transaction timeouts are expressed in [`Millis`] and converted to platform
//! ticks through a [`TickFrequency`]. A [`Deadline`] records when an armed
//! transaction timer expires.

use core::ops::Add;

/// Monotonic tick counter (platform-specific resolution)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(u64);

impl Ticks {
    /// Create from raw tick count
    #[must_use]
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Get the raw tick count
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Ticks elapsed between this instant and `now`
    #[must_use]
    pub const fn elapsed(&self, now: Self) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Low 32 bits, used as a log timestamp
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_timestamp(&self) -> u32 {
        self.0 as u32
    }
}

impl From<u64> for Ticks {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Add<u64> for Ticks {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

/// Duration in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Millis(u32);

impl Millis {
    /// Zero duration
    pub const ZERO: Self = Self(0);

    /// Create from milliseconds
    #[must_use]
    pub const fn new(ms: u32) -> Self {
        Self(ms)
    }

    /// Create from seconds
    #[must_use]
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Get as milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u32 {
        self.0
    }

    /// Check for a zero duration
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Millis {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Tick frequency for converting between ticks and milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickFrequency {
    hz: u32,
}

impl TickFrequency {
    /// 1 kHz (1 tick = 1 millisecond)
    pub const KHZ_1: Self = Self { hz: 1_000 };

    /// 32.768 kHz (typical RTC clock on TSCH motes)
    pub const KHZ_32: Self = Self { hz: 32_768 };

    /// Create from frequency in Hz
    #[must_use]
    pub const fn from_hz(hz: u32) -> Self {
        Self { hz }
    }

    /// Convert milliseconds to ticks
    #[must_use]
    pub const fn millis_to_ticks(&self, millis: Millis) -> u64 {
        ((millis.0 as u64) * (self.hz as u64)) / 1_000
    }

    /// Convert ticks to milliseconds (saturating)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn ticks_to_millis(&self, ticks: u64) -> Millis {
        if self.hz == 0 {
            return Millis::ZERO;
        }
        let ms = (ticks * 1_000) / (self.hz as u64);
        if ms > u32::MAX as u64 {
            Millis(u32::MAX)
        } else {
            Millis(ms as u32)
        }
    }
}

/// Expiry instant of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Ticks,
    timeout: u64,
}

impl Deadline {
    /// Deadline `timeout_ticks` after `start`
    #[must_use]
    pub const fn new(start: Ticks, timeout_ticks: u64) -> Self {
        Self {
            start,
            timeout: timeout_ticks,
        }
    }

    /// Deadline `duration` after `now` at the given tick frequency
    #[must_use]
    pub const fn after(now: Ticks, duration: Millis, freq: TickFrequency) -> Self {
        Self::new(now, freq.millis_to_ticks(duration))
    }

    /// Check if the deadline has expired
    #[must_use]
    pub const fn is_expired(&self, now: Ticks) -> bool {
        self.start.elapsed(now) >= self.timeout
    }

    /// Ticks remaining until expiry (0 once expired)
    #[must_use]
    pub const fn remaining(&self, now: Ticks) -> u64 {
        self.timeout.saturating_sub(self.start.elapsed(now))
    }

    /// Absolute expiry instant
    #[must_use]
    pub const fn expires_at(&self) -> Ticks {
        Ticks(self.start.0.saturating_add(self.timeout))
    }
}
