// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! 6top Sublayer
//!
//! Ties the dispatcher to the scheduling functions. [`Sixtop`] owns a
//! [`SixpCore`] and a fixed registry of SFs keyed by SFID. Every entry
//! point (`input`, `output`, `timer_expired`, ...) runs the core, hands an
//! accepted inbound message to its SF and then drains the notifications the
//! core queued, so each SF sees its callbacks in order and one at a time.
//!
//! ```text
//!   MAC ──input──▶ Sixtop ──▶ SixpCore ──Delivery──▶ SF::input
//!                    │                                   │
//!                    │◀──────────── SixpHandle::output ──┘
//!                    └── drain ──▶ SF::{timeout, error, output_done}
//! ```

use core::any::Any;

use heapless::Vec;
use q_common::constants::MAX_SCHEDULING_FUNCTIONS;
use q_common::{Error, LinkAddr, Millis, Result, SixtopConfig};

use crate::mac::Mac;
use crate::pkt::Command;
use crate::sixp::{Inbound, Notification, Outbound, OutputStatus, SixpCore, SixpError, SixpHandle};
use crate::timer::TimerService;
use crate::trans::{CallbackToken, TransactionId};

// ============================================================================
// SF Registration
// ============================================================================

/// Set of commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandSet(u8);

impl CommandSet {
    /// No command
    pub const EMPTY: Self = Self(0);

    /// Commands that change the schedule
    pub const SCHEDULE_CHANGES: Self = Self::EMPTY
        .with(Command::Add)
        .with(Command::Delete)
        .with(Command::Relocate);

    /// Add a command
    #[must_use]
    pub const fn with(self, cmd: Command) -> Self {
        Self(self.0 | (1 << cmd as u8))
    }

    /// Check membership
    #[must_use]
    pub const fn contains(&self, cmd: Command) -> bool {
        self.0 & (1 << cmd as u8) != 0
    }
}

/// Registration data of a scheduling function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfDescriptor {
    /// SFID carried in every message of this SF
    pub sfid: u8,
    /// Transaction timeout; zero falls back to the engine default
    pub timeout: Millis,
    /// Commands run as 3-step transactions (ADD, DELETE, RELOCATE only)
    pub three_step: CommandSet,
}

impl SfDescriptor {
    /// Descriptor using 2-step transactions throughout
    #[must_use]
    pub const fn new(sfid: u8, timeout: Millis) -> Self {
        Self {
            sfid,
            timeout,
            three_step: CommandSet::EMPTY,
        }
    }

    /// Run `commands` as 3-step transactions
    #[must_use]
    pub const fn with_three_step(mut self, commands: CommandSet) -> Self {
        self.three_step = commands;
        self
    }
}

/// A scheduling function plugged into 6top
///
/// Every hook gets the engine handle so that the SF can reply or start new
/// transactions from inside it. Only `descriptor` and `input` are required.
pub trait SchedulingFunction {
    /// Registration data
    fn descriptor(&self) -> SfDescriptor;

    /// Called once when the SF is registered
    fn init(&mut self, _sixp: &mut dyn SixpHandle) {}

    /// A Request, Response or Confirmation for this SF arrived
    fn input(&mut self, sixp: &mut dyn SixpHandle, msg: &Inbound<'_>);

    /// A transaction of this SF timed out
    fn timeout(&mut self, _sixp: &mut dyn SixpHandle, _cmd: Command, _peer: &LinkAddr) {}

    /// The dispatcher detected a protocol error on a transaction of this SF
    fn error(
        &mut self,
        _sixp: &mut dyn SixpHandle,
        _error: SixpError,
        _cmd: Command,
        _seqno: u8,
        _peer: &LinkAddr,
    ) {
    }

    /// A transaction sent with a callback token ended
    fn output_done(
        &mut self,
        _sixp: &mut dyn SixpHandle,
        _status: OutputStatus,
        _peer: &LinkAddr,
        _token: CallbackToken,
    ) {
    }

    /// Concrete type access for [`Sixtop::with_sf`]
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
}

// ============================================================================
// 6top Facade
// ============================================================================

type Registry<'a> = Vec<(u8, &'a mut dyn SchedulingFunction), MAX_SCHEDULING_FUNCTIONS>;

fn route_mut<'r, 'a>(
    registry: &'r mut Registry<'a>,
    sfid: u8,
) -> Option<&'r mut (dyn SchedulingFunction + 'a)> {
    registry
        .iter_mut()
        .find(|(id, _)| *id == sfid)
        .map(|(_, sf)| &mut **sf)
}

/// The 6top sublayer: dispatcher plus registered scheduling functions
pub struct Sixtop<'a, M: Mac, T: TimerService> {
    core: SixpCore<M, T>,
    registry: Registry<'a>,
}

impl<'a, M: Mac, T: TimerService> Sixtop<'a, M, T> {
    /// Create the sublayer with no SF registered
    pub fn new(mac: M, timer: T, config: SixtopConfig) -> Self {
        Self {
            core: SixpCore::new(mac, timer, config),
            registry: Vec::new(),
        }
    }

    /// Register a scheduling function and run its `init`
    ///
    /// # Errors
    ///
    /// [`Error::SfidInUse`] or [`Error::SfRegistryFull`].
    pub fn add_sf(&mut self, sf: &'a mut dyn SchedulingFunction) -> Result<()> {
        let desc = sf.descriptor();
        if self.registry.is_full() {
            return Err(Error::SfRegistryFull);
        }
        self.core.register(desc)?;
        self.registry
            .push((desc.sfid, sf))
            .map_err(|_| Error::SfRegistryFull)?;
        if let Some(sf) = route_mut(&mut self.registry, desc.sfid) {
            sf.init(&mut self.core);
        }
        self.drain();
        Ok(())
    }

    /// Registered SF for `sfid`
    #[must_use]
    pub fn route(&self, sfid: u8) -> Option<&(dyn SchedulingFunction + 'a)> {
        self.registry
            .iter()
            .find(|(id, _)| *id == sfid)
            .map(|(_, sf)| &**sf)
    }

    /// Number of registered SFs
    #[must_use]
    pub fn sf_count(&self) -> usize {
        self.registry.len()
    }

    /// Feed a frame received from `src`
    ///
    /// # Errors
    ///
    /// See [`SixpCore::input`]; the frame has been handled (answered or
    /// dropped) either way.
    pub fn input(&mut self, frame: &[u8], src: LinkAddr) -> Result<()> {
        let result = self.core.input(frame, src);
        if let Ok(Some(delivery)) = &result {
            if let Some(sf) = route_mut(&mut self.registry, delivery.inbound.sfid) {
                sf.input(&mut self.core, &delivery.inbound);
            }
            self.core.settle(delivery.id);
        }
        self.drain();
        result.map(|_| ())
    }

    /// Send a message on behalf of an SF
    ///
    /// # Errors
    ///
    /// See [`SixpCore::output`].
    pub fn output(&mut self, out: Outbound<'_>) -> Result<()> {
        let result = self.core.output(out);
        self.drain();
        result
    }

    /// A transaction timer armed by the engine fired
    ///
    /// Returns `false` for stale tokens.
    pub fn timer_expired(&mut self, id: TransactionId) -> bool {
        let fired = self.core.timer_expired(id);
        self.drain();
        fired
    }

    /// The MAC dropped `peer`
    pub fn neighbor_removed(&mut self, peer: &LinkAddr) {
        self.core.neighbor_removed(peer);
        self.drain();
    }

    /// Drop all 6P state with `peer` locally
    pub fn clear(&mut self, peer: &LinkAddr) {
        self.core.clear(peer);
        self.drain();
    }

    /// Run `f` on a registered SF of concrete type `S`
    ///
    /// Returns `None` if `sfid` is not registered or is not an `S`.
    pub fn with_sf<S, R>(&mut self, sfid: u8, f: impl FnOnce(&mut S, &mut dyn SixpHandle) -> R) -> Option<R>
    where
        S: SchedulingFunction + 'static,
    {
        let result = route_mut(&mut self.registry, sfid)
            .and_then(|sf| sf.as_any_mut())
            .and_then(|any| any.downcast_mut::<S>())
            .map(|sf| f(sf, &mut self.core));
        self.drain();
        result
    }

    /// Dispatcher core
    #[must_use]
    pub const fn core(&self) -> &SixpCore<M, T> {
        &self.core
    }

    /// Dispatcher core for update
    ///
    /// Notifications raised through this reference are delivered on the
    /// next entry point.
    pub fn core_mut(&mut self) -> &mut SixpCore<M, T> {
        &mut self.core
    }

    fn drain(&mut self) {
        while let Some(notification) = self.core.pop_notification() {
            let Some(sf) = route_mut(&mut self.registry, notification.sfid()) else {
                continue;
            };
            match notification {
                Notification::OutputDone {
                    status, peer, token, ..
                } => sf.output_done(&mut self.core, status, &peer, token),
                Notification::Timeout { cmd, peer, .. } => sf.timeout(&mut self.core, cmd, &peer),
                Notification::Error {
                    error,
                    cmd,
                    seqno,
                    peer,
                    ..
                } => sf.error(&mut self.core, error, cmd, seqno, &peer),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use q_common::TickFrequency;

    use crate::timer::SoftTimer;

    struct NullMac;

    impl Mac for NullMac {
        fn send(&mut self, _dest: &LinkAddr, _frame: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    struct Quiet {
        sfid: u8,
        inits: u8,
    }

    impl SchedulingFunction for Quiet {
        fn descriptor(&self) -> SfDescriptor {
            SfDescriptor::new(self.sfid, Millis::new(500))
        }

        fn init(&mut self, _sixp: &mut dyn SixpHandle) {
            self.inits += 1;
        }

        fn input(&mut self, _sixp: &mut dyn SixpHandle, _msg: &Inbound<'_>) {}

        fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
            Some(self)
        }
    }

    #[test]
    fn test_command_set() {
        let set = CommandSet::SCHEDULE_CHANGES;
        assert!(set.contains(Command::Add));
        assert!(set.contains(Command::Relocate));
        assert!(!set.contains(Command::List));
        assert!(!CommandSet::EMPTY.contains(Command::Add));
        assert!(CommandSet::EMPTY.with(Command::Clear).contains(Command::Clear));
    }

    #[test]
    fn test_registry() {
        let mut a = Quiet { sfid: 1, inits: 0 };
        let mut b = Quiet { sfid: 1, inits: 0 };
        let mut c = Quiet { sfid: 2, inits: 0 };
        let mut sixtop: Sixtop<'_, NullMac, SoftTimer<4>> =
            Sixtop::new(NullMac, SoftTimer::new(TickFrequency::KHZ_1), SixtopConfig::DEFAULT);
        sixtop.add_sf(&mut a).unwrap();
        assert_eq!(sixtop.add_sf(&mut b), Err(Error::SfidInUse));
        sixtop.add_sf(&mut c).unwrap();
        assert_eq!(sixtop.sf_count(), 2);
        assert!(sixtop.route(2).is_some());
        assert!(sixtop.route(3).is_none());
        assert_eq!(sixtop.with_sf(1, |sf: &mut Quiet, _| sf.inits), Some(1));
        assert_eq!(sixtop.core().descriptor(2).map(|d| d.timeout), Some(Millis::new(500)));
    }

    #[test]
    fn test_registry_full() {
        let mut sfs = [
            Quiet { sfid: 1, inits: 0 },
            Quiet { sfid: 2, inits: 0 },
            Quiet { sfid: 3, inits: 0 },
            Quiet { sfid: 4, inits: 0 },
            Quiet { sfid: 5, inits: 0 },
        ];
        let mut sixtop: Sixtop<'_, NullMac, SoftTimer<4>> =
            Sixtop::new(NullMac, SoftTimer::new(TickFrequency::KHZ_1), SixtopConfig::DEFAULT);
        let mut results = [Ok(()); 5];
        for (sf, result) in sfs.iter_mut().zip(results.iter_mut()) {
            *result = sixtop.add_sf(sf);
        }
        assert_eq!(results[..MAX_SCHEDULING_FUNCTIONS], [Ok(()); MAX_SCHEDULING_FUNCTIONS]);
        assert_eq!(results[4], Err(Error::SfRegistryFull));
    }
}
