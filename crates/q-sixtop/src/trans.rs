// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! 6P Transaction Table
//!
//! Holds every in-flight 6P transaction, at most one per (peer, SFID) pair.
//! Each transaction is a small state machine driven by [`TransEvent`]s; the
//! legal transitions depend on whether this node initiated the transaction
//! or is responding to it:
//!
//! ```text
//! Initiator:  Init -> RequestSent -> ResponseReceived -> ConfirmationSent
//! Responder:  Init -> RequestReceived -> ResponseSent -> ConfirmationReceived
//! ```
//!
//! A 2-step transaction is complete once the Response has been sent or
//! received; a 3-step one once the Confirmation has. A Response carrying
//! anything but SUCCESS ends a 3-step transaction early.
//!
//! Slots are addressed by [`TransactionId`], which carries a per-slot
//! generation so that a timer armed for a transaction that has since been
//! freed (and whose slot was reused) can be recognised and ignored.

use core::fmt;

use heapless::Vec;
use q_common::constants::{MAX_BODY_LEN, MAX_TRANSACTIONS};
use q_common::{Error, LinkAddr, Result};
use zeroize::Zeroize;

use crate::pkt::{Command, ReturnCode};
use crate::timer::TimerHandle;

/// Which side of the handshake this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// This node sent the Request
    Initiator,
    /// This node received the Request
    Responder,
}

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransactionState {
    /// Created, nothing exchanged yet
    Init,
    /// Request sent, awaiting Response
    RequestSent,
    /// Request received, Response pending
    RequestReceived,
    /// Response sent
    ResponseSent,
    /// Response received
    ResponseReceived,
    /// Confirmation sent
    ConfirmationSent,
    /// Confirmation received
    ConfirmationReceived,
}

impl TransactionState {
    /// Get the state name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::RequestSent => "request_sent",
            Self::RequestReceived => "request_received",
            Self::ResponseSent => "response_sent",
            Self::ResponseReceived => "response_received",
            Self::ConfirmationSent => "confirmation_sent",
            Self::ConfirmationReceived => "confirmation_received",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event that moves a transaction forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransEvent {
    /// Request handed to the MAC
    RequestSent,
    /// Request arrived
    RequestReceived,
    /// Response handed to the MAC
    ResponseSent,
    /// Response arrived
    ResponseReceived,
    /// Confirmation handed to the MAC
    ConfirmationSent,
    /// Confirmation arrived
    ConfirmationReceived,
}

impl TransEvent {
    /// Resulting state when `role` may apply this event in `from`
    const fn transition(self, role: Role, from: TransactionState) -> Option<TransactionState> {
        use TransactionState as S;
        match (role, from, self) {
            (Role::Initiator, S::Init, Self::RequestSent) => Some(S::RequestSent),
            (Role::Initiator, S::RequestSent, Self::ResponseReceived) => Some(S::ResponseReceived),
            (Role::Initiator, S::ResponseReceived, Self::ConfirmationSent) => {
                Some(S::ConfirmationSent)
            }
            (Role::Responder, S::Init, Self::RequestReceived) => Some(S::RequestReceived),
            (Role::Responder, S::RequestReceived, Self::ResponseSent) => Some(S::ResponseSent),
            (Role::Responder, S::ResponseSent, Self::ConfirmationReceived) => {
                Some(S::ConfirmationReceived)
            }
            _ => None,
        }
    }
}

/// Handle to a transaction slot
///
/// Doubles as the timer token. The generation changes every time the slot
/// is released, so an old id never resolves to a newer transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionId {
    slot: u8,
    generation: u16,
}

impl TransactionId {
    /// Pack into a single word (for alarm APIs taking a `u32` argument)
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        ((self.generation as u32) << 8) | self.slot as u32
    }

    /// Unpack from [`TransactionId::to_u32`]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_u32(raw: u32) -> Self {
        Self {
            slot: raw as u8,
            generation: (raw >> 8) as u16,
        }
    }

    /// Slot index
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot as usize
    }
}

/// Opaque value handed back to the SF in `output_done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallbackToken(pub u32);

/// One 6P transaction
pub struct Transaction {
    peer: LinkAddr,
    sfid: u8,
    seqno: u8,
    cmd: Command,
    role: Role,
    state: TransactionState,
    three_step: bool,
    response_code: Option<ReturnCode>,
    /// Last body exchanged; cleared when the slot is released
    body: Vec<u8, MAX_BODY_LEN>,
    timer: Option<TimerHandle>,
    callback: Option<CallbackToken>,
}

impl Transaction {
    fn new(peer: LinkAddr, sfid: u8, seqno: u8, cmd: Command, role: Role, three_step: bool) -> Self {
        Self {
            peer,
            sfid,
            seqno,
            cmd,
            role,
            state: TransactionState::Init,
            three_step: three_step && cmd.supports_confirmation(),
            response_code: None,
            body: Vec::new(),
            timer: None,
            callback: None,
        }
    }

    /// Peer address
    #[must_use]
    pub const fn peer(&self) -> &LinkAddr {
        &self.peer
    }

    /// Owning SF
    #[must_use]
    pub const fn sfid(&self) -> u8 {
        self.sfid
    }

    /// SeqNum of this transaction
    #[must_use]
    pub const fn seqno(&self) -> u8 {
        self.seqno
    }

    /// Command being negotiated
    #[must_use]
    pub const fn cmd(&self) -> Command {
        self.cmd
    }

    /// Local role
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether a Confirmation step is expected
    #[must_use]
    pub const fn is_three_step(&self) -> bool {
        self.three_step
    }

    /// Return code of the Response, once sent or received
    #[must_use]
    pub const fn response_code(&self) -> Option<ReturnCode> {
        self.response_code
    }

    /// Remember the Response's return code
    pub fn record_response(&mut self, rc: ReturnCode) {
        self.response_code = Some(rc);
    }

    /// Whether the handshake has run its course
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.state {
            TransactionState::ResponseSent | TransactionState::ResponseReceived => {
                !self.three_step || self.response_code != Some(ReturnCode::Success)
            }
            TransactionState::ConfirmationSent | TransactionState::ConfirmationReceived => true,
            _ => false,
        }
    }

    /// Last body exchanged
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Keep a copy of the body last exchanged
    ///
    /// # Errors
    ///
    /// [`Error::BodyTooLong`] if it exceeds `MAX_BODY_LEN`.
    pub fn set_body(&mut self, body: &[u8]) -> Result<()> {
        self.body.as_mut_slice().zeroize();
        self.body.clear();
        self.body
            .extend_from_slice(body)
            .map_err(|()| Error::BodyTooLong)
    }

    /// Armed timeout, if any
    #[must_use]
    pub const fn timer(&self) -> Option<TimerHandle> {
        self.timer
    }

    /// Replace the armed timeout, returning the previous one
    pub fn replace_timer(&mut self, timer: Option<TimerHandle>) -> Option<TimerHandle> {
        core::mem::replace(&mut self.timer, timer)
    }

    /// Callback token
    #[must_use]
    pub const fn callback(&self) -> Option<CallbackToken> {
        self.callback
    }

    /// Set the callback token; `None` keeps the current one
    pub fn set_callback(&mut self, callback: Option<CallbackToken>) {
        if callback.is_some() {
            self.callback = callback;
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("peer", &self.peer)
            .field("sfid", &self.sfid)
            .field("seqno", &self.seqno)
            .field("cmd", &self.cmd)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("three_step", &self.three_step)
            .finish_non_exhaustive()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.body.as_mut_slice().zeroize();
    }
}

/// Fixed-capacity transaction table
pub struct TransactionTable {
    slots: [Option<Transaction>; MAX_TRANSACTIONS],
    generations: [u16; MAX_TRANSACTIONS],
}

impl TransactionTable {
    /// Create an empty table
    #[must_use]
    pub const fn new() -> Self {
        const NONE: Option<Transaction> = None;
        Self {
            slots: [NONE; MAX_TRANSACTIONS],
            generations: [0; MAX_TRANSACTIONS],
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn id_of(&self, slot: usize) -> TransactionId {
        TransactionId {
            slot: slot as u8,
            generation: self.generations[slot],
        }
    }

    /// Transaction for a (peer, SFID) pair
    #[must_use]
    pub fn find(&self, peer: &LinkAddr, sfid: u8) -> Option<TransactionId> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|t| &t.peer == peer && t.sfid == sfid))
            .map(|slot| self.id_of(slot))
    }

    /// Start a transaction in `Init`
    ///
    /// # Errors
    ///
    /// [`Error::TransactionBusy`] if the pair already has one we initiated,
    /// [`Error::TransactionLocked`] if it has one we are responding to,
    /// [`Error::TransactionTableFull`] if every slot is taken.
    pub fn create(
        &mut self,
        peer: LinkAddr,
        sfid: u8,
        seqno: u8,
        cmd: Command,
        role: Role,
        three_step: bool,
    ) -> Result<TransactionId> {
        if let Some(existing) = self.find(&peer, sfid).and_then(|id| self.get(id)) {
            return Err(match existing.role {
                Role::Initiator => Error::TransactionBusy,
                Role::Responder => Error::TransactionLocked,
            });
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::TransactionTableFull)?;
        self.slots[slot] = Some(Transaction::new(peer, sfid, seqno, cmd, role, three_step));
        Ok(self.id_of(slot))
    }

    /// Resolve an id; stale ids resolve to `None`
    #[must_use]
    pub fn get(&self, id: TransactionId) -> Option<&Transaction> {
        if self.generations.get(id.slot())? != &id.generation {
            return None;
        }
        self.slots[id.slot()].as_ref()
    }

    /// Resolve an id for update
    pub fn get_mut(&mut self, id: TransactionId) -> Option<&mut Transaction> {
        if self.generations.get(id.slot())? != &id.generation {
            return None;
        }
        self.slots[id.slot()].as_mut()
    }

    /// Apply an event
    ///
    /// # Errors
    ///
    /// [`Error::NoTransaction`] for a stale id, [`Error::InvalidTransition`]
    /// if the event is not legal in the current state (state unchanged).
    pub fn advance(&mut self, id: TransactionId, event: TransEvent) -> Result<TransactionState> {
        let trans = self.get_mut(id).ok_or(Error::NoTransaction)?;
        let next = event
            .transition(trans.role, trans.state)
            .ok_or(Error::InvalidTransition)?;
        trans.state = next;
        Ok(next)
    }

    /// Release a slot, returning the transaction it held
    ///
    /// The caller is responsible for cancelling its timer.
    pub fn free(&mut self, id: TransactionId) -> Option<Transaction> {
        self.get(id)?;
        let trans = self.slots[id.slot()].take();
        self.generations[id.slot()] = self.generations[id.slot()].wrapping_add(1);
        trans
    }

    /// Ids of every transaction with `peer`
    #[must_use]
    pub fn ids_for_peer(&self, peer: &LinkAddr) -> Vec<TransactionId, MAX_TRANSACTIONS> {
        let mut ids = Vec::new();
        for (slot, entry) in self.slots.iter().enumerate() {
            if entry.as_ref().is_some_and(|t| &t.peer == peer) {
                // Capacity equals the slot count.
                let _ = ids.push(self.id_of(slot));
            }
        }
        ids
    }

    /// Number of live transactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Check for an empty table
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Iterate over live transactions
    pub fn iter(&self) -> impl Iterator<Item = (TransactionId, &Transaction)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, t)| t.as_ref().map(|t| (self.id_of(slot), t)))
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(val: u8) -> LinkAddr {
        LinkAddr::new([0, 0, 0, 0, 0, 0, 0, val])
    }

    #[test]
    fn test_at_most_one_per_pair() {
        let mut table = TransactionTable::new();
        let id = table
            .create(peer(1), 0xf1, 0, Command::Add, Role::Initiator, false)
            .unwrap();
        assert_eq!(
            table.create(peer(1), 0xf1, 1, Command::Count, Role::Responder, false),
            Err(Error::TransactionBusy)
        );
        assert!(table.create(peer(1), 0xf2, 0, Command::Add, Role::Responder, false).is_ok());
        assert!(table.create(peer(2), 0xf1, 0, Command::Add, Role::Responder, false).is_ok());
        assert_eq!(table.find(&peer(1), 0xf1), Some(id));
        assert_eq!(table.get(id).map(Transaction::seqno), Some(0));
        assert_eq!(table.len(), 3);

        let rid = table.find(&peer(2), 0xf1).unwrap();
        assert_eq!(
            table.create(peer(2), 0xf1, 3, Command::Add, Role::Initiator, false),
            Err(Error::TransactionLocked)
        );
        assert_eq!(table.get(rid).map(Transaction::role), Some(Role::Responder));
    }

    #[test]
    fn test_table_full() {
        let mut table = TransactionTable::new();
        for i in 0..MAX_TRANSACTIONS {
            table
                .create(peer(i as u8), 1, 0, Command::Add, Role::Initiator, false)
                .unwrap();
        }
        assert_eq!(
            table.create(peer(0xff), 1, 0, Command::Add, Role::Initiator, false),
            Err(Error::TransactionTableFull)
        );
    }

    #[test]
    fn test_initiator_transitions() {
        let mut table = TransactionTable::new();
        let id = table
            .create(peer(1), 1, 5, Command::Add, Role::Initiator, true)
            .unwrap();
        assert_eq!(
            table.advance(id, TransEvent::ResponseReceived),
            Err(Error::InvalidTransition)
        );
        assert_eq!(table.get(id).map(Transaction::state), Some(TransactionState::Init));
        assert_eq!(table.advance(id, TransEvent::RequestSent), Ok(TransactionState::RequestSent));
        assert_eq!(
            table.advance(id, TransEvent::RequestReceived),
            Err(Error::InvalidTransition)
        );
        assert_eq!(
            table.advance(id, TransEvent::ResponseReceived),
            Ok(TransactionState::ResponseReceived)
        );
        table.get_mut(id).unwrap().record_response(ReturnCode::Success);
        assert!(!table.get(id).unwrap().is_complete());
        assert_eq!(
            table.advance(id, TransEvent::ConfirmationSent),
            Ok(TransactionState::ConfirmationSent)
        );
        assert!(table.get(id).unwrap().is_complete());
    }

    #[test]
    fn test_responder_transitions() {
        let mut table = TransactionTable::new();
        let id = table
            .create(peer(1), 1, 5, Command::Delete, Role::Responder, false)
            .unwrap();
        assert_eq!(table.advance(id, TransEvent::RequestSent), Err(Error::InvalidTransition));
        table.advance(id, TransEvent::RequestReceived).unwrap();
        assert!(!table.get(id).unwrap().is_complete());
        table.advance(id, TransEvent::ResponseSent).unwrap();
        assert!(table.get(id).unwrap().is_complete());
    }

    #[test]
    fn test_error_response_ends_three_step() {
        let mut table = TransactionTable::new();
        let id = table
            .create(peer(1), 1, 0, Command::Relocate, Role::Responder, true)
            .unwrap();
        table.advance(id, TransEvent::RequestReceived).unwrap();
        table.advance(id, TransEvent::ResponseSent).unwrap();
        table.get_mut(id).unwrap().record_response(ReturnCode::ErrCelllist);
        assert!(table.get(id).unwrap().is_complete());
    }

    #[test]
    fn test_read_only_commands_never_three_step() {
        let mut table = TransactionTable::new();
        let id = table
            .create(peer(1), 1, 0, Command::List, Role::Initiator, true)
            .unwrap();
        assert!(!table.get(id).unwrap().is_three_step());
    }

    #[test]
    fn test_stale_id_after_free() {
        let mut table = TransactionTable::new();
        let old = table
            .create(peer(1), 1, 0, Command::Add, Role::Initiator, false)
            .unwrap();
        assert!(table.free(old).is_some());
        assert!(table.free(old).is_none());
        let new = table
            .create(peer(1), 1, 1, Command::Add, Role::Initiator, false)
            .unwrap();
        assert_eq!(new.slot(), old.slot());
        assert_ne!(new, old);
        assert!(table.get(old).is_none());
        assert_eq!(table.advance(old, TransEvent::RequestSent), Err(Error::NoTransaction));
        assert_eq!(TransactionId::from_u32(new.to_u32()), new);
    }

    #[test]
    fn test_ids_for_peer_and_callback() {
        let mut table = TransactionTable::new();
        let a = table.create(peer(1), 1, 0, Command::Add, Role::Initiator, false).unwrap();
        table.create(peer(1), 2, 0, Command::Add, Role::Responder, false).unwrap();
        table.create(peer(2), 1, 0, Command::Add, Role::Responder, false).unwrap();
        assert_eq!(table.ids_for_peer(&peer(1)).len(), 2);

        let t = table.get_mut(a).unwrap();
        t.set_callback(Some(CallbackToken(7)));
        t.set_callback(None);
        assert_eq!(t.callback(), Some(CallbackToken(7)));
        t.set_body(&[1, 2, 3]).unwrap();
        assert_eq!(t.body(), &[1, 2, 3]);
        assert_eq!(t.set_body(&[0; MAX_BODY_LEN + 1]), Err(Error::BodyTooLong));
    }
}
