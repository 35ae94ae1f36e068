// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! 6P Neighbor Table
//!
//! Per-neighbor soft state: the sequence number the next transaction with the
//! peer will use and the schedule generation counter. Records are created on
//! demand and dropped when the MAC reports the neighbor gone.

use heapless::Vec;
use q_common::constants::{MAX_NEIGHBORS, SIXP_GEN_MAX, SIXP_INITIAL_SEQNUM};
use q_common::{Error, LinkAddr, Result};

/// 6P state kept for one neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Neighbor {
    /// Link-layer address
    addr: LinkAddr,
    /// SeqNum of the next transaction
    next_seqno: u8,
    /// Schedule generation
    gen: u8,
}

impl Neighbor {
    /// Create a fresh record
    #[must_use]
    pub const fn new(addr: LinkAddr) -> Self {
        Self {
            addr,
            next_seqno: SIXP_INITIAL_SEQNUM,
            gen: 0,
        }
    }

    /// Neighbor address
    #[must_use]
    pub const fn addr(&self) -> &LinkAddr {
        &self.addr
    }

    /// SeqNum the next transaction will carry
    #[must_use]
    pub const fn next_seqno(&self) -> u8 {
        self.next_seqno
    }

    /// Set the next SeqNum
    pub fn set_next_seqno(&mut self, seqno: u8) {
        self.next_seqno = seqno;
    }

    /// Advance the next SeqNum, wrapping from 0xFF to 0
    pub fn increment_next_seqno(&mut self) {
        self.next_seqno = self.next_seqno.wrapping_add(1);
    }

    /// Return the SeqNum to its initial value (after CLEAR)
    pub fn reset_next_seqno(&mut self) {
        self.next_seqno = SIXP_INITIAL_SEQNUM;
    }

    /// Schedule generation
    #[must_use]
    pub const fn gen(&self) -> u8 {
        self.gen
    }

    /// Advance the generation: 0 and the maximum go to 1, others count up
    pub fn advance_gen(&mut self) {
        self.gen = if self.gen == 0 || self.gen >= SIXP_GEN_MAX {
            1
        } else {
            self.gen + 1
        };
    }
}

/// Fixed-capacity neighbor table
#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: Vec<Neighbor, MAX_NEIGHBORS>,
}

impl NeighborTable {
    /// Create an empty table
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Look up a neighbor
    #[must_use]
    pub fn find(&self, addr: &LinkAddr) -> Option<&Neighbor> {
        self.entries.iter().find(|n| &n.addr == addr)
    }

    /// Look up a neighbor for update
    pub fn find_mut(&mut self, addr: &LinkAddr) -> Option<&mut Neighbor> {
        self.entries.iter_mut().find(|n| &n.addr == addr)
    }

    /// Add a neighbor
    ///
    /// # Errors
    ///
    /// [`Error::NeighborExists`] if already present,
    /// [`Error::NeighborTableFull`] if no slot is free.
    pub fn alloc(&mut self, addr: LinkAddr) -> Result<&mut Neighbor> {
        if self.find(&addr).is_some() {
            return Err(Error::NeighborExists);
        }
        self.entries
            .push(Neighbor::new(addr))
            .map_err(|_| Error::NeighborTableFull)?;
        self.entries.last_mut().ok_or(Error::InternalError)
    }

    /// Find a neighbor, creating it when missing
    ///
    /// # Errors
    ///
    /// [`Error::NeighborTableFull`] if it has to be created and no slot is
    /// free.
    pub fn get_or_alloc(&mut self, addr: LinkAddr) -> Result<&mut Neighbor> {
        match self.entries.iter().position(|n| n.addr == addr) {
            Some(idx) => Ok(&mut self.entries[idx]),
            None => self.alloc(addr),
        }
    }

    /// Remove a neighbor, returning its last state
    pub fn free(&mut self, addr: &LinkAddr) -> Option<Neighbor> {
        let idx = self.entries.iter().position(|n| &n.addr == addr)?;
        Some(self.entries.swap_remove(idx))
    }

    /// Number of neighbors
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check for an empty table
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over neighbors
    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.entries.iter()
    }

    /// Drop every neighbor
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(val: u8) -> LinkAddr {
        LinkAddr::new([val, 0, 0, 0, 0, 0, 0, 1])
    }

    #[test]
    fn test_alloc_and_find() {
        let mut table = NeighborTable::new();
        assert!(table.find(&addr(1)).is_none());
        let nbr = table.alloc(addr(1)).unwrap();
        assert_eq!(nbr.next_seqno(), 0);
        assert_eq!(nbr.gen(), 0);
        assert_eq!(table.alloc(addr(1)).unwrap_err(), Error::NeighborExists);
        assert_eq!(table.len(), 1);
        assert_eq!(table.find(&addr(1)).map(Neighbor::addr), Some(&addr(1)));
    }

    #[test]
    fn test_table_full() {
        let mut table = NeighborTable::new();
        for i in 0..MAX_NEIGHBORS {
            table.alloc(addr(i as u8)).unwrap();
        }
        assert_eq!(table.alloc(addr(0xff)).unwrap_err(), Error::NeighborTableFull);
        assert_eq!(table.get_or_alloc(addr(0xff)).unwrap_err(), Error::NeighborTableFull);
        assert!(table.get_or_alloc(addr(3)).is_ok());
    }

    #[test]
    fn test_seqno_wraps() {
        let mut nbr = Neighbor::new(addr(1));
        nbr.set_next_seqno(0xff);
        nbr.increment_next_seqno();
        assert_eq!(nbr.next_seqno(), 0);
        nbr.set_next_seqno(10);
        nbr.reset_next_seqno();
        assert_eq!(nbr.next_seqno(), 0);
    }

    #[test]
    fn test_generation_cycle() {
        let mut nbr = Neighbor::new(addr(1));
        let mut seen = [0u8; 10];
        for g in &mut seen {
            nbr.advance_gen();
            *g = nbr.gen();
        }
        assert_eq!(seen, [1, 2, 3, 4, 5, 6, 7, 8, 9, 1]);
    }

    #[test]
    fn test_free() {
        let mut table = NeighborTable::new();
        table.alloc(addr(1)).unwrap().set_next_seqno(4);
        table.alloc(addr(2)).unwrap();
        assert_eq!(table.free(&addr(1)).map(|n| n.next_seqno()), Some(4));
        assert!(table.free(&addr(1)).is_none());
        assert_eq!(table.len(), 1);
        table.clear();
        assert!(table.is_empty());
    }
}
