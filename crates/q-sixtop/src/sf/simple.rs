// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Simple scheduling function
//!
//! A minimal SF that negotiates cells with its neighbors and keeps the
//! result in a fixed-size table. It picks cells first-fit (the first free
//! slot offsets among the candidates) and has no traffic-driven policy of
//! its own: the embedder decides when to add, delete or relocate cells.
//!
//! Responder behaviour:
//!
//! | Request | Reply |
//! |---------|-------|
//! | ADD | SUCCESS with the free candidates (up to NumCells), ERR_BUSY if none is free |
//! | DELETE | SUCCESS with the deleted cells, ERR_CELLLIST if one is not scheduled with the peer |
//! | RELOCATE | SUCCESS with the new cells, ERR_CELLLIST / ERR_BUSY as above |
//! | COUNT | SUCCESS with TotalNumCells |
//! | LIST | SUCCESS or EOL with one window of cells |
//! | SIGNAL | SUCCESS echoing the payload |
//! | CLEAR | SUCCESS, every cell with the peer dropped |
//!
//! In a 3-step transaction the Response only proposes cells; both sides
//! apply the cells listed in the Confirmation.

use core::any::Any;

use heapless::Vec;
use q_common::constants::{MAX_BODY_LEN, MAX_CELLS_PER_LIST, MAX_NEIGHBORS};
use q_common::{Error, LinkAddr, Millis, Result};

use crate::pkt::{Cell, CellList, CellOptions, Command, Field, MessageType, ReplyBody, RequestBody, ReturnCode};
use crate::sf::list::{list_window, ListCursor, ListStep};
use crate::sixp::{Inbound, Outbound, OutputStatus, SixpError, SixpHandle};
use crate::sixtop::{CommandSet, SchedulingFunction, SfDescriptor};
use crate::trans::CallbackToken;

/// SFID used by [`SimpleSf::default`]
pub const SIMPLE_SFID: u8 = 0xf0;

/// Transaction timeout used by [`SimpleSf::default`]
pub const SIMPLE_SF_TIMEOUT: Millis = Millis::from_secs(2);

/// Token tagging LIST Requests, whose completion drives the next window
const LIST_TOKEN: CallbackToken = CallbackToken(0x4c53);
/// Token tagging every other message this SF sends
const TRANS_TOKEN: CallbackToken = CallbackToken(0x5346);

/// A cell negotiated with a neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScheduledCell {
    /// Neighbor sharing the cell
    pub peer: LinkAddr,
    /// Slot and channel offsets
    pub cell: Cell,
    /// Options from this node's point of view
    pub options: CellOptions,
}

/// Event counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SfStats {
    /// Transactions that timed out
    pub timeouts: u32,
    /// Transactions that ended without success
    pub failures: u32,
    /// Responses carrying an error return code
    pub rejected: u32,
    /// Schedule inconsistencies reported by the dispatcher
    pub inconsistencies: u32,
    /// Exchanges left untracked because the pending table was full
    pub untracked: u32,
    /// Inconsistencies whose recovery CLEAR could not be sent
    pub recovery_failures: u32,
}

/// What an open transaction with a peer is about
#[derive(Debug, Clone)]
struct Pending {
    peer: LinkAddr,
    cmd: Command,
    /// Options from this node's point of view
    options: CellOptions,
    num_cells: u8,
    relocate: Vec<Cell, MAX_CELLS_PER_LIST>,
}

/// First-fit scheduling function with room for `N` cells
pub struct SimpleSf<const N: usize = 32> {
    desc: SfDescriptor,
    cells: Vec<ScheduledCell, N>,
    pending: Vec<Pending, MAX_NEIGHBORS>,
    cursor: ListCursor,
    listing: Option<(LinkAddr, CellOptions)>,
    next_window: Option<u16>,
    remote: Vec<Cell, N>,
    last_count: Option<(LinkAddr, u16)>,
    last_signal: Option<(LinkAddr, Vec<u8, MAX_BODY_LEN>)>,
    stats: SfStats,
}

impl<const N: usize> SimpleSf<N> {
    /// Create with a given SFID and timeout, 2-step throughout
    #[must_use]
    pub fn new(sfid: u8, timeout: Millis) -> Self {
        Self {
            desc: SfDescriptor::new(sfid, timeout),
            cells: Vec::new(),
            pending: Vec::new(),
            cursor: ListCursor::default(),
            listing: None,
            next_window: None,
            remote: Vec::new(),
            last_count: None,
            last_signal: None,
            stats: SfStats::default(),
        }
    }

    /// Run `commands` as 3-step transactions
    #[must_use]
    pub fn with_three_step(mut self, commands: CommandSet) -> Self {
        self.desc = self.desc.with_three_step(commands);
        self
    }

    /// Fetch at most `max` cells per LIST Request
    #[must_use]
    pub fn with_list_window(mut self, max: u16) -> Self {
        self.cursor = ListCursor::new(max);
        self
    }

    // ------------------------------------------------------------------------
    // Local schedule
    // ------------------------------------------------------------------------

    /// Every negotiated cell
    #[must_use]
    pub fn cells(&self) -> &[ScheduledCell] {
        &self.cells
    }

    /// Cells negotiated with `peer`
    pub fn cells_with<'s>(&'s self, peer: &'s LinkAddr) -> impl Iterator<Item = &'s ScheduledCell> {
        self.cells.iter().filter(move |e| &e.peer == peer)
    }

    /// Install a cell without negotiation
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] if the slot is taken,
    /// [`Error::BufferTooSmall`] if the table is full.
    pub fn schedule(&mut self, peer: LinkAddr, cell: Cell, options: CellOptions) -> Result<()> {
        if !self.slot_free(cell.slot_offset) {
            return Err(Error::InvalidParameter);
        }
        self.cells
            .push(ScheduledCell { peer, cell, options })
            .map_err(|_| Error::BufferTooSmall)
    }

    /// Cells learned from the last LIST walk
    #[must_use]
    pub fn remote_cells(&self) -> &[Cell] {
        &self.remote
    }

    /// Whether a LIST walk is in progress
    #[must_use]
    pub const fn is_listing(&self) -> bool {
        self.cursor.is_active()
    }

    /// Result of the last COUNT
    #[must_use]
    pub const fn last_count(&self) -> Option<(LinkAddr, u16)> {
        self.last_count
    }

    /// Payload echoed by the last SIGNAL
    #[must_use]
    pub fn last_signal(&self) -> Option<(LinkAddr, &[u8])> {
        self.last_signal.as_ref().map(|(peer, p)| (*peer, p.as_slice()))
    }

    /// Event counters
    #[must_use]
    pub const fn stats(&self) -> SfStats {
        self.stats
    }

    // ------------------------------------------------------------------------
    // Initiator API
    // ------------------------------------------------------------------------

    /// Ask `peer` for `num_cells` of the `candidates`
    ///
    /// # Errors
    ///
    /// Encoding errors or any error of [`SixpHandle::output`].
    pub fn add_cells(
        &mut self,
        sixp: &mut dyn SixpHandle,
        peer: LinkAddr,
        options: CellOptions,
        num_cells: u8,
        candidates: &[Cell],
    ) -> Result<()> {
        let body = RequestBody::Add {
            metadata: 0,
            options,
            num_cells,
            cells: candidates,
        };
        self.request(sixp, peer, &body, TRANS_TOKEN)?;
        self.remember(peer, Command::Add, options, num_cells, &[]);
        Ok(())
    }

    /// Ask `peer` to delete `cells`
    ///
    /// # Errors
    ///
    /// Encoding errors or any error of [`SixpHandle::output`].
    pub fn delete_cells(
        &mut self,
        sixp: &mut dyn SixpHandle,
        peer: LinkAddr,
        options: CellOptions,
        cells: &[Cell],
    ) -> Result<()> {
        let num_cells = u8::try_from(cells.len()).map_err(|_| Error::InvalidParameter)?;
        let body = RequestBody::Delete {
            metadata: 0,
            options,
            num_cells,
            cells,
        };
        self.request(sixp, peer, &body, TRANS_TOKEN)?;
        self.remember(peer, Command::Delete, options, num_cells, &[]);
        Ok(())
    }

    /// Ask `peer` to move `cells` to some of the `candidates`
    ///
    /// # Errors
    ///
    /// Encoding errors or any error of [`SixpHandle::output`].
    pub fn relocate_cells(
        &mut self,
        sixp: &mut dyn SixpHandle,
        peer: LinkAddr,
        options: CellOptions,
        cells: &[Cell],
        candidates: &[Cell],
    ) -> Result<()> {
        let num_cells = u8::try_from(cells.len()).map_err(|_| Error::InvalidParameter)?;
        let body = RequestBody::Relocate {
            metadata: 0,
            options,
            relocate: cells,
            candidates,
        };
        self.request(sixp, peer, &body, TRANS_TOKEN)?;
        self.remember(peer, Command::Relocate, options, num_cells, cells);
        Ok(())
    }

    /// Ask `peer` how many cells with `options` it has with us
    ///
    /// # Errors
    ///
    /// Any error of [`SixpHandle::output`].
    pub fn count_cells(&mut self, sixp: &mut dyn SixpHandle, peer: LinkAddr, options: CellOptions) -> Result<()> {
        self.request(sixp, peer, &RequestBody::Count { metadata: 0, options }, TRANS_TOKEN)
    }

    /// Fetch every cell `peer` has with us, one window per transaction
    ///
    /// # Errors
    ///
    /// Any error of [`SixpHandle::output`].
    pub fn list_cells(&mut self, sixp: &mut dyn SixpHandle, peer: LinkAddr, options: CellOptions) -> Result<()> {
        self.remote.clear();
        self.cursor.start();
        self.listing = Some((peer, options));
        self.next_window = None;
        let result = self.request_window(sixp, peer, options);
        if result.is_err() {
            self.cursor.reset();
            self.listing = None;
        }
        result
    }

    /// Send an opaque payload to `peer`
    ///
    /// # Errors
    ///
    /// Any error of [`SixpHandle::output`].
    pub fn signal(&mut self, sixp: &mut dyn SixpHandle, peer: LinkAddr, payload: &[u8]) -> Result<()> {
        self.request(sixp, peer, &RequestBody::Signal { metadata: 0, payload }, TRANS_TOKEN)
    }

    /// Reset the schedule with `peer`
    ///
    /// Local cells with the peer are dropped right away.
    ///
    /// # Errors
    ///
    /// Any error of [`SixpHandle::output`].
    pub fn clear(&mut self, sixp: &mut dyn SixpHandle, peer: LinkAddr) -> Result<()> {
        self.drop_peer(&peer);
        self.request(sixp, peer, &RequestBody::Clear { metadata: 0 }, TRANS_TOKEN)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn sfid(&self) -> u8 {
        self.desc.sfid
    }

    fn request(
        &mut self,
        sixp: &mut dyn SixpHandle,
        peer: LinkAddr,
        body: &RequestBody<'_>,
        token: CallbackToken,
    ) -> Result<()> {
        let mut buf = [0u8; MAX_BODY_LEN];
        let len = body.encode(&mut buf)?;
        sixp.output(
            Outbound::request(body.command(), self.sfid(), peer, &buf[..len]).with_callback(token),
        )
    }

    fn request_window(&mut self, sixp: &mut dyn SixpHandle, peer: LinkAddr, options: CellOptions) -> Result<()> {
        let body = RequestBody::List {
            metadata: 0,
            options,
            offset: self.cursor.offset(),
            max_num_cells: self.cursor.max(),
        };
        self.request(sixp, peer, &body, LIST_TOKEN)
    }

    fn reply(
        &self,
        sixp: &mut dyn SixpHandle,
        msg_type: MessageType,
        peer: LinkAddr,
        rc: ReturnCode,
        body: ReplyBody<'_>,
    ) -> Result<()> {
        let mut buf = [0u8; MAX_BODY_LEN];
        let len = body.encode(msg_type, rc, &mut buf)?;
        let out = match msg_type {
            MessageType::Confirmation => Outbound::confirmation(rc, self.sfid(), peer, &buf[..len]),
            _ => Outbound::response(rc, self.sfid(), peer, &buf[..len]),
        };
        sixp.output(out.with_callback(TRANS_TOKEN))
    }

    fn respond(&self, sixp: &mut dyn SixpHandle, peer: LinkAddr, rc: ReturnCode, body: ReplyBody<'_>) -> Result<()> {
        self.reply(sixp, MessageType::Response, peer, rc, body)
    }

    fn remember(&mut self, peer: LinkAddr, cmd: Command, options: CellOptions, num_cells: u8, relocate: &[Cell]) {
        self.forget(&peer);
        let mut list = Vec::new();
        for cell in relocate.iter().take(MAX_CELLS_PER_LIST) {
            let _ = list.push(*cell);
        }
        let entry = Pending {
            peer,
            cmd,
            options,
            num_cells,
            relocate: list,
        };
        if self.pending.push(entry).is_err() {
            self.stats.untracked += 1;
        }
    }

    fn forget(&mut self, peer: &LinkAddr) {
        self.pending.retain(|p| &p.peer != peer);
    }

    fn pending_for(&self, peer: &LinkAddr) -> Option<&Pending> {
        self.pending.iter().find(|p| &p.peer == peer)
    }

    fn slot_free(&self, slot_offset: u16) -> bool {
        !self.cells.iter().any(|e| e.cell.slot_offset == slot_offset)
    }

    fn holds(&self, peer: &LinkAddr, cell: &Cell) -> bool {
        self.cells.iter().any(|e| &e.peer == peer && &e.cell == cell)
    }

    /// Entries with `peer` matching `options` as the peer sees them
    fn matching<'s>(&'s self, peer: &'s LinkAddr, options: CellOptions) -> impl Iterator<Item = &'s ScheduledCell> {
        self.cells_with(peer)
            .filter(move |e| options == CellOptions::NONE || e.options.mirrored() == options)
    }

    /// Free candidates, first-fit, at most `limit`
    fn pick_free(&self, candidates: CellList<'_>, limit: usize) -> Vec<Cell, MAX_CELLS_PER_LIST> {
        let mut chosen: Vec<Cell, MAX_CELLS_PER_LIST> = Vec::new();
        let room = N.saturating_sub(self.cells.len());
        for cell in candidates.iter() {
            if chosen.len() >= limit.min(room) {
                break;
            }
            let taken = !self.slot_free(cell.slot_offset)
                || chosen.iter().any(|c| c.slot_offset == cell.slot_offset);
            if !taken && chosen.push(cell).is_err() {
                break;
            }
        }
        chosen
    }

    fn install(&mut self, peer: LinkAddr, cells: impl Iterator<Item = Cell>, options: CellOptions) {
        for cell in cells {
            if self.slot_free(cell.slot_offset) {
                let _ = self.cells.push(ScheduledCell { peer, cell, options });
            }
        }
    }

    fn remove(&mut self, peer: &LinkAddr, cells: impl Iterator<Item = Cell>) {
        for cell in cells {
            self.cells.retain(|e| !(&e.peer == peer && e.cell == cell));
        }
    }

    fn move_cells(&mut self, peer: &LinkAddr, from: &[Cell], to: impl Iterator<Item = Cell>) {
        for (old, new) in from.iter().zip(to) {
            if !self.slot_free(new.slot_offset) {
                continue;
            }
            if let Some(entry) = self.cells.iter_mut().find(|e| &e.peer == peer && &e.cell == old) {
                entry.cell = new;
            }
        }
    }

    fn drop_peer(&mut self, peer: &LinkAddr) {
        self.cells.retain(|e| &e.peer != peer);
    }

    // ------------------------------------------------------------------------
    // Responder side
    // ------------------------------------------------------------------------

    fn on_request(&mut self, sixp: &mut dyn SixpHandle, msg: &Inbound<'_>) -> Result<()> {
        let peer = msg.peer;
        let three_step = sixp
            .transaction(&peer, msg.sfid)
            .is_some_and(|t| t.three_step);
        match msg.cmd {
            Command::Add => {
                let options = options_of(msg)?;
                let num = usize::from(u8_field(msg, Field::NumCells)?);
                let chosen = self.pick_free(msg.cell_list(Field::CellList)?, num);
                if num > 0 && chosen.is_empty() {
                    return self.respond(sixp, peer, ReturnCode::ErrBusy, ReplyBody::Empty);
                }
                if three_step {
                    self.remember(peer, Command::Add, options.mirrored(), 0, &[]);
                } else {
                    self.install(peer, chosen.iter().copied(), options.mirrored());
                }
                self.respond(sixp, peer, ReturnCode::Success, ReplyBody::Cells(&chosen))
            }
            Command::Delete => {
                let num = usize::from(u8_field(msg, Field::NumCells)?);
                let cells = msg.cell_list(Field::CellList)?;
                if !cells.iter().all(|c| self.holds(&peer, &c)) {
                    return self.respond(sixp, peer, ReturnCode::ErrCelllist, ReplyBody::Empty);
                }
                let mut chosen: Vec<Cell, MAX_CELLS_PER_LIST> = Vec::new();
                for cell in cells.iter().take(num) {
                    let _ = chosen.push(cell);
                }
                if three_step {
                    self.remember(peer, Command::Delete, CellOptions::NONE, 0, &[]);
                } else {
                    self.remove(&peer, chosen.iter().copied());
                }
                self.respond(sixp, peer, ReturnCode::Success, ReplyBody::Cells(&chosen))
            }
            Command::Relocate => {
                let options = options_of(msg)?;
                let relocate = msg.cell_list(Field::RelCellList)?;
                if !relocate.iter().all(|c| self.holds(&peer, &c)) {
                    return self.respond(sixp, peer, ReturnCode::ErrCelllist, ReplyBody::Empty);
                }
                let chosen = self.pick_free(msg.cell_list(Field::CandCellList)?, relocate.len());
                if !relocate.is_empty() && chosen.is_empty() {
                    return self.respond(sixp, peer, ReturnCode::ErrBusy, ReplyBody::Empty);
                }
                let mut from: Vec<Cell, MAX_CELLS_PER_LIST> = Vec::new();
                for cell in relocate.iter() {
                    let _ = from.push(cell);
                }
                if three_step {
                    self.remember(peer, Command::Relocate, options.mirrored(), 0, &from);
                } else {
                    self.move_cells(&peer, &from, chosen.iter().copied());
                }
                self.respond(sixp, peer, ReturnCode::Success, ReplyBody::Cells(&chosen))
            }
            Command::Count => {
                let options = options_of(msg)?;
                let total = u16::try_from(self.matching(&peer, options).count()).unwrap_or(u16::MAX);
                self.respond(sixp, peer, ReturnCode::Success, ReplyBody::Total(total))
            }
            Command::List => {
                let options = options_of(msg)?;
                let offset = msg.field(Field::Offset)?;
                let max = msg.field(Field::MaxNumCells)?;
                let mut mine: Vec<Cell, N> = Vec::new();
                for entry in self.matching(&peer, options) {
                    let _ = mine.push(entry.cell);
                }
                #[allow(clippy::cast_possible_truncation)]
                let max = max.min(MAX_CELLS_PER_LIST as u16);
                let (window, rc) = list_window(&mine, offset, max);
                self.respond(sixp, peer, rc, ReplyBody::Cells(window))
            }
            Command::Signal => {
                let payload = msg.payload()?;
                self.respond(sixp, peer, ReturnCode::Success, ReplyBody::Payload(payload))
            }
            Command::Clear => {
                self.drop_peer(&peer);
                self.respond(sixp, peer, ReturnCode::Success, ReplyBody::Empty)
            }
        }
    }

    fn on_confirmation(&mut self, msg: &Inbound<'_>) -> Result<()> {
        if msg.return_code() != Some(ReturnCode::Success) {
            return Ok(());
        }
        let Some(pending) = self.pending_for(&msg.peer).cloned() else {
            return Ok(());
        };
        let cells = msg.cell_list(Field::CellList)?;
        match pending.cmd {
            Command::Add => self.install(msg.peer, cells.iter(), pending.options),
            Command::Delete => self.remove(&msg.peer, cells.iter()),
            Command::Relocate => self.move_cells(&msg.peer, &pending.relocate, cells.iter()),
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Initiator side
    // ------------------------------------------------------------------------

    fn on_response(&mut self, sixp: &mut dyn SixpHandle, msg: &Inbound<'_>) -> Result<()> {
        let peer = msg.peer;
        let rc = msg.return_code().ok_or(Error::InvalidCode)?;
        if msg.cmd == Command::List {
            return self.on_list_response(msg, rc);
        }
        if rc != ReturnCode::Success {
            self.stats.rejected += 1;
            return Ok(());
        }

        let three_step = sixp
            .transaction(&peer, msg.sfid)
            .is_some_and(|t| t.three_step);
        let pending = self.pending_for(&peer).cloned();
        match (msg.cmd, pending) {
            (Command::Add, Some(p)) => {
                let offered = msg.cell_list(Field::CellList)?;
                let mut chosen: Vec<Cell, MAX_CELLS_PER_LIST> = Vec::new();
                for cell in offered.iter().take(usize::from(p.num_cells)) {
                    let _ = chosen.push(cell);
                }
                if three_step {
                    self.reply(sixp, MessageType::Confirmation, peer, ReturnCode::Success, ReplyBody::Cells(&chosen))?;
                }
                self.install(peer, chosen.iter().copied(), p.options);
            }
            (Command::Delete, Some(_)) => {
                let cells = msg.cell_list(Field::CellList)?;
                if three_step {
                    let mut chosen: Vec<Cell, MAX_CELLS_PER_LIST> = Vec::new();
                    for cell in cells.iter() {
                        let _ = chosen.push(cell);
                    }
                    self.reply(sixp, MessageType::Confirmation, peer, ReturnCode::Success, ReplyBody::Cells(&chosen))?;
                }
                self.remove(&peer, cells.iter());
            }
            (Command::Relocate, Some(p)) => {
                let cells = msg.cell_list(Field::CellList)?;
                if three_step {
                    let mut chosen: Vec<Cell, MAX_CELLS_PER_LIST> = Vec::new();
                    for cell in cells.iter() {
                        let _ = chosen.push(cell);
                    }
                    self.reply(sixp, MessageType::Confirmation, peer, ReturnCode::Success, ReplyBody::Cells(&chosen))?;
                }
                self.move_cells(&peer, &p.relocate, cells.iter());
            }
            (Command::Count, _) => {
                self.last_count = Some((peer, msg.field(Field::TotalNumCells)?));
            }
            (Command::Signal, _) => {
                let mut payload = Vec::new();
                payload
                    .extend_from_slice(msg.payload()?)
                    .map_err(|()| Error::BodyTooLong)?;
                self.last_signal = Some((peer, payload));
            }
            _ => {}
        }
        Ok(())
    }

    fn on_list_response(&mut self, msg: &Inbound<'_>, rc: ReturnCode) -> Result<()> {
        if self.listing.map(|(p, _)| p) != Some(msg.peer) {
            return Ok(());
        }
        let mut received = 0;
        if rc.carries_body() {
            let cells = msg.cell_list(Field::CellList)?;
            received = cells.len();
            for cell in cells.iter() {
                if self.remote.push(cell).is_err() {
                    break;
                }
            }
        }
        match self.cursor.advance(rc, received) {
            ListStep::Continue(offset) => self.next_window = Some(offset),
            ListStep::Done => {
                self.next_window = None;
                self.listing = None;
            }
            ListStep::Aborted(_) => {
                self.stats.rejected += 1;
                self.next_window = None;
                self.listing = None;
            }
        }
        Ok(())
    }
}

impl Default for SimpleSf {
    fn default() -> Self {
        Self::new(SIMPLE_SFID, SIMPLE_SF_TIMEOUT)
    }
}

impl<const N: usize> SchedulingFunction for SimpleSf<N> {
    fn descriptor(&self) -> SfDescriptor {
        self.desc
    }

    fn input(&mut self, sixp: &mut dyn SixpHandle, msg: &Inbound<'_>) {
        let result = match msg.msg_type {
            MessageType::Request => self.on_request(sixp, msg),
            MessageType::Response => self.on_response(sixp, msg),
            MessageType::Confirmation => self.on_confirmation(msg),
        };
        if let Err(e) = result {
            if msg.msg_type == MessageType::Request && e.is_encoding_error() {
                let _ = self.respond(sixp, msg.peer, ReturnCode::Err, ReplyBody::Empty);
            }
        }
    }

    fn timeout(&mut self, _sixp: &mut dyn SixpHandle, cmd: Command, peer: &LinkAddr) {
        self.stats.timeouts += 1;
        if cmd == Command::List && self.listing.map(|(p, _)| p) == Some(*peer) {
            self.cursor.reset();
            self.listing = None;
            self.next_window = None;
        }
    }

    fn error(&mut self, sixp: &mut dyn SixpHandle, error: SixpError, _cmd: Command, _seqno: u8, peer: &LinkAddr) {
        if error == SixpError::ScheduleInconsistency {
            self.stats.inconsistencies += 1;
            // Start over from an empty schedule on both sides.
            if self.clear(sixp, *peer).is_err() {
                self.stats.recovery_failures += 1;
            }
        }
    }

    fn output_done(&mut self, sixp: &mut dyn SixpHandle, status: OutputStatus, peer: &LinkAddr, token: CallbackToken) {
        self.forget(peer);
        if status == OutputStatus::Failure {
            self.stats.failures += 1;
        }
        if token != LIST_TOKEN {
            return;
        }
        match (status, self.next_window.take(), self.listing) {
            (OutputStatus::Success, Some(_), Some((listed, options))) if listed == *peer => {
                if self.request_window(sixp, listed, options).is_err() {
                    self.cursor.reset();
                    self.listing = None;
                }
            }
            (OutputStatus::Failure, _, _) => {
                self.cursor.reset();
                self.listing = None;
            }
            _ => {}
        }
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}

fn options_of(msg: &Inbound<'_>) -> Result<CellOptions> {
    u8_field(msg, Field::CellOptions).map(CellOptions::from_bits)
}

#[allow(clippy::cast_possible_truncation)]
fn u8_field(msg: &Inbound<'_>, field: Field) -> Result<u8> {
    msg.field(field).map(|v| v as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(val: u8) -> LinkAddr {
        LinkAddr::new([0, 0, 0, 0, 0, 0, 0, val])
    }

    #[test]
    fn test_schedule_rejects_busy_slot() {
        let mut sf: SimpleSf<4> = SimpleSf::new(SIMPLE_SFID, SIMPLE_SF_TIMEOUT);
        sf.schedule(peer(1), Cell::new(3, 0), CellOptions::TX).unwrap();
        assert_eq!(
            sf.schedule(peer(2), Cell::new(3, 5), CellOptions::RX),
            Err(Error::InvalidParameter)
        );
        assert_eq!(sf.cells_with(&peer(1)).count(), 1);
        assert_eq!(sf.cells_with(&peer(2)).count(), 0);
    }

    #[test]
    fn test_matching_uses_peer_view() {
        let mut sf: SimpleSf<4> = SimpleSf::new(SIMPLE_SFID, SIMPLE_SF_TIMEOUT);
        sf.schedule(peer(1), Cell::new(1, 0), CellOptions::TX).unwrap();
        sf.schedule(peer(1), Cell::new(2, 0), CellOptions::RX).unwrap();
        assert_eq!(sf.matching(&peer(1), CellOptions::RX).count(), 1);
        assert_eq!(sf.matching(&peer(1), CellOptions::NONE).count(), 2);
        assert_eq!(sf.matching(&peer(2), CellOptions::NONE).count(), 0);
    }

    #[test]
    fn test_pick_free_skips_used_and_duplicate_slots() {
        let mut sf: SimpleSf<8> = SimpleSf::new(SIMPLE_SFID, SIMPLE_SF_TIMEOUT);
        sf.schedule(peer(9), Cell::new(1, 0), CellOptions::TX).unwrap();
        let mut raw = [0u8; 16];
        for (chunk, cell) in raw
            .chunks_exact_mut(4)
            .zip([Cell::new(1, 1), Cell::new(2, 0), Cell::new(2, 3), Cell::new(4, 0)])
        {
            chunk.copy_from_slice(&cell.to_bytes());
        }
        let candidates = CellList::new(&raw).unwrap();
        let chosen = sf.pick_free(candidates, 8);
        assert_eq!(chosen.as_slice(), &[Cell::new(2, 0), Cell::new(4, 0)]);
        assert_eq!(sf.pick_free(candidates, 1).len(), 1);
    }

    #[test]
    fn test_pending_overflow_is_counted() {
        let mut sf: SimpleSf<4> = SimpleSf::new(SIMPLE_SFID, SIMPLE_SF_TIMEOUT);
        for val in 0..20u8 {
            sf.remember(peer(val), Command::Add, CellOptions::TX, 1, &[]);
        }
        assert_eq!(sf.pending.len(), MAX_NEIGHBORS);
        assert_eq!(sf.stats().untracked, 20 - u32::try_from(MAX_NEIGHBORS).unwrap());

        // A known peer replaces its own entry.
        sf.remember(peer(0), Command::Delete, CellOptions::RX, 1, &[]);
        assert_eq!(sf.stats().untracked, 4);
        assert_eq!(sf.pending_for(&peer(0)).map(|p| p.cmd), Some(Command::Delete));
    }

    #[test]
    fn test_move_cells() {
        let mut sf: SimpleSf<4> = SimpleSf::new(SIMPLE_SFID, SIMPLE_SF_TIMEOUT);
        sf.schedule(peer(1), Cell::new(1, 0), CellOptions::TX).unwrap();
        sf.move_cells(&peer(1), &[Cell::new(1, 0)], [Cell::new(7, 2)].into_iter());
        assert_eq!(sf.cells()[0].cell, Cell::new(7, 2));
        assert_eq!(sf.cells()[0].options, CellOptions::TX);
    }
}
