// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! LIST pagination
//!
//! A LIST exchange returns at most MaxNumCells cells per transaction. The
//! responder answers with the window starting at Offset and RC_SUCCESS while
//! cells remain after it, RC_EOL once the window reaches the end. The
//! initiator walks the list with a [`ListCursor`], issuing one LIST Request
//! per window.

use crate::pkt::{Cell, ReturnCode};

/// Window of `cells` for a LIST Request
///
/// An empty window (zero `max`, or `offset` past the end) is reported as
/// RC_EOL so the initiator stops.
#[must_use]
pub fn list_window(cells: &[Cell], offset: u16, max: u16) -> (&[Cell], ReturnCode) {
    let start = usize::from(offset).min(cells.len());
    let end = start.saturating_add(usize::from(max)).min(cells.len());
    let window = &cells[start..end];
    let rc = if window.is_empty() || end == cells.len() {
        ReturnCode::Eol
    } else {
        ReturnCode::Success
    };
    (window, rc)
}

/// What the initiator does after a LIST Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStep {
    /// Request the next window at this offset
    Continue(u16),
    /// The whole list has been received
    Done,
    /// The responder refused; the walk was abandoned
    Aborted(ReturnCode),
}

/// Initiator-side position in a LIST walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListCursor {
    offset: u16,
    max: u16,
    active: bool,
}

impl ListCursor {
    /// Cursor fetching `max` cells per window
    #[must_use]
    pub const fn new(max: u16) -> Self {
        Self {
            offset: 0,
            max,
            active: false,
        }
    }

    /// Begin a walk at offset zero
    pub fn start(&mut self) {
        self.offset = 0;
        self.active = true;
    }

    /// Offset of the next Request
    #[must_use]
    pub const fn offset(&self) -> u16 {
        self.offset
    }

    /// Window size
    #[must_use]
    pub const fn max(&self) -> u16 {
        self.max
    }

    /// Whether a walk is in progress
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Account for a Response carrying `rc` and `received` cells
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&mut self, rc: ReturnCode, received: usize) -> ListStep {
        match rc {
            ReturnCode::Success if received > 0 => {
                self.offset = self.offset.saturating_add(received.min(usize::from(u16::MAX)) as u16);
                ListStep::Continue(self.offset)
            }
            ReturnCode::Success | ReturnCode::Eol => {
                self.reset();
                ListStep::Done
            }
            other => {
                self.reset();
                ListStep::Aborted(other)
            }
        }
    }

    /// Abandon the walk
    pub fn reset(&mut self) {
        self.offset = 0;
        self.active = false;
    }
}

impl Default for ListCursor {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self::new(q_common::constants::MAX_CELLS_PER_LIST as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells() -> [Cell; 10] {
        let mut out = [Cell::default(); 10];
        for (i, c) in out.iter_mut().enumerate() {
            *c = Cell::new(i as u16, 0);
        }
        out
    }

    #[test]
    fn test_windows() {
        let all = cells();
        let (w, rc) = list_window(&all, 0, 4);
        assert_eq!((w, rc), (&all[0..4], ReturnCode::Success));
        let (w, rc) = list_window(&all, 4, 4);
        assert_eq!((w, rc), (&all[4..8], ReturnCode::Success));
        let (w, rc) = list_window(&all, 8, 4);
        assert_eq!((w, rc), (&all[8..10], ReturnCode::Eol));
    }

    #[test]
    fn test_edge_windows() {
        let all = cells();
        assert_eq!(list_window(&all, 6, 4), (&all[6..10], ReturnCode::Eol));
        assert_eq!(list_window(&all, 10, 4).1, ReturnCode::Eol);
        assert_eq!(list_window(&all, 200, 4).0.len(), 0);
        assert_eq!(list_window(&all, 0, 0), (&all[0..0], ReturnCode::Eol));
        assert_eq!(list_window(&[], 0, 4).1, ReturnCode::Eol);
    }

    #[test]
    fn test_cursor_walk() {
        let mut cursor = ListCursor::new(4);
        cursor.start();
        assert!(cursor.is_active());
        assert_eq!(cursor.advance(ReturnCode::Success, 4), ListStep::Continue(4));
        assert_eq!(cursor.advance(ReturnCode::Success, 4), ListStep::Continue(8));
        assert_eq!(cursor.offset(), 8);
        assert_eq!(cursor.advance(ReturnCode::Eol, 2), ListStep::Done);
        assert_eq!(cursor.offset(), 0);
        assert!(!cursor.is_active());
    }

    #[test]
    fn test_cursor_abort() {
        let mut cursor = ListCursor::new(4);
        cursor.start();
        cursor.advance(ReturnCode::Success, 4);
        assert_eq!(
            cursor.advance(ReturnCode::ErrBusy, 0),
            ListStep::Aborted(ReturnCode::ErrBusy)
        );
        assert_eq!(cursor.offset(), 0);
        assert_eq!(ListCursor::default().max(), 24);
    }
}
